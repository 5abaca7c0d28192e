use log::{debug, warn};

use crate::error::SizeComputationError;
use crate::ir::graph::{Graph, TensorKind};
use crate::ir::op::OpKind;
use crate::ir::shape::Shape;
use crate::profile::OptimizationProfile;

use super::document::{BufferResource, ShaderAccess};

/// Buffers for a graph plus the operand slots of every leaf node.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub buffers: Vec<BufferResource>,
    /// One entry per `graph.nodes`, same order.
    pub slots: Vec<OperandSlots>,
}

/// Buffer uids a dispatch reads and writes, by role.
///
/// The planner turns these into positional bindings, so a shader's argument
/// layout follows from the role and never from a hand-written index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandSlots {
    pub primary: String,
    /// Weights, normalization parameters, or the second operand of an add.
    pub parameter: Option<String>,
    /// `None` for in-place nodes, which write `primary`.
    pub output: Option<String>,
}

/**
 * Assign every buffer the graph needs and size it for `profile`.
 */
pub fn allocate(
    graph: &Graph,
    profile: &OptimizationProfile,
) -> Result<Allocation, SizeComputationError> {
    let dtype_size = profile.dtype_size();
    let mut buffers = Vec::new();

    for &id in &graph.inputs {
        let tensor = graph.tensor(id);
        if !graph.is_consumed(id) {
            warn!("input '{}' is never consumed, no buffer allocated", tensor.uid);
            continue;
        }
        let src = match &tensor.kind {
            TensorKind::Input { src } => src.clone(),
            _ => None,
        };
        buffers.push(sized_buffer(
            &tensor.uid,
            &tensor.shape,
            ShaderAccess::ReadOnly,
            src,
            dtype_size,
        )?);
    }

    let mut slots = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let input = graph.tensor(node.inputs[0]);

        if node.in_place {
            slots.push(OperandSlots {
                primary: input.uid.clone(),
                parameter: None,
                output: None,
            });
            continue;
        }

        let parameter = match &node.kind {
            OpKind::Add => Some(graph.tensor(node.inputs[1]).uid.clone()),
            kind => match kind.parameter_shape(&input.shape) {
                Some(shape) => {
                    let uid = weights_uid(&node.id);
                    buffers.push(sized_buffer(
                        &uid,
                        &shape,
                        ShaderAccess::ReadOnly,
                        node.weights.clone(),
                        dtype_size,
                    )?);
                    Some(uid)
                }
                None => {
                    if let Some(src) = &node.weights {
                        debug!(
                            "op '{}' has no parameter buffer, ignoring weights '{src}'",
                            node.id
                        );
                    }
                    None
                }
            },
        };

        let output = graph.tensor(node.output);
        let access = if output.mutated_in_place {
            ShaderAccess::ReadWrite
        } else {
            ShaderAccess::WriteOnly
        };
        buffers.push(sized_buffer(&output.uid, &output.shape, access, None, dtype_size)?);

        slots.push(OperandSlots {
            primary: input.uid.clone(),
            parameter,
            output: Some(output.uid.clone()),
        });
    }

    debug!(
        "allocated {} buffers ({} bytes) for {} nodes",
        buffers.len(),
        buffers.iter().map(|b| b.size).sum::<u64>(),
        graph.nodes.len()
    );

    Ok(Allocation { buffers, slots })
}

/// Uid of the parameter buffer generated for op `op_id`.
pub fn weights_uid(op_id: &str) -> String {
    format!("{op_id}_weights")
}

/// `element_count(shape) × dtype_size`, rejecting non-positive and unrepresentable sizes.
pub fn buffer_size(uid: &str, shape: &Shape, dtype_size: u64) -> Result<u64, SizeComputationError> {
    if !shape.is_positive() {
        return Err(SizeComputationError::NonPositiveSize {
            uid: uid.to_string(),
            shape: shape.clone(),
        });
    }
    let overflow = || SizeComputationError::Overflow {
        uid: uid.to_string(),
        shape: shape.clone(),
    };
    let bytes = shape
        .element_count()
        .and_then(|n| n.checked_mul(dtype_size))
        .ok_or_else(overflow)?;
    // must also be addressable on this host
    usize::try_from(bytes).map_err(|_| overflow())?;
    Ok(bytes)
}

fn sized_buffer(
    uid: &str,
    shape: &Shape,
    access: ShaderAccess,
    src: Option<String>,
    dtype_size: u64,
) -> Result<BufferResource, SizeComputationError> {
    Ok(BufferResource {
        uid: uid.to_string(),
        shader_access: access,
        size: buffer_size(uid, shape, dtype_size)?,
        src,
    })
}
