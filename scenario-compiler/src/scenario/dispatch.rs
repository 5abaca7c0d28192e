use log::debug;

use crate::ir::graph::Graph;
use crate::ir::op::OpKind;
use crate::ir::shape::Shape;

use super::alloc::{Allocation, OperandSlots};
use super::document::{Binding, Command, DispatchCompute};
use super::shader::ShaderTable;

/// All dispatches share one descriptor set.
pub const DESCRIPTOR_SET: u32 = 0;

/**
 * One dispatch per graph node, in graph order.
 *
 * `allocation` and `shaders` must have been built from the same `graph`;
 * with that given the planner cannot fail.
 */
pub fn plan(graph: &Graph, allocation: &Allocation, shaders: &ShaderTable) -> Vec<Command> {
    graph
        .nodes
        .iter()
        .zip(&allocation.slots)
        .zip(&shaders.per_node)
        .map(|((node, slots), shader)| {
            let output = graph.tensor(node.output);
            let range_nd = range(&node.kind, &output.shape);
            debug!("dispatch '{}' -> {shader} {range_nd:?}", node.id);
            Command::DispatchCompute(DispatchCompute {
                shader_ref: shader.clone(),
                range_nd,
                bindings: bindings(slots),
            })
        })
        .collect()
}

/// Workgroup grid for a node writing `output`.
pub fn range(kind: &OpKind, output: &Shape) -> [u64; 3] {
    match kind {
        OpKind::Conv2d(_) | OpKind::ConvTranspose2d(_) | OpKind::MaxPool(_) => {
            let [_, h, w, _] = output.nhwc().unwrap_or_default();
            [extent(w), extent(h), 1]
        }
        OpKind::FullyConnected(p) => [extent(p.units), 1, 1],
        // leaves only; expansion removes residual blocks before planning
        OpKind::Relu
        | OpKind::Tanh
        | OpKind::InstanceNorm(_)
        | OpKind::Add
        | OpKind::ResidualBlock(_) => [output.element_count().unwrap_or_default(), 1, 1],
    }
}

fn extent(dim: i64) -> u64 {
    u64::try_from(dim).unwrap_or_default()
}

/// Positional bindings: primary, then parameter if any, then output if any.
fn bindings(slots: &OperandSlots) -> Vec<Binding> {
    std::iter::once(&slots.primary)
        .chain(slots.parameter.as_ref())
        .chain(slots.output.as_ref())
        .zip(0u32..)
        .map(|(uid, id)| Binding {
            id,
            set: DESCRIPTOR_SET,
            resource_ref: uid.clone(),
        })
        .collect()
}
