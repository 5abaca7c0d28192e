//! Scenario graph compiler: turns an ML operation list into a GPU compute
//! scenario document (buffers, shaders, dispatches) for a scenario runtime.

pub mod error;
pub mod ir;
pub mod parse;
pub mod profile;
pub mod scenario;

use log::{debug, info};

use scenario::{Allocation, ShaderTable};

pub use error::{
    CompileError, GraphValidationError, SerializationError, SizeComputationError,
    UnsupportedOperationError,
};
pub use ir::{ExternalInput, Graph, OpKind, OpType, Operation};
pub use profile::{DeviceTarget, OptimizationProfile};
pub use scenario::Scenario;

pub const DEFAULT_SHADER_DIR: &str = "shaders";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Directory the shader `src` paths point into.
    pub shader_dir: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            shader_dir: DEFAULT_SHADER_DIR.to_string(),
        }
    }
}

/// Compile `ops` over `inputs` into a scenario for `profile`.
///
/// Fails on the first error; nothing partial is returned.
pub fn compile(
    name: &str,
    inputs: &[ExternalInput],
    ops: &[Operation],
    profile: &OptimizationProfile,
    options: &CompileOptions,
) -> Result<Scenario, CompileError> {
    let graph = Graph::build(inputs, ops)?;
    debug!(
        "graph: {} tensors, {} nodes, {} outputs",
        graph.tensors.len(),
        graph.nodes.len(),
        graph.outputs.len()
    );

    let allocation = scenario::allocate(&graph, profile)?;
    debug!("allocation: {} buffers", allocation.buffers.len());

    let shaders = scenario::bind_graph(&graph, profile, &options.shader_dir);
    debug!("shaders: {}", shaders.shaders.len());

    check_generated_uids(&graph, &allocation, &shaders)?;

    let commands = scenario::plan(&graph, &allocation, &shaders);

    let resources = shaders
        .shaders
        .into_iter()
        .map(scenario::Resource::Shader)
        .chain(allocation.buffers.into_iter().map(scenario::Resource::Buffer))
        .collect();
    let scenario = scenario::emit(name, resources, commands)?;

    info!(
        "compiled '{name}' for {}: {} resources, {} dispatches",
        profile.target,
        scenario.resources().len(),
        scenario.commands().len()
    );
    Ok(scenario)
}

/// Reject tensors whose uid collides with a shader or weight buffer the
/// compiler generated; both share the scenario's resource namespace.
fn check_generated_uids(
    graph: &Graph,
    allocation: &Allocation,
    shaders: &ShaderTable,
) -> Result<(), GraphValidationError> {
    let clash = |op: &str, uid: &str| match graph.tensor_by_uid(uid) {
        Some(_) => Err(GraphValidationError::DuplicateOutput {
            op: op.to_string(),
            tensor: uid.to_string(),
        }),
        None => Ok(()),
    };

    let leaves = graph.nodes.iter().zip(&allocation.slots).zip(&shaders.per_node);
    for ((node, slots), shader) in leaves {
        clash(&node.id, shader)?;
        if node.in_place || node.kind.op_type() == OpType::Add {
            continue;
        }
        if let Some(weights) = &slots.parameter {
            clash(&node.id, weights)?;
        }
    }
    Ok(())
}
