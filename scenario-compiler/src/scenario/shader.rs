//! Operation type → shader mapping.
//!
//! The table is a `match` over [`OpType`], so a new operation type does not
//! compile until it has a shader.

use log::debug;

use crate::error::UnsupportedOperationError;
use crate::ir::graph::Graph;
use crate::ir::op::OpType;
use crate::profile::{DeviceTarget, OptimizationProfile, SHARED_MEMORY_BYTES};

use super::document::{ShaderOptimizations, ShaderResource, SPIRV};

pub const ENTRY_POINT: &str = "main";

/// K-dimension tile for simdgroup matrix multiplication.
const MATMUL_TILE_K: u32 = 8;

/// Shader resources for a graph, deduplicated by uid.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderTable {
    /// In first-use order.
    pub shaders: Vec<ShaderResource>,
    /// Shader uid per `graph.nodes` entry.
    pub per_node: Vec<String>,
}

fn generic_identifier(ty: OpType) -> &'static str {
    match ty {
        OpType::Conv2d => "conv2d",
        OpType::ConvTranspose2d => "conv_transpose2d",
        OpType::Relu => "relu",
        OpType::Tanh => "tanh",
        OpType::InstanceNorm => "instance_norm",
        OpType::ResidualBlock => "residual_block",
        OpType::FullyConnected => "matmul",
        OpType::MaxPool => "max_pool2d",
        OpType::Add => "add",
    }
}

fn optimized_variant(
    ty: OpType,
    profile: &OptimizationProfile,
) -> Option<(&'static str, ShaderOptimizations)> {
    if profile.target != DeviceTarget::AppleSilicon {
        return None;
    }
    let shared_memory_size = profile.use_shared_memory.then_some(SHARED_MEMORY_BYTES);
    match ty {
        OpType::Conv2d => Some((
            "conv2d_apple_optimized",
            ShaderOptimizations {
                use_fp16: profile.use_fp16,
                use_simdgroup_matrix: profile.use_simdgroup,
                shared_memory_size,
                tile_size: Some(profile.tile_size),
                tile_m: None,
                tile_n: None,
                tile_k: None,
                threadgroup_size: profile.threadgroup_size,
            },
        )),
        OpType::FullyConnected => Some((
            "matmul_simdgroup",
            ShaderOptimizations {
                use_fp16: profile.use_fp16,
                use_simdgroup_matrix: profile.use_simdgroup,
                shared_memory_size,
                tile_size: None,
                tile_m: Some(profile.tile_size),
                tile_n: Some(profile.tile_size),
                tile_k: Some(MATMUL_TILE_K),
                threadgroup_size: profile.threadgroup_size,
            },
        )),
        OpType::ConvTranspose2d
        | OpType::Relu
        | OpType::Tanh
        | OpType::InstanceNorm
        | OpType::ResidualBlock
        | OpType::MaxPool
        | OpType::Add => None,
    }
}

/// Select the shader for `ty` under `profile`.
pub fn bind(ty: OpType, profile: &OptimizationProfile, shader_dir: &str) -> ShaderResource {
    let (identifier, optimizations) = match optimized_variant(ty, profile) {
        Some((identifier, opts)) => (identifier, Some(opts)),
        None => (generic_identifier(ty), None),
    };
    ShaderResource {
        uid: identifier.to_string(),
        shader_type: SPIRV.to_string(),
        src: shader_path(shader_dir, identifier),
        entry: ENTRY_POINT.to_string(),
        optimizations,
    }
}

/// Select the shader for an operation type given by name.
pub fn bind_named(
    op: &str,
    type_name: &str,
    profile: &OptimizationProfile,
    shader_dir: &str,
) -> Result<ShaderResource, UnsupportedOperationError> {
    let ty = OpType::parse(type_name).ok_or_else(|| UnsupportedOperationError {
        op: op.to_string(),
        kind: type_name.to_string(),
    })?;
    Ok(bind(ty, profile, shader_dir))
}

/// Bind every node of `graph`, declaring each distinct shader once.
pub fn bind_graph(graph: &Graph, profile: &OptimizationProfile, shader_dir: &str) -> ShaderTable {
    let mut shaders: Vec<ShaderResource> = Vec::new();
    let mut per_node = Vec::with_capacity(graph.nodes.len());

    for node in &graph.nodes {
        let shader = bind(node.kind.op_type(), profile, shader_dir);
        if !shaders.iter().any(|s| s.uid == shader.uid) {
            debug!("shader '{}' first used by '{}'", shader.uid, node.id);
            shaders.push(shader.clone());
        }
        per_node.push(shader.uid);
    }

    ShaderTable { shaders, per_node }
}

fn shader_path(shader_dir: &str, identifier: &str) -> String {
    let dir = shader_dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("{identifier}.spv")
    } else {
        format!("{dir}/{identifier}.spv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::ExternalInput;
    use crate::ir::op::{ConvParams, OpKind, Operation, Padding};

    #[test]
    fn every_op_type_binds() {
        for profile in [OptimizationProfile::GENERIC, OptimizationProfile::APPLE_SILICON] {
            for ty in OpType::ALL {
                let shader = bind(ty, &profile, "shaders");
                assert!(!shader.uid.is_empty(), "{ty:?}");
                assert_eq!(shader.shader_type, "SPIR-V");
                assert_eq!(shader.entry, "main");
                assert_eq!(shader.src, format!("shaders/{}.spv", shader.uid));
            }
        }
    }

    #[test]
    fn generic_conv_has_no_optimizations() {
        let shader = bind(OpType::Conv2d, &OptimizationProfile::GENERIC, "shaders");
        assert_eq!(shader.uid, "conv2d");
        assert_eq!(shader.optimizations, None);
    }

    #[test]
    fn apple_conv_is_optimized() {
        let shader = bind(OpType::Conv2d, &OptimizationProfile::APPLE_SILICON, "shaders");
        assert_eq!(shader.uid, "conv2d_apple_optimized");
        let opts = shader.optimizations.unwrap();
        assert!(opts.use_fp16);
        assert!(opts.use_simdgroup_matrix);
        assert_eq!(opts.shared_memory_size, Some(32768));
        assert_eq!(opts.tile_size, Some(32));
    }

    #[test]
    fn apple_matmul_uses_simdgroup_tiles() {
        let shader = bind(
            OpType::FullyConnected,
            &OptimizationProfile::APPLE_SILICON,
            "shaders",
        );
        assert_eq!(shader.uid, "matmul_simdgroup");
        let opts = shader.optimizations.unwrap();
        assert_eq!((opts.tile_m, opts.tile_n, opts.tile_k), (Some(32), Some(32), Some(8)));
    }

    #[test]
    fn apple_relu_stays_generic() {
        let shader = bind(OpType::Relu, &OptimizationProfile::APPLE_SILICON, "shaders");
        assert_eq!(shader.uid, "relu");
        assert_eq!(shader.optimizations, None);
    }

    #[test]
    fn unknown_name_is_unsupported() {
        let err =
            bind_named("sm", "SOFTMAX", &OptimizationProfile::GENERIC, "shaders").unwrap_err();
        assert_eq!(
            err,
            UnsupportedOperationError {
                op: "sm".into(),
                kind: "SOFTMAX".into()
            }
        );
    }

    #[test]
    fn named_lookup_matches_typed() {
        let named = bind_named("c", "CONV_2D", &OptimizationProfile::GENERIC, "shaders").unwrap();
        assert_eq!(named, bind(OpType::Conv2d, &OptimizationProfile::GENERIC, "shaders"));
    }

    #[test]
    fn shader_dir_trailing_slash_and_empty() {
        assert_eq!(shader_path("shaders/", "relu"), "shaders/relu.spv");
        assert_eq!(shader_path("", "relu"), "relu.spv");
    }

    #[test]
    fn graph_shaders_are_deduplicated() {
        let conv = |id: &str, i: &str, o: &str| {
            Operation::new(
                id,
                OpKind::Conv2d(ConvParams {
                    filters: 4,
                    kernel: [3, 3],
                    stride: [1, 1],
                    padding: Padding::Same,
                }),
                [i],
                o,
            )
        };
        let ops = vec![
            conv("c1", "in", "a"),
            Operation::new("r", OpKind::Relu, ["a"], "a"),
            conv("c2", "a", "b"),
        ];
        let graph = Graph::build(&[ExternalInput::new("in", [1, 8, 8, 3])], &ops).unwrap();
        let table = bind_graph(&graph, &OptimizationProfile::GENERIC, "shaders");
        let uids: Vec<_> = table.shaders.iter().map(|s| s.uid.as_str()).collect();
        assert_eq!(uids, ["conv2d", "relu"]);
        assert_eq!(table.per_node, ["conv2d", "relu", "conv2d"]);
    }
}
