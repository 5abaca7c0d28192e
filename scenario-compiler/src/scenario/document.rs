//! Scenario document types
//!
//! Two kinds of top-level entries:
//! 1. **Resource**: named buffers and shaders, all declared up front
//! 2. **Command**: dispatches referencing resources by uid
//!
//! Field order matches the runtime's schema; serde writes fields in
//! declaration order, which keeps the emitted JSON deterministic.

use serde::{Deserialize, Serialize};

use crate::error::SerializationError;

use super::emit::check_invariants;

pub const SPIRV: &str = "SPIR-V";

// ─── Resources ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferResource {
    pub uid: String,
    pub shader_access: ShaderAccess,
    /// Size in bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

/// Device-specific knobs attached to an optimized shader variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderOptimizations {
    pub use_fp16: bool,
    pub use_simdgroup_matrix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_memory_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_m: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_k: Option<u32>,
    pub threadgroup_size: [u32; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderResource {
    pub uid: String,
    #[serde(rename = "type")]
    pub shader_type: String,
    pub src: String,
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizations: Option<ShaderOptimizations>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Buffer(BufferResource),
    Shader(ShaderResource),
}

impl Resource {
    pub fn uid(&self) -> &str {
        match self {
            Resource::Buffer(b) => &b.uid,
            Resource::Shader(s) => &s.uid,
        }
    }

    pub fn as_buffer(&self) -> Option<&BufferResource> {
        match self {
            Resource::Buffer(b) => Some(b),
            Resource::Shader(_) => None,
        }
    }

    pub fn as_shader(&self) -> Option<&ShaderResource> {
        match self {
            Resource::Shader(s) => Some(s),
            Resource::Buffer(_) => None,
        }
    }
}

// ─── Commands ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub id: u32,
    pub set: u32,
    pub resource_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCompute {
    pub shader_ref: String,
    #[serde(rename = "rangeND")]
    pub range_nd: [u64; 3],
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    DispatchCompute(DispatchCompute),
}

impl Command {
    pub fn as_dispatch(&self) -> &DispatchCompute {
        match self {
            Command::DispatchCompute(d) => d,
        }
    }
}

// ─── Scenario ───────────────────────────────────────────────────

/// A fully resolved, invariant-checked execution plan.
///
/// Only [`emit`](super::emit::emit) and [`Scenario::from_json`] construct
/// one, and neither hands out mutable access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    name: String,
    resources: Vec<Resource>,
    commands: Vec<Command>,
}

impl Scenario {
    pub(super) fn new(name: String, resources: Vec<Resource>, commands: Vec<Command>) -> Self {
        Scenario {
            name,
            resources,
            commands,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn buffers(&self) -> impl Iterator<Item = &BufferResource> {
        self.resources.iter().filter_map(Resource::as_buffer)
    }

    pub fn shaders(&self) -> impl Iterator<Item = &ShaderResource> {
        self.resources.iter().filter_map(Resource::as_shader)
    }

    pub fn resource(&self, uid: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.uid() == uid)
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Read a scenario document, e.g. one produced by the template dump tool.
    ///
    /// The same invariants as [`emit`](super::emit::emit) are enforced.
    pub fn from_json(json: &str) -> Result<Scenario, SerializationError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        check_invariants(&scenario.resources, &scenario.commands)?;
        Ok(scenario)
    }
}
