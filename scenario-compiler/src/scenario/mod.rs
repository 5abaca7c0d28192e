//! Scenario construction: graph → buffers → shaders → dispatches → document.

pub mod alloc;
pub mod dispatch;
pub mod document;
pub mod emit;
pub mod shader;

pub use alloc::{allocate, buffer_size, weights_uid, Allocation, OperandSlots};
pub use dispatch::plan;
pub use document::{
    Binding, BufferResource, Command, DispatchCompute, Resource, Scenario, ShaderAccess,
    ShaderOptimizations, ShaderResource,
};
pub use emit::emit;
pub use shader::{bind, bind_graph, bind_named, ShaderTable};
