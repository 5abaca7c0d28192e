pub mod graph;
pub mod op;
pub mod shape;

pub use graph::{ExternalInput, Graph, Node, Tensor, TensorId, TensorKind};
pub use op::{
    ConvParams, DenseParams, NormParams, OpKind, OpType, Operation, Padding, PoolParams,
    ResidualParams, TensorRef,
};
pub use shape::Shape;
