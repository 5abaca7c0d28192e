//! Compile-time error taxonomy.
//!
//! Every variant is a deterministic structural failure detected while building
//! a scenario; none of them are retried.

use thiserror::Error;

use crate::ir::Shape;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphValidationError {
    #[error("op '{op}': input '{tensor}' is never produced before it is consumed")]
    DanglingInput { op: String, tensor: String },
    #[error("op '{op}': output '{tensor}' already has a producer")]
    DuplicateOutput { op: String, tensor: String },
    #[error("op '{op}': output '{tensor}' is also one of its inputs and the op cannot run in place")]
    CyclicReference { op: String, tensor: String },
    #[error("op id '{op}' is declared more than once")]
    DuplicateOperationId { op: String },
    #[error("op '{op}': {kind} expects {expected} input(s), found {found}")]
    Arity {
        op: String,
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("op '{op}': {reason}")]
    InvalidParameter { op: String, reason: String },
}

impl GraphValidationError {
    pub(crate) fn invalid(op: &str, reason: impl Into<String>) -> Self {
        GraphValidationError::InvalidParameter {
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("op '{op}': unsupported operation type '{kind}'")]
pub struct UnsupportedOperationError {
    pub op: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeComputationError {
    #[error("buffer '{uid}': shape {shape} has a non-positive dimension")]
    NonPositiveSize { uid: String, shape: Shape },
    #[error("buffer '{uid}': byte size of shape {shape} overflows")]
    Overflow { uid: String, shape: Shape },
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("scenario invariant violated: {0}")]
    InvariantViolated(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Graph(#[from] GraphValidationError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperationError),
    #[error(transparent)]
    Size(#[from] SizeComputationError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
