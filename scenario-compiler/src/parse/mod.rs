//! Front ends that turn external descriptions into operation lists.

pub mod pipeline;

pub use pipeline::{OperationDescriptor, PipelineDescription};
