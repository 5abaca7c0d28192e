//! JSON pipeline description → operation list.
//!
//! Operation types arrive as strings, so this is the one place an unknown
//! type can show up; everything past it works on the closed [`OpKind`].

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{
    CompileError, GraphValidationError, SerializationError, UnsupportedOperationError,
};
use crate::ir::graph::ExternalInput;
use crate::ir::op::{OpKind, OpType, Operation, TensorRef};
use crate::profile::{DeviceTarget, OptimizationProfile};
use crate::scenario::Scenario;
use crate::CompileOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<DeviceTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shader_dir: Option<String>,
    pub inputs: Vec<ExternalInput>,
    pub operations: Vec<OperationDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: String,
    pub inputs: Vec<TensorRef>,
    pub output: TensorRef,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<String>,
}

impl OperationDescriptor {
    /// Resolve the type name and decode its parameters.
    pub fn to_operation(&self) -> Result<Operation, CompileError> {
        let ty = OpType::parse(&self.op_type).ok_or_else(|| UnsupportedOperationError {
            op: self.id.clone(),
            kind: self.op_type.clone(),
        })?;

        let kind = match ty {
            OpType::Conv2d => OpKind::Conv2d(self.params()?),
            OpType::ConvTranspose2d => OpKind::ConvTranspose2d(self.params()?),
            OpType::InstanceNorm => OpKind::InstanceNorm(self.params()?),
            OpType::ResidualBlock => OpKind::ResidualBlock(self.params()?),
            OpType::FullyConnected => OpKind::FullyConnected(self.params()?),
            OpType::MaxPool => OpKind::MaxPool(self.params()?),
            OpType::Relu | OpType::Tanh | OpType::Add => {
                if !self.params.is_null() {
                    warn!("op '{}': {} takes no parameters, ignoring them", self.id, ty.name());
                }
                match ty {
                    OpType::Relu => OpKind::Relu,
                    OpType::Tanh => OpKind::Tanh,
                    _ => OpKind::Add,
                }
            }
        };

        let mut op = Operation::new(&self.id, kind, self.inputs.iter().cloned(), &self.output);
        op.weights = self.weights.clone();
        Ok(op)
    }

    fn params<T: DeserializeOwned>(&self) -> Result<T, GraphValidationError> {
        let value = match &self.params {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            GraphValidationError::invalid(&self.id, format!("bad {} parameters: {e}", self.op_type))
        })
    }
}

impl PipelineDescription {
    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn operations(&self) -> Result<Vec<Operation>, CompileError> {
        self.operations
            .iter()
            .map(OperationDescriptor::to_operation)
            .collect()
    }

    pub fn profile(&self) -> OptimizationProfile {
        OptimizationProfile::resolve(self.target.unwrap_or_default())
    }

    pub fn options(&self) -> CompileOptions {
        match &self.shader_dir {
            Some(dir) => CompileOptions {
                shader_dir: dir.clone(),
            },
            None => CompileOptions::default(),
        }
    }

    /// Compile with the description's own target and shader directory.
    pub fn compile(&self) -> Result<Scenario, CompileError> {
        let ops = self.operations()?;
        debug!("pipeline '{}': {} operations", self.name, ops.len());
        crate::compile(&self.name, &self.inputs, &ops, &self.profile(), &self.options())
    }
}
