//! Operation IR
//! each leaf op maps to exactly one compute dispatch
//!

use serde::{Deserialize, Serialize};

use crate::error::GraphValidationError;
use crate::ir::shape::Shape;

/// Opaque uid of a logical tensor.
pub type TensorRef = String;

/// One step of the declarative operation list.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: String,
    pub kind: OpKind,
    pub inputs: Vec<TensorRef>,
    pub output: TensorRef,
    /// Converted weight asset backing this op's parameter buffer.
    pub weights: Option<String>,
}

impl Operation {
    pub fn new(
        id: impl Into<String>,
        kind: OpKind,
        inputs: impl IntoIterator<Item = impl Into<TensorRef>>,
        output: impl Into<TensorRef>,
    ) -> Self {
        Operation {
            id: id.into(),
            kind,
            inputs: inputs.into_iter().map(Into::into).collect(),
            output: output.into(),
            weights: None,
        }
    }

    pub fn with_weights(mut self, src: impl Into<String>) -> Self {
        self.weights = Some(src.into());
        self
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }

    /// True when the op rewrites one of its own inputs.
    pub fn is_in_place(&self) -> bool {
        self.inputs.contains(&self.output)
    }

    /// Expand a composite op into primitive ops.
    ///
    /// `input_channels` is the channel count of the op's primary input; a
    /// residual block keeps it unchanged through every convolution so the
    /// final add sees matching shapes. Primitive ops expand to themselves.
    ///
    /// The skip-add takes the last convolution's output as its first operand
    /// and the block input as its second.
    pub fn expand(&self, input_channels: i64) -> Vec<Operation> {
        let OpKind::ResidualBlock(params) = &self.kind else {
            return vec![self.clone()];
        };
        let Some(block_input) = self.inputs.first() else {
            return vec![self.clone()];
        };

        let mut ops = Vec::with_capacity(params.convs.saturating_add(1));
        let mut prev = block_input.clone();
        for i in 1..=params.convs {
            let out = format!("{}_conv{i}_out", self.id);
            ops.push(Operation::new(
                format!("{}_conv{i}", self.id),
                OpKind::Conv2d(ConvParams {
                    filters: input_channels,
                    kernel: params.kernel,
                    stride: [1, 1],
                    padding: Padding::Same,
                }),
                [prev.clone()],
                out.clone(),
            ));
            prev = out;
        }
        ops.push(Operation::new(
            format!("{}_add", self.id),
            OpKind::Add,
            [prev, block_input.clone()],
            self.output.clone(),
        ));
        ops
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Padding {
    #[default]
    #[serde(alias = "SAME", alias = "same")]
    Same,
    #[serde(alias = "VALID", alias = "valid")]
    Valid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParams {
    pub filters: i64,
    pub kernel: [i64; 2],
    #[serde(default = "unit_stride")]
    pub stride: [i64; 2],
    #[serde(default)]
    pub padding: Padding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    #[serde(default = "default_pool")]
    pub pool: [i64; 2],
    /// Defaults to the pool window.
    #[serde(default)]
    pub stride: Option<[i64; 2]>,
    #[serde(default = "valid_padding")]
    pub padding: Padding,
}

impl Default for PoolParams {
    fn default() -> Self {
        PoolParams {
            pool: default_pool(),
            stride: None,
            padding: Padding::Valid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseParams {
    pub units: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormParams {
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
}

impl Default for NormParams {
    fn default() -> Self {
        NormParams {
            epsilon: default_epsilon(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualParams {
    /// Number of convolutions before the skip-add.
    #[serde(default = "default_residual_convs")]
    pub convs: usize,
    #[serde(default = "default_residual_kernel")]
    pub kernel: [i64; 2],
}

impl Default for ResidualParams {
    fn default() -> Self {
        ResidualParams {
            convs: default_residual_convs(),
            kernel: default_residual_kernel(),
        }
    }
}

fn unit_stride() -> [i64; 2] {
    [1, 1]
}

fn default_pool() -> [i64; 2] {
    [2, 2]
}

fn valid_padding() -> Padding {
    Padding::Valid
}

fn default_epsilon() -> f32 {
    1e-5
}

/// Upper bound on convolutions in one residual block.
pub const MAX_RESIDUAL_CONVS: usize = 64;

fn default_residual_convs() -> usize {
    2
}

fn default_residual_kernel() -> [i64; 2] {
    [3, 3]
}

/// Operation kind with its shape and numeric parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Conv2d(ConvParams),
    ConvTranspose2d(ConvParams),
    Relu,
    Tanh,
    InstanceNorm(NormParams),
    ResidualBlock(ResidualParams),
    FullyConnected(DenseParams),
    MaxPool(PoolParams),
    /// Elementwise sum of two equally shaped tensors.
    Add,
}

/// Payload-free discriminant of [`OpKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpType {
    Conv2d,
    ConvTranspose2d,
    Relu,
    Tanh,
    InstanceNorm,
    ResidualBlock,
    FullyConnected,
    MaxPool,
    Add,
}

impl OpType {
    pub const ALL: [OpType; 9] = [
        OpType::Conv2d,
        OpType::ConvTranspose2d,
        OpType::Relu,
        OpType::Tanh,
        OpType::InstanceNorm,
        OpType::ResidualBlock,
        OpType::FullyConnected,
        OpType::MaxPool,
        OpType::Add,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpType::Conv2d => "Conv2D",
            OpType::ConvTranspose2d => "ConvTranspose2D",
            OpType::Relu => "Relu",
            OpType::Tanh => "Tanh",
            OpType::InstanceNorm => "InstanceNorm",
            OpType::ResidualBlock => "ResidualBlock",
            OpType::FullyConnected => "FullyConnected",
            OpType::MaxPool => "MaxPool",
            OpType::Add => "Add",
        }
    }

    /// Resolve a type name as written in a pipeline description.
    ///
    /// Case and underscores are ignored, so `CONV_2D`, `conv2d` and `Conv2D`
    /// all name the same type.
    pub fn parse(name: &str) -> Option<OpType> {
        let key: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let ty = match key.as_str() {
            "conv2d" | "conv" => OpType::Conv2d,
            "convtranspose2d" | "deconv2d" => OpType::ConvTranspose2d,
            "relu" => OpType::Relu,
            "tanh" => OpType::Tanh,
            "instancenorm" => OpType::InstanceNorm,
            "residualblock" => OpType::ResidualBlock,
            "fullyconnected" | "dense" | "matmul" => OpType::FullyConnected,
            "maxpool" | "maxpool2d" => OpType::MaxPool,
            "add" => OpType::Add,
            _ => return None,
        };
        Some(ty)
    }

    /// Number of tensor inputs the op consumes.
    pub fn arity(self) -> usize {
        match self {
            OpType::Add => 2,
            _ => 1,
        }
    }

    /// Activations may overwrite their input buffer.
    pub fn supports_in_place(self) -> bool {
        matches!(self, OpType::Relu | OpType::Tanh)
    }
}

impl OpKind {
    pub fn op_type(&self) -> OpType {
        match self {
            OpKind::Conv2d(_) => OpType::Conv2d,
            OpKind::ConvTranspose2d(_) => OpType::ConvTranspose2d,
            OpKind::Relu => OpType::Relu,
            OpKind::Tanh => OpType::Tanh,
            OpKind::InstanceNorm(_) => OpType::InstanceNorm,
            OpKind::ResidualBlock(_) => OpType::ResidualBlock,
            OpKind::FullyConnected(_) => OpType::FullyConnected,
            OpKind::MaxPool(_) => OpType::MaxPool,
            OpKind::Add => OpType::Add,
        }
    }

    /// Parameter checks that do not depend on input shapes.
    pub fn validate(&self, op: &str) -> Result<(), GraphValidationError> {
        match self {
            OpKind::Conv2d(p) | OpKind::ConvTranspose2d(p) => {
                if p.kernel.iter().any(|&k| k <= 0) {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!("kernel must be positive, got {:?}", p.kernel),
                    ));
                }
                if p.stride.iter().any(|&s| s <= 0) {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!("stride must be positive, got {:?}", p.stride),
                    ));
                }
            }
            OpKind::MaxPool(p) => {
                if p.pool.iter().any(|&k| k <= 0) {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!("pool window must be positive, got {:?}", p.pool),
                    ));
                }
                let stride = p.stride.unwrap_or(p.pool);
                if stride.iter().any(|&s| s <= 0) {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!("stride must be positive, got {stride:?}"),
                    ));
                }
            }
            OpKind::InstanceNorm(p) => {
                if !(p.epsilon > 0.0) {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!("epsilon must be positive, got {}", p.epsilon),
                    ));
                }
            }
            OpKind::ResidualBlock(p) => {
                if !(2..=MAX_RESIDUAL_CONVS).contains(&p.convs) {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!(
                            "residual block takes 2 to {MAX_RESIDUAL_CONVS} convolutions, got {}",
                            p.convs
                        ),
                    ));
                }
                if p.kernel.iter().any(|&k| k <= 0) {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!("kernel must be positive, got {:?}", p.kernel),
                    ));
                }
            }
            OpKind::Relu | OpKind::Tanh | OpKind::FullyConnected(_) | OpKind::Add => {}
        }
        Ok(())
    }

    /// Infer the output shape from the input shapes (NHWC).
    pub fn infer_output_shape(
        &self,
        op: &str,
        inputs: &[&Shape],
    ) -> Result<Shape, GraphValidationError> {
        let Some(input) = inputs.first() else {
            return Err(GraphValidationError::invalid(op, "no input shape"));
        };

        match self {
            OpKind::Conv2d(p) => {
                let [n, h, w, _] = require_nhwc(op, self, input)?;
                let oh = window_out(h, p.kernel[0], p.stride[0], p.padding);
                let ow = window_out(w, p.kernel[1], p.stride[1], p.padding);
                let (oh, ow) = (extent(op, input, oh)?, extent(op, input, ow)?);
                Ok(Shape::new([n, oh, ow, p.filters]))
            }
            OpKind::ConvTranspose2d(p) => {
                let [n, h, w, _] = require_nhwc(op, self, input)?;
                let oh = transposed_out(h, p.kernel[0], p.stride[0], p.padding);
                let ow = transposed_out(w, p.kernel[1], p.stride[1], p.padding);
                let (oh, ow) = (extent(op, input, oh)?, extent(op, input, ow)?);
                Ok(Shape::new([n, oh, ow, p.filters]))
            }
            OpKind::MaxPool(p) => {
                let [n, h, w, c] = require_nhwc(op, self, input)?;
                let stride = p.stride.unwrap_or(p.pool);
                let oh = window_out(h, p.pool[0], stride[0], p.padding);
                let ow = window_out(w, p.pool[1], stride[1], p.padding);
                let (oh, ow) = (extent(op, input, oh)?, extent(op, input, ow)?);
                Ok(Shape::new([n, oh, ow, c]))
            }
            OpKind::FullyConnected(p) => {
                let batch = if input.rank() >= 2 { input.dims()[0] } else { 1 };
                Ok(Shape::new([batch, p.units]))
            }
            OpKind::Add => {
                let other = inputs.get(1).copied().unwrap_or(input);
                if *other != **input {
                    return Err(GraphValidationError::invalid(
                        op,
                        format!("Add operands differ in shape: {input} vs {other}"),
                    ));
                }
                Ok((*input).clone())
            }
            OpKind::ResidualBlock(_) => {
                require_nhwc(op, self, input)?;
                Ok((*input).clone())
            }
            OpKind::Relu | OpKind::Tanh | OpKind::InstanceNorm(_) => Ok((*input).clone()),
        }
    }

    /// Logical shape of the op's weight/parameter buffer, if it has one.
    pub fn parameter_shape(&self, input: &Shape) -> Option<Shape> {
        match self {
            OpKind::Conv2d(p) => {
                let ci = input.channels()?;
                Some(Shape::new([p.kernel[0], p.kernel[1], ci, p.filters]))
            }
            OpKind::ConvTranspose2d(p) => {
                let ci = input.channels()?;
                Some(Shape::new([p.kernel[0], p.kernel[1], p.filters, ci]))
            }
            OpKind::FullyConnected(p) => {
                let features = if input.rank() >= 2 {
                    &input.dims()[1..]
                } else {
                    input.dims()
                };
                let in_features = features.iter().fold(1i64, |acc, &d| acc.saturating_mul(d));
                Some(Shape::new([in_features, p.units]))
            }
            // scale and offset per channel
            OpKind::InstanceNorm(_) => Some(Shape::new([2, input.channels()?])),
            OpKind::Relu
            | OpKind::Tanh
            | OpKind::MaxPool(_)
            | OpKind::Add
            | OpKind::ResidualBlock(_) => None,
        }
    }
}

fn require_nhwc(op: &str, kind: &OpKind, shape: &Shape) -> Result<[i64; 4], GraphValidationError> {
    shape.nhwc().ok_or_else(|| {
        GraphValidationError::invalid(
            op,
            format!(
                "{} expects a rank-4 NHWC input, got {shape}",
                kind.op_type().name()
            ),
        )
    })
}

fn extent(op: &str, input: &Shape, value: Option<i64>) -> Result<i64, GraphValidationError> {
    value.ok_or_else(|| {
        GraphValidationError::invalid(op, format!("output extent for input {input} overflows"))
    })
}

/// Output extent of a sliding window (convolution or pooling).
///
/// `stride` must already be positive. Non-positive results pass through and
/// are rejected when the buffer is sized.
fn window_out(size: i64, kernel: i64, stride: i64, padding: Padding) -> Option<i64> {
    match padding {
        Padding::Same => Some(size.checked_add(stride - 1)?.div_euclid(stride)),
        Padding::Valid => size.checked_sub(kernel)?.div_euclid(stride).checked_add(1),
    }
}

/// Output extent of a transposed convolution.
fn transposed_out(size: i64, kernel: i64, stride: i64, padding: Padding) -> Option<i64> {
    match padding {
        Padding::Same => size.checked_mul(stride),
        Padding::Valid => size.checked_sub(1)?.checked_mul(stride)?.checked_add(kernel),
    }
}
