//! Validated operation graph.
//!
//! Built in a single pass over the operation list: every input must already be
//! produced, residual blocks are expanded into leaf nodes, and each leaf gets
//! an inferred output shape.

use std::collections::{HashMap, HashSet};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::GraphValidationError;
use crate::ir::op::{OpKind, Operation, TensorRef};
use crate::ir::shape::Shape;

pub type TensorId = usize;

/// An externally supplied input tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInput {
    pub uid: TensorRef,
    pub shape: Shape,
    /// Data file the runtime loads into the input buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

impl ExternalInput {
    pub fn new(uid: impl Into<TensorRef>, shape: impl Into<Vec<i64>>) -> Self {
        ExternalInput {
            uid: uid.into(),
            shape: Shape::new(shape),
            src: None,
        }
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Tensor {
    pub id: TensorId,
    pub uid: TensorRef,
    pub shape: Shape,
    pub kind: TensorKind,
    /// Rewritten by a later in-place activation.
    pub mutated_in_place: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorKind {
    /// Graph input - provided by caller
    Input { src: Option<String> },
    /// Produced and consumed by later nodes
    Intermediate,
    /// Produced and never consumed - returned to caller
    Output,
}

/// A primitive operation after residual expansion.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub output: TensorId,
    pub in_place: bool,
    pub weights: Option<String>,
    /// Id of the composite op this node was expanded from.
    pub parent: Option<String>,
}

#[derive(Debug, Default)]
pub struct Graph {
    pub tensors: Vec<Tensor>,
    pub nodes: Vec<Node>,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
}

impl Graph {
    /// Validate `ops` against the external `inputs` and build the graph.
    pub fn build(
        inputs: &[ExternalInput],
        ops: &[Operation],
    ) -> Result<Graph, GraphValidationError> {
        let mut builder = Builder::default();

        for input in inputs {
            if builder.by_uid.contains_key(&input.uid) {
                return Err(GraphValidationError::DuplicateOutput {
                    op: "<inputs>".to_string(),
                    tensor: input.uid.clone(),
                });
            }
            let id = builder.add_tensor(
                &input.uid,
                input.shape.clone(),
                TensorKind::Input {
                    src: input.src.clone(),
                },
            );
            builder.graph.inputs.push(id);
        }

        for op in ops {
            builder.push(op, None)?;
        }

        Ok(builder.finish())
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id]
    }

    pub fn tensor_by_uid(&self, uid: &str) -> Option<&Tensor> {
        self.tensors.iter().find(|t| t.uid == uid)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether any node reads tensor `id` (in-place rewrites excluded).
    pub fn is_consumed(&self, id: TensorId) -> bool {
        self.nodes
            .iter()
            .any(|n| !n.in_place && n.inputs.contains(&id))
    }
}

#[derive(Default)]
struct Builder {
    graph: Graph,
    by_uid: HashMap<TensorRef, TensorId>,
    op_ids: HashSet<String>,
}

impl Builder {
    fn add_tensor(&mut self, uid: &str, shape: Shape, kind: TensorKind) -> TensorId {
        let id = self.graph.tensors.len();
        self.graph.tensors.push(Tensor {
            id,
            uid: uid.to_string(),
            shape,
            kind,
            mutated_in_place: false,
        });
        self.by_uid.insert(uid.to_string(), id);
        id
    }

    fn push(&mut self, op: &Operation, parent: Option<&str>) -> Result<(), GraphValidationError> {
        if !self.op_ids.insert(op.id.clone()) {
            return Err(GraphValidationError::DuplicateOperationId { op: op.id.clone() });
        }

        let ty = op.op_type();
        if op.inputs.len() != ty.arity() {
            return Err(GraphValidationError::Arity {
                op: op.id.clone(),
                kind: ty.name(),
                expected: ty.arity(),
                found: op.inputs.len(),
            });
        }
        op.kind.validate(&op.id)?;

        let mut inputs = Vec::with_capacity(op.inputs.len());
        for uid in &op.inputs {
            let id = self.by_uid.get(uid).copied().ok_or_else(|| {
                GraphValidationError::DanglingInput {
                    op: op.id.clone(),
                    tensor: uid.clone(),
                }
            })?;
            inputs.push(id);
        }

        if op.is_in_place() {
            if !ty.supports_in_place() {
                return Err(GraphValidationError::CyclicReference {
                    op: op.id.clone(),
                    tensor: op.output.clone(),
                });
            }
            let id = self.by_uid[&op.output];
            // external inputs are read-only
            if matches!(self.graph.tensors[id].kind, TensorKind::Input { .. }) {
                return Err(GraphValidationError::DuplicateOutput {
                    op: op.id.clone(),
                    tensor: op.output.clone(),
                });
            }
            self.graph.tensors[id].mutated_in_place = true;
            self.graph.nodes.push(Node {
                id: op.id.clone(),
                kind: op.kind.clone(),
                inputs,
                output: id,
                in_place: true,
                weights: op.weights.clone(),
                parent: parent.map(str::to_string),
            });
            return Ok(());
        }

        if self.by_uid.contains_key(&op.output) {
            return Err(GraphValidationError::DuplicateOutput {
                op: op.id.clone(),
                tensor: op.output.clone(),
            });
        }

        let input_shapes: Vec<&Shape> = inputs
            .iter()
            .map(|&id| &self.graph.tensors[id].shape)
            .collect();

        if let OpKind::ResidualBlock(_) = op.kind {
            // checks rank before channels are read
            op.kind.infer_output_shape(&op.id, &input_shapes)?;
            if let Some(src) = &op.weights {
                warn!("op '{}': residual block ignores weights '{src}'", op.id);
            }
            let channels = input_shapes[0].channels().unwrap_or_default();
            for sub in op.expand(channels) {
                self.push(&sub, Some(&op.id))?;
            }
            return Ok(());
        }

        let shape = op.kind.infer_output_shape(&op.id, &input_shapes)?;
        let output = self.add_tensor(&op.output, shape, TensorKind::Intermediate);
        self.graph.nodes.push(Node {
            id: op.id.clone(),
            kind: op.kind.clone(),
            inputs,
            output,
            in_place: false,
            weights: op.weights.clone(),
            parent: parent.map(str::to_string),
        });
        Ok(())
    }

    fn finish(mut self) -> Graph {
        let graph = &mut self.graph;
        let consumed: Vec<bool> = (0..graph.tensors.len())
            .map(|id| graph.is_consumed(id))
            .collect();

        for tensor in &mut graph.tensors {
            if matches!(tensor.kind, TensorKind::Input { .. }) {
                continue;
            }
            if !consumed[tensor.id] {
                tensor.kind = TensorKind::Output;
                graph.outputs.push(tensor.id);
            }
        }
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::op::{ConvParams, Padding, PoolParams, ResidualParams};

    fn conv(id: &str, input: &str, output: &str, filters: i64) -> Operation {
        Operation::new(
            id,
            OpKind::Conv2d(ConvParams {
                filters,
                kernel: [3, 3],
                stride: [1, 1],
                padding: Padding::Same,
            }),
            [input],
            output,
        )
    }

    fn image() -> Vec<ExternalInput> {
        vec![ExternalInput::new("in", [1, 16, 16, 3])]
    }

    #[test]
    fn sequential_chain_builds() {
        let ops = vec![
            conv("c1", "in", "a", 8),
            Operation::new("r1", OpKind::Relu, ["a"], "a"),
            conv("c2", "a", "b", 4),
        ];
        let graph = Graph::build(&image(), &ops).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert!(graph.nodes[1].in_place);
        let a = graph.tensor_by_uid("a").unwrap();
        assert!(a.mutated_in_place);
        assert_eq!(a.kind, TensorKind::Intermediate);
        let b = graph.tensor_by_uid("b").unwrap();
        assert_eq!(b.kind, TensorKind::Output);
        assert_eq!(b.shape, Shape::new([1, 16, 16, 4]));
        assert_eq!(graph.outputs, vec![b.id]);
    }

    #[test]
    fn dangling_input_rejected() {
        let ops = vec![conv("c1", "missing", "a", 8)];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert_eq!(
            err,
            GraphValidationError::DanglingInput {
                op: "c1".into(),
                tensor: "missing".into()
            }
        );
    }

    #[test]
    fn forward_reference_is_dangling() {
        // c1 consumes "b" which c2 only produces later
        let ops = vec![conv("c1", "b", "a", 8), conv("c2", "in", "b", 8)];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(matches!(err, GraphValidationError::DanglingInput { .. }));
    }

    #[test]
    fn duplicate_output_rejected() {
        let ops = vec![conv("c1", "in", "a", 8), conv("c2", "in", "a", 8)];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert_eq!(
            err,
            GraphValidationError::DuplicateOutput {
                op: "c2".into(),
                tensor: "a".into()
            }
        );
    }

    #[test]
    fn output_shadowing_input_rejected() {
        let ops = vec![conv("c1", "in", "in2", 8), conv("c2", "in2", "in", 8)];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(matches!(err, GraphValidationError::DuplicateOutput { .. }));
    }

    #[test]
    fn in_place_conv_is_cyclic() {
        let ops = vec![conv("c1", "in", "a", 3), conv("c2", "a", "a", 3)];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(matches!(err, GraphValidationError::CyclicReference { .. }));
    }

    #[test]
    fn in_place_on_external_input_rejected() {
        let ops = vec![Operation::new("r", OpKind::Relu, ["in"], "in")];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(matches!(err, GraphValidationError::DuplicateOutput { .. }));
    }

    #[test]
    fn duplicate_op_id_rejected() {
        let ops = vec![conv("c1", "in", "a", 8), conv("c1", "a", "b", 8)];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(matches!(err, GraphValidationError::DuplicateOperationId { .. }));
    }

    #[test]
    fn add_arity_checked() {
        let ops = vec![Operation::new("add", OpKind::Add, ["in"], "out")];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert_eq!(
            err,
            GraphValidationError::Arity {
                op: "add".into(),
                kind: "Add",
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn residual_block_expands_in_place_of_composite() {
        let ops = vec![
            conv("c1", "in", "a", 8),
            Operation::new(
                "res",
                OpKind::ResidualBlock(ResidualParams::default()),
                ["a"],
                "b",
            ),
        ];
        let graph = Graph::build(&image(), &ops).unwrap();
        let ids: Vec<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["c1", "res_conv1", "res_conv2", "res_add"]);
        assert!(graph.nodes[1..].iter().all(|n| n.parent.as_deref() == Some("res")));
        let b = graph.tensor_by_uid("b").unwrap();
        assert_eq!(b.shape, Shape::new([1, 16, 16, 8]));
        assert_eq!(b.kind, TensorKind::Output);
        // block input feeds both the first conv and the skip-add
        let a = graph.tensor_by_uid("a").unwrap().id;
        assert_eq!(graph.nodes[1].inputs, [a]);
        let last_conv = graph.tensor_by_uid("res_conv2_out").unwrap().id;
        assert_eq!(graph.nodes[3].inputs, [last_conv, a]);
    }

    #[test]
    fn residual_sub_op_collision_rejected() {
        let ops = vec![
            conv("res_conv1", "in", "a", 3),
            Operation::new(
                "res",
                OpKind::ResidualBlock(ResidualParams::default()),
                ["a"],
                "b",
            ),
        ];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(matches!(err, GraphValidationError::DuplicateOperationId { .. }));
    }

    #[test]
    fn negative_pool_window_rejected() {
        let ops = vec![Operation::new(
            "pool",
            OpKind::MaxPool(PoolParams {
                pool: [-2, -2],
                stride: Some([1, 1]),
                padding: Padding::Valid,
            }),
            ["in"],
            "p",
        )];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(
            matches!(err, GraphValidationError::InvalidParameter { ref op, .. } if op == "pool"),
            "got: {err}"
        );
    }

    #[test]
    fn oversized_residual_block_rejected_before_expansion() {
        let ops = vec![Operation::new(
            "res",
            OpKind::ResidualBlock(ResidualParams {
                convs: usize::MAX,
                kernel: [3, 3],
            }),
            ["in"],
            "out",
        )];
        let err = Graph::build(&image(), &ops).unwrap_err();
        assert!(matches!(err, GraphValidationError::InvalidParameter { .. }), "got: {err}");
    }

    #[test]
    fn residual_block_weights_do_not_reach_sub_ops() {
        let ops = vec![Operation::new(
            "res",
            OpKind::ResidualBlock(ResidualParams::default()),
            ["in"],
            "out",
        )
        .with_weights("res.bin")];
        let graph = Graph::build(&image(), &ops).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert!(graph.nodes.iter().all(|n| n.weights.is_none()));
    }

    #[test]
    fn empty_op_list_builds_empty_graph() {
        let graph = Graph::build(&image(), &[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.outputs.is_empty());
    }
}
