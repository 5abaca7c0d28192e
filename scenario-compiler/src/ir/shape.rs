use std::fmt;

use serde::{Deserialize, Serialize};

/// Tensor dimensions, NHWC for 4D activations.
///
/// Dimensions are signed: model descriptions use `-1` (or `0`) for unknown
/// extents, and those are rejected when a buffer is sized rather than when the
/// shape is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(pub Vec<i64>);

impl Shape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Shape(dims.into())
    }

    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// True when every dimension is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0.iter().all(|&d| d > 0)
    }

    /// Product of all dimensions, `None` on overflow or a non-positive dimension.
    pub fn element_count(&self) -> Option<u64> {
        self.0.iter().try_fold(1u64, |acc, &d| {
            let d = u64::try_from(d).ok().filter(|&d| d > 0)?;
            acc.checked_mul(d)
        })
    }

    /// `[N, H, W, C]` for a rank-4 shape.
    pub fn nhwc(&self) -> Option<[i64; 4]> {
        match self.0.as_slice() {
            &[n, h, w, c] => Some([n, h, w, c]),
            _ => None,
        }
    }

    /// Last dimension (channels for NHWC).
    pub fn channels(&self) -> Option<i64> {
        self.0.last().copied()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape(dims)
    }
}
