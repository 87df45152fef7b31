use thiserror::Error;

/// Errors from tensor construction, shape checks and kernels.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("index {index} out of range for axis {axis} of size {size}")]
    IndexOutOfBounds {
        index: usize,
        axis: usize,
        size: usize,
    },

    #[error("axis {axis} out of range for a {ndim}-d tensor")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("cannot broadcast {a:?} against {b:?}")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },

    #[error("{axes:?} is not a permutation of {ndim} axes")]
    InvalidPermutation { axes: Vec<usize>, ndim: usize },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("clustering model used before fit")]
    NotFitted,

    #[error("operation needs at least one element")]
    EmptyTensor,
}

pub type TensorResult<T> = Result<T, TensorError>;
