use spectraclean_core::TensorError;
use thiserror::Error;

/// Errors raised while building or running a model.
#[derive(Debug, Error)]
pub enum NnError {
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(
        "input is {height}x{width}, but both sides must be divisible by {multiple} \
         for {depth} pooling stages"
    )]
    SpatialSize {
        height: usize,
        width: usize,
        multiple: usize,
        depth: usize,
    },

    #[error("model expects {expected} input channels, got {got}")]
    Channels { expected: usize, got: usize },

    #[error("invalid model spec: {0}")]
    InvalidSpec(String),

    #[error("missing parameter `{0}` in state dict")]
    MissingParameter(String),

    #[error("parameter `{name}` has shape {got:?}, expected {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

pub type NnResult<T> = Result<T, NnError>;
