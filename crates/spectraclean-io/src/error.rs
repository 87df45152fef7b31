use spectraclean_core::TensorError;
use spectraclean_nn::NnError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: not a readable MAT v5 file ({message})", .path.display())]
    MatParse { path: PathBuf, message: String },

    #[error("{}: no array named `{field}`", .path.display())]
    MissingField { path: PathBuf, field: String },

    #[error("{}: unsupported array ({message})", .path.display())]
    Unsupported { path: PathBuf, message: String },

    #[error("checkpoint format version {found} is not supported (expected {expected})")]
    CheckpointVersion { found: u32, expected: u32 },

    #[error("render: {0}")]
    Render(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Model(#[from] NnError),
}

impl IoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IoError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type IoResult<T> = Result<T, IoError>;
