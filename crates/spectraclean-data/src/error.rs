use spectraclean_core::TensorError;
use spectraclean_io::IoError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("no .mat files in {}", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("images and masks do not pair up: {0}")]
    Pairing(String),

    #[error("sample `{id}`: maximum value {max} is not positive, cannot normalize")]
    NonPositiveMaximum { id: String, max: f64 },

    #[error("sample `{id}`: {source}")]
    Load {
        id: String,
        #[source]
        source: IoError,
    },

    #[error("sample `{id}`: image is {image:?} but mask is {mask:?}")]
    MaskShape {
        id: String,
        image: Vec<usize>,
        mask: Vec<usize>,
    },

    #[error("sample `{id}`: label {label} outside 0..{num_classes}")]
    Label {
        id: String,
        label: f64,
        num_classes: usize,
    },

    #[error("batch mixes sample shapes: {0}")]
    BatchShape(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}
