use spectraclean_core::TensorError;
use spectraclean_data::DataError;
use spectraclean_io::IoError;
use spectraclean_nn::NnError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("epoch {epoch}: every {phase} batch failed to load")]
    NoUsableBatches { epoch: usize, phase: &'static str },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Model(#[from] NnError),

    #[error(transparent)]
    Checkpoint(#[from] IoError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type TrainResult<T> = Result<T, TrainError>;
