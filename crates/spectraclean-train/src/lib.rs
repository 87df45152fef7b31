pub mod config;
pub mod early_stopping;
pub mod error;
pub mod evaluate;
pub mod trainer;

pub use config::{LoadErrorPolicy, OptimizerKind, TrainConfig};
pub use early_stopping::EarlyStopping;
pub use error::{TrainError, TrainResult};
pub use evaluate::{evaluate, reconstruct, Evaluation};
pub use trainer::{train, train_on, EpochRecord, StopReason, Trainer, TrainingReport};
