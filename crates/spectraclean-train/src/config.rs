use crate::error::{TrainError, TrainResult};
use serde::{Deserialize, Serialize};
use spectraclean_nn::{ModelSpec, Task};
use spectraclean_optim::{Adam, Optimizer, SGD};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

/// What to do with a batch whose samples fail to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadErrorPolicy {
    /// Drop the batch, log a warning and keep going.
    #[default]
    Skip,
    /// Stop training with the load error.
    Abort,
}

/// Everything a training run needs. Missing JSON fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub images_dir: PathBuf,
    pub masks_dir: PathBuf,
    pub task: Task,
    /// Only read for [`Task::Segment`].
    pub num_classes: usize,
    pub hidden_channels: Vec<usize>,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    pub momentum: f64,
    pub scheduler_factor: f64,
    pub scheduler_patience: usize,
    pub early_stopping_patience: usize,
    /// Share of samples held out for validation. `0` validates on the
    /// training samples.
    pub val_fraction: f64,
    pub shuffle: bool,
    pub seed: u64,
    pub checkpoint_path: PathBuf,
    pub on_load_error: LoadErrorPolicy,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            images_dir: PathBuf::from("IMAGES"),
            masks_dir: PathBuf::from("MASKS"),
            task: Task::Denoise,
            num_classes: 2,
            hidden_channels: vec![32, 64],
            num_epochs: 50,
            batch_size: 1,
            learning_rate: 1e-3,
            optimizer: OptimizerKind::Adam,
            momentum: 0.9,
            scheduler_factor: 0.5,
            scheduler_patience: 3,
            early_stopping_patience: 10,
            val_fraction: 0.2,
            shuffle: true,
            seed: 42,
            checkpoint_path: PathBuf::from("best_model.json"),
            on_load_error: LoadErrorPolicy::Skip,
        }
    }
}

impl TrainConfig {
    pub fn from_json_file(path: &Path) -> TrainResult<Self> {
        let json = fs::read_to_string(path).map_err(|source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrainConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrainResult<()> {
        let fail = |msg: &str| Err(TrainError::Config(msg.to_string()));
        if self.num_epochs == 0 {
            return fail("num_epochs must be at least 1");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1");
        }
        if self.early_stopping_patience == 0 {
            return fail("early_stopping_patience must be at least 1");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail("learning_rate must be positive");
        }
        if !(0.0..1.0).contains(&self.val_fraction) {
            return fail("val_fraction must be in [0, 1)");
        }
        if !(self.scheduler_factor > 0.0 && self.scheduler_factor < 1.0) {
            return fail("scheduler_factor must be in (0, 1)");
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return fail("momentum must be in [0, 1)");
        }
        if self.hidden_channels.is_empty() || self.hidden_channels.contains(&0) {
            return fail("hidden_channels must be a non-empty list of positive widths");
        }
        if self.task == Task::Segment && self.num_classes < 2 {
            return fail("segmentation needs at least 2 classes");
        }
        Ok(())
    }

    /// Architecture for images with `in_channels` bands.
    pub fn model_spec(&self, in_channels: usize) -> ModelSpec {
        match self.task {
            Task::Denoise => {
                ModelSpec::denoising(in_channels, self.hidden_channels.clone(), self.seed)
            }
            Task::Segment => ModelSpec::segmentation(
                in_channels,
                self.num_classes,
                self.hidden_channels.clone(),
                self.seed,
            ),
        }
    }

    pub fn build_optimizer(&self) -> Box<dyn Optimizer> {
        match self.optimizer {
            OptimizerKind::Adam => Box::new(Adam::new(self.learning_rate)),
            OptimizerKind::Sgd => Box::new(SGD::new(self.learning_rate, self.momentum)),
        }
    }
}
