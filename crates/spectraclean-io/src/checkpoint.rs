use crate::error::{IoError, IoResult};
use log::debug;
use serde::{Deserialize, Serialize};
use spectraclean_core::Tensor;
use spectraclean_nn::{build_model, Model, ModelSpec};
use std::fs;
use std::path::Path;

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Serializable model wrapper for saving/loading model weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub tensors: Vec<(String, Vec<f64>, Vec<usize>)>, // (name, data, shape)
}

impl ModelWeights {
    pub fn new() -> Self {
        ModelWeights {
            tensors: Vec::new(),
        }
    }

    pub fn add(&mut self, name: &str, tensor: &Tensor<f64>) {
        self.tensors.push((
            name.to_string(),
            tensor.data().to_vec(),
            tensor.shape_vec(),
        ));
    }

    pub fn get(&self, name: &str) -> IoResult<Option<Tensor<f64>>> {
        self.tensors
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, data, shape)| Tensor::new(data.clone(), shape.clone()).map_err(IoError::from))
            .transpose()
    }

    pub fn from_model(model: &dyn Model) -> Self {
        let mut weights = ModelWeights::new();
        for (name, tensor) in model.state_dict() {
            weights.add(&name, &tensor);
        }
        weights
    }

    /// Rebuild `(name, tensor)` pairs, validating each data/shape pair.
    pub fn to_state_dict(&self) -> IoResult<Vec<(String, Tensor<f64>)>> {
        self.tensors
            .iter()
            .map(|(name, data, shape)| {
                Ok((name.clone(), Tensor::new(data.clone(), shape.clone())?))
            })
            .collect()
    }
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-so-far model snapshot written during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub spec: ModelSpec,
    /// 1-based epoch the weights were taken after.
    pub epoch: usize,
    pub val_loss: f64,
    pub weights: ModelWeights,
}

impl Checkpoint {
    pub fn from_model(model: &dyn Model, epoch: usize, val_loss: f64) -> Self {
        Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            spec: model.spec().clone(),
            epoch,
            val_loss,
            weights: ModelWeights::from_model(model),
        }
    }

    /// Copy the stored weights into an existing model of the same architecture.
    pub fn restore(&self, model: &mut dyn Model) -> IoResult<()> {
        model.load_state_dict(&self.weights.to_state_dict()?)?;
        Ok(())
    }

    /// Build a fresh model from the stored spec and load the weights into it.
    pub fn build_model(&self) -> IoResult<Box<dyn Model>> {
        let mut model = build_model(self.spec.clone())?;
        self.restore(model.as_mut())?;
        Ok(model)
    }
}

/// Save a checkpoint as JSON. The file is written next to `path` first and
/// renamed into place, so readers never see a partial checkpoint.
pub fn save_checkpoint(checkpoint: &Checkpoint, path: &Path) -> IoResult<()> {
    let json = serde_json::to_string(checkpoint)?;
    let tmp = path.with_extension("json.partial");
    fs::write(&tmp, json).map_err(|e| IoError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| IoError::io(path, e))?;
    debug!("wrote checkpoint {} (epoch {})", path.display(), checkpoint.epoch);
    Ok(())
}

/// Load a checkpoint written by [`save_checkpoint`].
pub fn load_checkpoint(path: &Path) -> IoResult<Checkpoint> {
    let json = fs::read_to_string(path).map_err(|e| IoError::io(path, e))?;
    let checkpoint: Checkpoint = serde_json::from_str(&json)?;
    if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(IoError::CheckpointVersion {
            found: checkpoint.format_version,
            expected: CHECKPOINT_FORMAT_VERSION,
        });
    }
    Ok(checkpoint)
}
