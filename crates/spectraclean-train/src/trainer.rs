//! Epoch loop: train, validate, adjust the learning rate, checkpoint the
//! best weights and stop early once validation stalls.

use crate::config::{LoadErrorPolicy, TrainConfig};
use crate::early_stopping::EarlyStopping;
use crate::error::{TrainError, TrainResult};
use log::{debug, info, warn};
use spectraclean_autodiff::{backward, reset_graph, with_no_grad, Variable};
use spectraclean_core::Tensor;
use spectraclean_data::{
    mask_to_labels, split_indices, Batch, DataError, DataLoader, Dataset, HsiDataset,
};
use spectraclean_io::{save_checkpoint, Checkpoint};
use spectraclean_loss::{mse_loss, pixel_cross_entropy};
use spectraclean_nn::{build_model, Model, Task};
use spectraclean_optim::{Optimizer, ReduceLROnPlateau};
use std::path::PathBuf;

/// Why the epoch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxEpochs,
    EarlyStopping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    /// 1-based.
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    /// Learning rate the epoch was trained with.
    pub learning_rate: f64,
    pub improved: bool,
    pub skipped_batches: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub epochs: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: f64,
    pub stop_reason: StopReason,
    pub checkpoint_path: PathBuf,
}

/// A batch ready for the model, or the reason it was dropped.
enum Prepared {
    Ready { images: Tensor<f64>, labels: Option<Tensor<f64>> },
    Failed(DataError),
}

/// Drives one training run over a dataset.
pub struct Trainer<'a, D: Dataset> {
    config: &'a TrainConfig,
    dataset: &'a D,
    model: Box<dyn Model>,
    optimizer: Box<dyn Optimizer>,
    scheduler: ReduceLROnPlateau,
    early_stopping: EarlyStopping,
    train_indices: Vec<usize>,
    val_indices: Vec<usize>,
}

impl<'a, D: Dataset> Trainer<'a, D> {
    pub fn new(
        config: &'a TrainConfig,
        dataset: &'a D,
        model: Box<dyn Model>,
    ) -> TrainResult<Self> {
        config.validate()?;
        if dataset.is_empty() {
            return Err(TrainError::EmptyDataset);
        }

        let (train_indices, mut val_indices) =
            split_indices(dataset.len(), config.val_fraction, config.seed);
        if val_indices.is_empty() {
            warn!(
                "validation is not held out: validating on the {} training samples",
                train_indices.len()
            );
            val_indices = train_indices.clone();
        }
        info!(
            "{} training samples, {} validation samples, {} parameters",
            train_indices.len(),
            val_indices.len(),
            model.num_parameters()
        );

        Ok(Trainer {
            config,
            dataset,
            model,
            optimizer: config.build_optimizer(),
            scheduler: ReduceLROnPlateau::new(
                config.learning_rate,
                config.scheduler_factor,
                config.scheduler_patience,
            ),
            early_stopping: EarlyStopping::new(config.early_stopping_patience),
            train_indices,
            val_indices,
        })
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn into_model(self) -> Box<dyn Model> {
        self.model
    }

    pub fn run(&mut self) -> TrainResult<TrainingReport> {
        let config = self.config;
        let mut train_loader = DataLoader::new(
            self.dataset,
            self.train_indices.clone(),
            config.batch_size,
            config.shuffle,
            config.seed,
        );
        let mut val_loader =
            DataLoader::new(self.dataset, self.val_indices.clone(), config.batch_size, false, 0);

        let mut epochs = Vec::new();
        let mut best_epoch = None;
        let mut stop_reason = StopReason::MaxEpochs;

        for epoch in 1..=config.num_epochs {
            let learning_rate = self.optimizer.lr();
            let (train_loss, train_skipped) = self.train_epoch(&mut train_loader, epoch)?;
            let (val_loss, val_skipped) = self.validate_epoch(&mut val_loader, epoch)?;

            self.scheduler.step(val_loss);
            self.optimizer.set_lr(self.scheduler.get_lr());

            let improved = self.early_stopping.step(val_loss);
            info!(
                "epoch {}/{}: train loss {:.6}, val loss {:.6}, lr {:.2e}",
                epoch, config.num_epochs, train_loss, val_loss, learning_rate
            );
            if improved {
                let checkpoint = Checkpoint::from_model(self.model.as_ref(), epoch, val_loss);
                save_checkpoint(&checkpoint, &config.checkpoint_path)?;
                best_epoch = Some(epoch);
                info!("saved best model to {}", config.checkpoint_path.display());
            }

            epochs.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
                learning_rate,
                improved,
                skipped_batches: train_skipped + val_skipped,
            });

            if self.early_stopping.should_stop() {
                info!(
                    "early stopping after epoch {}: no improvement for {} epochs",
                    epoch,
                    self.early_stopping.counter()
                );
                stop_reason = StopReason::EarlyStopping;
                break;
            }
        }

        reset_graph();
        Ok(TrainingReport {
            epochs,
            best_epoch,
            best_val_loss: self.early_stopping.best_loss(),
            stop_reason,
            checkpoint_path: config.checkpoint_path.clone(),
        })
    }

    fn train_epoch(
        &mut self,
        loader: &mut DataLoader<'a, D>,
        epoch: usize,
    ) -> TrainResult<(f64, usize)> {
        loader.reset();
        let mut total = 0.0;
        let mut used = 0;
        let mut skipped = 0;

        for batch in loader.by_ref() {
            let (images, labels) = match self.prepare(batch)? {
                Prepared::Ready { images, labels } => (images, labels),
                Prepared::Failed(e) => {
                    warn!("epoch {}: skipping training batch: {}", epoch, e);
                    skipped += 1;
                    continue;
                }
            };

            reset_graph();
            self.model.attach_parameters();
            let loss = self.batch_loss(images, labels)?;
            let grads = backward(&loss)?;
            self.optimizer.step(&mut self.model.parameters_mut(), &grads)?;

            total += loss.data.item()?;
            used += 1;
        }

        if used == 0 {
            return Err(TrainError::NoUsableBatches { epoch, phase: "training" });
        }
        debug!("epoch {}: {} training batches, {} skipped", epoch, used, skipped);
        Ok((total / used as f64, skipped))
    }

    fn validate_epoch(
        &mut self,
        loader: &mut DataLoader<'a, D>,
        epoch: usize,
    ) -> TrainResult<(f64, usize)> {
        loader.reset();
        reset_graph();
        let mut total = 0.0;
        let mut used = 0;
        let mut skipped = 0;

        for batch in loader.by_ref() {
            let (images, labels) = match self.prepare(batch)? {
                Prepared::Ready { images, labels } => (images, labels),
                Prepared::Failed(e) => {
                    warn!("epoch {}: skipping validation batch: {}", epoch, e);
                    skipped += 1;
                    continue;
                }
            };
            let loss = with_no_grad(|| self.batch_loss(images, labels))?;
            total += loss.data.item()?;
            used += 1;
        }

        if used == 0 {
            return Err(TrainError::NoUsableBatches { epoch, phase: "validation" });
        }
        Ok((total / used as f64, skipped))
    }

    /// Apply the load-error policy and derive labels for segmentation.
    fn prepare(&self, batch: Result<Batch, DataError>) -> TrainResult<Prepared> {
        let prepared = batch.and_then(|batch| {
            let labels = match self.model.spec().task {
                Task::Denoise => None,
                Task::Segment => Some(batch_labels(&batch, self.model.spec().out_channels)?),
            };
            Ok(Prepared::Ready { images: batch.images, labels })
        });
        match (prepared, self.config.on_load_error) {
            (Ok(ready), _) => Ok(ready),
            (Err(e), LoadErrorPolicy::Skip) => Ok(Prepared::Failed(e)),
            (Err(e), LoadErrorPolicy::Abort) => Err(e.into()),
        }
    }

    fn batch_loss(
        &self,
        images: Tensor<f64>,
        labels: Option<Tensor<f64>>,
    ) -> TrainResult<Variable> {
        let input = Variable::input(images);
        let output = self.model.forward(&input)?;
        let loss = match labels {
            // Reconstruction target is the input itself.
            None => mse_loss(&output, &input)?,
            Some(labels) => pixel_cross_entropy(&output, &Variable::input(labels))?,
        };
        Ok(loss)
    }
}

/// `[B, H, W]` class ids from the `[B, Cm, H, W]` masks of a batch.
fn batch_labels(batch: &Batch, num_classes: usize) -> Result<Tensor<f64>, DataError> {
    let labels = batch
        .ids
        .iter()
        .enumerate()
        .map(|(i, id)| mask_to_labels(&batch.masks.index_first(i)?, num_classes, id))
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&Tensor<f64>> = labels.iter().collect();
    Ok(Tensor::stack(&refs)?)
}

/// Band count of the first sample that loads.
fn probe_channels<D: Dataset>(dataset: &D) -> TrainResult<usize> {
    let mut last_err = None;
    for idx in 0..dataset.len() {
        match dataset.get(idx) {
            Ok(sample) => return Ok(sample.image.shape().dim(0)?),
            Err(e) => {
                warn!("cannot probe band count from sample {}: {}", idx, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.map(TrainError::from).unwrap_or(TrainError::EmptyDataset))
}

/// Train a fresh model on `dataset` as described by `config`.
pub fn train_on<D: Dataset>(
    config: &TrainConfig,
    dataset: &D,
) -> TrainResult<(TrainingReport, Box<dyn Model>)> {
    config.validate()?;
    let channels = probe_channels(dataset)?;
    let model = build_model(config.model_spec(channels))?;
    let mut trainer = Trainer::new(config, dataset, model)?;
    let report = trainer.run()?;
    Ok((report, trainer.into_model()))
}

/// Scan `config.images_dir` / `config.masks_dir` and train on every pair.
pub fn train(config: &TrainConfig) -> TrainResult<TrainingReport> {
    let dataset = HsiDataset::scan(&config.images_dir, &config.masks_dir)?;
    info!("found {} image/mask pairs", dataset.len());
    let (report, _) = train_on(config, &dataset)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerKind;
    use spectraclean_data::{InMemoryDataset, Sample};
    use spectraclean_io::load_checkpoint;
    use tempfile::tempdir;

    fn sample(id: &str, seed: u64) -> Sample {
        let image = Tensor::uniform(vec![2, 4, 4], 0.0, 1.0, Some(seed));
        let mask = Tensor::new((0..16).map(|i| (i % 2) as f64).collect(), vec![1, 4, 4]).unwrap();
        Sample { id: id.into(), image, mask }
    }

    fn dataset(n: usize) -> InMemoryDataset {
        InMemoryDataset::new((0..n).map(|i| sample(&format!("s{}", i), i as u64)).collect())
    }

    /// `Box<dyn Model>` is not `Debug`, so `unwrap_err` is unavailable.
    fn train_err<T>(result: TrainResult<T>) -> TrainError {
        match result {
            Ok(_) => panic!("training should have failed"),
            Err(e) => e,
        }
    }

    fn config(dir: &std::path::Path) -> TrainConfig {
        TrainConfig {
            hidden_channels: vec![3],
            num_epochs: 2,
            checkpoint_path: dir.join("best.json"),
            ..Default::default()
        }
    }

    #[test]
    fn test_denoising_run_records_every_epoch() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let (report, model) = train_on(&config, &dataset(4)).unwrap();

        assert_eq!(report.epochs.len(), 2);
        assert_eq!(report.stop_reason, StopReason::MaxEpochs);
        assert!(report.epochs[0].improved);
        assert!(report.best_epoch.is_some());
        assert!(report.epochs.iter().all(|e| e.train_loss.is_finite() && e.val_loss.is_finite()));

        let ckpt = load_checkpoint(&config.checkpoint_path).unwrap();
        assert_eq!(Some(ckpt.epoch), report.best_epoch);
        assert_eq!(ckpt.spec, *model.spec());
    }

    #[test]
    fn test_segmentation_run() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            task: Task::Segment,
            num_classes: 2,
            ..config(dir.path())
        };
        let (report, model) = train_on(&config, &dataset(3)).unwrap();
        assert_eq!(model.spec().out_channels, 2);
        assert!(report.best_val_loss.is_finite());
    }

    #[test]
    fn test_bad_labels_are_skipped_then_fail() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            task: Task::Segment,
            num_classes: 2,
            val_fraction: 0.0,
            ..config(dir.path())
        };
        let mut samples = dataset(2).samples;
        for s in &mut samples {
            s.mask = s.mask.mul_scalar(5.0);
        }
        let err = train_err(train_on(&config, &InMemoryDataset::new(samples)));
        assert!(matches!(err, TrainError::NoUsableBatches { epoch: 1, phase: "training" }));
    }

    #[test]
    fn test_abort_policy_surfaces_load_error() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            task: Task::Segment,
            on_load_error: LoadErrorPolicy::Abort,
            ..config(dir.path())
        };
        let mut samples = dataset(2).samples;
        samples[1].mask = samples[1].mask.mul_scalar(5.0);
        let err = train_err(train_on(&config, &InMemoryDataset::new(samples)));
        assert!(matches!(err, TrainError::Data(DataError::Label { .. })));
    }

    #[test]
    fn test_early_stopping_halts_run() {
        let dir = tempdir().unwrap();
        // Steps this small leave every weight unchanged, so validation loss
        // is flat after the first epoch.
        let config = TrainConfig {
            num_epochs: 50,
            optimizer: OptimizerKind::Sgd,
            momentum: 0.0,
            learning_rate: 1e-300,
            early_stopping_patience: 1,
            ..config(dir.path())
        };
        let (report, _) = train_on(&config, &dataset(2)).unwrap();
        assert_eq!(report.stop_reason, StopReason::EarlyStopping);
        assert_eq!(report.epochs.len(), 2);
        assert_eq!(report.best_epoch, Some(1));
        assert!(!report.epochs[1].improved);
    }

    #[test]
    fn test_plateau_reductions_reach_optimizer() {
        let dir = tempdir().unwrap();
        // Plain SGD at these rates moves the loss far less than the
        // scheduler's relative threshold, so every epoch after the first is
        // a plateau epoch.
        let config = TrainConfig {
            num_epochs: 10,
            optimizer: OptimizerKind::Sgd,
            momentum: 0.0,
            learning_rate: 1e-6,
            scheduler_factor: 0.5,
            scheduler_patience: 3,
            early_stopping_patience: 100,
            ..config(dir.path())
        };
        let (report, _) = train_on(&config, &dataset(2)).unwrap();
        assert_eq!(report.epochs.len(), 10);

        let lrs: Vec<f64> = report.epochs.iter().map(|e| e.learning_rate).collect();
        let mut expected = vec![1e-6; 5];
        expected.extend([5e-7; 4]);
        expected.push(2.5e-7);
        for (epoch, (got, want)) in lrs.iter().zip(&expected).enumerate() {
            assert!(
                (got - want).abs() < 1e-18,
                "epoch {}: lr {:e}, expected {:e}",
                epoch + 1,
                got,
                want
            );
        }
    }

    #[test]
    fn test_zero_early_stopping_patience_is_rejected() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            early_stopping_patience: 0,
            ..config(dir.path())
        };
        let err = train_err(train_on(&config, &dataset(4)));
        assert!(matches!(err, TrainError::Config(_)));
        assert!(!config.checkpoint_path.exists());
    }

    #[test]
    fn test_empty_dataset() {
        let dir = tempdir().unwrap();
        let err = train_err(train_on(&config(dir.path()), &InMemoryDataset::new(vec![])));
        assert!(matches!(err, TrainError::EmptyDataset));
    }
}
