use crate::error::{TrainError, TrainResult};
use log::{info, warn};
use spectraclean_autodiff::{with_no_grad, Variable};
use spectraclean_core::Tensor;
use spectraclean_data::Dataset;
use spectraclean_loss::{mse, psnr};
use spectraclean_nn::{Model, Task};

/// Reconstruction quality of a denoising model over a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub samples: usize,
    pub skipped: usize,
    pub mean_mse: f64,
    /// Mean of per-sample PSNR in dB, peak value 1.0.
    pub mean_psnr: f64,
}

/// Run a denoising model on one `[C, H, W]` cube without recording a tape.
pub fn reconstruct(model: &dyn Model, image: &Tensor<f64>) -> TrainResult<Tensor<f64>> {
    if model.spec().task != Task::Denoise {
        return Err(TrainError::Config("reconstruction needs a denoising model".into()));
    }
    let batch = image.unsqueeze(0)?;
    let out = with_no_grad(|| model.forward(&Variable::input(batch)))?;
    Ok(out.data.index_first(0)?)
}

/// Mean MSE and PSNR between each normalized image and its reconstruction.
/// Samples that fail to load or that the model cannot take (for example an
/// unsupported spatial size) are skipped with a warning.
pub fn evaluate<D: Dataset>(model: &dyn Model, dataset: &D) -> TrainResult<Evaluation> {
    if model.spec().task != Task::Denoise {
        return Err(TrainError::Config("evaluation needs a denoising model".into()));
    }
    let mut total_mse = 0.0;
    let mut total_psnr = 0.0;
    let mut samples = 0;
    let mut skipped = 0;

    for idx in 0..dataset.len() {
        let sample = match dataset.get(idx) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("skipping sample {}: {}", idx, e);
                skipped += 1;
                continue;
            }
        };
        let denoised = match reconstruct(model, &sample.image) {
            Ok(denoised) => denoised,
            Err(e) => {
                warn!("skipping {}: {}", sample.id, e);
                skipped += 1;
                continue;
            }
        };
        let err = mse(&denoised, &sample.image)?;
        let db = psnr(err, 1.0);
        info!("{}: mse {:.6}, psnr {:.2} dB", sample.id, err, db);
        total_mse += err;
        total_psnr += db;
        samples += 1;
    }

    if samples == 0 {
        return Err(TrainError::NoUsableBatches { epoch: 0, phase: "evaluation" });
    }
    Ok(Evaluation {
        samples,
        skipped,
        mean_mse: total_mse / samples as f64,
        mean_psnr: total_psnr / samples as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use spectraclean_data::{InMemoryDataset, Sample};
    use spectraclean_nn::{DenoisingCnn, SegmentationCnn};

    fn dataset() -> InMemoryDataset {
        let samples = (0..3)
            .map(|i| Sample {
                id: format!("s{}", i),
                image: Tensor::uniform(vec![2, 4, 4], 0.0, 1.0, Some(i)),
                mask: Tensor::zeros(vec![1, 4, 4]),
            })
            .collect();
        InMemoryDataset::new(samples)
    }

    #[test]
    fn test_reconstruct_matches_denoise() {
        let model = DenoisingCnn::new(2, vec![3], 1).unwrap();
        let image = Tensor::uniform(vec![2, 4, 4], 0.0, 1.0, Some(5));
        assert_eq!(reconstruct(&model, &image).unwrap(), model.denoise(&image).unwrap());
    }

    #[test]
    fn test_evaluate_averages_samples() {
        let model = DenoisingCnn::new(2, vec![3], 1).unwrap();
        let data = dataset();
        let eval = evaluate(&model, &data).unwrap();
        assert_eq!(eval.samples, 3);
        assert_eq!(eval.skipped, 0);

        let expected: f64 = data
            .samples
            .iter()
            .map(|s| mse(&model.denoise(&s.image).unwrap(), &s.image).unwrap())
            .sum::<f64>()
            / 3.0;
        assert_relative_eq!(eval.mean_mse, expected, epsilon = 1e-12);
        assert!(eval.mean_psnr > 0.0);
    }

    #[test]
    fn test_unsupported_size_is_skipped() {
        let model = DenoisingCnn::new(2, vec![3], 1).unwrap();
        let mut data = dataset();
        data.samples.push(Sample {
            id: "odd".into(),
            image: Tensor::uniform(vec![2, 3, 3], 0.0, 1.0, Some(9)),
            mask: Tensor::zeros(vec![1, 3, 3]),
        });
        let eval = evaluate(&model, &data).unwrap();
        assert_eq!(eval.samples, 3);
        assert_eq!(eval.skipped, 1);
    }

    #[test]
    fn test_segmentation_model_is_rejected() {
        let model = SegmentationCnn::new(2, 3, vec![3], 1).unwrap();
        assert!(matches!(evaluate(&model, &dataset()), Err(TrainError::Config(_))));
    }
}
