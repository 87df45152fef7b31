use spectraclean_autodiff::Variable;
use spectraclean_core::{Tensor, TensorError, TensorResult};

/// Mean Squared Error loss: L = mean((pred - target)²).
pub fn mse_loss(pred: &Variable, target: &Variable) -> TensorResult<Variable> {
    let diff = pred.sub(target)?;
    let sq = diff.mul(&diff)?;
    Ok(sq.mean())
}

/// Pixel-wise cross-entropy for segmentation.
///
/// logits: `[batch, n_classes, H, W]` raw scores (softmax'd over classes internally)
/// labels: `[batch, H, W]` integer class ids stored as f64
pub fn pixel_cross_entropy(logits: &Variable, labels: &Variable) -> TensorResult<Variable> {
    logits.softmax_cross_entropy(labels)
}

/// Plain MSE between two equally shaped tensors, for evaluation.
pub fn mse(pred: &Tensor<f64>, target: &Tensor<f64>) -> TensorResult<f64> {
    if pred.shape() != target.shape() {
        return Err(TensorError::ShapeMismatch {
            expected: target.shape_vec(),
            got: pred.shape_vec(),
        });
    }
    if pred.numel() == 0 {
        return Err(TensorError::EmptyTensor);
    }
    let diff = pred.sub(target)?;
    Ok(diff.mul(&diff)?.mean_all())
}

/// Peak signal-to-noise ratio in dB for signals with peak value `max_value`.
///
/// PSNR = 10 * log10(max² / mse); infinite for a perfect reconstruction.
pub fn psnr(mse: f64, max_value: f64) -> f64 {
    if mse <= 0.0 {
        return f64::INFINITY;
    }
    10.0 * (max_value * max_value / mse).log10()
}
