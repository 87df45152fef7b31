//! Per-pixel segmentation of a denoised cube by clustering spectra.

use crate::kmeans::KMeans;
use log::debug;
use spectraclean_core::{Tensor, TensorResult};

pub const DEFAULT_MAX_ITER: usize = 300;

/// Cluster every pixel's spectrum of a `[C, H, W]` cube into `n_clusters`
/// groups and return the `[H, W]` label map.
pub fn segment_image(
    cube: &Tensor<f64>,
    n_clusters: usize,
    seed: u64,
    max_iter: usize,
) -> TensorResult<Tensor<f64>> {
    let (c, h, w) = cube.shape().chw()?;
    let pixels = cube.permute(&[1, 2, 0])?.reshape(vec![h * w, c])?;

    let mut km = KMeans::new(n_clusters, max_iter).with_seed(seed);
    let labels = km.fit_predict(&pixels)?;
    debug!(
        "k-means: {} clusters over {} pixels, {} iterations, inertia {:.4}",
        n_clusters,
        h * w,
        km.n_iter,
        km.inertia.unwrap_or(f64::NAN)
    );
    labels.reshape(vec![h, w])
}
