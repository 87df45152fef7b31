//! # SpectraClean
//!
//! Hyperspectral image denoising and segmentation on a small pure-Rust
//! tensor and autodiff engine.
//!
//! ## Modules
//!
//! - **core**: tensors with broadcasting, reductions and NCHW conv/pool kernels
//! - **autodiff**: thread-local tape with reverse-mode gradients and no-grad mode
//! - **nn**: Conv2D, ConvTranspose2D, MaxPool2D, DenoisingCnn, SegmentationCnn
//! - **optim**: SGD (momentum), Adam, ReduceLROnPlateau
//! - **loss**: MSE, pixel-wise cross-entropy, PSNR
//! - **data**: image/mask datasets paired by id, train/val split, DataLoader
//! - **io**: MAT v5 arrays, JSON checkpoints, three-panel PNG rendering
//! - **cluster**: k-means++ and per-pixel spectral segmentation
//! - **train**: config, training loop with early stopping, evaluation

/// Core tensor engine.
pub use spectraclean_core as core;

/// Automatic differentiation.
pub use spectraclean_autodiff as autodiff;

/// Neural network layers and models.
pub use spectraclean_nn as nn;

/// Optimizers and learning-rate scheduling.
pub use spectraclean_optim as optim;

/// Loss functions.
pub use spectraclean_loss as loss;

/// Datasets and batching.
pub use spectraclean_data as data;

/// File formats.
pub use spectraclean_io as io;

/// Clustering.
pub use spectraclean_cluster as cluster;

/// Training and evaluation.
pub use spectraclean_train as train;
