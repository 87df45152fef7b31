//! Tensor storage, shapes and the raw convolution kernels the rest of the
//! workspace builds on.

pub mod conv;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod tensor;

pub use dtype::Float;
pub use error::{TensorError, TensorResult};
pub use shape::Shape;
pub use tensor::Tensor;
