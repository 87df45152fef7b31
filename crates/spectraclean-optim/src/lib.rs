pub mod optimizer;
pub mod scheduler;

pub use optimizer::{Adam, Optimizer, SGD};
pub use scheduler::ReduceLROnPlateau;
