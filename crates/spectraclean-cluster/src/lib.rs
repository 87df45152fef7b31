pub mod kmeans;
pub mod segment;

pub use kmeans::*;
pub use segment::*;
