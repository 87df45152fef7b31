pub mod conv;
pub mod error;
pub mod layers;
pub mod models;
pub mod sequential;

pub use conv::*;
pub use error::{NnError, NnResult};
pub use layers::*;
pub use models::*;
pub use sequential::*;
