pub mod checkpoint;
pub mod error;
pub mod mat;
pub mod render;

pub use checkpoint::{
    load_checkpoint, save_checkpoint, Checkpoint, ModelWeights, CHECKPOINT_FORMAT_VERSION,
};
pub use error::{IoError, IoResult};
pub use mat::{read_mat_array, write_mat_array};
pub use render::{comparison_image, default_bands, render_comparison, segment_palette};
