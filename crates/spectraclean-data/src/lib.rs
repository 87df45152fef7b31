pub mod dataloader;
pub mod dataset;
pub mod error;
pub mod split;

pub use dataloader::{Batch, DataLoader};
pub use dataset::{
    list_mat_files, mask_id, mask_to_labels, normalize_by_max, pair_by_id, Dataset, HsiDataset,
    InMemoryDataset, Sample, SamplePaths,
};
pub use error::DataError;
pub use split::split_indices;
