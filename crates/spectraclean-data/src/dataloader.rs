use crate::dataset::{Dataset, Sample};
use crate::error::DataError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use spectraclean_core::Tensor;

/// Samples stacked along a new leading batch axis.
#[derive(Debug, Clone)]
pub struct Batch {
    pub ids: Vec<String>,
    /// `[B, C, H, W]`
    pub images: Tensor<f64>,
    /// `[B, Cm, H, W]`
    pub masks: Tensor<f64>,
}

impl Batch {
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self, DataError> {
        let images: Vec<&Tensor<f64>> = samples.iter().map(|s| &s.image).collect();
        let masks: Vec<&Tensor<f64>> = samples.iter().map(|s| &s.mask).collect();
        let ids: Vec<String> = samples.iter().map(|s| s.id.clone()).collect();
        let describe = |e| DataError::BatchShape(format!("{:?}: {}", ids, e));
        let images = Tensor::stack(&images).map_err(describe)?;
        let masks = Tensor::stack(&masks).map_err(describe)?;
        Ok(Batch { ids, images, masks })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// DataLoader for batching and shuffling a subset of a dataset.
///
/// Yields `Result<Batch, DataError>`: a batch fails as a whole if any of its
/// samples fails to load or the samples disagree in shape.
pub struct DataLoader<'a, D: Dataset> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: bool,
    indices: Vec<usize>,
    rng: StdRng,
    current: usize,
}

impl<'a, D: Dataset> DataLoader<'a, D> {
    pub fn new(
        dataset: &'a D,
        indices: Vec<usize>,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Self {
        let mut loader = DataLoader {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            indices,
            rng: StdRng::seed_from_u64(seed),
            current: 0,
        };
        if shuffle {
            loader.indices.shuffle(&mut loader.rng);
        }
        loader
    }

    /// Iterate over every sample of `dataset` in order.
    pub fn sequential(dataset: &'a D, batch_size: usize) -> Self {
        Self::new(dataset, (0..dataset.len()).collect(), batch_size, false, 0)
    }

    /// Rewind for the next epoch, reshuffling from the loader's own RNG so
    /// every epoch sees a different but reproducible order.
    pub fn reset(&mut self) {
        self.current = 0;
        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }
}

impl<'a, D: Dataset> Iterator for DataLoader<'a, D> {
    type Item = Result<Batch, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.indices.len() {
            return None;
        }

        let end = (self.current + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current..end];
        self.current = end;

        let samples: Result<Vec<Sample>, DataError> =
            batch_indices.iter().map(|&idx| self.dataset.get(idx)).collect();
        Some(samples.and_then(Batch::from_samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;

    fn sample(id: usize, h: usize) -> Sample {
        Sample {
            id: format!("s{}", id),
            image: Tensor::full(vec![3, h, 4], id as f64),
            mask: Tensor::zeros(vec![1, h, 4]),
        }
    }

    #[test]
    fn test_batches_cover_indices() {
        let ds = InMemoryDataset::new((0..5).map(|i| sample(i, 4)).collect());
        let loader = DataLoader::new(&ds, vec![0, 1, 2, 3, 4], 2, false, 0);
        assert_eq!(loader.num_batches(), 3);

        let batches: Vec<Batch> = loader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].images.shape_vec(), vec![2, 3, 4, 4]);
        assert_eq!(batches[2].ids, vec!["s4"]);
        assert_eq!(batches[1].masks.shape_vec(), vec![2, 1, 4, 4]);
    }

    #[test]
    fn test_shuffle_is_seeded_and_changes_per_epoch() {
        let ds = InMemoryDataset::new((0..8).map(|i| sample(i, 2)).collect());
        fn order(loader: &mut DataLoader<'_, InMemoryDataset>) -> Vec<String> {
            loader.by_ref().flat_map(|b| b.unwrap().ids).collect()
        }

        let mut a = DataLoader::new(&ds, (0..8).collect(), 3, true, 9);
        let mut b = DataLoader::new(&ds, (0..8).collect(), 3, true, 9);
        let first = order(&mut a);
        assert_eq!(first, order(&mut b));

        a.reset();
        let second = order(&mut a);
        let mut sorted = second.clone();
        sorted.sort();
        let mut expected: Vec<String> = (0..8).map(|i| format!("s{}", i)).collect();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_mixed_shapes_fail_the_batch() {
        let ds = InMemoryDataset::new(vec![sample(0, 4), sample(1, 2)]);
        let mut loader = DataLoader::sequential(&ds, 2);
        assert!(matches!(loader.next(), Some(Err(DataError::BatchShape(_)))));
        assert!(loader.next().is_none());
    }

    #[test]
    fn test_failed_sample_fails_only_its_batch() {
        let ds = InMemoryDataset::new(vec![sample(0, 2), sample(1, 2)]);
        let mut loader = DataLoader::new(&ds, vec![0, 7, 1], 1, false, 0);
        assert!(loader.next().unwrap().is_ok());
        assert!(loader.next().unwrap().is_err());
        assert!(loader.next().unwrap().is_ok());
    }
}
