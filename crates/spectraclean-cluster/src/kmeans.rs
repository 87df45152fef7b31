use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spectraclean_core::{Float, Tensor, TensorError, TensorResult};

/// K-Means clustering with k-means++ initialization.
///
/// Rows of an `[n, d]` tensor are points. With a fixed `seed`, fitting the
/// same data twice gives identical centroids and labels.
pub struct KMeans<T: Float> {
    pub n_clusters: usize,
    pub max_iter: usize,
    pub tol: T,
    pub seed: Option<u64>,
    pub centroids: Option<Tensor<T>>,
    pub labels: Option<Tensor<T>>,
    pub inertia: Option<T>,
    pub n_iter: usize,
}

fn squared_distance<T: Float>(a: &[T], b: &[T]) -> T {
    a.iter().zip(b).map(|(&x, &y)| (x - y) * (x - y)).sum()
}

/// Index of the closest centroid and its squared distance.
fn nearest<T: Float>(point: &[T], centroids: &[T], d: usize) -> (usize, T) {
    let mut best = (0, T::INFINITY);
    for (k, c) in centroids.chunks_exact(d).enumerate() {
        let dist = squared_distance(point, c);
        if dist < best.1 {
            best = (k, dist);
        }
    }
    best
}

impl<T: Float> KMeans<T> {
    pub fn new(n_clusters: usize, max_iter: usize) -> Self {
        KMeans {
            n_clusters,
            max_iter,
            tol: T::from_f64(1e-4),
            seed: Some(42),
            centroids: None,
            labels: None,
            inertia: None,
            n_iter: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn dims(&self, x: &Tensor<T>) -> TensorResult<(usize, usize)> {
        if x.ndim() != 2 {
            return Err(TensorError::DimensionMismatch(format!(
                "k-means expects [points, features], got {}",
                x.shape()
            )));
        }
        Ok((x.shape().dim(0)?, x.shape().dim(1)?))
    }

    /// Fit the model to data.
    pub fn fit(&mut self, x: &Tensor<T>) -> TensorResult<()> {
        let (n, d) = self.dims(x)?;
        if self.n_clusters == 0 || n < self.n_clusters || d == 0 {
            return Err(TensorError::InvalidOperation(format!(
                "cannot form {} clusters from {} points of dimension {}",
                self.n_clusters, n, d
            )));
        }
        let data = x.data();

        let mut centroids = self.init_centroids_pp(data, n, d);
        let mut labels = vec![0usize; n];
        self.n_iter = 0;

        for _iter in 0..self.max_iter {
            self.n_iter += 1;

            // Assignment step
            for (i, point) in data.chunks_exact(d).enumerate() {
                labels[i] = nearest(point, &centroids, d).0;
            }

            // Update step; an emptied cluster keeps its previous centroid.
            let mut sums = vec![T::ZERO; self.n_clusters * d];
            let mut counts = vec![0usize; self.n_clusters];
            for (point, &k) in data.chunks_exact(d).zip(&labels) {
                counts[k] += 1;
                for (s, &v) in sums[k * d..(k + 1) * d].iter_mut().zip(point) {
                    *s += v;
                }
            }
            let mut new_centroids = centroids.clone();
            for k in 0..self.n_clusters {
                if counts[k] > 0 {
                    let count = T::from_usize(counts[k]);
                    for j in 0..d {
                        new_centroids[k * d + j] = sums[k * d + j] / count;
                    }
                }
            }

            // Check convergence
            let max_shift = new_centroids
                .iter()
                .zip(&centroids)
                .map(|(&a, &b)| (a - b).abs())
                .fold(T::ZERO, T::max);

            centroids = new_centroids;
            if max_shift < self.tol {
                break;
            }
        }

        // Final assignment against the converged centroids, plus inertia.
        let mut inertia = T::ZERO;
        for (i, point) in data.chunks_exact(d).enumerate() {
            let (k, dist) = nearest(point, &centroids, d);
            labels[i] = k;
            inertia += dist;
        }

        self.centroids = Some(Tensor::new(centroids, vec![self.n_clusters, d])?);
        let label_data: Vec<T> = labels.iter().map(|&l| T::from_usize(l)).collect();
        self.labels = Some(Tensor::new(label_data, vec![n])?);
        self.inertia = Some(inertia);

        Ok(())
    }

    fn init_centroids_pp(&self, data: &[T], n: usize, d: usize) -> Vec<T> {
        let mut rng = match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let mut centroids = Vec::with_capacity(self.n_clusters * d);

        // Pick first centroid randomly
        let first = rng.gen_range(0..n);
        centroids.extend_from_slice(&data[first * d..(first + 1) * d]);

        // Pick remaining centroids proportional to distance²
        let mut distances = vec![T::INFINITY; n];
        for _k in 1..self.n_clusters {
            let newest = &centroids[centroids.len() - d..];
            for (i, point) in data.chunks_exact(d).enumerate() {
                distances[i] = distances[i].min(squared_distance(point, newest));
            }

            let total: T = distances.iter().copied().sum();
            let threshold = T::from_f64(rng.gen::<f64>()) * total;
            let mut cumulative = T::ZERO;
            let mut selected = n - 1;
            for (i, &dist) in distances.iter().enumerate() {
                cumulative += dist;
                if cumulative >= threshold && dist > T::ZERO {
                    selected = i;
                    break;
                }
            }

            centroids.extend_from_slice(&data[selected * d..(selected + 1) * d]);
        }

        centroids
    }

    /// Predict cluster labels for new data.
    pub fn predict(&self, x: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let centroids = self.centroids.as_ref().ok_or(TensorError::NotFitted)?;
        let (n, d) = self.dims(x)?;
        if d != centroids.shape().dim(1)? {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n, centroids.shape().dim(1)?],
                got: x.shape_vec(),
            });
        }
        let labels = x
            .data()
            .chunks_exact(d)
            .map(|point| T::from_usize(nearest(point, centroids.data(), d).0))
            .collect();
        Tensor::new(labels, vec![n])
    }

    /// Fit, then return the training labels.
    pub fn fit_predict(&mut self, x: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.fit(x)?;
        self.labels.clone().ok_or(TensorError::NotFitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Tensor<f64> {
        Tensor::new(
            vec![0.0, 0.0, 0.5, 0.5, 1.0, 0.0, 10.0, 10.0, 10.5, 10.5, 11.0, 10.0],
            vec![6, 2],
        )
        .unwrap()
    }

    #[test]
    fn test_kmeans() {
        let mut km = KMeans::new(2, 100);
        km.fit(&two_blobs()).unwrap();

        let labels = km.labels.as_ref().unwrap().data();
        // First 3 should be same cluster, last 3 should be same cluster
        assert_ne!(labels[0], labels[3]);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert!(km.inertia.unwrap() < 2.0);
    }

    #[test]
    fn test_predict_matches_fit() {
        let x = two_blobs();
        let mut km = KMeans::new(2, 100).with_seed(3);
        let fitted = km.fit_predict(&x).unwrap();
        assert_eq!(km.predict(&x).unwrap(), fitted);
    }

    #[test]
    fn test_predict_before_fit() {
        let km: KMeans<f64> = KMeans::new(2, 10);
        assert_eq!(km.predict(&two_blobs()), Err(TensorError::NotFitted));
    }

    #[test]
    fn test_too_few_points() {
        let mut km: KMeans<f64> = KMeans::new(7, 10);
        assert!(km.fit(&two_blobs()).is_err());
    }

    #[test]
    fn test_identical_points() {
        let x: Tensor<f64> = Tensor::ones(vec![4, 3]);
        let mut km = KMeans::new(2, 10);
        let labels = km.fit_predict(&x).unwrap();
        assert_eq!(labels.numel(), 4);
        assert_eq!(km.inertia.unwrap(), 0.0);
    }
}
