use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffle `0..n` with `seed` and cut it into disjoint `(train, val)` lists.
///
/// The validation share is `round(n * val_fraction)`, kept within `1..n`
/// whenever `n >= 2` and `val_fraction > 0`, so neither side ends up empty.
/// `val_fraction <= 0` puts everything in train. Both lists come back sorted.
pub fn split_indices(n: usize, val_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    if n == 0 || !(val_fraction > 0.0) {
        return (indices, Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_val = if n < 2 {
        0
    } else {
        ((n as f64 * val_fraction).round() as usize).clamp(1, n - 1)
    };
    let mut val = indices.split_off(n - n_val);
    indices.sort_unstable();
    val.sort_unstable();
    (indices, val)
}
