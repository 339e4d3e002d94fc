//! Random train/test partitioning.

use rand::Rng;

/// Fraction of a person's faces held out for testing.
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Number of items held out: `floor(n * fraction)`, clamped to `0..=n`.
pub fn test_count(n: usize, fraction: f64) -> usize {
    if fraction.is_nan() || fraction <= 0.0 {
        return 0;
    }
    ((n as f64 * fraction) as usize).min(n)
}

/// Draw `k` items without replacement using a partial Fisher–Yates shuffle.
///
/// Walks the index from `n - 1` down to `n - k`, swapping each slot with a
/// uniformly chosen slot in `0..=index`. The last `k` slots are the sample.
/// Returns `(remainder, sample)`; the remainder's order is not meaningful.
pub fn partial_shuffle<T, R>(mut items: Vec<T>, k: usize, rng: &mut R) -> (Vec<T>, Vec<T>)
where
    R: Rng + ?Sized,
{
    let n = items.len();
    let k = k.min(n);
    for index in (n - k..n).rev() {
        let pick = rng.gen_range(0..=index);
        items.swap(index, pick);
    }
    let sample = items.split_off(n - k);
    (items, sample)
}
