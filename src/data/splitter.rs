// ============================================================
// Layer 4 — Train/Test Splitter
// ============================================================
// Used when no evaluation split is named: a seeded shuffle of the
// training rows, then the last `test_size` fraction is held out.
//
// The held-out count is rounded UP so that any non-empty dataset
// with a non-zero test fraction gets at least one eval row.
//
// Reference: rand crate documentation (SliceRandom, SeedableRng)

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Fraction of the train split held out for validation when no
/// evaluation split is configured.
pub const DEFAULT_TEST_SIZE: f64 = 0.15;

/// Shuffle `items` with `seed` and split into (train, test).
pub fn train_test_split<T>(mut items: Vec<T>, test_size: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let total  = items.len();
    let n_test = ((total as f64) * test_size).ceil() as usize;
    let n_test = n_test.min(total);

    // split_off(n) leaves [0..n) in `items` and returns [n..total)
    let test = items.split_off(total - n_test);

    tracing::debug!(
        "Dataset split: {} train, {} test (seed {})",
        items.len(),
        test.len(),
        seed
    );

    (items, test)
}
