// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer talks to these traits, never to the
// concrete JSON Lines reader or HTTP client. Tests swap in
// in-memory implementations.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use std::path::Path;

use crate::domain::sample::RawSample;

// ─── ImageFetcher ─────────────────────────────────────────────────────────────
/// Retrieves the raw bytes behind an image URL.
///
/// Implementations:
///   - HttpImageFetcher → one blocking GET with a timeout
pub trait ImageFetcher {
    /// Fetch the body of `url`. Any transport failure or non-success
    /// status is an error; callers decide whether it is fatal.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// A tabular split of raw samples with named columns.
///
/// Implementations:
///   - JsonlSplit → one `<split>.jsonl` file on disk
pub trait SampleSource {
    /// Names of every column present in the split.
    fn column_names(&self) -> Vec<String>;

    /// Number of rows.
    fn num_rows(&self) -> usize;

    /// Decode row `index` into a RawSample using the given columns.
    fn sample(&self, index: usize, image_column: &str, text_column: &str) -> Result<RawSample>;
}

// ─── SavePretrained ───────────────────────────────────────────────────────────
/// Anything that writes its configuration next to the trained model so
/// the output directory can be reloaded as a pretrained checkpoint.
///
/// Implementations:
///   - ImageProcessor   → preprocessor_config.json
///   - TokenizerStore   → tokenizer.json
///   - PretrainedConfig → config.json
pub trait SavePretrained {
    fn save_pretrained(&self, dir: &Path) -> Result<()>;
}
