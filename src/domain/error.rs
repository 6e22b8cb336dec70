// ============================================================
// Layer 3 — Pipeline Errors
// ============================================================
// The job distinguishes three kinds of failure:
//
//   Configuration errors  → fail fast at startup
//   Per-sample data errors → never surface here; the sample is dropped
//   Integrity errors      → a malformed sample reached the collator
//
// Everything else travels as anyhow::Error with context attached.
// Callers that need to branch on the kind use downcast_ref.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A required option is missing or unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured column is absent from the loaded dataset.
    #[error("Column {column} not found in dataset (available: {available:?})")]
    MissingColumn {
        column:    String,
        available: Vec<String>,
    },

    /// The model configuration declares no architecture.
    #[error("No architecture found in config for {checkpoint}")]
    NoArchitecture { checkpoint: String },

    /// The dispatcher could not map the architecture to a loader.
    #[error("Unknown architecture {architecture}; cannot build a model for {checkpoint}")]
    UnknownArchitecture {
        architecture: String,
        checkpoint:   String,
    },

    /// Samples without usable token ids reached the collator.
    #[error("Found {count}/{total} features without input_ids (indices {indices:?})")]
    MalformedBatch {
        count:   usize,
        total:   usize,
        indices: Vec<usize>,
    },

    /// Resizing the token embeddings failed.
    #[error("Failed to resize token embeddings: {0}")]
    VocabResize(String),
}
