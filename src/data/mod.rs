// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From JSON Lines rows all the way to device tensor batches:
//
//   <split>.jsonl
//       │
//       ▼
//   DatasetLoader     → reads rows, knows the column names
//       │
//       ▼
//   CaptionPreparer   → image processor + tokenizer per row,
//       │               rows with unloadable images are dropped
//       ▼
//   CaptionDataset    → implements Burn's Dataset trait
//       │
//       ▼
//   CaptionBatcher    → pads captions, masks labels, stacks pixels
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads JSON Lines splits and decodes embedded images
pub mod loader;

/// preprocessor_config.json driven resize + normalisation
pub mod image_processor;

/// Per-row encoding with the drop-on-failure rule
pub mod preprocessor;

/// Implements Burn's Dataset trait for encoded samples
pub mod dataset;

/// Padding / label-masking collator (Burn Batcher)
pub mod batcher;

/// Seeded train/test split
pub mod splitter;
