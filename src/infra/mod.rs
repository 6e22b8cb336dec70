// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by several layers:
//
//   hub.rs             — resolves pretrained files from a local
//                        directory or the Hugging Face Hub
//
//   tokenizer_store.rs — loads tokenizer.json, encodes captions,
//                        writes the tokenizer back out
//
//   http.rs            — blocking image downloads with a timeout
//
//   checkpoint.rs      — model weights as named MessagePack records,
//                        training_args.json
//
//   metrics.rs         — metrics.csv, *_results.json and
//                        trainer_state.json
//
//   logging.rs         — rank-aware tracing subscriber setup
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Local-or-Hub pretrained file lookup
pub mod hub;

/// Caption tokenizer loading and persistence
pub mod tokenizer_store;

/// HTTP image fetcher
pub mod http;

/// Model checkpoint saving
pub mod checkpoint;

/// Training metrics and trainer state
pub mod metrics;

/// Logger initialisation
pub mod logging;
