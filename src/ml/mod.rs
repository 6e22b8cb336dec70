// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that builds, runs or trains a burn Module lives here.
//
//   config.rs     — config.json of a pretrained checkpoint and the
//                   text / vision dimensions read from it
//
//   dispatcher.rs — maps the declared architecture name to a loader
//                   category and builds the model
//
//   model.rs      — the CaptionModel trait, next-token loss and the
//                   shared building blocks (transformer block, patch
//                   embedding, vocabulary resizing)
//
//   causal.rs     — image prefix + caption in one causal stack
//   vision_seq.rs — vision encoder + cross-attending text decoder
//
//   trainer.rs    — AdamW training loop with per-epoch evaluation
//                   and checkpointing
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need

/// Pretrained model configuration
pub mod config;

/// Architecture-name dispatch
pub mod dispatcher;

/// CaptionModel trait, loss and shared layers
pub mod model;

/// GIT-style causal captioner
pub mod causal;

/// BLIP / encoder-decoder captioner
pub mod vision_seq;

/// Training loop with evaluation and checkpointing
pub mod trainer;
