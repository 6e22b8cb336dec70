// ============================================================
// Layer 1 — Argument Schema
// ============================================================
// Three flat configuration records:
//
//   ModelArguments    — which pretrained checkpoint to start from
//   DataArguments     — which dataset, splits and columns to use
//   TrainingArguments — hyperparameters and output location
//
// Every struct derives both clap::Args (command-line flags) and
// serde Deserialize (JSON file), so the two invocation styles
// share one schema, one set of defaults and one set of help texts.
// Flags are the kebab-case form of the field names
// (--model-name-or-path); JSON keys are the field names.
//
// Reference: Rust Book §12 (Building a CLI Program)
//            clap derive tutorial, serde field attributes

use clap::{ArgAction, Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::infra::logging::LogConfig;

fn default_true() -> bool { true }
fn default_requests_timeout() -> u64 { 1 }
fn default_batch_size() -> usize { 8 }
fn default_epochs() -> usize { 3 }
fn default_learning_rate() -> f64 { 5e-5 }
fn default_max_grad_norm() -> f64 { 1.0 }
fn default_seed() -> u64 { 42 }
fn default_logging_steps() -> usize { 50 }
fn default_num_workers() -> usize { 1 }
fn default_local_rank() -> i64 { -1 }

// ─── ModelArguments ───────────────────────────────────────────────────────────
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct ModelArguments {
    /// Path to pretrained model or model identifier from huggingface.co/models
    #[arg(long)]
    pub model_name_or_path: String,

    /// Pretrained config name or path if not the same as model_name
    #[arg(long)]
    pub config_name_or_path: Option<String>,

    /// Pretrained tokenizer name or path if not the same as model_name
    #[arg(long)]
    pub tokenizer_name: Option<String>,

    /// Where to store the pretrained models downloaded from the Hub
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Whether to use the fast tokenizer (tokenizer.json)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    #[serde(default = "default_true")]
    pub use_fast_tokenizer: bool,

    /// Whether to resize the token embeddings to the tokenizer's vocabulary
    #[arg(long)]
    #[serde(default)]
    pub overwrite_vocabulary: bool,
}

impl ModelArguments {
    /// Checkpoint used for the model weights and image processor.
    pub fn model_source(&self) -> &str {
        &self.model_name_or_path
    }

    /// Checkpoint used for config.json.
    pub fn config_source(&self) -> &str {
        self.config_name_or_path
            .as_deref()
            .unwrap_or(&self.model_name_or_path)
    }

    /// Checkpoint used for tokenizer.json.
    pub fn tokenizer_source(&self) -> &str {
        self.tokenizer_name
            .as_deref()
            .unwrap_or(&self.model_name_or_path)
    }
}

// ─── DataArguments ────────────────────────────────────────────────────────────
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct DataArguments {
    /// The name (local directory) of the dataset to use
    #[arg(long)]
    pub dataset_name: String,

    /// The configuration name of the dataset to use
    #[arg(long)]
    pub dataset_config_name: Option<String>,

    /// For debugging purposes or quicker training, truncate the number
    /// of training examples to this value if set
    #[arg(long)]
    pub max_train_samples: Option<usize>,

    /// For debugging purposes or quicker training, truncate the number
    /// of evaluation examples to this value if set
    #[arg(long)]
    pub max_eval_samples: Option<usize>,

    /// The column name of the image in the dataset
    #[arg(long)]
    pub image_column_name: String,

    /// The column name of the text in the dataset
    #[arg(long)]
    pub text_column_name: String,

    /// Whether to only preprocess the dataset and not train the model
    #[arg(long)]
    #[serde(default)]
    pub preprocessing_only: bool,

    /// The name of the training split in the dataset (defaults to "train")
    #[arg(long)]
    pub train_split_name: Option<String>,

    /// The name of the evaluation split in the dataset
    #[arg(long)]
    pub eval_split_name: Option<String>,

    /// Maximum request time in seconds when fetching image URLs
    #[arg(long, default_value_t = 1)]
    #[serde(default = "default_requests_timeout")]
    pub requests_timeout: u64,
}

impl DataArguments {
    pub fn train_split(&self) -> &str {
        self.train_split_name.as_deref().unwrap_or("train")
    }
}

// ─── TrainingArguments ────────────────────────────────────────────────────────
/// Verbosity requested for this process.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    /// Let the process rank decide (info on the main process, warning elsewhere)
    Passive,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Passive
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArguments {
    /// Where checkpoints, processor files and metrics are written
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Whether to run training
    #[arg(long)]
    #[serde(default)]
    pub do_train: bool,

    /// Whether to run evaluation on the validation split
    #[arg(long)]
    #[serde(default)]
    pub do_eval: bool,

    /// Batch size for training
    #[arg(long, default_value_t = 8)]
    #[serde(default = "default_batch_size")]
    pub per_device_train_batch_size: usize,

    /// Batch size for evaluation
    #[arg(long, default_value_t = 8)]
    #[serde(default = "default_batch_size")]
    pub per_device_eval_batch_size: usize,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 3)]
    #[serde(default = "default_epochs")]
    pub num_train_epochs: usize,

    /// Initial learning rate for AdamW (decays linearly to zero)
    #[arg(long, default_value_t = 5e-5)]
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Decoupled weight decay applied by AdamW
    #[arg(long, default_value_t = 0.0)]
    #[serde(default)]
    pub weight_decay: f64,

    /// Maximum gradient norm (gradient clipping)
    #[arg(long, default_value_t = 1.0)]
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,

    /// Random seed for shuffling and the held-out split
    #[arg(long, default_value_t = 42)]
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Log the running training loss every N optimisation steps
    #[arg(long, default_value_t = 50)]
    #[serde(default = "default_logging_steps")]
    pub logging_steps: usize,

    /// Number of worker threads used by the data loader
    #[arg(long, default_value_t = 1)]
    #[serde(default = "default_num_workers")]
    pub dataloader_num_workers: usize,

    /// Rank of this process in distributed runs (-1 when not distributed)
    #[arg(long, env = "LOCAL_RANK", default_value_t = -1, allow_hyphen_values = true)]
    #[serde(default = "default_local_rank")]
    pub local_rank: i64,

    /// Logger verbosity for this process
    #[arg(long, value_enum, default_value_t = LogLevel::Passive)]
    #[serde(default)]
    pub log_level: LogLevel,
}

impl TrainingArguments {
    /// Rank 0, or a non-distributed run.
    pub fn is_main_process(&self) -> bool {
        self.local_rank <= 0
    }

    /// Logging configuration for this process, rank-aware.
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new(self.log_level, self.is_main_process())
    }
}
