// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Two invocation styles:
//
//   imagecap-finetune args.json          (single .json argument)
//   imagecap-finetune --model-name-or-path ... --output-dir ...
//
// Either way we end up with the same three argument records.
// All work is delegated to Layer 2 (application).
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod args;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use args::{DataArguments, ModelArguments, TrainingArguments};
use crate::domain::error::PipelineError;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(
    name = "imagecap-finetune",
    version = "0.1.0",
    about = "Fine-tune an image-captioning model on an image/caption dataset."
)]
pub struct Cli {
    #[command(flatten)]
    #[serde(flatten)]
    pub model: ModelArguments,

    #[command(flatten)]
    #[serde(flatten)]
    pub data: DataArguments,

    #[command(flatten)]
    #[serde(flatten)]
    pub training: TrainingArguments,
}

impl Cli {
    /// Parse the process arguments. A single argument ending in `.json`
    /// is read as a configuration file; anything else goes to clap.
    pub fn from_env() -> Result<Self> {
        let argv: Vec<String> = std::env::args().collect();
        if argv.len() == 2 && argv[1].ends_with(".json") {
            let path = std::path::absolute(&argv[1])
                .with_context(|| format!("Cannot resolve '{}'", argv[1]))?;
            Self::from_json_file(&path)
        } else {
            Ok(Self::parse())
        }
    }

    /// Read all three argument records from one JSON object.
    /// A missing required field or a key no record uses is a
    /// configuration error.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Cannot read '{}': {e}", path.display()))
        })?;
        let invalid = |e: serde_json::Error| {
            PipelineError::Config(format!("Invalid arguments in '{}': {e}", path.display()))
        };

        let map: Map<String, Value> = serde_json::from_str(&json).map_err(invalid)?;
        let unused = unused_keys(&map);
        if !unused.is_empty() {
            return Err(PipelineError::Config(format!(
                "Some keys in '{}' are not used by any argument: {}",
                path.display(),
                unused.join(", ")
            ))
            .into());
        }

        let mut cli: Cli = serde_json::from_value(Value::Object(map)).map_err(invalid)?;

        // clap reads LOCAL_RANK from the environment; keep the JSON path in step.
        if cli.training.local_rank < 0 {
            if let Some(rank) = std::env::var("LOCAL_RANK").ok().and_then(|r| r.parse().ok()) {
                cli.training.local_rank = rank;
            }
        }

        Ok(cli)
    }

    /// Hand the parsed records to the fine-tuning use case.
    pub fn run(self) -> Result<()> {
        use crate::application::finetune_use_case::FinetuneUseCase;

        self.training.log_config().init();

        let use_case = FinetuneUseCase::new(self.model, self.data, self.training);
        use_case.execute()
    }
}

/// Keys of `map` that match no field of the three records.
/// clap's argument ids are the field names, so the schema is the
/// source of truth for both invocation styles.
fn unused_keys(map: &Map<String, Value>) -> Vec<String> {
    let command = Cli::command();
    let known: Vec<&str> = command.get_arguments().map(|a| a.get_id().as_str()).collect();
    map.keys()
        .filter(|k| !known.contains(&k.as_str()))
        .cloned()
        .collect()
}
