// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Everything the job reports about a run ends up in output_dir:
//
//   metrics.csv          one row per epoch (appended)
//   train_results.json   final training metrics
//   eval_results.json    final evaluation metrics
//   all_results.json     union of the two, updated by each save
//   trainer_state.json   global step, epoch and the step log
//
// Example CSV output:
//   epoch,train_loss,eval_loss,perplexity,learning_rate
//   1,3.124500,3.089200,21.960000,0.000033
//   2,2.890100,2.854300,17.361000,0.000017
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:         usize,
    /// Mean next-token loss over the epoch's training batches
    pub train_loss:    f64,
    /// Mean loss on the evaluation split, when one exists
    pub eval_loss:     Option<f64>,
    /// Learning rate after the epoch's last step
    pub learning_rate: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, eval_loss: Option<f64>, learning_rate: f64) -> Self {
        Self { epoch, train_loss, eval_loss, learning_rate }
    }

    /// True if this epoch beat the previous best eval_loss.
    /// Epochs without evaluation never count as an improvement.
    pub fn is_improvement(&self, best_eval_loss: Option<f64>) -> bool {
        match (self.eval_loss, best_eval_loss) {
            (Some(loss), Some(best)) => loss < best,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Final metrics of the training phase (`train_results.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub epoch:                    f64,
    pub train_loss:               f64,
    pub train_runtime:            f64,
    pub train_samples:            usize,
    pub train_samples_per_second: f64,
    pub train_steps_per_second:   f64,
}

/// Final metrics of the evaluation phase (`eval_results.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub eval_loss:               f64,
    pub perplexity:              f64,
    pub eval_runtime:            f64,
    pub eval_samples:            usize,
    pub eval_samples_per_second: f64,
}

impl EvalMetrics {
    /// `perplexity` is exp(eval_loss); it overflows to infinity for huge losses.
    pub fn new(eval_loss: f64, eval_runtime: f64, eval_samples: usize) -> Self {
        Self {
            eval_loss,
            perplexity: eval_loss.exp(),
            eval_runtime,
            eval_samples,
            eval_samples_per_second: per_second(eval_samples, eval_runtime),
        }
    }
}

pub fn per_second(count: usize, seconds: f64) -> f64 {
    if seconds > 0.0 { count as f64 / seconds } else { 0.0 }
}

/// One entry of the step log kept in `trainer_state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub step:  usize,
    pub epoch: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step:      usize,
    pub epoch:            f64,
    pub num_train_epochs: usize,
    pub best_eval_loss:   Option<f64>,
    pub log_history:      Vec<LogEntry>,
}

/// Writes every metrics artefact into the output directory.
pub struct MetricsLogger {
    dir:      PathBuf,
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the logger; writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,eval_loss,perplexity,learning_rate")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { dir: dir.to_path_buf(), csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    /// Missing evaluation values are left empty.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        let (eval_loss, perplexity) = match m.eval_loss {
            Some(loss) => (format!("{loss:.6}"), format!("{:.6}", loss.exp())),
            None => (String::new(), String::new()),
        };
        writeln!(
            f,
            "{},{:.6},{},{},{:.6}",
            m.epoch, m.train_loss, eval_loss, perplexity, m.learning_rate,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, eval_loss={:?}",
            m.epoch,
            m.train_loss,
            m.eval_loss,
        );
        Ok(())
    }

    /// Log `metrics` and write them to `<split>_results.json`, merging the
    /// same keys into `all_results.json`.
    pub fn save_metrics<T: Serialize>(&self, split: &str, metrics: &T) -> Result<()> {
        let Value::Object(map) = serde_json::to_value(metrics)? else {
            anyhow::bail!("{split} metrics must serialise to a JSON object");
        };

        tracing::info!("***** {} metrics *****", split);
        for (key, value) in &map {
            tracing::info!("  {:<28} = {}", key, value);
        }

        write_json(&self.dir.join(format!("{split}_results.json")), &map)?;

        let all_path = self.dir.join("all_results.json");
        let mut all: Map<String, Value> = match fs::read_to_string(&all_path) {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("Invalid '{}'", all_path.display()))?,
            Err(_) => Map::new(),
        };
        all.extend(map);
        write_json(&all_path, &all)
    }

    pub fn save_state(&self, state: &TrainerState) -> Result<()> {
        write_json(&self.dir.join("trainer_state.json"), state)
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}
