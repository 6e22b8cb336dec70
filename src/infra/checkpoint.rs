// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights as named MessagePack records.
//
// File naming convention (under output_dir):
//   checkpoints/
//     model_epoch_1.mpk      ← weights after epoch 1
//     model_epoch_2.mpk      ← weights after epoch 2
//     latest_epoch.json      ← number of the latest epoch
//   model.mpk                ← final weights; output_dir can be passed
//                              back as model_name_or_path
//   training_args.json       ← the arguments the run was started with
//
// The recorder appends the `.mpk` extension itself, so paths handed to
// it are stems. Weights are kept at full precision so a reloaded model
// matches the one that was trained. Loading fails if the architecture
// built from config.json doesn't match the record.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Recorder used for every model file this tool writes or reads.
pub type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

pub struct CheckpointManager {
    output_dir: PathBuf,
    epoch_dir:  PathBuf,
}

impl CheckpointManager {
    /// Creates `output_dir/checkpoints` if it doesn't already exist.
    pub fn new(output_dir: &Path) -> Result<Self> {
        let epoch_dir = output_dir.join("checkpoints");
        fs::create_dir_all(&epoch_dir)
            .with_context(|| format!("Cannot create '{}'", epoch_dir.display()))?;
        Ok(Self { output_dir: output_dir.to_path_buf(), epoch_dir })
    }

    /// Save model weights for a given epoch and move the latest pointer.
    pub fn save_epoch<B: Backend, M: Module<B>>(&self, model: &M, epoch: usize) -> Result<()> {
        let path = self.epoch_dir.join(format!("model_epoch_{epoch}"));
        record(model, &path)?;

        let latest_path = self.epoch_dir.join("latest_epoch.json");
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| "Failed to write latest_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Save the final weights as `output_dir/model.mpk`.
    pub fn save_model<B: Backend, M: Module<B>>(&self, model: &M) -> Result<()> {
        record(model, &self.output_dir.join("model"))?;
        tracing::info!("Model saved to '{}'", self.output_dir.display());
        Ok(())
    }

    /// Write the run's arguments to `training_args.json`.
    pub fn save_training_args<T: Serialize>(&self, args: &T) -> Result<()> {
        let path = self.output_dir.join("training_args.json");
        fs::write(&path, serde_json::to_string_pretty(args)?)
            .with_context(|| format!("Cannot write arguments to '{}'", path.display()))?;
        tracing::debug!("Saved training arguments to '{}'", path.display());
        Ok(())
    }

    pub fn latest_epoch(&self) -> Result<usize> {
        let path = self.epoch_dir.join("latest_epoch.json");
        let s = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}

fn record<B: Backend, M: Module<B>>(model: &M, stem: &Path) -> Result<()> {
    ModelRecorder::new()
        .record(model.clone().into_record(), stem.to_path_buf())
        .with_context(|| format!("Failed to save checkpoint to '{}'", stem.display()))
}

/// Restore `model`'s weights from the record file at `path` (e.g. `.../model.mpk`).
pub fn load_weights<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    let stem = path.with_extension("");
    let record = ModelRecorder::new()
        .load(stem, device)
        .with_context(|| format!("Cannot load weights from '{}'", path.display()))?;
    Ok(model.load_record(record))
}
