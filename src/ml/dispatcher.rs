// ============================================================
// Layer 5 — Model Dispatcher
// ============================================================
// `config.json` declares what the checkpoint is (`"architectures":
// ["GitForCausalLM"]`). The first declared name is matched against an
// ordered table of fragments; the first fragment contained in the name
// decides which loader builds the model. Unknown names are not an error
// here: the dispatcher warns and returns `None`, and the caller decides
// how fatal that is.

use anyhow::Result;
use burn::prelude::*;
use std::fmt;

use crate::domain::error::PipelineError;
use crate::infra::checkpoint::load_weights;
use crate::infra::hub::PretrainedResolver;
use crate::ml::causal::{CausalCaptioner, CausalCaptionerConfig};
use crate::ml::config::PretrainedConfig;
use crate::ml::vision_seq::{VisionSeq2Seq, VisionSeq2SeqConfig};

/// Burn record shipped next to `config.json` when the checkpoint has
/// already been fine-tuned by this tool.
pub const MODEL_RECORD_FILE: &str = "model.mpk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderCategory {
    /// Image prefix and caption decoded by one causal stack.
    CausalLm,
    /// Vision encoder feeding a text decoder through cross-attention.
    VisionToSeq,
}

impl fmt::Display for LoaderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CausalLm    => write!(f, "causal-lm"),
            Self::VisionToSeq => write!(f, "vision-to-seq"),
        }
    }
}

/// Checked in order; first substring match wins.
pub const ARCHITECTURE_LOADERS: &[(&str, LoaderCategory)] = &[
    ("GitForCausalLM",               LoaderCategory::CausalLm),
    ("BlipForConditionalGeneration", LoaderCategory::VisionToSeq),
    ("VisionEncoderDecoderModel",    LoaderCategory::VisionToSeq),
];

/// Loader category for `config`'s first architecture.
///
/// `Err(NoArchitecture)` when the list is empty or absent, `Ok(None)`
/// (after a warning) when no table entry matches.
pub fn select_loader<'c>(
    config:     &'c PretrainedConfig,
    checkpoint: &str,
) -> Result<Option<(&'c str, LoaderCategory)>, PipelineError> {
    let architecture = config
        .primary_architecture()
        .ok_or_else(|| PipelineError::NoArchitecture { checkpoint: checkpoint.to_string() })?;

    let category = ARCHITECTURE_LOADERS
        .iter()
        .find(|(fragment, _)| architecture.contains(fragment))
        .map(|&(_, category)| category);

    match category {
        Some(category) => Ok(Some((architecture, category))),
        None => {
            tracing::warn!(
                "No loader registered for architecture {} ({}); no model will be built",
                architecture,
                checkpoint
            );
            Ok(None)
        }
    }
}

/// A model built by one of the loaders.
#[derive(Debug)]
pub enum LoadedModel<B: Backend> {
    CausalLm(CausalCaptioner<B>),
    VisionToSeq(VisionSeq2Seq<B>),
}

impl<B: Backend> LoadedModel<B> {
    pub fn category(&self) -> LoaderCategory {
        match self {
            Self::CausalLm(_)    => LoaderCategory::CausalLm,
            Self::VisionToSeq(_) => LoaderCategory::VisionToSeq,
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Self::CausalLm(m)    => m.num_params(),
            Self::VisionToSeq(m) => m.num_params(),
        }
    }
}

/// Build the model for `checkpoint`, restoring `model.mpk` when the
/// checkpoint provides one. `Ok(None)` if the architecture is unknown.
pub fn load_model<B: Backend>(
    resolver:   &PretrainedResolver,
    checkpoint: &str,
    config:     &PretrainedConfig,
    device:     &B::Device,
) -> Result<Option<LoadedModel<B>>> {
    let Some((architecture, category)) = select_loader(config, checkpoint)? else {
        return Ok(None);
    };
    tracing::info!("Loading {} with the {} loader", architecture, category);

    let record_path = resolver.resolve_optional(checkpoint, MODEL_RECORD_FILE);
    if record_path.is_none() {
        tracing::warn!(
            "No {} found for {}; starting from freshly initialised weights",
            MODEL_RECORD_FILE,
            checkpoint
        );
    }

    let model = match category {
        LoaderCategory::CausalLm => {
            let model = CausalCaptionerConfig::from_pretrained(config).init::<B>(device);
            let model = match &record_path {
                Some(path) => load_weights::<B, _>(model, path, device)?,
                None => model,
            };
            LoadedModel::CausalLm(model)
        }
        LoaderCategory::VisionToSeq => {
            let model = VisionSeq2SeqConfig::from_pretrained(config).init::<B>(device);
            let model = match &record_path {
                Some(path) => load_weights::<B, _>(model, path, device)?,
                None => model,
            };
            LoadedModel::VisionToSeq(model)
        }
    };

    Ok(Some(model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn config_with(architectures: &[&str]) -> PretrainedConfig {
        PretrainedConfig {
            architectures: Some(architectures.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_known_architectures() {
        let cases = [
            ("GitForCausalLM",               LoaderCategory::CausalLm),
            ("BlipForConditionalGeneration", LoaderCategory::VisionToSeq),
            ("VisionEncoderDecoderModel",    LoaderCategory::VisionToSeq),
        ];
        for (name, expected) in cases {
            let cfg = config_with(&[name]);
            let (arch, category) = select_loader(&cfg, "ckpt").unwrap().unwrap();
            assert_eq!(arch, name);
            assert_eq!(category, expected, "{name}");
        }
    }

    #[test]
    fn test_substring_and_first_architecture() {
        let cfg = config_with(&["TFGitForCausalLMWithHead", "BlipForConditionalGeneration"]);
        let (_, category) = select_loader(&cfg, "ckpt").unwrap().unwrap();
        assert_eq!(category, LoaderCategory::CausalLm);
    }

    #[test]
    fn test_unknown_architecture_is_none() {
        let cfg = config_with(&["SomeUnknownArch"]);
        assert_eq!(select_loader(&cfg, "ckpt").unwrap(), None);
    }

    #[test]
    fn test_missing_architecture_is_config_error() {
        let err = select_loader(&config_with(&[]), "ckpt").unwrap_err();
        assert_eq!(err, PipelineError::NoArchitecture { checkpoint: "ckpt".to_string() });
        assert!(select_loader(&PretrainedConfig::default(), "ckpt").is_err());
    }

    #[test]
    fn test_load_model_without_record_initialises_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let cfg: PretrainedConfig = serde_json::from_str(r#"{
            "architectures": ["GitForCausalLM"],
            "vocab_size": 20, "hidden_size": 16, "num_hidden_layers": 1,
            "num_attention_heads": 2, "intermediate_size": 32, "max_position_embeddings": 16,
            "vision_config": {"image_size": 8, "patch_size": 4, "hidden_size": 8,
                              "num_hidden_layers": 1, "num_attention_heads": 2, "intermediate_size": 16}
        }"#).unwrap();

        let resolver = PretrainedResolver::new(None);
        let source = dir.path().to_string_lossy().to_string();
        let model = load_model::<NdArray>(&resolver, &source, &cfg, &Default::default())
            .unwrap()
            .unwrap();
        assert_eq!(model.category(), LoaderCategory::CausalLm);
        assert!(model.num_params() > 0);

        let unknown = config_with(&["SomeUnknownArch"]);
        assert!(load_model::<NdArray>(&resolver, &source, &unknown, &Default::default())
            .unwrap()
            .is_none());
    }
}
