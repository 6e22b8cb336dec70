// ============================================================
// Layer 5 — Pretrained Configuration
// ============================================================
// Only `architectures` drives behaviour directly (through the
// dispatcher); the remaining keys are kept verbatim so the file can be
// written back to the output directory. Model dimensions are read from
// whichever layout the checkpoint family uses:
//
// | family                    | text dims          | vision dims      |
// |---------------------------|--------------------|------------------|
// | GIT                       | top level          | `vision_config`  |
// | BLIP                      | `text_config`      | `vision_config`  |
// | VisionEncoderDecoder      | `decoder`          | `encoder`        |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::domain::traits::SavePretrained;
use crate::infra::hub::PretrainedResolver;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PretrainedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architectures: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Text-side (decoder) dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextDims {
    pub vocab_size:      usize,
    pub hidden_size:     usize,
    pub num_layers:      usize,
    pub num_heads:       usize,
    pub intermediate:    usize,
    pub max_positions:   usize,
}

/// Vision-side (encoder) dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisionDims {
    pub image_size:   usize,
    pub patch_size:   usize,
    pub num_channels: usize,
    pub hidden_size:  usize,
    pub num_layers:   usize,
    pub num_heads:    usize,
    pub intermediate: usize,
}

fn field(obj: &Map<String, Value>, key: &str, default: usize) -> usize {
    obj.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

impl PretrainedConfig {
    /// Load `config.json` for `source` (local dir or Hub id).
    pub fn from_pretrained(resolver: &PretrainedResolver, source: &str) -> Result<Self> {
        let path = resolver.resolve(source, "config.json")?;
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid model config '{}'", path.display()))
    }

    /// First declared architecture, if any.
    pub fn primary_architecture(&self) -> Option<&str> {
        self.architectures
            .as_ref()
            .and_then(|a| a.first())
            .map(String::as_str)
    }

    fn section(&self, keys: &[&str]) -> Option<&Map<String, Value>> {
        keys.iter()
            .find_map(|k| self.extra.get(*k).and_then(Value::as_object))
    }

    fn text_section(&self) -> &Map<String, Value> {
        self.section(&["text_config", "decoder"]).unwrap_or(&self.extra)
    }

    pub fn text_dims(&self) -> TextDims {
        let t = self.text_section();
        TextDims {
            vocab_size:    field(t, "vocab_size", 30522),
            hidden_size:   field(t, "hidden_size", 768),
            num_layers:    field(t, "num_hidden_layers", 6),
            num_heads:     field(t, "num_attention_heads", 12),
            intermediate:  field(t, "intermediate_size", 3072),
            max_positions: field(t, "max_position_embeddings", 512),
        }
    }

    pub fn vision_dims(&self) -> VisionDims {
        let empty = Map::new();
        let v = self.section(&["vision_config", "encoder"]).unwrap_or(&empty);
        VisionDims {
            image_size:   field(v, "image_size", 224),
            patch_size:   field(v, "patch_size", 16),
            num_channels: field(v, "num_channels", 3),
            hidden_size:  field(v, "hidden_size", 768),
            num_layers:   field(v, "num_hidden_layers", 12),
            num_heads:    field(v, "num_attention_heads", 12),
            intermediate: field(v, "intermediate_size", 3072),
        }
    }

    /// Record a new vocabulary size after the embeddings were resized.
    pub fn set_vocab_size(&mut self, vocab_size: usize) {
        let key = ["text_config", "decoder"]
            .into_iter()
            .find(|k| self.extra.get(*k).map_or(false, Value::is_object));

        let target = match key {
            Some(k) => self.extra.get_mut(k).and_then(Value::as_object_mut),
            None => Some(&mut self.extra),
        };
        if let Some(obj) = target {
            obj.insert("vocab_size".to_string(), Value::from(vocab_size));
        }
    }
}

impl SavePretrained for PretrainedConfig {
    fn save_pretrained(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let path = dir.join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved model config to '{}'", path.display());
        Ok(())
    }
}
