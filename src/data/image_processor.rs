// ============================================================
// Layer 4 — Image Processor
// ============================================================
// Reads a HuggingFace `preprocessor_config.json` and turns a decoded
// image into a channel-first `f32` buffer: resize, rescale to `[0, 1]`,
// normalise per channel. CLIP statistics are used when the config
// does not provide any.

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::traits::SavePretrained;
use crate::infra::hub::PretrainedResolver;

fn default_true() -> bool {
    true
}

fn default_rescale_factor() -> f32 {
    1.0 / 255.0
}

#[allow(clippy::excessive_precision)]
fn clip_mean() -> [f32; 3] {
    [0.48145466, 0.4578275, 0.40821073]
}

#[allow(clippy::excessive_precision)]
fn clip_std() -> [f32; 3] {
    [0.26862954, 0.26130258, 0.27577711]
}

/// Target size as written by the different image processor families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    /// `{"height": 384, "width": 384}` (BLIP, ViT).
    HeightWidth { height: u32, width: u32 },
    /// `{"shortest_edge": 224}` (CLIP). Resized to a square so every
    /// sample in a batch has the same shape.
    ShortestEdge { shortest_edge: u32 },
    /// A bare integer.
    Square(u32),
}

impl ImageSize {
    /// (width, height)
    pub fn dims(&self) -> (u32, u32) {
        match *self {
            ImageSize::HeightWidth { height, width } => (width, height),
            ImageSize::ShortestEdge { shortest_edge } => (shortest_edge, shortest_edge),
            ImageSize::Square(s) => (s, s),
        }
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        ImageSize::HeightWidth { height: 224, width: 224 }
    }
}

/// Subset of `preprocessor_config.json` we act on. Unknown keys are
/// preserved so the file can be written back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProcessorConfig {
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default)]
    pub size: ImageSize,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f32,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "clip_mean")]
    pub image_mean: [f32; 3],
    #[serde(default = "clip_std")]
    pub image_std: [f32; 3],
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            do_resize:      true,
            size:           ImageSize::default(),
            do_rescale:     true,
            rescale_factor: default_rescale_factor(),
            do_normalize:   true,
            image_mean:     clip_mean(),
            image_std:      clip_std(),
            extra:          serde_json::Map::new(),
        }
    }
}

/// Channel-first pixel buffer for a single image.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelValues {
    pub data:  Vec<f32>,
    /// [channels, height, width]
    pub shape: [usize; 3],
}

#[derive(Debug, Clone)]
pub struct ImageProcessor {
    config: ImageProcessorConfig,
}

impl ImageProcessor {
    pub fn new(config: ImageProcessorConfig) -> Self {
        Self { config }
    }

    /// Load `preprocessor_config.json` for `source` (local dir or Hub id).
    pub fn from_pretrained(resolver: &PretrainedResolver, source: &str) -> Result<Self> {
        let path = resolver.resolve(source, "preprocessor_config.json")?;
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let config: ImageProcessorConfig = serde_json::from_str(&json)
            .with_context(|| format!("Invalid image processor config '{}'", path.display()))?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &ImageProcessorConfig {
        &self.config
    }

    /// Resize, rescale and normalise one image.
    pub fn process(&self, img: &DynamicImage) -> PixelValues {
        let cfg = &self.config;

        let rgb = if cfg.do_resize {
            let (w, h) = cfg.size.dims();
            img.resize_exact(w, h, FilterType::Triangle).to_rgb8()
        } else {
            img.to_rgb8()
        };

        let width      = rgb.width() as usize;
        let height     = rgb.height() as usize;
        let num_pixels = width * height;
        let pixels     = rgb.as_raw();
        let scale      = if cfg.do_rescale { cfg.rescale_factor } else { 1.0 };

        // Interleaved RGB → planar CHW, one channel at a time.
        let mut data = Vec::with_capacity(3 * num_pixels);
        for c in 0..3 {
            let (mean, std) = if cfg.do_normalize {
                (cfg.image_mean[c], cfg.image_std[c])
            } else {
                (0.0, 1.0)
            };
            data.extend((0..num_pixels).map(|i| {
                let v = pixels[i * 3 + c] as f32;
                (v * scale - mean) / std
            }));
        }

        PixelValues { data, shape: [3, height, width] }
    }
}

impl SavePretrained for ImageProcessor {
    fn save_pretrained(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let path = dir.join("preprocessor_config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&self.config)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved image processor config to '{}'", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, px: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(px)))
    }

    #[test]
    fn test_output_is_channel_first_at_target_size() {
        let cfg = ImageProcessorConfig {
            size: ImageSize::HeightWidth { height: 4, width: 6 },
            ..Default::default()
        };
        let out = ImageProcessor::new(cfg).process(&solid(10, 10, [0, 0, 0]));
        assert_eq!(out.shape, [3, 4, 6]);
        assert_eq!(out.data.len(), 3 * 4 * 6);
    }

    #[test]
    fn test_normalisation_per_channel() {
        let cfg = ImageProcessorConfig {
            size:       ImageSize::Square(2),
            image_mean: [0.5, 0.5, 0.5],
            image_std:  [0.5, 0.5, 0.5],
            ..Default::default()
        };
        let out = ImageProcessor::new(cfg).process(&solid(2, 2, [255, 0, 255]));
        // red plane = +1, green plane = -1, blue plane = +1
        assert!((out.data[0] - 1.0).abs() < 1e-5);
        assert!((out.data[4] + 1.0).abs() < 1e-5);
        assert!((out.data[8] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_parses_hf_config_and_keeps_unknown_keys() {
        let json = r#"{
            "do_resize": true,
            "size": {"shortest_edge": 8},
            "image_mean": [0.5, 0.5, 0.5],
            "image_std": [0.5, 0.5, 0.5],
            "image_processor_type": "CLIPImageProcessor"
        }"#;
        let cfg: ImageProcessorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.size.dims(), (8, 8));
        assert!(cfg.extra.contains_key("image_processor_type"));

        let dir = tempfile::tempdir().unwrap();
        ImageProcessor::new(cfg).save_pretrained(dir.path()).unwrap();
        let saved = std::fs::read_to_string(dir.path().join("preprocessor_config.json")).unwrap();
        assert!(saved.contains("CLIPImageProcessor"));
    }
}
