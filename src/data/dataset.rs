use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use std::path::Path;

use crate::domain::sample::EncodedSample;

/// A prepared split: every sample is usable by construction.
#[derive(Debug, Clone, Default)]
pub struct CaptionDataset {
    samples: Vec<EncodedSample>,
}

impl CaptionDataset {
    pub fn new(samples: Vec<EncodedSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    /// Write the encoded samples as JSON (preprocessing-only runs).
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create '{}'", parent.display()))?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &self.samples)?;
        Ok(())
    }
}

impl Dataset<EncodedSample> for CaptionDataset {
    fn get(&self, index: usize) -> Option<EncodedSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_cache_written() {
        let sample = EncodedSample {
            pixel_values:   vec![0.5; 12],
            pixel_shape:    [3, 2, 2],
            input_ids:      vec![101, 7, 102],
            attention_mask: vec![1, 1, 1],
        };
        let ds = CaptionDataset::new(vec![sample.clone()]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessed/train.json");
        ds.save_json(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(1));
        assert_eq!(json[0]["input_ids"], serde_json::json!([101, 7, 102]));
        assert_eq!(ds.get(0), Some(sample));
    }
}
