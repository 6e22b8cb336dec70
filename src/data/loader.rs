// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Loads image/caption splits stored as JSON Lines:
//
//   <dataset_name>/[<dataset_config_name>/]<split>.jsonl
//
// Each line is one JSON object (one row). The image column holds
// either a URL string or an embedded image in one of the two
// encodings of the datasets Image feature:
//
//   {"bytes": [137, 80, 78, 71, ...]}   raw file bytes
//   {"path":  "images/0001.jpg"}         relative to the split file
//
// Embedded images decode from memory or local disk; only URL
// strings ever reach the network, later, in the preprocessor.
//
// Reference: serde_json documentation, image crate documentation

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::{
    collections::BTreeSet,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::data::splitter::train_test_split;
use crate::domain::sample::{RawImage, RawSample};
use crate::domain::traits::SampleSource;

pub type Row = Map<String, Value>;

/// Resolves split names to JSON Lines files under the dataset root.
pub struct DatasetLoader {
    root:        PathBuf,
    config_name: Option<String>,
}

impl DatasetLoader {
    pub fn new(dataset_name: impl Into<PathBuf>, config_name: Option<String>) -> Self {
        Self { root: dataset_name.into(), config_name }
    }

    pub fn split_path(&self, split: &str) -> PathBuf {
        let mut dir = self.root.clone();
        if let Some(cfg) = &self.config_name {
            dir.push(cfg);
        }
        dir.join(format!("{split}.jsonl"))
    }

    /// Load one split fully into memory.
    pub fn load_split(&self, split: &str) -> Result<JsonlSplit> {
        let path = self.split_path(split);
        tracing::info!("Loading split '{}' from '{}'", split, path.display());
        JsonlSplit::from_file(split, &path)
    }
}

/// One split of a JSON Lines dataset.
#[derive(Debug, Clone)]
pub struct JsonlSplit {
    name:     String,
    base_dir: PathBuf,
    rows:     Vec<Row>,
}

impl JsonlSplit {
    pub fn from_file(name: &str, path: &Path) -> Result<Self> {
        let file = fs::File::open(path)
            .with_context(|| format!("Cannot open dataset split '{}'", path.display()))?;

        let mut rows = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Cannot read '{}'", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(row)) => rows.push(row),
                Ok(_) => bail!("{}:{}: row is not a JSON object", path.display(), lineno + 1),
                Err(e) => bail!("{}:{}: {}", path.display(), lineno + 1, e),
            }
        }

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        tracing::debug!("Loaded {} rows for split '{}'", rows.len(), name);
        Ok(Self::from_rows(name, rows, base_dir))
    }

    pub fn from_rows(name: impl Into<String>, rows: Vec<Row>, base_dir: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), base_dir: base_dir.into(), rows }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keep only the first `n` rows (all of them if `n` exceeds the length).
    pub fn select(mut self, n: usize) -> Self {
        if n < self.rows.len() {
            self.rows.truncate(n);
        }
        self
    }

    /// Seeded split into (train, test) splits named after their role.
    pub fn train_test_split(self, test_size: f64, seed: u64) -> (Self, Self) {
        let (train, test) = train_test_split(self.rows, test_size, seed);
        (
            Self::from_rows("train", train, self.base_dir.clone()),
            Self::from_rows("validation", test, self.base_dir),
        )
    }

    fn decode_image(&self, value: &Value) -> Result<RawImage> {
        match value {
            Value::String(url) => Ok(RawImage::Url(url.clone())),
            Value::Object(obj) => {
                if let Some(Value::Array(bytes)) = obj.get("bytes") {
                    let bytes: Vec<u8> = bytes
                        .iter()
                        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                        .collect::<Option<_>>()
                        .context("image bytes must be integers in 0..=255")?;
                    let img = image::load_from_memory(&bytes).context("cannot decode image bytes")?;
                    return Ok(RawImage::Decoded(img));
                }
                if let Some(Value::String(p)) = obj.get("path") {
                    let path = self.base_dir.join(p);
                    let img = image::open(&path)
                        .with_context(|| format!("cannot open image '{}'", path.display()))?;
                    return Ok(RawImage::Decoded(img));
                }
                bail!("image object has neither 'bytes' nor 'path'")
            }
            other => bail!("unsupported image value: {other}"),
        }
    }
}

impl SampleSource for JsonlSplit {
    fn column_names(&self) -> Vec<String> {
        let cols: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.keys()).collect();
        cols.into_iter().cloned().collect()
    }

    fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn sample(&self, index: usize, image_column: &str, text_column: &str) -> Result<RawSample> {
        let row = self
            .rows
            .get(index)
            .with_context(|| format!("row {index} out of range for split '{}'", self.name))?;

        let image_value = row
            .get(image_column)
            .with_context(|| format!("row {index} has no '{image_column}' value"))?;
        let image = self.decode_image(image_value)?;

        // Captions are stringified whatever their JSON type.
        let text = match row.get(text_column) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        Ok(RawSample::new(image, text))
    }
}

#[cfg(test)]
pub mod test_support {
    use std::io::Cursor;

    /// A small encoded PNG, as it would appear in a `bytes` column.
    pub fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }
}
