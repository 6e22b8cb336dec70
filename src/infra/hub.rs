// ============================================================
// Layer 6 — Pretrained File Resolver
// ============================================================
// Every pretrained artefact (config.json, tokenizer.json,
// preprocessor_config.json, model.mpk) is looked up the same way:
//
//   1. `source` is an existing directory → use the file inside it
//   2. otherwise `source` is a Hub repo id → download with hf-hub
//      into `cache_dir` (or the default Hub cache)
//
// Reference: hf-hub crate documentation (sync API)

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiBuilder};
use std::path::{Path, PathBuf};

pub struct PretrainedResolver {
    cache_dir: Option<PathBuf>,
}

impl PretrainedResolver {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self { cache_dir }
    }

    /// Locate `filename` for checkpoint `source`, downloading it if needed.
    pub fn resolve(&self, source: &str, filename: &str) -> Result<PathBuf> {
        let local = Path::new(source);
        if local.is_dir() {
            let path = local.join(filename);
            anyhow::ensure!(
                path.exists(),
                "'{}' not found in local checkpoint '{}'",
                filename,
                source
            );
            return Ok(path);
        }

        tracing::info!("Fetching {} from the Hub repository '{}'", filename, source);
        self.api()?
            .model(source.to_string())
            .get(filename)
            .with_context(|| format!("Cannot download '{filename}' for '{source}'"))
    }

    /// Like `resolve`, but a missing file is not an error.
    pub fn resolve_optional(&self, source: &str, filename: &str) -> Option<PathBuf> {
        match self.resolve(source, filename) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::debug!("Optional file '{}' unavailable for '{}': {:#}", filename, source, e);
                None
            }
        }
    }

    fn api(&self) -> Result<Api> {
        let mut builder = ApiBuilder::new()
            .with_progress(false)
            .with_token(std::env::var("HF_TOKEN").ok());
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        builder.build().context("Cannot initialise the Hub client")
    }
}
