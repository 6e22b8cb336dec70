// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the caption tokenizer (tokenizer.json) of a pretrained
// checkpoint, encodes captions with special tokens, knows the
// padding id and writes the tokenizer back to the output dir.
//
// Only the fast (tokenizers-crate) implementation exists in Rust,
// so `use_fast_tokenizer = false` falls back to it with a warning.

use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::domain::traits::SavePretrained;
use crate::infra::hub::PretrainedResolver;

/// Pad tokens tried, in order, when the tokenizer has no padding config.
const PAD_TOKEN_CANDIDATES: &[&str] = &["[PAD]", "<pad>", "<|pad|>", "<|endoftext|>"];

#[derive(Clone)]
pub struct TokenizerStore {
    tokenizer:  Tokenizer,
    max_length: Option<usize>,
}

impl TokenizerStore {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer, max_length: None }
    }

    /// Truncate encoded captions to the model's position budget.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Load tokenizer.json for `source` (local dir or Hub id).
    pub fn from_pretrained(
        resolver: &PretrainedResolver,
        source:   &str,
        use_fast: bool,
    ) -> Result<Self> {
        if !use_fast {
            tracing::warn!(
                "Slow tokenizers are not available; loading the fast tokenizer for '{}'",
                source
            );
        }
        let path = resolver.resolve(source, "tokenizer.json")?;
        Self::from_file(&path)
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e)
        })?;
        Ok(Self::new(tokenizer))
    }

    /// Encode one caption with special tokens.
    /// Returns (input_ids, attention_mask).
    pub fn encode(&self, text: &str) -> Result<(Vec<u32>, Vec<u32>)> {
        let enc = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        let mut ids  = enc.get_ids().to_vec();
        let mut mask = enc.get_attention_mask().to_vec();
        if let Some(max) = self.max_length {
            ids.truncate(max);
            mask.truncate(max);
        }
        Ok((ids, mask))
    }

    /// Id used to right-pad token sequences.
    pub fn pad_token_id(&self) -> u32 {
        if let Some(padding) = self.tokenizer.get_padding() {
            return padding.pad_id;
        }
        PAD_TOKEN_CANDIDATES
            .iter()
            .find_map(|tok| self.tokenizer.token_to_id(tok))
            .unwrap_or(0)
    }

    /// Vocabulary size including added tokens.
    pub fn len(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

impl SavePretrained for TokenizerStore {
    fn save_pretrained(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let path = dir.join("tokenizer.json");
        self.tokenizer
            .save(&path, true)
            .map_err(|e| anyhow::anyhow!("Cannot write '{}': {e}", path.display()))?;
        tracing::debug!("Saved tokenizer to '{}'", path.display());
        Ok(())
    }
}

// ─── Test Fixtures ────────────────────────────────────────────────────────────
// A word-level tokenizer written as HuggingFace JSON, small enough to
// reason about ids in tests. Special tokens use the BERT ids.
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub const PAD_ID: u32 = 0;

    pub fn word_level_json(words: &[&str]) -> serde_json::Value {
        let mut vocab = serde_json::json!({
            "[PAD]":  0,
            "[UNK]":  1,
            "[CLS]":  101,
            "[SEP]":  102,
            "[MASK]": 103,
        });
        for (i, word) in words.iter().enumerate() {
            vocab[*word] = serde_json::json!(104 + i);
        }

        serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0,   "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1,   "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 101, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 102, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 103, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        })
    }

    /// Write tokenizer.json into `dir` and load it back.
    pub fn word_level_store(dir: &Path, words: &[&str]) -> TokenizerStore {
        let path = dir.join("tokenizer.json");
        std::fs::write(&path, word_level_json(words).to_string()).unwrap();
        TokenizerStore::from_file(&path).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_encode_caption() {
        let dir = tempfile::tempdir().unwrap();
        let store = word_level_store(dir.path(), &["a", "dog", "cat"]);
        let (ids, mask) = store.encode("A dog").unwrap();
        assert_eq!(ids, vec![104, 105]);
        assert_eq!(mask, vec![1, 1]);
    }

    #[test]
    fn test_max_length_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let store = word_level_store(dir.path(), &["a", "dog", "cat"]).with_max_length(2);
        let (ids, mask) = store.encode("a dog a cat").unwrap();
        assert_eq!(ids, vec![104, 105]);
        assert_eq!(mask.len(), 2);
    }

    #[test]
    fn test_pad_id_from_vocab() {
        let dir = tempfile::tempdir().unwrap();
        let store = word_level_store(dir.path(), &["a"]);
        assert_eq!(store.pad_token_id(), PAD_ID);
    }

    #[test]
    fn test_save_pretrained_round_trips() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = word_level_store(src.path(), &["a", "cat"]);
        store.save_pretrained(out.path()).unwrap();

        let reloaded = TokenizerStore::from_file(&out.path().join("tokenizer.json")).unwrap();
        assert_eq!(reloaded.encode("a cat").unwrap(), store.encode("a cat").unwrap());
    }
}
