//! Tokenizer adapter.
//!
//! Loads a serialized HuggingFace tokenizer description (`tokenizer.json`,
//! a blob carrying normalization rules, the vocabulary, and post-processing
//! that inserts sentinel tokens) and encodes strings into token id
//! sequences. The adapter owns the loaded tokenizer for its lifetime; the
//! inference engine serializes calls, so no additional locking is done here.

use std::path::Path;

use crate::error::{Error, Result};

pub struct TokenizerAdapter {
    inner: tokenizers::Tokenizer,
}

impl TokenizerAdapter {
    /// Load a tokenizer from its serialized JSON blob.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let inner = tokenizers::Tokenizer::from_bytes(&bytes)
            .map_err(|e| Error::Inference(format!("load tokenizer {}: {e}", path.display())))?;
        Ok(Self { inner })
    }

    /// Encode a string into token ids, including the tokenizer's configured
    /// sentinel tokens. An empty input yields just the sentinel sequence.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| Error::Inference(format!("tokenize: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }
}
