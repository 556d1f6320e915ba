//! Vocabulary for the candle runtime, backed by a HuggingFace
//! `tokenizer.json` stored next to the model file.

use std::path::Path;

use anyhow::{Context, Result};
use tokenizers::Tokenizer;

use crate::runtime::Vocabulary;

/// End markers treated as end-of-generation when the vocabulary has them.
const END_MARKERS: [&str; 6] = [
    "</s>",
    "<|endoftext|>",
    "<|end|>",
    "<|im_end|>",
    "<|eot_id|>",
    "<end_of_turn>",
];

/// Tokenizer plus the tokens converted to text so far in this request.
///
/// Pieces are produced by decoding a short window of recent tokens and
/// subtracting what was already emitted, so word-leading spaces and
/// characters spread over several byte tokens come out intact.
pub struct CandleVocab {
    inner: Tokenizer,
    eog_ids: Vec<u32>,
    tokens: Vec<u32>,
    prev_index: usize,
    current_index: usize,
}

impl CandleVocab {
    /// Wrap `tokenizer`, adding `gguf_eos` (from model metadata) to the
    /// end-of-generation set.
    pub fn new(tokenizer: Tokenizer, gguf_eos: Option<u32>) -> Self {
        let mut eog_ids: Vec<u32> = END_MARKERS
            .iter()
            .filter_map(|m| tokenizer.token_to_id(m))
            .chain(gguf_eos)
            .collect();
        eog_ids.sort_unstable();
        eog_ids.dedup();
        Self {
            inner: tokenizer,
            eog_ids,
            tokens: Vec::new(),
            prev_index: 0,
            current_index: 0,
        }
    }

    pub fn from_file(path: &Path, gguf_eos: Option<u32>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer from {}: {e}", path.display()))?;
        Ok(Self::new(tokenizer, gguf_eos))
    }

    /// Load the `tokenizer.json` sitting beside `model_path`.
    pub fn for_model(model_path: &Path, gguf_eos: Option<u32>) -> Result<Self> {
        let dir = model_path.parent().unwrap_or(Path::new("."));
        let path = dir.join("tokenizer.json");
        anyhow::ensure!(
            path.is_file(),
            "tokenizer.json not found next to model (looked in {})",
            dir.display()
        );
        tracing::debug!(path = %path.display(), "loading tokenizer");
        Self::from_file(&path, gguf_eos).context("vocabulary unavailable")
    }

    pub fn eog_ids(&self) -> &[u32] {
        &self.eog_ids
    }

    /// Decode with special tokens kept, so control markers stay visible.
    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.inner
            .decode(tokens, false)
            .map_err(|e| anyhow::anyhow!("tokenizer decode error: {e}"))
    }
}

impl Vocabulary for CandleVocab {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_bos)
            .map_err(|e| anyhow::anyhow!("tokenizer encode error: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn token_to_piece(&mut self, token: u32) -> Result<String> {
        anyhow::ensure!(
            self.inner.id_to_token(token).is_some(),
            "token {token} is outside the vocabulary"
        );

        let prev_text = self.decode(&self.tokens[self.prev_index..self.current_index])?;
        self.tokens.push(token);
        let text = self.decode(&self.tokens[self.prev_index..])?;

        // Incomplete UTF-8 decodes to U+FFFD: wait for the rest of the character.
        if text.ends_with('\u{FFFD}') {
            return Ok(String::new());
        }
        let piece = text
            .strip_prefix(prev_text.as_str())
            .with_context(|| format!("decoding token {token} rewrote earlier text"))?
            .to_string();

        self.prev_index = self.current_index;
        self.current_index = self.tokens.len();
        Ok(piece)
    }

    fn is_eog(&self, token: u32) -> bool {
        self.eog_ids.contains(&token)
    }
}
