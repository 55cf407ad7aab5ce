/// BERT tokenizer wrapper around HuggingFace `tokenizers` crate.
///
/// Produces input ids and attention masks for the ONNX embedder, and token
/// spans so the chunker can measure text in the model's own tokens.
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tokenizers::Tokenizer;
use tracing::warn;

/// Longest sequence the embedding model accepts.
const MAX_LENGTH: usize = 512;

/// `[CLS]` and `[SEP]` take two positions of every sequence.
const SPECIAL_TOKENS: usize = 2;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("valid regex"));

/// Splits text into tokens, reported as byte ranges into the input.
pub trait TokenSpans: Send + Sync {
    /// Byte ranges of the tokens of `text`, in order.
    fn token_spans(&self, text: &str) -> Vec<(usize, usize)>;
}

/// Whitespace-delimited words. Used when no model tokenizer is loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokens;

impl TokenSpans for WhitespaceTokens {
    fn token_spans(&self, text: &str) -> Vec<(usize, usize)> {
        WORD_RE
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect()
    }
}

/// Wrapper around the HuggingFace tokenizer for BERT-style models.
pub struct BertTokenizer {
    inner: Tokenizer,
    // Same vocabulary without truncation or padding, for measuring text
    counter: Tokenizer,
}

/// Output of a tokenization operation.
#[derive(Debug, Clone)]
pub struct TokenizerOutput {
    /// Token IDs (input_ids for the model).
    pub input_ids: Vec<i64>,
    /// Attention mask (1 for real tokens, 0 for padding).
    pub attention_mask: Vec<i64>,
}

impl BertTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file in the model directory.
    pub fn from_model_dir(model_dir: &Path) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        let mut counter = inner.clone();
        counter
            .with_truncation(None)
            .map_err(|e| anyhow::anyhow!("failed to disable truncation: {e}"))?;
        counter.with_padding(None);

        inner
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to configure truncation: {e}"))?;

        // Pad each batch to its longest member
        inner.with_padding(Some(tokenizers::PaddingParams::default()));

        Ok(Self { inner, counter })
    }

    /// Tokenize multiple texts in a batch.
    pub fn tokenize_batch(&self, texts: &[&str]) -> Result<Vec<TokenizerOutput>> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("failed to encode batch: {e}"))?;

        Ok(encodings
            .iter()
            .map(|enc| TokenizerOutput {
                input_ids: enc.get_ids().iter().map(|&id| i64::from(id)).collect(),
                attention_mask: enc
                    .get_attention_mask()
                    .iter()
                    .map(|&m| i64::from(m))
                    .collect(),
            })
            .collect())
    }

    /// Content tokens that fit in one model input next to the special tokens.
    #[must_use]
    pub fn max_chunk_tokens(&self) -> usize {
        MAX_LENGTH - SPECIAL_TOKENS
    }

    /// Get the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}

impl TokenSpans for BertTokenizer {
    fn token_spans(&self, text: &str) -> Vec<(usize, usize)> {
        match self.counter.encode(text, false) {
            Ok(encoding) => encoding
                .get_offsets()
                .iter()
                .copied()
                .filter(|(start, end)| end > start)
                .collect(),
            Err(e) => {
                warn!("Tokenizer failed, measuring in words instead: {e}");
                WhitespaceTokens.token_spans(text)
            }
        }
    }
}
