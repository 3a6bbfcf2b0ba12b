//! Tokenizer wrapper for pretrained checkpoints.
//!
//! Thin layer over `tokenizers::Tokenizer` that pads batches to the longest
//! member and truncates at the configured maximum token length. The
//! architecture served here has no token-type ids, so only ids and the
//! attention mask are surfaced.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::training::hub::{ModelPath, ModelResolver};

/// Default truncation bound, carried over from the upstream configuration.
/// A chunk of N characters tokenizes to at most N + 2 tokens, so this bound
/// is inert for any default-size chunk and only matters when set below the
/// chunk size.
pub const DEFAULT_MAX_LENGTH: usize = 8500;

/// Wrapper around a pretrained tokenizer.
pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl TokenizerWrapper {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        Ok(Self {
            tokenizer,
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// Load the tokenizer named by a resolved model path.
    pub fn from_model_path(model_path: &ModelPath) -> Result<Self> {
        let tokenizer_path = model_path
            .tokenizer_file
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Model has no tokenizer.json"))?;

        Self::from_file(tokenizer_path)
    }

    /// Load a tokenizer from a hub identifier or local path.
    pub fn from_pretrained(model_id_or_path: &str) -> Result<Self> {
        let resolver = ModelResolver::new()?;
        let model_path = resolver.resolve(model_id_or_path)?;
        Self::from_model_path(&model_path)
    }

    /// Set the truncation bound in tokens.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// The truncation bound in tokens.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Encode a single text without padding.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<EncodedInput> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        Ok(EncodedInput {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
        })
    }

    /// Encode a batch of texts, padded to the longest member and truncated
    /// at `max_length`.
    pub fn encode_batch(
        &self,
        texts: &[&str],
        add_special_tokens: bool,
    ) -> Result<BatchEncodedInput> {
        let mut tokenizer = self.tokenizer.clone();
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: self.max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to set truncation: {}", e))?;

        let encodings = tokenizer
            .encode_batch(texts.to_vec(), add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Batch tokenization failed: {}", e))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            input_ids.extend(encoding.get_ids());
            attention_mask.extend(encoding.get_attention_mask());
        }

        Ok(BatchEncodedInput {
            input_ids,
            attention_mask,
            batch_size,
            seq_len,
        })
    }

    /// Decode token ids back to text.
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    /// Vocabulary size including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

/// A single encoded text.
#[derive(Debug, Clone)]
pub struct EncodedInput {
    /// Token ids.
    pub input_ids: Vec<u32>,
    /// 1 for real tokens, 0 for padding.
    pub attention_mask: Vec<u32>,
}

impl EncodedInput {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// A padded batch of encoded texts, flattened row-major.
#[derive(Debug, Clone)]
pub struct BatchEncodedInput {
    /// Token ids, `batch_size * seq_len`.
    pub input_ids: Vec<u32>,
    /// Attention mask, `batch_size * seq_len`.
    pub attention_mask: Vec<u32>,
    /// Number of sequences.
    pub batch_size: usize,
    /// Padded sequence length.
    pub seq_len: usize,
}

impl BatchEncodedInput {
    /// Convert to `[batch, seq]` id (U32) and mask (F32) tensors.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let input_ids = Tensor::new(&self.input_ids[..], device)?
            .to_dtype(DType::U32)?
            .reshape((self.batch_size, self.seq_len))?;

        let attention_mask = Tensor::new(&self.attention_mask[..], device)?
            .to_dtype(DType::F32)?
            .reshape((self.batch_size, self.seq_len))?;

        Ok((input_ids, attention_mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // needs network access
    fn test_tokenizer_from_hub() {
        let tokenizer = TokenizerWrapper::from_pretrained("distilbert-base-uncased");
        assert!(
            tokenizer.is_ok(),
            "Failed to load tokenizer: {:?}",
            tokenizer.err()
        );
    }

    #[test]
    #[ignore] // needs network access
    fn test_encode_batch_pads_to_longest() {
        let tokenizer = TokenizerWrapper::from_pretrained("distilbert-base-uncased").unwrap();
        let batch = tokenizer
            .encode_batch(&["short", "a noticeably longer chunk of text"], true)
            .unwrap();

        assert_eq!(batch.batch_size, 2);
        assert_eq!(batch.input_ids.len(), 2 * batch.seq_len);
        // first row is padded: mask has zeros at the tail
        let first_row = &batch.attention_mask[..batch.seq_len];
        assert_eq!(*first_row.last().unwrap(), 0);
    }

    #[test]
    #[ignore] // needs network access
    fn test_empty_text_encodes_to_special_tokens() {
        let tokenizer = TokenizerWrapper::from_pretrained("distilbert-base-uncased").unwrap();
        let encoded = tokenizer.encode("", true).unwrap();
        // [CLS] and [SEP] only
        assert_eq!(encoded.len(), 2);
    }
}
