//! Frozen DistilBERT chunk embedder.
//!
//! Loads pretrained weights by memory-mapping the safetensors file, so the
//! encoder's parameters are plain tensors that never receive gradients. The
//! same model instance is shared with the classifier through an `Arc`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use super::{ChunkEmbedder, Embedding};
use crate::training::hub::{ModelPath, ModelResolver};
use crate::training::models::{DistilBertConfig, DistilBertModel, TokenizerWrapper};

const DEFAULT_BATCH_SIZE: usize = 32;

/// Embeds text chunks with a frozen pretrained encoder
pub struct EncoderEmbedder {
    model: Arc<DistilBertModel>,
    tokenizer: TokenizerWrapper,
    device: Device,
    model_id: String,
    batch_size: usize,
}

impl EncoderEmbedder {
    /// Loads encoder, config and tokenizer for a Hub id or local directory.
    pub fn from_pretrained(model_id: &str, device: &Device) -> Result<Self> {
        let model_path = ModelResolver::new()?.resolve(model_id)?;
        Self::from_model_path(&model_path, device)
    }

    /// Loads from already-resolved model files.
    pub fn from_model_path(model_path: &ModelPath, device: &Device) -> Result<Self> {
        model_path.validate()?;

        let content = std::fs::read_to_string(&model_path.config_file)
            .with_context(|| format!("Failed to read config: {:?}", model_path.config_file))?;
        let raw: serde_json::Value =
            serde_json::from_str(&content).context("Failed to parse config.json")?;

        if let Some(model_type) = raw.get("model_type").and_then(|v| v.as_str()) {
            if model_type != "distilbert" {
                bail!(
                    "Unsupported model type: {} (expected distilbert)",
                    model_type
                );
            }
        }
        let config: DistilBertConfig =
            serde_json::from_value(raw).context("Failed to parse encoder config")?;

        tracing::info!(
            "Loading encoder {} (dim={}, layers={}, heads={})",
            model_path.model_id,
            config.dim,
            config.n_layers,
            config.n_heads
        );

        if model_path.weights_file.extension().map(|e| e != "safetensors").unwrap_or(true) {
            bail!(
                "Only safetensors weights are supported: {:?}",
                model_path.weights_file
            );
        }

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&model_path.weights_file], DType::F32, device)
        }
        .with_context(|| format!("Failed to mmap weights: {:?}", model_path.weights_file))?;

        let model = DistilBertModel::load(vb, &config)
            .with_context(|| format!("Failed to load encoder weights for {}", model_path.model_id))?;

        let tokenizer = TokenizerWrapper::from_model_path(model_path)?;

        Ok(Self {
            model: Arc::new(model),
            tokenizer,
            device: device.clone(),
            model_id: model_path.model_id.clone(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.tokenizer = self.tokenizer.with_max_length(max_length);
        self
    }

    /// Shared handle to the frozen encoder, for the classifier.
    pub fn model(&self) -> Arc<DistilBertModel> {
        Arc::clone(&self.model)
    }

    pub fn tokenizer(&self) -> &TokenizerWrapper {
        &self.tokenizer
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Pooled embeddings `[n, dim]` for one tokenized batch.
    fn embed_batch_tensor(&self, texts: &[&str]) -> Result<Tensor> {
        let encoded = self.tokenizer.encode_batch(texts, true)?;
        let (input_ids, attention_mask) = encoded.to_tensors(&self.device)?;

        let hidden = self.model.forward(&input_ids, Some(&attention_mask))?;
        mean_pool(&hidden, &attention_mask)
    }
}

impl ChunkEmbedder for EncoderEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut embeddings = self.embed_batch(&[text])?;
        embeddings
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Encoder returned no embedding"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self.embed_batch_tensor(chunk)?;
            all_embeddings.extend(batch.to_vec2::<f32>()?);
        }
        Ok(all_embeddings)
    }

    fn dimension(&self) -> usize {
        self.model.config().dim
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

/// Token-mean pooling weighted by the attention mask.
///
/// Padding positions contribute nothing, so chunks padded to a common batch
/// length pool to the same vector they would alone. The denominator is
/// clamped to keep an all-padding row finite.
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    Ok(summed.broadcast_div(&counts)?)
}
