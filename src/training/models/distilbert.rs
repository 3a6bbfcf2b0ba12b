//! Forward-only DistilBERT encoder.
//!
//! Implements the encoder with basic tensor ops (manual layer norm and
//! softmax) so the same code path runs on CPU, CUDA and Metal. Weights are
//! pretrained artifacts loaded from safetensors; nothing here is trained.
//!
//! Two entry points: [`DistilBertModel::forward`] from token ids, and
//! [`DistilBertModel::forward_embedded`] from pre-computed vectors, which
//! bypasses the token-embedding lookup but still applies position
//! embeddings, the embedding layer norm and the transformer stack.

use anyhow::Result;
use candle_core::{DType, Module, Tensor, D};
use candle_nn::{Embedding, Linear, VarBuilder};

fn default_activation() -> String {
    "gelu".to_string()
}

fn default_dropout() -> f64 {
    0.1
}

fn default_seq_classif_dropout() -> f64 {
    0.2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

/// DistilBERT configuration, deserialized from a checkpoint's `config.json`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DistilBertConfig {
    pub vocab_size: usize,
    pub dim: usize,
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub max_position_embeddings: usize,
    #[serde(default = "default_activation")]
    pub activation: String,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
    #[serde(default = "default_dropout")]
    pub attention_dropout: f64,
    #[serde(default = "default_seq_classif_dropout")]
    pub seq_classif_dropout: f64,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl Default for DistilBertConfig {
    fn default() -> Self {
        // distilbert-base-uncased
        Self {
            vocab_size: 30522,
            dim: 768,
            hidden_dim: 3072,
            n_layers: 6,
            n_heads: 12,
            max_position_embeddings: 512,
            activation: "gelu".to_string(),
            dropout: 0.1,
            attention_dropout: 0.1,
            seq_classif_dropout: 0.2,
            layer_norm_eps: 1e-12,
        }
    }
}

/// Softmax over the last dimension, max-shifted for numerical stability.
fn stable_softmax(x: &Tensor, dim: D) -> Result<Tensor> {
    let max = x.max_keepdim(dim)?;
    let shifted = x.broadcast_sub(&max)?;
    let exp = shifted.exp()?;
    let sum = exp.sum_keepdim(dim)?;
    Ok(exp.broadcast_div(&sum)?)
}

/// Layer normalization from basic ops:
/// y = (x - mean) / sqrt(var + eps) * weight + bias
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    pub fn load(vb: VarBuilder, dim: usize, eps: f64) -> Result<Self> {
        // PyTorch naming (weight/bias) first, TensorFlow naming (gamma/beta) second
        let weight = vb
            .get(dim, "weight")
            .or_else(|_| vb.get(dim, "gamma"))?;
        let bias = vb.get(dim, "bias").or_else(|_| vb.get(dim, "beta"))?;
        Ok(Self { weight, bias, eps })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let diff = x.broadcast_sub(&mean)?;
        let variance = diff.sqr()?.mean_keepdim(D::Minus1)?;
        let std = (variance + self.eps)?.sqrt()?;
        let normalized = diff.broadcast_div(&std)?;
        let output = normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?;
        Ok(output)
    }
}

/// Word + position embeddings with layer norm. No token-type embeddings in
/// this architecture.
#[derive(Debug)]
pub struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl Embeddings {
    pub fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        let word_embeddings =
            candle_nn::embedding(config.vocab_size, config.dim, vb.pp("word_embeddings"))?;
        let position_embeddings = candle_nn::embedding(
            config.max_position_embeddings,
            config.dim,
            vb.pp("position_embeddings"),
        )?;
        let layer_norm = LayerNorm::load(vb.pp("LayerNorm"), config.dim, config.layer_norm_eps)?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            layer_norm,
        })
    }

    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let word_embeds = self.word_embeddings.forward(input_ids)?;
        self.add_positions(&word_embeds)
    }

    /// Embedding path for pre-computed vectors: only the token lookup is
    /// bypassed, position embeddings and the layer norm still apply.
    pub fn forward_embedded(&self, input_embeds: &Tensor) -> Result<Tensor> {
        self.add_positions(input_embeds)
    }

    fn add_positions(&self, input_embeds: &Tensor) -> Result<Tensor> {
        let (_batch_size, seq_len, _dim) = input_embeds.dims3()?;
        let position_ids = Tensor::arange(0u32, seq_len as u32, input_embeds.device())?;
        let position_embeds = self.position_embeddings.forward(&position_ids)?;
        let embeddings = input_embeds.broadcast_add(&position_embeds)?;
        self.layer_norm.forward(&embeddings)
    }
}

/// Multi-head self-attention with fused output projection
/// (`q/k/v/out_lin` in the checkpoint layout).
#[derive(Debug)]
struct MultiHeadSelfAttention {
    q_lin: Linear,
    k_lin: Linear,
    v_lin: Linear,
    out_lin: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl MultiHeadSelfAttention {
    fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        let q_lin = candle_nn::linear(config.dim, config.dim, vb.pp("q_lin"))?;
        let k_lin = candle_nn::linear(config.dim, config.dim, vb.pp("k_lin"))?;
        let v_lin = candle_nn::linear(config.dim, config.dim, vb.pp("v_lin"))?;
        let out_lin = candle_nn::linear(config.dim, config.dim, vb.pp("out_lin"))?;

        Ok(Self {
            q_lin,
            k_lin,
            v_lin,
            out_lin,
            n_heads: config.n_heads,
            head_dim: config.dim / config.n_heads,
        })
    }

    /// [batch, seq, dim] -> [batch, heads, seq, head_dim]
    fn split_heads(&self, x: &Tensor, batch_size: usize, seq_len: usize) -> Result<Tensor> {
        let x = x.reshape((batch_size, seq_len, self.n_heads, self.head_dim))?;
        Ok(x.transpose(1, 2)?)
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch_size, seq_len, _) = hidden_states.dims3()?;

        let query = self
            .split_heads(&self.q_lin.forward(hidden_states)?, batch_size, seq_len)?
            .contiguous()?;
        let key = self
            .split_heads(&self.k_lin.forward(hidden_states)?, batch_size, seq_len)?
            .contiguous()?;
        let value = self
            .split_heads(&self.v_lin.forward(hidden_states)?, batch_size, seq_len)?
            .contiguous()?;

        let key_t = key.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (query.matmul(&key_t)? * scale)?;

        // mask is [batch, 1, 1, seq] additive, broadcast over heads and rows
        let scores = match attention_mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };

        let probs = stable_softmax(&scores, D::Minus1)?;
        let context = probs.matmul(&value)?;

        let context = context.transpose(1, 2)?.contiguous()?;
        let context = context.reshape((batch_size, seq_len, self.n_heads * self.head_dim))?;

        Ok(self.out_lin.forward(&context)?)
    }
}

/// Position-wise feed-forward network (`ffn.lin1` / `ffn.lin2`).
#[derive(Debug)]
struct FeedForward {
    lin1: Linear,
    lin2: Linear,
    gelu: bool,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        let lin1 = candle_nn::linear(config.dim, config.hidden_dim, vb.pp("lin1"))?;
        let lin2 = candle_nn::linear(config.hidden_dim, config.dim, vb.pp("lin2"))?;
        let gelu = match config.activation.as_str() {
            "gelu" | "gelu_new" => true,
            "relu" => false,
            other => anyhow::bail!("Unsupported activation: {}", other),
        };
        Ok(Self { lin1, lin2, gelu })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let hidden_states = self.lin1.forward(hidden_states)?;
        let hidden_states = if self.gelu {
            hidden_states.gelu()?
        } else {
            hidden_states.relu()?
        };
        Ok(self.lin2.forward(&hidden_states)?)
    }
}

/// One transformer block: attention + residual norm, FFN + residual norm.
#[derive(Debug)]
struct TransformerBlock {
    attention: MultiHeadSelfAttention,
    sa_layer_norm: LayerNorm,
    ffn: FeedForward,
    output_layer_norm: LayerNorm,
}

impl TransformerBlock {
    fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        let attention = MultiHeadSelfAttention::load(vb.pp("attention"), config)?;
        let sa_layer_norm =
            LayerNorm::load(vb.pp("sa_layer_norm"), config.dim, config.layer_norm_eps)?;
        let ffn = FeedForward::load(vb.pp("ffn"), config)?;
        let output_layer_norm =
            LayerNorm::load(vb.pp("output_layer_norm"), config.dim, config.layer_norm_eps)?;

        Ok(Self {
            attention,
            sa_layer_norm,
            ffn,
            output_layer_norm,
        })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let attn_output = self.attention.forward(hidden_states, attention_mask)?;
        let hidden_states = self.sa_layer_norm.forward(&(attn_output + hidden_states)?)?;

        let ffn_output = self.ffn.forward(&hidden_states)?;
        let hidden_states = self
            .output_layer_norm
            .forward(&(ffn_output + hidden_states)?)?;

        Ok(hidden_states)
    }
}

/// Stack of transformer blocks.
#[derive(Debug)]
struct Transformer {
    layers: Vec<TransformerBlock>,
}

impl Transformer {
    fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        let vb_layers = vb.pp("layer");
        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            layers.push(TransformerBlock::load(vb_layers.pp(i.to_string()), config)?);
        }
        Ok(Self { layers })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let mut hidden_states = hidden_states.clone();
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, attention_mask)?;
        }
        Ok(hidden_states)
    }
}

/// Expand a `[batch, seq]` 0/1 mask to `[batch, 1, 1, seq]` additive scores
/// (0 for valid positions, -1e4 for padding).
fn expand_attention_mask(attention_mask: &Tensor) -> Result<Tensor> {
    let attention_mask = attention_mask.to_dtype(DType::F32)?;
    let attention_mask = attention_mask.unsqueeze(1)?.unsqueeze(1)?;
    let attention_mask = ((1.0 - attention_mask)? * (-10000.0))?;
    Ok(attention_mask)
}

/// The full encoder.
#[derive(Debug)]
pub struct DistilBertModel {
    embeddings: Embeddings,
    transformer: Transformer,
    config: DistilBertConfig,
}

impl DistilBertModel {
    /// Load weights, accepting both task-wrapped checkpoints (tensors under
    /// a `distilbert.` prefix, as the masked-LM export ships them) and bare
    /// encoder checkpoints.
    pub fn load(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        Self::load_at(vb.pp("distilbert"), config).or_else(|_| Self::load_at(vb, config))
    }

    fn load_at(vb: VarBuilder, config: &DistilBertConfig) -> Result<Self> {
        let embeddings = Embeddings::load(vb.pp("embeddings"), config)?;
        let transformer = Transformer::load(vb.pp("transformer"), config)?;
        Ok(Self {
            embeddings,
            transformer,
            config: config.clone(),
        })
    }

    /// Last hidden states from token ids: `[batch, seq, dim]`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let hidden_states = self.embeddings.forward(input_ids)?;
        let attention_mask = attention_mask.map(expand_attention_mask).transpose()?;
        self.transformer
            .forward(&hidden_states, attention_mask.as_ref())
    }

    /// Last hidden states from pre-computed vectors `[batch, seq, dim]`,
    /// bypassing the token-embedding lookup ("already embedded" mode).
    pub fn forward_embedded(
        &self,
        input_embeds: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let hidden_states = self.embeddings.forward_embedded(input_embeds)?;
        let attention_mask = attention_mask.map(expand_attention_mask).transpose()?;
        self.transformer
            .forward(&hidden_states, attention_mask.as_ref())
    }

    pub fn config(&self) -> &DistilBertConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn tiny_config() -> DistilBertConfig {
        DistilBertConfig {
            vocab_size: 32,
            dim: 8,
            hidden_dim: 16,
            n_layers: 1,
            n_heads: 2,
            max_position_embeddings: 16,
            ..Default::default()
        }
    }

    fn tiny_model(device: &Device) -> DistilBertModel {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        DistilBertModel::load(vb, &tiny_config()).unwrap()
    }

    #[test]
    fn test_layer_norm_values() {
        let device = Device::Cpu;
        let weight = Tensor::ones(2, DType::F32, &device).unwrap();
        let bias = Tensor::zeros(2, DType::F32, &device).unwrap();
        let layer_norm = LayerNorm::new(weight, bias, 1e-12);

        let input = Tensor::new(&[[1.0f32, 3.0]], &device).unwrap();
        let output = layer_norm.forward(&input).unwrap();
        let values = output.to_vec2::<f32>().unwrap();

        // mean 2, std 1 -> normalized to [-1, 1]
        assert!((values[0][0] + 1.0).abs() < 1e-3);
        assert!((values[0][1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_config_deserialize_checkpoint_json() {
        let json = r#"{
            "activation": "gelu",
            "architectures": ["DistilBertForMaskedLM"],
            "attention_dropout": 0.1,
            "dim": 768,
            "dropout": 0.1,
            "hidden_dim": 3072,
            "initializer_range": 0.02,
            "max_position_embeddings": 512,
            "model_type": "distilbert",
            "n_heads": 12,
            "n_layers": 6,
            "seq_classif_dropout": 0.2,
            "vocab_size": 30522
        }"#;

        let config: DistilBertConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.dim, 768);
        assert_eq!(config.n_layers, 6);
        assert_eq!(config.hidden_dim, 3072);
        assert!((config.seq_classif_dropout - 0.2).abs() < 1e-9);
        assert!((config.layer_norm_eps - 1e-12).abs() < 1e-15);
    }

    #[test]
    fn test_forward_from_ids_shape() {
        let device = Device::Cpu;
        let model = tiny_model(&device);

        let input_ids = Tensor::new(&[[1u32, 5, 9, 2]], &device).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 1, 0]], &device).unwrap();

        let hidden = model.forward(&input_ids, Some(&mask)).unwrap();
        assert_eq!(hidden.dims(), &[1, 4, 8]);

        let unmasked = model.forward(&input_ids, None).unwrap();
        assert_eq!(unmasked.dims(), &[1, 4, 8]);
    }

    #[test]
    fn test_forward_embedded_shape() {
        let device = Device::Cpu;
        let model = tiny_model(&device);

        let embeds = Tensor::randn(0.0f32, 1.0, (3, 1, 8), &device).unwrap();
        let hidden = model.forward_embedded(&embeds, None).unwrap();
        assert_eq!(hidden.dims(), &[3, 1, 8]);
    }

    #[test]
    fn test_expand_attention_mask() {
        let device = Device::Cpu;
        let mask = Tensor::new(&[[1u32, 1, 0]], &device).unwrap();
        let expanded = expand_attention_mask(&mask).unwrap();

        assert_eq!(expanded.dims(), &[1, 1, 1, 3]);
        let values: Vec<f32> = expanded.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![0.0, 0.0, -10000.0]);
    }
}
