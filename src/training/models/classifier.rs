//! Classification head over pre-computed record embeddings.

use std::sync::Arc;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder, VarMap};

use super::distilbert::DistilBertModel;
use crate::training::loss::cross_entropy;

/// Classifier that consumes averaged record embeddings instead of token ids.
///
/// Each record arrives as a single-step embedded sequence `[batch, 1, dim]`.
/// The frozen encoder re-contextualizes it through `forward_embedded` (so the
/// positional embedding and embedding layer norm are still applied), then the
/// trainable head maps the position-0 state to class logits:
/// linear `dim -> dim`, ReLU, dropout, linear `dim -> num_labels`.
///
/// Only the head's variables are registered in the `VarMap`; the encoder's
/// weights never receive gradients.
pub struct SequenceClassifier {
    encoder: Arc<DistilBertModel>,
    pre_classifier: Linear,
    classifier: Linear,
    dropout: Dropout,
    num_labels: usize,
}

impl SequenceClassifier {
    /// Builds a classifier over a frozen encoder. Head weights are freshly
    /// initialized and registered in `var_map` so the optimizer and
    /// checkpointing see exactly the trainable set.
    pub fn new(
        encoder: Arc<DistilBertModel>,
        num_labels: usize,
        var_map: &VarMap,
        device: &Device,
    ) -> Result<Self> {
        let dim = encoder.config().dim;
        let dropout = Dropout::new(encoder.config().seq_classif_dropout as f32);

        let vb = VarBuilder::from_varmap(var_map, DType::F32, device);
        let pre_classifier = candle_nn::linear(dim, dim, vb.pp("pre_classifier"))
            .context("Failed to create pre_classifier layer")?;
        let classifier = candle_nn::linear(dim, num_labels, vb.pp("classifier"))
            .context("Failed to create classifier layer")?;

        Ok(Self {
            encoder,
            pre_classifier,
            classifier,
            dropout,
            num_labels,
        })
    }

    /// Class logits `[batch, num_labels]` for input embeddings
    /// `[batch, 1, dim]`. `train` controls dropout.
    pub fn forward(&self, input_embeddings: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.encoder.forward_embedded(input_embeddings, None)?;
        // state at sequence position 0
        let pooled = hidden.narrow(1, 0, 1)?.squeeze(1)?;

        let hidden = self.pre_classifier.forward(&pooled)?;
        let hidden = hidden.relu()?;
        let hidden = self.dropout.forward(&hidden, train)?;
        let logits = self.classifier.forward(&hidden)?;
        Ok(logits)
    }

    /// Mean cross-entropy over the batch, with dropout active.
    pub fn forward_with_labels(&self, input_embeddings: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let logits = self.forward(input_embeddings, true)?;
        cross_entropy(&logits, labels)
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn hidden_size(&self) -> usize {
        self.encoder.config().dim
    }
}
