//! Classification loss.

use anyhow::Result;
use candle_core::{DType, Tensor, D};

/// Cross-entropy between class logits `[batch, num_labels]` and integer
/// labels `[batch]`, averaged over the batch.
///
/// Labels outside `[0, num_labels)` fail inside the gather; they are not
/// validated earlier in the pipeline.
pub fn cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let log_softmax = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let labels = labels.to_dtype(DType::I64)?;
    Ok(candle_nn::loss::nll(&log_softmax, &labels)?)
}
