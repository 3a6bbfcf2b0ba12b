//! Training loop for the embedding classifier.
//!
//! The loop is explicit rather than callback-driven: per epoch it shuffles
//! record indices with a seeded RNG, steps AdamW over batches of averaged
//! chunk embeddings, evaluates on the held-out split, saves a checkpoint,
//! and tracks the best epoch by recall. After the last epoch the best
//! checkpoint is restored before the final evaluation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor, D};
use candle_nn::VarMap;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::dataset::ChunkEmbeddingDataset;
use super::loss::cross_entropy;
use super::metrics::BinaryMetrics;
use super::models::SequenceClassifier;
use super::optimizer::{AdamW, AdamWConfig, LearningRateScheduler};
use super::report::RunReporter;

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Number of training epochs
    pub num_epochs: usize,
    /// Batch size for training
    pub train_batch_size: usize,
    /// Batch size for evaluation
    pub eval_batch_size: usize,
    /// Base learning rate
    pub learning_rate: f64,
    /// Linear warmup steps before the linear decay begins
    pub warmup_steps: usize,
    /// Weight decay coefficient
    pub weight_decay: f64,
    /// Maximum gradient norm for clipping
    pub max_grad_norm: f64,
    /// Log training metrics every N steps
    pub logging_steps: usize,
    /// Output directory for checkpoints and reports
    pub output_dir: String,
    /// Seed for per-epoch shuffling
    pub seed: u64,
    /// Restore the best-recall checkpoint before the final evaluation
    pub load_best_at_end: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: 3,
            train_batch_size: 16,
            eval_batch_size: 16,
            learning_rate: 5e-5,
            warmup_steps: 500,
            weight_decay: 0.01,
            max_grad_norm: 1.0,
            logging_steps: 10,
            output_dir: "./results".to_string(),
            seed: 42,
            load_best_at_end: true,
        }
    }
}

/// Training metrics
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// Loss of the most recent batch
    pub train_loss: f64,
    /// Number of optimizer steps taken
    pub global_step: usize,
    /// Current epoch (1-based)
    pub epoch: usize,
    /// Samples per second
    pub samples_per_second: f64,
    /// Learning rate applied at the most recent step
    pub learning_rate: f64,
}

impl std::fmt::Display for TrainingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Step {} | Epoch {} | Loss: {:.4} | LR: {:.2e} | {:.1} samples/s",
            self.global_step,
            self.epoch,
            self.train_loss,
            self.learning_rate,
            self.samples_per_second
        )
    }
}

/// One evaluation round: average loss plus classification metrics
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub loss: f64,
    pub metrics: BinaryMetrics,
}

impl std::fmt::Display for EvalReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Eval loss: {:.4} | {}", self.loss, self.metrics)
    }
}

/// Outcome of a full training run
#[derive(Debug)]
pub struct TrainingResult {
    /// Metrics at the last training step
    pub metrics: TrainingMetrics,
    /// Checkpoint of the best epoch by recall
    pub best_checkpoint: Option<PathBuf>,
    /// Best eval recall seen across epochs
    pub best_recall: f64,
    /// Evaluation after the best checkpoint was restored
    pub final_eval: EvalReport,
    /// Per-step training loss
    pub history: Vec<f64>,
}

/// Trainer for the classification head over a frozen encoder
pub struct Trainer {
    config: TrainingConfig,
    device: Device,
    var_map: VarMap,
}

impl Trainer {
    /// Creates a trainer with a fresh `VarMap`. Build the classifier head
    /// against [`Trainer::var_map`] so checkpoints capture exactly the
    /// trainable variables.
    pub fn new(config: TrainingConfig, device: Device) -> Self {
        Self {
            config,
            device,
            var_map: VarMap::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    fn create_optimizer(&self) -> Result<AdamW> {
        let config = AdamWConfig {
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            max_grad_norm: self.config.max_grad_norm,
            ..Default::default()
        };
        AdamW::new(&self.var_map, config)
    }

    fn create_scheduler(&self, total_steps: usize) -> LearningRateScheduler {
        LearningRateScheduler::new(
            self.config.learning_rate,
            self.config.warmup_steps,
            total_steps,
        )
    }

    /// Saves the trainable variables under `output_dir`.
    pub fn save_checkpoint(&self, step: usize) -> Result<PathBuf> {
        let dir = Path::new(&self.config.output_dir);
        std::fs::create_dir_all(dir)?;

        let checkpoint_file = dir.join(format!("checkpoint-{}.safetensors", step));
        self.var_map
            .save(&checkpoint_file)
            .context("Failed to save checkpoint")?;

        tracing::info!("Saved checkpoint to {:?}", checkpoint_file);
        Ok(checkpoint_file)
    }

    /// Overwrites the trainable variables from a saved checkpoint.
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.var_map
            .load(path)
            .with_context(|| format!("Failed to load checkpoint: {:?}", path))?;
        tracing::info!("Loaded checkpoint from {:?}", path);
        Ok(())
    }

    /// Runs the full training loop and returns the final state.
    pub fn train(
        &mut self,
        classifier: &SequenceClassifier,
        train_data: &ChunkEmbeddingDataset,
        eval_data: &ChunkEmbeddingDataset,
        reporter: Option<&RunReporter>,
    ) -> Result<TrainingResult> {
        if train_data.is_empty() {
            bail!("Training dataset is empty");
        }
        if eval_data.is_empty() {
            bail!("Evaluation dataset is empty");
        }

        let batches_per_epoch =
            (train_data.len() + self.config.train_batch_size - 1) / self.config.train_batch_size;
        let total_steps = batches_per_epoch * self.config.num_epochs;

        tracing::info!("Starting training:");
        tracing::info!("  Train records: {}", train_data.len());
        tracing::info!("  Eval records: {}", eval_data.len());
        tracing::info!("  Batch size: {}", self.config.train_batch_size);
        tracing::info!("  Epochs: {}", self.config.num_epochs);
        tracing::info!("  Total optimization steps: {}", total_steps);
        tracing::info!("  Learning rate: {}", self.config.learning_rate);
        tracing::info!("  Warmup steps: {}", self.config.warmup_steps);

        std::fs::create_dir_all(&self.config.output_dir)?;

        let mut optimizer = self.create_optimizer()?;
        let mut scheduler = self.create_scheduler(total_steps);

        let mut metrics = TrainingMetrics::default();
        let mut history = Vec::new();
        let mut best_recall = f64::NEG_INFINITY;
        let mut best_checkpoint: Option<PathBuf> = None;

        for epoch in 0..self.config.num_epochs {
            metrics.epoch = epoch + 1;
            let epoch_start = Instant::now();
            let mut epoch_loss = 0.0;
            let mut epoch_batches = 0usize;

            let mut indices: Vec<usize> = (0..train_data.len()).collect();
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.config.seed + epoch as u64);
            indices.shuffle(&mut rng);

            for batch_indices in indices.chunks(self.config.train_batch_size) {
                let step_start = Instant::now();

                let (embeddings, labels) = self.build_batch(train_data, batch_indices)?;
                let loss = classifier.forward_with_labels(&embeddings, &labels)?;
                let loss_value = loss.to_scalar::<f32>()? as f64;

                let lr = scheduler.get_lr();
                optimizer.set_learning_rate(lr);

                let mut grads = loss.backward()?;
                let grad_norm = optimizer.step_clipped(&mut grads)?;
                if grad_norm > self.config.max_grad_norm {
                    tracing::debug!(
                        "Step {}: gradient norm {:.4} clipped to {:.4}",
                        metrics.global_step + 1,
                        grad_norm,
                        self.config.max_grad_norm
                    );
                }
                scheduler.step();

                metrics.global_step += 1;
                metrics.train_loss = loss_value;
                metrics.learning_rate = lr;
                metrics.samples_per_second =
                    batch_indices.len() as f64 / step_start.elapsed().as_secs_f64();

                epoch_loss += loss_value;
                epoch_batches += 1;
                history.push(loss_value);

                if metrics.global_step % self.config.logging_steps == 0 {
                    tracing::info!("{}", metrics);
                    if let Some(reporter) = reporter {
                        reporter.log_train(&metrics)?;
                    }
                }
            }

            let avg_epoch_loss = if epoch_batches > 0 {
                epoch_loss / epoch_batches as f64
            } else {
                0.0
            };
            tracing::info!(
                "Epoch {} completed in {:.1}s | Avg loss: {:.4}",
                epoch + 1,
                epoch_start.elapsed().as_secs_f64(),
                avg_epoch_loss
            );

            let report = self.evaluate(classifier, eval_data)?;
            tracing::info!("Epoch {} | {}", epoch + 1, report);
            if let Some(reporter) = reporter {
                reporter.log_eval(epoch + 1, metrics.global_step, &report)?;
            }

            let checkpoint = self.save_checkpoint(metrics.global_step)?;
            if report.metrics.recall > best_recall {
                best_recall = report.metrics.recall;
                best_checkpoint = Some(checkpoint);
                tracing::info!("New best recall: {:.4}", best_recall);
            }
        }

        if self.config.load_best_at_end {
            if let Some(path) = best_checkpoint.clone() {
                self.load_checkpoint(&path)?;
            }
        }

        let final_eval = self.evaluate(classifier, eval_data)?;
        tracing::info!("Final evaluation | {}", final_eval);

        Ok(TrainingResult {
            metrics,
            best_checkpoint,
            best_recall: best_recall.max(0.0),
            final_eval,
            history,
        })
    }

    /// Evaluates with dropout disabled; predictions are argmax over logits.
    pub fn evaluate(
        &self,
        classifier: &SequenceClassifier,
        dataset: &ChunkEmbeddingDataset,
    ) -> Result<EvalReport> {
        let indices: Vec<usize> = (0..dataset.len()).collect();
        let mut total_loss = 0.0;
        let mut predictions = Vec::with_capacity(dataset.len());
        let mut labels = Vec::with_capacity(dataset.len());

        for batch_indices in indices.chunks(self.config.eval_batch_size) {
            let (embeddings, label_tensor) = self.build_batch(dataset, batch_indices)?;
            let logits = classifier.forward(&embeddings, false)?;

            // per-example weighting, so a partial final batch counts once
            let loss = cross_entropy(&logits, &label_tensor)?;
            total_loss += loss.to_scalar::<f32>()? as f64 * batch_indices.len() as f64;

            predictions.extend(logits.argmax(D::Minus1)?.to_vec1::<u32>()?);
            labels.extend(label_tensor.to_vec1::<u32>()?);
        }

        let loss = if labels.is_empty() {
            0.0
        } else {
            total_loss / labels.len() as f64
        };
        let metrics = BinaryMetrics::compute(&labels, &predictions)?;
        Ok(EvalReport { loss, metrics })
    }

    /// Stacks averaged record embeddings into `[batch, 1, dim]` plus labels.
    fn build_batch(
        &self,
        dataset: &ChunkEmbeddingDataset,
        indices: &[usize],
    ) -> Result<(Tensor, Tensor)> {
        let dim = dataset.embedding_dim();
        let mut flat = Vec::with_capacity(indices.len() * dim);
        let mut labels = Vec::with_capacity(indices.len());

        for &index in indices {
            let input = dataset.get(index)?;
            flat.extend_from_slice(&input.input_embeddings);
            labels.push(input.label);
        }

        let embeddings = Tensor::from_vec(flat, (indices.len(), 1, dim), &self.device)?;
        let labels = Tensor::from_vec(labels, indices.len(), &self.device)?;
        Ok((embeddings, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::chunker::{ChunkConfig, TextChunker};
    use crate::data::{Record, RecordSet};
    use crate::embedding::MockEmbedder;
    use crate::training::models::distilbert::{DistilBertConfig, DistilBertModel};
    use candle_core::DType;
    use candle_nn::VarBuilder;
    use std::sync::Arc;

    fn tiny_dataset(n: usize, dim: usize) -> ChunkEmbeddingDataset {
        let records: Vec<Record> = (0..n)
            .map(|i| Record {
                text: format!("record number {} with some repeated text", i),
                label: (i % 2) as u32,
            })
            .collect();
        let chunker = TextChunker::new(ChunkConfig {
            chunk_size: 16,
            overlap: 4,
        })
        .unwrap();
        ChunkEmbeddingDataset::new(RecordSet::new(records), chunker, Arc::new(MockEmbedder::new(dim)))
    }

    fn tiny_setup(output_dir: &Path) -> (Trainer, SequenceClassifier) {
        let device = Device::Cpu;
        let encoder_config = DistilBertConfig {
            vocab_size: 32,
            dim: 8,
            hidden_dim: 16,
            n_layers: 1,
            n_heads: 2,
            max_position_embeddings: 16,
            ..Default::default()
        };

        let base_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&base_map, DType::F32, &device);
        let encoder = Arc::new(DistilBertModel::load(vb, &encoder_config).unwrap());

        let config = TrainingConfig {
            num_epochs: 1,
            train_batch_size: 4,
            eval_batch_size: 4,
            learning_rate: 1e-2,
            warmup_steps: 0,
            logging_steps: 1,
            output_dir: output_dir.to_string_lossy().to_string(),
            ..Default::default()
        };
        let trainer = Trainer::new(config, device.clone());
        let classifier =
            SequenceClassifier::new(encoder, 2, trainer.var_map(), &device).unwrap();
        (trainer, classifier)
    }

    #[test]
    fn test_training_config_default() {
        let config = TrainingConfig::default();
        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.train_batch_size, 16);
        assert_eq!(config.eval_batch_size, 16);
        assert_eq!(config.warmup_steps, 500);
        assert_eq!(config.logging_steps, 10);
        assert!((config.learning_rate - 5e-5).abs() < 1e-10);
        assert!((config.weight_decay - 0.01).abs() < 1e-10);
        assert!(config.load_best_at_end);
    }

    #[test]
    fn test_training_metrics_display() {
        let metrics = TrainingMetrics {
            train_loss: 0.5,
            global_step: 100,
            epoch: 1,
            samples_per_second: 32.5,
            learning_rate: 5e-5,
        };

        let display = format!("{}", metrics);
        assert!(display.contains("Step 100"));
        assert!(display.contains("Epoch 1"));
    }

    #[test]
    fn test_train_tiny_run() {
        let dir = tempfile::tempdir().unwrap();
        let (mut trainer, classifier) = tiny_setup(dir.path());

        let train_data = tiny_dataset(8, 8);
        let eval_data = tiny_dataset(4, 8);
        let reporter = RunReporter::new(dir.path()).unwrap();

        let result = trainer
            .train(&classifier, &train_data, &eval_data, Some(&reporter))
            .unwrap();

        // 8 records / batch 4 * 1 epoch
        assert_eq!(result.metrics.global_step, 2);
        assert_eq!(result.history.len(), 2);
        assert!(result.history.iter().all(|loss| loss.is_finite()));
        assert_eq!(result.final_eval.metrics.total, 4);

        let best = result.best_checkpoint.expect("best checkpoint recorded");
        assert!(best.exists());

        let content = std::fs::read_to_string(reporter.metrics_path()).unwrap();
        assert!(!content.is_empty());
        for line in content.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed["kind"] == "train" || parsed["kind"] == "eval");
        }
    }

    #[test]
    fn test_evaluate_covers_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let (trainer, classifier) = tiny_setup(dir.path());

        let eval_data = tiny_dataset(5, 8);
        let report = trainer.evaluate(&classifier, &eval_data).unwrap();

        assert_eq!(report.metrics.total, 5);
        assert!(report.loss.is_finite());
        assert!(report.loss >= 0.0);
    }

    #[test]
    fn test_eval_loss_counts_partial_batch_per_example() {
        let dir = tempfile::tempdir().unwrap();
        let (trainer, classifier) = tiny_setup(dir.path());

        // eval batch size 4 over 5 records: the last batch holds one example
        let eval_data = tiny_dataset(5, 8);
        let batched = trainer.evaluate(&classifier, &eval_data).unwrap();

        let one_by_one = Trainer::new(
            TrainingConfig {
                eval_batch_size: 1,
                ..trainer.config().clone()
            },
            Device::Cpu,
        );
        let expected = one_by_one.evaluate(&classifier, &eval_data).unwrap();

        assert!((batched.loss - expected.loss).abs() < 1e-5);
    }

    #[test]
    fn test_train_rejects_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let (mut trainer, classifier) = tiny_setup(dir.path());

        let empty = tiny_dataset(0, 8);
        let eval_data = tiny_dataset(2, 8);
        assert!(trainer
            .train(&classifier, &empty, &eval_data, None)
            .is_err());
    }
}
