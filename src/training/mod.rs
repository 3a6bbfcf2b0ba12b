//! Classifier fine-tuning over frozen encoder embeddings.
//!
//! # Modules
//!
//! - `device` - CPU/CUDA/Metal device selection
//! - `hub` - pretrained model resolution (Hub download or local directory)
//! - `models` - encoder, tokenizer and classification head
//! - `loss` - cross-entropy
//! - `metrics` - binary precision/recall/F1
//! - `optimizer` - AdamW with warmup/decay schedule
//! - `dataset` - lazily embedded record dataset
//! - `trainer` - explicit train/eval/checkpoint loop
//! - `report` - JSONL step metrics and the run summary

pub mod dataset;
pub mod device;
pub mod hub;
pub mod loss;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod report;
pub mod trainer;

// Re-exports
pub use dataset::{ChunkEmbeddingDataset, ModelInput};
pub use device::{select_device, DevicePreference};
pub use hub::{ModelPath, ModelResolver};
pub use metrics::BinaryMetrics;
pub use models::{DistilBertConfig, DistilBertModel, SequenceClassifier, TokenizerWrapper};
pub use report::RunReporter;
pub use trainer::{EvalReport, Trainer, TrainingConfig, TrainingResult};
