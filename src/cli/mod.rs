//! Command-line interface
//!
//! Provides CLI commands for train, eval, and embed.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::Device;

use crate::data::chunker::{ChunkConfig, TextChunker};
use crate::data::RecordSet;
use crate::embedding::{ChunkEmbedder, EmbeddingCache, EncoderEmbedder};
use crate::training::{
    select_device, ChunkEmbeddingDataset, DevicePreference, RunReporter, SequenceClassifier,
    Trainer, TrainingConfig,
};

#[derive(serde::Serialize)]
struct FinalEval {
    loss: f64,
    accuracy: f64,
    precision: f64,
    recall: f64,
    f1: f64,
}

#[derive(serde::Serialize)]
struct RunSummary<'a> {
    model: &'a str,
    train_records: usize,
    eval_records: usize,
    num_epochs: usize,
    global_steps: usize,
    best_recall: f64,
    best_checkpoint: Option<String>,
    final_eval: FinalEval,
    training_seconds: f64,
}

/// Execute the train command
#[allow(clippy::too_many_arguments)]
pub fn train(
    train_data: String,
    eval_data: String,
    model: String,
    output: String,
    epochs: usize,
    train_batch_size: usize,
    eval_batch_size: usize,
    learning_rate: f64,
    warmup_steps: usize,
    weight_decay: f64,
    logging_steps: usize,
    chunk_size: usize,
    overlap: usize,
    max_length: usize,
    num_labels: usize,
    device: String,
    seed: u64,
    cache: Option<String>,
) -> Result<()> {
    tracing::info!("Starting classifier fine-tuning");
    tracing::info!("  Train data: {}", train_data);
    tracing::info!("  Eval data: {}", eval_data);
    tracing::info!("  Model: {}", model);
    tracing::info!("  Output: {}", output);
    tracing::info!("  Chunking: size={} overlap={}", chunk_size, overlap);

    let train_records = RecordSet::from_csv(&train_data)?;
    let eval_records = RecordSet::from_csv(&eval_data)?;
    tracing::info!("Train split: {}", train_records.stats());
    tracing::info!("Eval split: {}", eval_records.stats());

    let device = resolve_device(&device)?;
    let embedder = Arc::new(
        EncoderEmbedder::from_pretrained(&model, &device)?.with_max_length(max_length),
    );
    let encoder = embedder.model();

    let train_count = train_records.len();
    let eval_count = eval_records.len();

    let train_dataset = build_dataset(
        train_records,
        chunk_size,
        overlap,
        embedder.clone(),
        cache.as_deref(),
    )?;
    let eval_dataset = build_dataset(
        eval_records,
        chunk_size,
        overlap,
        embedder.clone(),
        cache.as_deref(),
    )?;

    let config = TrainingConfig {
        num_epochs: epochs,
        train_batch_size,
        eval_batch_size,
        learning_rate,
        warmup_steps,
        weight_decay,
        logging_steps,
        output_dir: output.clone(),
        seed,
        ..Default::default()
    };

    let mut trainer = Trainer::new(config, device.clone());
    let classifier = SequenceClassifier::new(encoder, num_labels, trainer.var_map(), &device)?;
    let reporter = RunReporter::new(&output)?;

    let start = Instant::now();
    let result = trainer.train(&classifier, &train_dataset, &eval_dataset, Some(&reporter))?;
    let training_seconds = start.elapsed().as_secs_f64();

    let summary = RunSummary {
        model: &model,
        train_records: train_count,
        eval_records: eval_count,
        num_epochs: epochs,
        global_steps: result.metrics.global_step,
        best_recall: result.best_recall,
        best_checkpoint: result
            .best_checkpoint
            .as_ref()
            .map(|p| p.display().to_string()),
        final_eval: FinalEval {
            loss: result.final_eval.loss,
            accuracy: result.final_eval.metrics.accuracy,
            precision: result.final_eval.metrics.precision,
            recall: result.final_eval.metrics.recall,
            f1: result.final_eval.metrics.f1,
        },
        training_seconds,
    };
    reporter.write_summary(&summary)?;

    println!("\nTraining Summary:");
    println!("  Optimizer steps: {}", result.metrics.global_step);
    println!("  Best recall: {:.4}", result.best_recall);
    println!("  Final: {}", result.final_eval);
    println!("  Wall time: {:.1}s", training_seconds);
    println!("  Output directory: {}", output);

    Ok(())
}

/// Execute the eval command
#[allow(clippy::too_many_arguments)]
pub fn eval(
    data: String,
    model: String,
    checkpoint: String,
    batch_size: usize,
    chunk_size: usize,
    overlap: usize,
    max_length: usize,
    num_labels: usize,
    device: String,
    cache: Option<String>,
) -> Result<()> {
    tracing::info!("Evaluating checkpoint {} on {}", checkpoint, data);

    let records = RecordSet::from_csv(&data)?;
    tracing::info!("Eval split: {}", records.stats());

    let device = resolve_device(&device)?;
    let embedder = Arc::new(
        EncoderEmbedder::from_pretrained(&model, &device)?.with_max_length(max_length),
    );
    let encoder = embedder.model();

    let dataset = build_dataset(records, chunk_size, overlap, embedder, cache.as_deref())?;

    let config = TrainingConfig {
        eval_batch_size: batch_size,
        ..Default::default()
    };
    let mut trainer = Trainer::new(config, device.clone());
    let classifier = SequenceClassifier::new(encoder, num_labels, trainer.var_map(), &device)?;
    trainer.load_checkpoint(&checkpoint)?;

    let report = trainer.evaluate(&classifier, &dataset)?;

    println!("\nEvaluation Summary:");
    println!("  Records: {}", dataset.len());
    println!("  {}", report);

    Ok(())
}

/// Execute the embed command: warms the persistent cache so later training
/// runs skip the encoder entirely.
pub fn embed(
    data: String,
    model: String,
    cache: Option<String>,
    chunk_size: usize,
    overlap: usize,
    max_length: usize,
    device: String,
) -> Result<()> {
    let cache = match cache {
        Some(path) => path,
        None => {
            let path = crate::utils::get_cache_dir()?.join("embeddings.db");
            path.to_string_lossy().into_owned()
        }
    };

    tracing::info!("Embedding records from {}", data);
    tracing::info!("  Model: {}", model);
    tracing::info!("  Cache: {}", cache);

    let records = RecordSet::from_csv(&data)?;
    tracing::info!("{}", records.stats());

    let device = resolve_device(&device)?;
    let embedder = Arc::new(
        EncoderEmbedder::from_pretrained(&model, &device)?.with_max_length(max_length),
    );
    let dimension = embedder.dimension();

    let dataset = build_dataset(records, chunk_size, overlap, embedder, Some(&cache))?;
    dataset.precompute()?;

    let store = EmbeddingCache::open(&cache)?;
    let entries = store.entries(dataset.signature())?;

    println!("\nEmbedding Summary:");
    println!("  Records embedded: {}", dataset.len());
    println!("  Embedding dimension: {}", dimension);
    println!("  Cache entries for this configuration: {}", entries);
    println!("  Cache database: {}", cache);

    Ok(())
}

fn resolve_device(preference: &str) -> Result<Device> {
    let preference: DevicePreference = preference
        .parse()
        .context("Failed to parse device preference")?;
    select_device(preference)
}

fn build_dataset(
    records: RecordSet,
    chunk_size: usize,
    overlap: usize,
    embedder: Arc<dyn ChunkEmbedder>,
    cache: Option<&str>,
) -> Result<ChunkEmbeddingDataset> {
    let chunker = TextChunker::new(ChunkConfig {
        chunk_size,
        overlap,
    })?;

    let dataset = ChunkEmbeddingDataset::new(records, chunker, embedder);
    match cache {
        Some(path) => Ok(dataset.with_persistent_cache(EmbeddingCache::open(path)?)),
        None => Ok(dataset),
    }
}
