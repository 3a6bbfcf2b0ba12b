use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use longfin::cli;

#[derive(Parser)]
#[command(name = "longfin")]
#[command(about = "Fine-tune transformer classifiers over chunk-averaged text embeddings", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fine-tune the classification head on a labeled CSV dataset
    Train {
        /// Training CSV with text and label columns
        #[arg(long)]
        train_data: String,

        /// Evaluation CSV with text and label columns
        #[arg(long)]
        eval_data: String,

        /// Model id on the Hugging Face Hub, or a local model directory
        #[arg(short, long, default_value = "distilbert-base-uncased")]
        model: String,

        /// Output directory for checkpoints and reports
        #[arg(short, long, default_value = "./results")]
        output: String,

        /// Number of epochs
        #[arg(long, default_value = "3")]
        epochs: usize,

        /// Train batch size
        #[arg(long, default_value = "16")]
        train_batch_size: usize,

        /// Eval batch size
        #[arg(long, default_value = "16")]
        eval_batch_size: usize,

        /// Peak learning rate
        #[arg(long, default_value = "5e-5")]
        learning_rate: f64,

        /// Linear warmup steps
        #[arg(long, default_value = "500")]
        warmup_steps: usize,

        /// AdamW weight decay
        #[arg(long, default_value = "0.01")]
        weight_decay: f64,

        /// Log every N optimizer steps
        #[arg(long, default_value = "10")]
        logging_steps: usize,

        /// Chunk window size in characters
        #[arg(long, default_value = "256")]
        chunk_size: usize,

        /// Overlap between consecutive chunks in characters
        #[arg(long, default_value = "64")]
        overlap: usize,

        /// Tokenizer truncation length per chunk
        #[arg(long, default_value = "8500")]
        max_length: usize,

        /// Number of output classes (metrics treat label 1 as positive)
        #[arg(long, default_value = "2")]
        num_labels: usize,

        /// Device: auto, cpu, cuda, or metal
        #[arg(short, long, default_value = "auto")]
        device: String,

        /// Random seed for per-epoch shuffling
        #[arg(long, default_value = "42")]
        seed: u64,

        /// SQLite database for persistent embedding caching (optional)
        #[arg(long)]
        cache: Option<String>,
    },

    /// Evaluate a saved checkpoint on a labeled CSV dataset
    Eval {
        /// Evaluation CSV with text and label columns
        #[arg(long)]
        data: String,

        /// Model id on the Hugging Face Hub, or a local model directory
        #[arg(short, long, default_value = "distilbert-base-uncased")]
        model: String,

        /// Checkpoint file produced by the train command
        #[arg(short, long)]
        checkpoint: String,

        /// Eval batch size
        #[arg(long, default_value = "16")]
        batch_size: usize,

        /// Chunk window size in characters
        #[arg(long, default_value = "256")]
        chunk_size: usize,

        /// Overlap between consecutive chunks in characters
        #[arg(long, default_value = "64")]
        overlap: usize,

        /// Tokenizer truncation length per chunk
        #[arg(long, default_value = "8500")]
        max_length: usize,

        /// Number of output classes (metrics treat label 1 as positive)
        #[arg(long, default_value = "2")]
        num_labels: usize,

        /// Device: auto, cpu, cuda, or metal
        #[arg(short, long, default_value = "auto")]
        device: String,

        /// SQLite database for persistent embedding caching (optional)
        #[arg(long)]
        cache: Option<String>,
    },

    /// Precompute chunk-averaged embeddings into a persistent cache
    Embed {
        /// CSV with text and label columns
        #[arg(long)]
        data: String,

        /// Model id on the Hugging Face Hub, or a local model directory
        #[arg(short, long, default_value = "distilbert-base-uncased")]
        model: String,

        /// SQLite database to fill (defaults to ~/.cache/longfin/embeddings.db)
        #[arg(long)]
        cache: Option<String>,

        /// Chunk window size in characters
        #[arg(long, default_value = "256")]
        chunk_size: usize,

        /// Overlap between consecutive chunks in characters
        #[arg(long, default_value = "64")]
        overlap: usize,

        /// Tokenizer truncation length per chunk
        #[arg(long, default_value = "8500")]
        max_length: usize,

        /// Device: auto, cpu, cuda, or metal
        #[arg(short, long, default_value = "auto")]
        device: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "longfin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            train_data,
            eval_data,
            model,
            output,
            epochs,
            train_batch_size,
            eval_batch_size,
            learning_rate,
            warmup_steps,
            weight_decay,
            logging_steps,
            chunk_size,
            overlap,
            max_length,
            num_labels,
            device,
            seed,
            cache,
        } => {
            cli::train(
                train_data,
                eval_data,
                model,
                output,
                epochs,
                train_batch_size,
                eval_batch_size,
                learning_rate,
                warmup_steps,
                weight_decay,
                logging_steps,
                chunk_size,
                overlap,
                max_length,
                num_labels,
                device,
                seed,
                cache,
            )?;
        }

        Commands::Eval {
            data,
            model,
            checkpoint,
            batch_size,
            chunk_size,
            overlap,
            max_length,
            num_labels,
            device,
            cache,
        } => {
            cli::eval(
                data,
                model,
                checkpoint,
                batch_size,
                chunk_size,
                overlap,
                max_length,
                num_labels,
                device,
                cache,
            )?;
        }

        Commands::Embed {
            data,
            model,
            cache,
            chunk_size,
            overlap,
            max_length,
            device,
        } => {
            cli::embed(data, model, cache, chunk_size, overlap, max_length, device)?;
        }
    }

    Ok(())
}
