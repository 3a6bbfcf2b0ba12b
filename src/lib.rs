//! # Longfin
//!
//! Fine-tuning transformer classifiers over chunk-averaged text embeddings.
//!
//! ## Overview
//!
//! Longfin fine-tunes a sequence classifier on text that is longer than a
//! transformer encoder comfortably accepts. Instead of truncating, each record
//! is split into overlapping character windows, every window is embedded with
//! a frozen encoder, and the window embeddings are averaged into a single
//! vector that feeds the classification head:
//!
//! - CSV loading of labeled text records
//! - Overlapping character-window chunking
//! - Frozen-encoder embedding with mean pooling and persistent caching
//! - Classification-head training with AdamW, warmup, and gradient clipping
//! - Binary precision/recall/F1 evaluation with best-checkpoint selection
//!
//! ## Architecture
//!
//! The crate is organized into modular components:
//!
//! - `data` - Record loading and chunking
//! - `embedding` - Chunk embedding, averaging, and caching
//! - `training` - Classifier head, trainer loop, metrics, and reporting
//! - `cli` - Command-line interface
//! - `utils` - Common utilities

// Core modules
pub mod cli;
pub mod data;
pub mod embedding;
pub mod training;
pub mod utils;

// Re-export commonly used types
pub use anyhow::{Error, Result};
