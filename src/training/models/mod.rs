//! Encoder, tokenizer and classification head.

pub mod classifier;
pub mod distilbert;
pub mod tokenizer;

pub use classifier::SequenceClassifier;
pub use distilbert::{DistilBertConfig, DistilBertModel};
pub use tokenizer::{TokenizerWrapper, DEFAULT_MAX_LENGTH};
