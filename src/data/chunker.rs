//! Overlapping character-window chunking.
//!
//! Long posts exceed the encoder's context window, so each text is split
//! into windows of `chunk_size` characters that share `overlap` characters
//! with their neighbor. Windows are produced left to right until the end of
//! the text is covered; the final window may be shorter.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Window-size configuration for chunking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            overlap: 64,
        }
    }
}

impl ChunkConfig {
    /// Characters the window start advances between consecutive chunks.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Reject configurations whose stride would be zero or negative.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be positive");
        }
        if self.overlap >= self.chunk_size {
            bail!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap,
                self.chunk_size
            );
        }
        Ok(())
    }
}

/// Splits text into overlapping character windows.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkConfig,
}

impl TextChunker {
    /// Create a chunker, rejecting configs with a non-positive stride.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Split `text` into windows of at most `chunk_size` characters whose
    /// start positions advance by `chunk_size - overlap`.
    ///
    /// Boundaries are measured in characters, not bytes, so multi-byte text
    /// never splits inside a code point. Empty text yields a single empty
    /// chunk so downstream averaging always has one element.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return vec![String::new()];
        }

        let step = self.config.stride();
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.config.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}
