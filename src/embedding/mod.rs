//! Chunk embedding: the seam between text windows and fixed-size vectors.
//!
//! The trainable pipeline never touches the encoder directly; it goes
//! through [`ChunkEmbedder`], which the dataset receives as an explicit
//! constructor argument. Tests substitute [`MockEmbedder`].

use anyhow::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub mod cache;
pub mod encoder;

pub use cache::EmbeddingCache;
pub use encoder::EncoderEmbedder;

/// An embedding vector.
pub type Embedding = Vec<f32>;

/// Maps chunk texts to fixed-size vectors with frozen weights.
///
/// Implementations must be deterministic for a fixed model: the dataset
/// memoizes per-record results and the persistent cache reuses them across
/// runs.
pub trait ChunkEmbedder: Send + Sync {
    /// Embed a single chunk.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of chunks (one record's windows, typically).
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Identifier of the backing model, used in cache signatures.
    fn model_name(&self) -> &str;
}

/// Element-wise mean of per-chunk embeddings: one vector per record.
pub fn average_embeddings(embeddings: &[Embedding]) -> Result<Embedding> {
    if embeddings.is_empty() {
        anyhow::bail!("Cannot average zero embeddings");
    }

    let dim = embeddings[0].len();
    let count = embeddings.len() as f32;
    let mut result = vec![0.0; dim];

    for embedding in embeddings {
        if embedding.len() != dim {
            anyhow::bail!(
                "Embedding dimension mismatch: {} vs {}",
                embedding.len(),
                dim
            );
        }
        for (acc, &val) in result.iter_mut().zip(embedding.iter()) {
            *acc += val / count;
        }
    }

    Ok(result)
}

/// Deterministic embedder for tests (hash-seeded pseudo-random vectors).
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create a mock embedder producing vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn generate(&self, text: &str) -> Embedding {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // Linear congruential step
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            let value = ((state / 65536) % 10000) as f32 / 10000.0 - 0.5;
            embedding.push(value);
        }
        embedding
    }
}

impl ChunkEmbedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.generate(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|&text| self.generate(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
