//! Dataset that turns labeled records into averaged chunk embeddings.
//!
//! Each record's text is chunked, every chunk is embedded by a frozen
//! encoder, and the chunk embeddings are averaged into one fixed-size
//! vector. Embeddings are computed lazily on first access and memoized by
//! record index, so repeated epochs never re-run the encoder.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};

use crate::data::chunker::TextChunker;
use crate::data::RecordSet;
use crate::embedding::{average_embeddings, ChunkEmbedder, Embedding, EmbeddingCache};

/// One classifier input: an averaged record embedding plus its label
#[derive(Debug, Clone)]
pub struct ModelInput {
    /// Averaged chunk embedding, length `embedding_dim`
    pub input_embeddings: Arc<Embedding>,
    /// Class label as it appeared in the source CSV
    pub label: u32,
}

/// Lazily embedded view over a [`RecordSet`]
pub struct ChunkEmbeddingDataset {
    records: RecordSet,
    chunker: TextChunker,
    embedder: Arc<dyn ChunkEmbedder>,
    memo: RwLock<HashMap<usize, Arc<Embedding>>>,
    persistent: Option<EmbeddingCache>,
    signature: String,
}

impl ChunkEmbeddingDataset {
    pub fn new(records: RecordSet, chunker: TextChunker, embedder: Arc<dyn ChunkEmbedder>) -> Self {
        let signature = format!(
            "{}|cs{}|ov{}",
            embedder.model_name(),
            chunker.config().chunk_size,
            chunker.config().overlap
        );
        Self {
            records,
            chunker,
            embedder,
            memo: RwLock::new(HashMap::new()),
            persistent: None,
            signature,
        }
    }

    /// Attach a persistent store so embeddings survive across runs.
    pub fn with_persistent_cache(mut self, cache: EmbeddingCache) -> Self {
        self.persistent = Some(cache);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Labels in record order.
    pub fn labels(&self) -> Vec<u32> {
        self.records.labels()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedder.dimension()
    }

    /// Cache signature: embeddings are only reusable for the same model and
    /// chunking parameters.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Returns the averaged embedding and label for one record.
    ///
    /// Lookup order: in-memory memo, then the persistent cache, then a fresh
    /// chunk-embed-average pass whose result is written back to both.
    pub fn get(&self, index: usize) -> Result<ModelInput> {
        let record = self
            .records
            .get(index)
            .with_context(|| format!("Record index {} out of bounds ({})", index, self.len()))?;
        let label = record.label;

        if let Some(embedding) = self.memo.read().unwrap().get(&index) {
            return Ok(ModelInput {
                input_embeddings: Arc::clone(embedding),
                label,
            });
        }

        let embedding = match &self.persistent {
            Some(cache) => Arc::new(cache.get_or_compute(&record.text, &self.signature, |text| {
                self.compute(text)
            })?),
            None => Arc::new(self.compute(&record.text)?),
        };

        self.memo
            .write()
            .unwrap()
            .insert(index, Arc::clone(&embedding));

        Ok(ModelInput {
            input_embeddings: embedding,
            label,
        })
    }

    /// Embeds every record up front, reporting progress.
    pub fn precompute(&self) -> Result<()> {
        for index in 0..self.len() {
            self.get(index)?;
            if (index + 1) % 100 == 0 {
                tracing::info!("Embedded {}/{} records", index + 1, self.len());
            }
        }
        tracing::info!("Embedded {} records", self.len());
        Ok(())
    }

    fn compute(&self, text: &str) -> Result<Embedding> {
        let chunks = self.chunker.chunk(text);
        let chunk_refs: Vec<&str> = chunks.iter().map(|c| c.as_str()).collect();
        let chunk_embeddings = self.embedder.embed_batch(&chunk_refs)?;
        average_embeddings(&chunk_embeddings)
    }
}
