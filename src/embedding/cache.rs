//! Persistent embedding cache.
//!
//! SQLite-backed store keyed by text hash plus a signature string that folds
//! in the model id and chunking parameters, so embeddings computed under one
//! configuration are never reused under another.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::Embedding;

/// Embedding cache backed by SQLite
pub struct EmbeddingCache {
    conn: Connection,
}

impl EmbeddingCache {
    /// Opens (or creates) a cache database at the given path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        crate::utils::ensure_parent_dir(db_path)?;
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open cache database: {:?}", db_path))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS embeddings (
                id INTEGER PRIMARY KEY,
                text_hash TEXT NOT NULL,
                signature TEXT NOT NULL,
                embedding BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(text_hash, signature)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_text_hash_signature
             ON embeddings(text_hash, signature)",
            [],
        )?;

        Ok(Self { conn })
    }

    fn hash_text(text: &str) -> String {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|&f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Result<Embedding> {
        if bytes.len() % 4 != 0 {
            anyhow::bail!("Invalid embedding bytes length: {}", bytes.len());
        }

        let mut embedding = Vec::with_capacity(bytes.len() / 4);
        for chunk in bytes.chunks_exact(4) {
            let bytes: [u8; 4] = chunk.try_into()?;
            embedding.push(f32::from_le_bytes(bytes));
        }

        Ok(embedding)
    }

    /// Looks up the embedding stored for this text under this signature.
    pub fn get(&self, text: &str, signature: &str) -> Result<Option<Embedding>> {
        let text_hash = Self::hash_text(text);

        let mut stmt = self.conn.prepare(
            "SELECT embedding FROM embeddings
             WHERE text_hash = ?1 AND signature = ?2",
        )?;

        let result = stmt.query_row(params![text_hash, signature], |row| {
            let bytes: Vec<u8> = row.get(0)?;
            Ok(bytes)
        });

        match result {
            Ok(bytes) => Ok(Some(Self::deserialize_embedding(&bytes)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores an embedding, replacing any previous entry for the same key.
    pub fn put(&self, text: &str, signature: &str, embedding: &[f32]) -> Result<()> {
        let text_hash = Self::hash_text(text);
        let embedding_bytes = Self::serialize_embedding(embedding);
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs() as i64;

        self.conn.execute(
            "INSERT OR REPLACE INTO embeddings
             (text_hash, signature, embedding, dimension, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                text_hash,
                signature,
                embedding_bytes,
                embedding.len() as i64,
                created_at
            ],
        )?;

        Ok(())
    }

    /// Returns the cached embedding or computes and stores it.
    pub fn get_or_compute<F>(&self, text: &str, signature: &str, compute_fn: F) -> Result<Embedding>
    where
        F: FnOnce(&str) -> Result<Embedding>,
    {
        if let Some(embedding) = self.get(text, signature)? {
            return Ok(embedding);
        }

        let embedding = compute_fn(text)?;
        self.put(text, signature, &embedding)?;
        Ok(embedding)
    }

    /// Number of entries stored under this signature.
    pub fn entries(&self, signature: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE signature = ?1",
            params![signature],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Removes every entry stored under this signature.
    pub fn clear(&self, signature: &str) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM embeddings WHERE signature = ?1",
            params![signature],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cache_put_get() {
        let temp_file = NamedTempFile::new().unwrap();
        let cache = EmbeddingCache::open(temp_file.path()).unwrap();

        let text = "Hello, world!";
        let embedding = vec![1.0, 2.0, 3.0];

        assert!(cache.get(text, "sig-a").unwrap().is_none());

        cache.put(text, "sig-a", &embedding).unwrap();
        let retrieved = cache.get(text, "sig-a").unwrap().unwrap();
        assert_eq!(retrieved, embedding);
    }

    #[test]
    fn test_cache_isolates_signatures() {
        let temp_file = NamedTempFile::new().unwrap();
        let cache = EmbeddingCache::open(temp_file.path()).unwrap();

        cache.put("same text", "model-a|cs256|ov64", &[1.0]).unwrap();

        assert!(cache.get("same text", "model-b|cs256|ov64").unwrap().is_none());
        assert!(cache.get("same text", "model-a|cs128|ov64").unwrap().is_none());
        assert!(cache.get("same text", "model-a|cs256|ov64").unwrap().is_some());
    }

    #[test]
    fn test_cache_get_or_compute() {
        let temp_file = NamedTempFile::new().unwrap();
        let cache = EmbeddingCache::open(temp_file.path()).unwrap();

        let mut computed = 0;
        let first = cache
            .get_or_compute("text", "sig", |_| {
                computed += 1;
                Ok(vec![4.0, 5.0])
            })
            .unwrap();
        let second = cache
            .get_or_compute("text", "sig", |_| {
                computed += 1;
                Ok(vec![4.0, 5.0])
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(computed, 1);
    }

    #[test]
    fn test_cache_entries_and_clear() {
        let temp_file = NamedTempFile::new().unwrap();
        let cache = EmbeddingCache::open(temp_file.path()).unwrap();

        cache.put("text1", "sig", &[1.0, 2.0]).unwrap();
        cache.put("text2", "sig", &[3.0, 4.0]).unwrap();
        cache.put("text1", "other", &[5.0]).unwrap();

        assert_eq!(cache.entries("sig").unwrap(), 2);
        assert_eq!(cache.clear("sig").unwrap(), 2);
        assert_eq!(cache.entries("sig").unwrap(), 0);
        assert_eq!(cache.entries("other").unwrap(), 1);
    }
}
