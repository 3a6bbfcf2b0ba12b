//! Labeled text records and CSV ingestion.
//!
//! Records are read once into memory and addressed by row position; the
//! training pipeline never mutates them.

pub mod chunker;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A single labeled post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Raw post text.
    pub text: String,
    /// Class id. Not range-checked at load time; an out-of-range label
    /// surfaces later as a gather error from the loss.
    pub label: u32,
}

/// In-memory collection of records, indexed by row position.
#[derive(Debug)]
pub struct RecordSet {
    records: Vec<Record>,
}

impl RecordSet {
    /// Create a record set from records already in memory.
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load records from a CSV file with `text` and `label` columns.
    ///
    /// Columns are resolved by header name, so column order does not matter
    /// and extra columns are ignored.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open CSV file: {:?}", path))?;

        let headers = reader.headers()?.clone();
        let text_idx = headers
            .iter()
            .position(|h| h == "text")
            .ok_or_else(|| anyhow::anyhow!("CSV must have a 'text' column"))?;
        let label_idx = headers
            .iter()
            .position(|h| h == "label")
            .ok_or_else(|| anyhow::anyhow!("CSV must have a 'label' column"))?;

        let mut records = Vec::new();
        for (row_num, result) in reader.records().enumerate() {
            let row =
                result.with_context(|| format!("Failed to read CSV row {}", row_num + 1))?;

            let text = row
                .get(text_idx)
                .ok_or_else(|| anyhow::anyhow!("Missing text at row {}", row_num + 1))?
                .to_string();

            let label = row
                .get(label_idx)
                .ok_or_else(|| anyhow::anyhow!("Missing label at row {}", row_num + 1))?
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Failed to parse label at row {}", row_num + 1))?;

            records.push(Record { text, label });
        }

        tracing::info!("Loaded {} records from {:?}", records.len(), path);

        Ok(Self { records })
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get a record by row position.
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    /// Iterate over records in row order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// All labels in row order.
    pub fn labels(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.label).collect()
    }

    /// Corpus statistics for startup logging.
    pub fn stats(&self) -> RecordSetStats {
        let num_records = self.records.len();
        let mut label_counts = BTreeMap::new();
        let mut total_chars = 0usize;
        let mut max_text_chars = 0usize;

        for record in &self.records {
            *label_counts.entry(record.label).or_insert(0) += 1;
            let chars = record.text.chars().count();
            total_chars += chars;
            max_text_chars = max_text_chars.max(chars);
        }

        let avg_text_chars = if num_records > 0 {
            total_chars as f64 / num_records as f64
        } else {
            0.0
        };

        RecordSetStats {
            num_records,
            label_counts,
            avg_text_chars,
            max_text_chars,
        }
    }
}

/// Dataset statistics.
#[derive(Debug, Clone)]
pub struct RecordSetStats {
    /// Total number of records.
    pub num_records: usize,
    /// Records per label value.
    pub label_counts: BTreeMap<u32, usize>,
    /// Average text length in characters.
    pub avg_text_chars: f64,
    /// Longest text in characters.
    pub max_text_chars: usize,
}

impl std::fmt::Display for RecordSetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<String> = self
            .label_counts
            .iter()
            .map(|(label, count)| format!("{}:{}", label, count))
            .collect();
        write!(
            f,
            "{} records, labels [{}], {:.0} avg chars, {} max chars",
            self.num_records,
            labels.join(" "),
            self.avg_text_chars,
            self.max_text_chars
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "text,label").unwrap();
        writeln!(file, "a perfectly normal post,0").unwrap();
        writeln!(file, "\"a longer post, with a comma\",1").unwrap();

        let records = RecordSet::from_csv(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.get(0).unwrap().text, "a perfectly normal post");
        assert_eq!(records.get(0).unwrap().label, 0);
        assert_eq!(records.get(1).unwrap().text, "a longer post, with a comma");
        assert_eq!(records.get(1).unwrap().label, 1);
    }

    #[test]
    fn test_load_csv_column_order_independent() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "label,extra,text").unwrap();
        writeln!(file, "1,ignored,hello").unwrap();

        let records = RecordSet::from_csv(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records.get(0).unwrap().text, "hello");
        assert_eq!(records.get(0).unwrap().label, 1);
    }

    #[test]
    fn test_load_csv_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "text,sentiment").unwrap();
        writeln!(file, "hello,1").unwrap();

        let err = RecordSet::from_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn test_load_csv_bad_label_names_row() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "text,label").unwrap();
        writeln!(file, "fine,0").unwrap();
        writeln!(file, "broken,not-a-number").unwrap();

        let err = RecordSet::from_csv(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("row 2"));
    }

    #[test]
    fn test_stats() {
        let records = RecordSet::new(vec![
            Record {
                text: "abcd".to_string(),
                label: 0,
            },
            Record {
                text: "ab".to_string(),
                label: 1,
            },
            Record {
                text: "abcdef".to_string(),
                label: 1,
            },
        ]);

        let stats = records.stats();
        assert_eq!(stats.num_records, 3);
        assert_eq!(stats.label_counts[&0], 1);
        assert_eq!(stats.label_counts[&1], 2);
        assert!((stats.avg_text_chars - 4.0).abs() < 1e-9);
        assert_eq!(stats.max_text_chars, 6);
    }
}
