//! Run reporting.
//!
//! Training emits one JSON object per line into `metrics.jsonl` (train steps
//! and eval rounds interleaved), and the run ends with a pretty-printed
//! `summary.json`. Both live in the run's output directory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use super::trainer::{EvalReport, TrainingMetrics};

pub struct RunReporter {
    metrics_path: PathBuf,
    summary_path: PathBuf,
}

impl RunReporter {
    /// Creates the output directory and truncates any previous run's
    /// metrics file.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = output_dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {:?}", dir))?;

        let metrics_path = dir.join("metrics.jsonl");
        File::create(&metrics_path)
            .with_context(|| format!("Failed to create metrics file: {:?}", metrics_path))?;

        Ok(Self {
            metrics_path,
            summary_path: dir.join("summary.json"),
        })
    }

    pub fn metrics_path(&self) -> &Path {
        &self.metrics_path
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// Appends a training step record.
    pub fn log_train(&self, metrics: &TrainingMetrics) -> Result<()> {
        let record = serde_json::json!({
            "kind": "train",
            "step": metrics.global_step,
            "epoch": metrics.epoch,
            "loss": metrics.train_loss,
            "learning_rate": metrics.learning_rate,
            "samples_per_second": metrics.samples_per_second,
        });
        self.append(&record.to_string())
    }

    /// Appends an evaluation record.
    pub fn log_eval(&self, epoch: usize, global_step: usize, report: &EvalReport) -> Result<()> {
        let record = serde_json::json!({
            "kind": "eval",
            "step": global_step,
            "epoch": epoch,
            "loss": report.loss,
            "accuracy": report.metrics.accuracy,
            "precision": report.metrics.precision,
            "recall": report.metrics.recall,
            "f1": report.metrics.f1,
        });
        self.append(&record.to_string())
    }

    /// Writes the final run summary as pretty-printed JSON.
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(summary)
            .context("Failed to serialize run summary")?;
        std::fs::write(&self.summary_path, json)
            .with_context(|| format!("Failed to write summary: {:?}", self.summary_path))?;
        tracing::info!("Wrote run summary to {:?}", self.summary_path);
        Ok(())
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.metrics_path)
            .with_context(|| format!("Failed to open metrics file: {:?}", self.metrics_path))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::BinaryMetrics;

    #[test]
    fn test_metrics_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = RunReporter::new(dir.path()).unwrap();

        let metrics = TrainingMetrics {
            train_loss: 0.75,
            global_step: 10,
            epoch: 1,
            samples_per_second: 42.0,
            learning_rate: 1e-6,
        };
        reporter.log_train(&metrics).unwrap();

        let report = EvalReport {
            loss: 0.5,
            metrics: BinaryMetrics::compute(&[0, 1], &[0, 1]).unwrap(),
        };
        reporter.log_eval(1, 10, &report).unwrap();

        let content = std::fs::read_to_string(reporter.metrics_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let train: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(train["kind"], "train");
        assert_eq!(train["step"], 10);
        assert!((train["loss"].as_f64().unwrap() - 0.75).abs() < 1e-12);

        let eval: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(eval["kind"], "eval");
        assert_eq!(eval["recall"].as_f64().unwrap(), 1.0);
    }

    #[test]
    fn test_new_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();

        let first = RunReporter::new(dir.path()).unwrap();
        first
            .log_train(&TrainingMetrics {
                global_step: 1,
                ..Default::default()
            })
            .unwrap();

        let second = RunReporter::new(dir.path()).unwrap();
        let content = std::fs::read_to_string(second.metrics_path()).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = RunReporter::new(dir.path()).unwrap();

        #[derive(Serialize)]
        struct Summary {
            best_recall: f64,
        }
        reporter.write_summary(&Summary { best_recall: 0.9 }).unwrap();

        let content = std::fs::read_to_string(reporter.summary_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["best_recall"].as_f64().unwrap(), 0.9);
    }
}
