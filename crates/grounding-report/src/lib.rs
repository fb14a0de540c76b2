//! grounding-report – append-only JSONL result sink plus the second-pass
//! accuracy roll-up.
//!
//! The sink is the only shared mutable resource in a run. Each append
//! serializes one record to a single line and writes it under the lock, so
//! lines never interleave no matter how many workers share the handle. Line
//! order is completion order; no cross-worker ordering is promised.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use grounding_dataset::ResultRecord;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("result file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize result row: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sink lock poisoned")]
    Poisoned,
}

/// Clone-able handle onto the shared result file.
#[derive(Clone)]
pub struct ResultSink {
    file: Arc<Mutex<File>>,
}

impl ResultSink {
    /// Create the sink, truncating any previous contents. Parent directories
    /// are created as needed.
    pub fn create(path: &Path) -> Result<Self, ReportError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ReportError::Open {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        let file = File::create(path).map_err(|source| ReportError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Append one record as a single JSON line.
    ///
    /// Serialization happens outside the critical section; the lock covers
    /// only the one write of line plus newline.
    pub fn append(&self, record: &ResultRecord) -> Result<(), ReportError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().map_err(|_| ReportError::Poisoned)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Accuracy counters for one dataset source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    pub total: u64,
    pub correct: u64,
}

impl SourceStats {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Per-source and overall accuracy over one sink file.
///
/// Only rows present in the file count; cases that errored out before a row
/// was written shrink the denominator rather than count as incorrect.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub per_source: BTreeMap<String, SourceStats>,
    pub overall: SourceStats,
}

impl Summary {
    /// Render the console report: per-source lines in sorted source order,
    /// then the overall block.
    pub fn render(&self) -> String {
        let rule = "-".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        for (source, stats) in &self.per_source {
            if stats.total == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "Dataset: {:<30} - Accuracy: {:.4} ({}/{})",
                source,
                stats.accuracy(),
                stats.correct,
                stats.total
            );
        }
        if self.overall.total > 0 {
            let _ = writeln!(out, "{rule}");
            let _ = writeln!(out, "Total Samples: {}", self.overall.total);
            let _ = writeln!(out, "Total Correct: {}", self.overall.correct);
            let _ = writeln!(out, "Overall Accuracy: {:.4}", self.overall.accuracy());
        } else {
            let _ = writeln!(out, "No valid results found in output file.");
        }
        out
    }
}

/// One complete read pass over a JSONL result file, from this run or a
/// previous one. Lines that fail to parse as JSON are skipped silently.
pub fn aggregate(path: &Path) -> Result<Summary, ReportError> {
    let file = File::open(path).map_err(|source| ReportError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut summary = Summary::default();
    for line in reader.lines() {
        let line = line?;
        let row: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(_) => continue,
        };
        let source = row
            .get("dataset_source")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let correct = row.get("correctness").and_then(Value::as_str) == Some("correct");

        let stats = summary.per_source.entry(source.to_string()).or_default();
        stats.total += 1;
        summary.overall.total += 1;
        if correct {
            stats.correct += 1;
            summary.overall.correct += 1;
        }
    }
    Ok(summary)
}
