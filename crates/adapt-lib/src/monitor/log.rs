//! Append-only prediction log
//!
//! The inference service appends one record per served prediction. The
//! controller only ever reads forward from a persisted cursor, plus a tail
//! of ground-truth values for drift detection.

use crate::models::PredictionRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// Records read from the log starting at some offset
#[derive(Debug, Clone, Default)]
pub struct LogBatch {
    /// Offset the read started at
    pub start: u64,
    /// Offset just past the last entry consumed (including skipped entries)
    pub next_offset: u64,
    pub records: Vec<PredictionRecord>,
}

impl LogBatch {
    /// Number of log entries consumed by this read
    pub fn consumed(&self) -> u64 {
        self.next_offset.saturating_sub(self.start)
    }
}

/// Trait for prediction log implementations
#[async_trait]
pub trait PredictionLog: Send + Sync {
    /// Append a record at the end of the log
    async fn append(&self, record: PredictionRecord) -> Result<()>;

    /// Read every entry at or after `offset`
    async fn read_from(&self, offset: u64) -> Result<LogBatch>;

    /// Number of entries in the log
    async fn len(&self) -> Result<u64>;

    /// The most recent `count` ground-truth values, oldest first
    async fn tail_truth(&self, count: usize) -> Result<Vec<f64>>;
}

/// JSON-lines log file, one record per line
pub struct JsonlPredictionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlPredictionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Newline-terminated, non-blank lines; a trailing partial line is left
    /// for the writer to finish
    async fn read_lines(&self) -> Result<Vec<String>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read prediction log {:?}", self.path))
            }
        };

        let complete = match content.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => &content[..last_newline],
            None => return Ok(Vec::new()),
        };
        Ok(String::from_utf8_lossy(complete)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }
}

#[async_trait]
impl PredictionLog for JsonlPredictionLog {
    async fn append(&self, record: PredictionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let mut line = serde_json::to_vec(&record).context("Failed to serialize record")?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open prediction log {:?}", self.path))?;
        file.write_all(&line)
            .await
            .context("Failed to append prediction record")?;
        Ok(())
    }

    async fn read_from(&self, offset: u64) -> Result<LogBatch> {
        let lines = self.read_lines().await?;
        let total = lines.len() as u64;
        let start = offset.min(total);

        let mut records = Vec::new();
        for (index, line) in lines.iter().enumerate().skip(start as usize) {
            match serde_json::from_str::<PredictionRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = index, error = %e, "Skipping malformed prediction record"),
            }
        }

        Ok(LogBatch {
            start: offset,
            next_offset: total,
            records,
        })
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.read_lines().await?.len() as u64)
    }

    async fn tail_truth(&self, count: usize) -> Result<Vec<f64>> {
        let lines = self.read_lines().await?;
        let skip = lines.len().saturating_sub(count);
        Ok(lines
            .iter()
            .skip(skip)
            .filter_map(|line| serde_json::from_str::<PredictionRecord>(line).ok())
            .map(|record| record.true_value)
            .collect())
    }
}

/// In-memory log used by tests and the synthetic service
#[derive(Default)]
pub struct MemoryPredictionLog {
    records: RwLock<Vec<PredictionRecord>>,
}

impl MemoryPredictionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn extend(&self, records: impl IntoIterator<Item = PredictionRecord>) {
        self.records.write().await.extend(records);
    }
}

#[async_trait]
impl PredictionLog for MemoryPredictionLog {
    async fn append(&self, record: PredictionRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn read_from(&self, offset: u64) -> Result<LogBatch> {
        let records = self.records.read().await;
        let total = records.len() as u64;
        let start = offset.min(total) as usize;
        Ok(LogBatch {
            start: offset,
            next_offset: total,
            records: records[start..].to_vec(),
        })
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn tail_truth(&self, count: usize) -> Result<Vec<f64>> {
        let records = self.records.read().await;
        let skip = records.len().saturating_sub(count);
        Ok(records[skip..].iter().map(|r| r.true_value).collect())
    }
}
