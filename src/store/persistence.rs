// Persistence - Durable storage for computed analysis results
// The engine depends only on the AnalysisStore trait; the bundled
// implementation appends JSON lines to a file keyed by kind and timestamp

use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::types::AnalysisRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable store consumed for computed analysis/prediction results.
/// Implementations must be shareable across tasks.
pub trait AnalysisStore: Send + Sync {
    fn store(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    /// Most recent records of one kind, newest first
    fn fetch_latest(&self, kind: &str, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError>;
}

/// Append-only JSON-lines file store
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Result store opened");
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }
}

impl AnalysisStore for JsonFileStore {
    fn store(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;

        debug!(kind = %record.kind, timestamp_ms = record.timestamp_ms, "Stored analysis record");
        Ok(())
    }

    fn fetch_latest(&self, kind: &str, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut matches: Vec<AnalysisRecord> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // Tolerate the odd corrupt line rather than losing the whole file
            match serde_json::from_str::<AnalysisRecord>(&line) {
                Ok(record) if record.kind == kind => matches.push(record),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Skipping unreadable record line"),
            }
        }

        matches.sort_by_key(|r| std::cmp::Reverse(r.timestamp_ms));
        matches.truncate(limit);
        Ok(matches)
    }
}
