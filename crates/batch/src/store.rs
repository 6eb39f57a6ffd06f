//! Persisted, resumable record store.
//!
//! One JSON line is appended per record outcome, immediately on completion,
//! so a crashed run loses at most the record that was mid-write. On open
//! the file is replayed last-write-wins into an in-memory index keyed by
//! the record's natural key; a resumed run skips keys whose stored status
//! is settled and reprocesses the rest. Records are never deleted; the
//! append-only file doubles as the audit trail.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BatchError, BatchResult};

/// Final (or pending) status of one batch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Accepted for dispatch; a crash leaves records here for resume.
    Pending,
    /// Service call succeeded; the parsed result is stored on the record.
    Succeeded,
    /// Clearinghouse business rejection, a correct negative outcome.
    Rejected,
    /// Failed pre-flight validation; no NPHIES call was consumed.
    FailedInvalid,
    /// Protocol or deterministic HTTP failure; flagged for manual review.
    FailedReview,
    /// Transient failures exhausted the per-record retry limit.
    FailedRetryExhausted,
}

impl RecordStatus {
    /// Whether a resumed run should skip this record.
    ///
    /// Retry-exhausted records are *not* settled: the failures were
    /// transient, so a resume gives them fresh attempts.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending | Self::FailedRetryExhausted)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Rejected => "rejected",
            Self::FailedInvalid => "failed_invalid",
            Self::FailedReview => "failed_review",
            Self::FailedRetryExhausted => "failed_retry_exhausted",
        };
        write!(f, "{name}")
    }
}

/// One input row's processing state and final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Natural key (member+payer+date for eligibility, claim external id
    /// for claims); duplicates and invalid rows get line-suffixed keys.
    pub key: String,
    /// Source line (CSV) or array index (JSON) of the input row.
    pub line: usize,
    pub status: RecordStatus,
    /// Service-call attempts consumed so far, cumulative across resumes.
    pub attempts: u32,
    /// Set on duplicate records: the key of the record holding the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    /// Parsed domain result for successes, structured rejection for
    /// business rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRecord {
    pub fn pending(key: impl Into<String>, line: usize, attempts: u32) -> Self {
        Self {
            key: key.into(),
            line,
            status: RecordStatus::Pending,
            attempts,
            duplicate_of: None,
            result: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

struct Inner {
    file: std::fs::File,
    index: HashMap<String, BatchRecord>,
}

/// Append-only JSONL store with an in-memory last-write-wins index.
pub struct RecordStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl RecordStore {
    /// Opens (or creates) a store file and replays its records.
    ///
    /// A corrupt line (typically the tail of a crashed write) is skipped
    /// with a warning rather than failing the whole run.
    pub fn open(path: &Path) -> BatchResult<Self> {
        let existing = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(BatchError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut index = HashMap::new();
        for (number, line) in existing.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BatchRecord>(line) {
                Ok(record) => {
                    index.insert(record.key.clone(), record);
                }
                Err(e) => {
                    tracing::warn!(
                        store = %path.display(),
                        line = number + 1,
                        error = %e,
                        "skipping corrupt store line"
                    );
                }
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| BatchError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, index }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the record to the file and updates the index.
    pub fn upsert(&self, record: BatchRecord) -> BatchResult<()> {
        let mut inner = self.lock();
        let line = serde_json::to_string(&record)?;
        inner
            .file
            .write_all(line.as_bytes())
            .and_then(|_| inner.file.write_all(b"\n"))
            .and_then(|_| inner.file.flush())
            .map_err(BatchError::StoreWrite)?;
        inner.index.insert(record.key.clone(), record);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<BatchRecord> {
        self.lock().index.get(key).cloned()
    }

    /// All records, ordered by source line.
    pub fn records(&self) -> Vec<BatchRecord> {
        let inner = self.lock();
        let mut records: Vec<BatchRecord> = inner.index.values().cloned().collect();
        records.sort_by_key(|r| (r.line, r.key.clone()));
        records
    }

    /// Number of records per settled/unsettled split, for resume reporting.
    pub fn settled_count(&self) -> usize {
        self.lock()
            .index
            .values()
            .filter(|r| r.status.is_settled())
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
