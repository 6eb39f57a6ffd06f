//! # NPHIES Batch
//!
//! High-volume batch processing on top of `nphies-core`: bulk input
//! extraction (CSV and JSON), per-record validation, natural-key
//! deduplication, a bounded worker pool driving the per-record service
//! calls, and a persisted, resumable record store.
//!
//! The pipeline is the only component that converts errors into record
//! status; nothing is swallowed without being recorded, and a run always
//! completes with a summary even when every record fails.

pub mod input;
pub mod pipeline;
pub mod store;

pub use input::{read_claims, read_eligibility, ParsedRecord};
pub use pipeline::{BatchPipeline, BatchRun, CancelHandle, PipelineConfig, RunReport};
pub use store::{BatchRecord, RecordStatus, RecordStore};

use std::path::PathBuf;

/// Errors raised by batch input parsing and the record store.
///
/// Per-record problems (a malformed row, a failed service call) never
/// surface here; they become record status. These errors are about the
/// run itself: unreadable files, unsupported formats, store I/O.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("failed to read {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CSV input: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{path} is missing required column {column:?}", path = path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("unsupported input format for {path} (expected .csv or .json)", path = path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("failed to write record store: {0}")]
    StoreWrite(std::io::Error),
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;
