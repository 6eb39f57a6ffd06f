//! The batch pipeline: validate → deduplicate → dispatch → persist →
//! summarise.
//!
//! The pipeline is generic over the operation: callers hand it the parsed
//! input rows, a natural-key function, a pre-flight validator and an async
//! dispatch closure (one domain-service call per record). Error conversion
//! happens only here (a service error becomes record status, never a
//! swallowed failure) and every outcome is persisted the moment it is
//! known, which is what makes a crashed run resumable.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fhir::Outcome;
use nphies_core::{NphiesError, NphiesResult};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::input::ParsedRecord;
use crate::store::{BatchRecord, RecordStatus, RecordStore};
use crate::{BatchError, BatchResult};

/// Tunables for one pipeline instance.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Bounded worker pool size.
    pub worker_count: usize,
    /// Service-call attempts per record per run (first try included).
    pub record_retry_limit: u32,
    /// Business-rejection codes that should be routed to manual review
    /// instead of being recorded as settled rejections. Payer-specific,
    /// supplied as configuration.
    pub review_rejection_codes: HashSet<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            record_retry_limit: 3,
            review_rejection_codes: HashSet::new(),
        }
    }
}

/// Cooperative cancellation: in-flight calls complete, nothing new starts.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one pipeline run.
///
/// Status counts are taken from the persisted store after the run, so an
/// interrupted run plus a resume converges on the same numbers as one
/// uninterrupted run. `dispatched`, `skipped_resume` and `retries` describe
/// this run's work only.
#[derive(Clone, Debug, Serialize)]
pub struct BatchRun {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_records: usize,
    pub succeeded: usize,
    pub rejected: usize,
    pub invalid: usize,
    pub review: usize,
    pub retry_exhausted: usize,
    pub pending: usize,
    pub duplicates: usize,
    pub dispatched: usize,
    pub skipped_resume: usize,
    pub retries: u32,
}

/// The run output file: summary plus every record with its final status.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run: BatchRun,
    pub records: Vec<BatchRecord>,
}

/// Drives batches of records through a domain service.
pub struct BatchPipeline {
    store: Arc<RecordStore>,
    config: PipelineConfig,
    cancel: CancelHandle,
}

impl BatchPipeline {
    pub fn new(store: RecordStore, config: PipelineConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
            cancel: CancelHandle::default(),
        }
    }

    /// Handle for requesting cooperative cancellation from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Runs one batch.
    ///
    /// Phases: every record is validated independently (invalid records are
    /// settled without an NPHIES call); records sharing a natural key are
    /// short-circuited to the first record's result; unique valid records
    /// are dispatched with bounded concurrency and their outcomes persisted
    /// immediately; finally the store is folded into a [`BatchRun`].
    ///
    /// A resumed run (same store file) skips records whose stored status is
    /// settled and reprocesses pending and retry-exhausted ones.
    pub async fn run<I, R, V, D, Fut>(
        &self,
        operation: &str,
        records: Vec<ParsedRecord<I>>,
        natural_key: impl Fn(&I) -> String,
        validate: V,
        dispatch: D,
    ) -> BatchResult<BatchRun>
    where
        I: Clone + Send + 'static,
        R: Serialize + Send + 'static,
        V: Fn(&I) -> NphiesResult<()>,
        D: Fn(I) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = NphiesResult<Outcome<R>>> + Send + 'static,
    {
        let started_at = Utc::now();
        let mut dispatched = 0usize;
        let mut skipped_resume = 0usize;
        let mut retries = 0u32;

        // Phase 1+2: validate, deduplicate, decide what a resume may skip.
        let mut seen: HashSet<String> = HashSet::new();
        let mut primaries: Vec<(String, usize, I, u32)> = Vec::new();
        let mut duplicate_rows: Vec<(String, usize)> = Vec::new();

        for record in records {
            let line = record.line;
            let input = match record.input {
                Ok(input) => input,
                Err(message) => {
                    self.persist_invalid(format!("invalid@{line}"), line, message)?;
                    continue;
                }
            };

            let key = natural_key(&input);
            if let Err(err) = validate(&input) {
                self.persist_invalid(format!("{key}@{line}"), line, err.to_string())?;
                continue;
            }

            if seen.contains(&key) {
                duplicate_rows.push((key, line));
                continue;
            }
            seen.insert(key.clone());

            match self.store.get(&key) {
                Some(existing) if existing.status.is_settled() => {
                    skipped_resume += 1;
                }
                existing => {
                    let prior_attempts = existing.map(|r| r.attempts).unwrap_or(0);
                    self.store
                        .upsert(BatchRecord::pending(key.as_str(), line, prior_attempts))?;
                    primaries.push((key, line, input, prior_attempts));
                }
            }
        }

        // Phase 3+4: dispatch with bounded concurrency; workers persist
        // their own outcome the moment it is known.
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count));
        let retry_limit = self.config.record_retry_limit.max(1);
        let review_codes = Arc::new(self.config.review_rejection_codes.clone());
        let mut workers: JoinSet<u32> = JoinSet::new();

        for (key, line, input, prior_attempts) in primaries {
            while let Some(finished) = workers.try_join_next() {
                if let Ok(attempts) = finished {
                    retries += attempts.saturating_sub(1);
                }
            }

            if self.cancel.is_cancelled() {
                tracing::info!(operation, "cancellation requested, dispatch stopped");
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if self.cancel.is_cancelled() {
                tracing::info!(operation, "cancellation requested, dispatch stopped");
                break;
            }

            dispatched += 1;
            let store = Arc::clone(&self.store);
            let review_codes = Arc::clone(&review_codes);
            let dispatch = dispatch.clone();

            workers.spawn(async move {
                let _permit = permit;
                let mut attempts = 0u32;
                let record = loop {
                    attempts += 1;
                    let total_attempts = prior_attempts + attempts;
                    match dispatch(input.clone()).await {
                        Ok(Outcome::Success(result)) => {
                            let mut record = BatchRecord::pending(key.as_str(), line, total_attempts);
                            record.status = RecordStatus::Succeeded;
                            record.result = serde_json::to_value(result).ok();
                            break record;
                        }
                        Ok(Outcome::Rejected(rejection)) => {
                            let mut record = BatchRecord::pending(key.as_str(), line, total_attempts);
                            record.status = if review_codes.contains(&rejection.code) {
                                RecordStatus::FailedReview
                            } else {
                                RecordStatus::Rejected
                            };
                            record.error = Some(rejection.code.clone());
                            record.result = serde_json::to_value(&rejection).ok();
                            break record;
                        }
                        Err(err) if err.is_retryable() && attempts < retry_limit => {
                            tracing::warn!(
                                key = %key,
                                attempt = attempts,
                                error = %err,
                                "transient failure, retrying record"
                            );
                        }
                        Err(err) => {
                            let mut record = BatchRecord::pending(key.as_str(), line, total_attempts);
                            record.status = match &err {
                                NphiesError::Transport { .. } => {
                                    RecordStatus::FailedRetryExhausted
                                }
                                NphiesError::Validation(_)
                                | NphiesError::InvalidState { .. } => RecordStatus::FailedInvalid,
                                _ => RecordStatus::FailedReview,
                            };
                            record.error = Some(err.to_string());
                            break record;
                        }
                    }
                };

                if let Err(e) = store.upsert(record) {
                    tracing::error!(key = %key, error = %e, "failed to persist record outcome");
                }
                attempts
            });
        }

        while let Some(finished) = workers.join_next().await {
            match finished {
                Ok(attempts) => retries += attempts.saturating_sub(1),
                Err(e) => tracing::error!(error = %e, "batch worker panicked"),
            }
        }

        // Duplicates reference the primary record's (possibly resumed)
        // result.
        for (key, line) in duplicate_rows {
            let mut record = BatchRecord::pending(format!("{key}@{line}"), line, 0);
            record.duplicate_of = Some(key.clone());
            if let Some(primary) = self.store.get(&key) {
                record.status = primary.status;
                record.result = primary.result.clone();
                record.error = primary.error.clone();
            }
            self.store.upsert(record)?;
        }

        // Phase 5: fold the store into the run summary.
        let mut run = BatchRun {
            operation: operation.to_owned(),
            started_at,
            completed_at: Utc::now(),
            total_records: 0,
            succeeded: 0,
            rejected: 0,
            invalid: 0,
            review: 0,
            retry_exhausted: 0,
            pending: 0,
            duplicates: 0,
            dispatched,
            skipped_resume,
            retries,
        };
        for record in self.store.records() {
            run.total_records += 1;
            if record.duplicate_of.is_some() {
                run.duplicates += 1;
            }
            match record.status {
                RecordStatus::Pending => run.pending += 1,
                RecordStatus::Succeeded => run.succeeded += 1,
                RecordStatus::Rejected => run.rejected += 1,
                RecordStatus::FailedInvalid => run.invalid += 1,
                RecordStatus::FailedReview => run.review += 1,
                RecordStatus::FailedRetryExhausted => run.retry_exhausted += 1,
            }
        }

        tracing::info!(
            operation,
            total = run.total_records,
            succeeded = run.succeeded,
            rejected = run.rejected,
            invalid = run.invalid,
            review = run.review,
            retry_exhausted = run.retry_exhausted,
            dispatched = run.dispatched,
            skipped_resume = run.skipped_resume,
            "batch run complete"
        );
        Ok(run)
    }

    /// Writes the run report (summary + all records) as pretty JSON.
    pub fn write_report(&self, path: &Path, run: &BatchRun) -> BatchResult<()> {
        let report = RunReport {
            run: run.clone(),
            records: self.store.records(),
        };
        let text = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, text).map_err(|source| BatchError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn persist_invalid(&self, key: String, line: usize, message: String) -> BatchResult<()> {
        let mut record = BatchRecord::pending(key, line, 0);
        record.status = RecordStatus::FailedInvalid;
        record.error = Some(message);
        self.store.upsert(record)
    }
}
