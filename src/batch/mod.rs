//! Batch execution over document sets.
//!
//! Documents are dispatched concurrently under a semaphore sized by the
//! resource monitor (always at least one permit), guarded by a
//! consecutive-failure circuit breaker, and checkpointed after every
//! completion. Resume skips documents already processed; cancellation
//! stops new dispatch while in-flight documents finish and checkpoint.

pub mod circuit;
pub mod state;

pub use circuit::CircuitBreaker;
pub use state::{Checkpoint, StateManager};

use crate::core::{Document, FailureRecord, Schema};
use crate::error::{FailureKind, Result};
use crate::pipeline::ExtractionPipeline;
use crate::resource::ResourceMonitor;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Per-kind failure counts for a batch run.
pub type FailureCounts = BTreeMap<String, usize>;

/// Summary of one batch run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BatchSummary {
    /// Documents dispatched this run.
    pub dispatched: usize,
    /// Documents skipped because a prior run already processed them.
    pub skipped_processed: usize,
    /// Successful documents this run.
    pub succeeded: usize,
    /// Failed documents this run.
    pub failed: usize,
    /// Failure counts per kind.
    pub failure_kinds: FailureCounts,
}

/// Schedules documents through the pipeline with throttling, breaker,
/// and crash-safe checkpointing.
pub struct BatchExecutor {
    pipeline: Arc<ExtractionPipeline>,
    state: Arc<StateManager>,
    resource: Arc<ResourceMonitor>,
    breaker: Arc<CircuitBreaker>,
    max_workers: usize,
    cancelled: Arc<AtomicBool>,
}

impl BatchExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        pipeline: Arc<ExtractionPipeline>,
        state: Arc<StateManager>,
        resource: Arc<ResourceMonitor>,
        breaker_threshold: u32,
        max_workers: usize,
    ) -> Self {
        Self {
            pipeline,
            state,
            resource,
            breaker: Arc::new(CircuitBreaker::new(breaker_threshold)),
            max_workers: max_workers.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The batch circuit breaker, for external reset between runs.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Requests cancellation: no new documents are dispatched, in-flight
    /// documents complete and checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        tracing::info!("batch cancellation requested");
    }

    /// Processes a batch of documents.
    ///
    /// With `resume`, documents recorded in `processed_files` are skipped
    /// up front. The worker count is sampled from the resource monitor
    /// once per call and clamped to at least one permit.
    ///
    /// # Errors
    ///
    /// Returns an error if the final checkpoint save fails; per-document
    /// failures are recorded, not propagated.
    pub async fn process_batch(
        &self,
        documents: Vec<Document>,
        schema: &Schema,
        theme: &str,
        resume: bool,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let prior = self.state.load();

        let pending: Vec<Document> = documents
            .into_iter()
            .filter(|doc| {
                let done = resume && prior.processed_files.contains(&doc.filename);
                if done {
                    summary.skipped_processed += 1;
                }
                !done
            })
            .collect();
        summary.dispatched = pending.len();

        // Semaphore-safety invariant: recommended_workers never returns 0,
        // and the extra clamp here keeps the executor deadlock-free even
        // if the monitor misbehaves.
        let workers = self.resource.recommended_workers(self.max_workers).max(1);
        tracing::info!(
            documents = pending.len(),
            workers,
            resume,
            "starting batch"
        );
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut tasks = JoinSet::new();
        for document in pending {
            let pipeline = Arc::clone(&self.pipeline);
            let state = Arc::clone(&self.state);
            let breaker = Arc::clone(&self.breaker);
            let semaphore = Arc::clone(&semaphore);
            let cancelled = Arc::clone(&self.cancelled);
            let schema = schema.clone();
            let theme = theme.to_string();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return None;
                };

                if cancelled.load(Ordering::SeqCst) {
                    return None;
                }

                if breaker.is_open() {
                    let error: crate::error::Error =
                        crate::error::PipelineError::CircuitOpen.into();
                    let failure = FailureRecord {
                        kind: FailureKind::classify(&error),
                        message: format!("not dispatched: {error}"),
                    };
                    state.update_failure(&document.filename, failure.clone());
                    let _ = state.save_async().await;
                    return Some((document.filename, Err(failure)));
                }

                let outcome = match pipeline.extract(&document, &schema, &theme).await {
                    Ok(result) => {
                        breaker.record_success();
                        state.update_result(&document.filename, result);
                        Ok(())
                    }
                    Err(error) => {
                        let failure = FailureRecord {
                            kind: FailureKind::classify(&error),
                            message: error.to_string(),
                        };
                        tracing::warn!(
                            filename = document.filename.as_str(),
                            kind = %failure.kind,
                            "document failed"
                        );
                        breaker.record_failure();
                        state.update_failure(&document.filename, failure.clone());
                        Err(failure)
                    }
                };
                let _ = state.save_async().await;
                Some((document.filename, outcome))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok(Some((_, outcome))) = joined else {
                continue;
            };
            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(failure) => {
                    summary.failed += 1;
                    *summary
                        .failure_kinds
                        .entry(failure.kind.as_str().to_string())
                        .or_insert(0) += 1;
                }
            }
        }

        self.state.save_async().await?;
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped_processed,
            "batch complete"
        );
        Ok(summary)
    }
}
