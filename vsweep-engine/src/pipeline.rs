//! The per-bucket cleanup pipeline.
//!
//! Five stages, linked by bounded channels:
//!
//! ```text
//! enumerator ──> annotator ──> processor ──┬──> extender
//!                                          └──> deleter
//! ```
//!
//! Each upstream stage closes its output by dropping the sender, which
//! drives the downstream stage to drain and exit. The first stage to fail
//! cancels the shared token; the remaining stages observe it at their next
//! channel operation and unwind.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vsweep_core::CleanupStats;

use crate::annotate::Annotator;
use crate::client::BucketClient;
use crate::delete::BatchDeleter;
use crate::error::{EngineError, EngineResult};
use crate::extend::RetentionExtender;
use crate::limits::CHANNEL_CAPACITY;
use crate::list;
use crate::process::{DecisionRules, Processor};
use crate::state::RetentionState;

/// Configuration for one bucket run.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Log and count without touching the provider or the cache.
    pub dry_run: bool,
    /// Wall-clock reference for every decision in the run.
    pub now: DateTime<Utc>,
    /// Age a version must reach before it becomes a deletion candidate.
    pub min_deletion_age: TimeDelta,
    /// Duration by which retention is extended when the extender fires.
    pub min_retention: TimeDelta,
    /// Remaining-retention duration below which the extender refreshes a
    /// lock. Must not exceed `min_retention`.
    pub min_retention_threshold: TimeDelta,
}

impl CleanupConfig {
    /// Creates a configuration anchored at `now`.
    #[must_use]
    pub const fn new(
        now: DateTime<Utc>,
        min_deletion_age: TimeDelta,
        min_retention: TimeDelta,
        min_retention_threshold: TimeDelta,
    ) -> Self {
        Self {
            dry_run: true,
            now,
            min_deletion_age,
            min_retention,
            min_retention_threshold,
        }
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Runs the full cleanup pipeline over one bucket.
///
/// Returns once every stage has drained. Per-item failures are logged and
/// counted in `stats`; only enumeration failures and cancellation fail the
/// run as a whole.
///
/// # Errors
///
/// Returns the first stage error, with [`EngineError::Cancelled`] reported
/// only when no stage failed for a more specific reason.
pub async fn run_cleanup(
    client: Arc<dyn BucketClient>,
    state: Arc<dyn RetentionState>,
    stats: Arc<CleanupStats>,
    config: CleanupConfig,
) -> EngineResult<()> {
    let cancel = CancellationToken::new();

    let (annotate_tx, annotate_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (process_tx, process_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (extend_tx, extend_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (delete_tx, delete_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut stages: JoinSet<EngineResult<()>> = JoinSet::new();

    {
        let client = Arc::clone(&client);
        let cancel = cancel.clone();

        stages.spawn(async move {
            list::list_object_versions(client.as_ref(), &annotate_tx, &cancel).await
        });
    }

    {
        let annotator = Annotator::new(
            Arc::clone(&stats),
            Arc::clone(&state),
            Arc::clone(&client),
        );

        stages.spawn(annotator.run(annotate_rx, process_tx, cancel.clone()));
    }

    {
        let processor = Processor::new(
            Arc::clone(&stats),
            DecisionRules::new(config.now, config.min_deletion_age, config.min_retention),
        );

        stages.spawn(processor.run(process_rx, extend_tx, delete_tx, cancel.clone()));
    }

    {
        let extender = RetentionExtender::new(
            Arc::clone(&stats),
            Arc::clone(&state),
            Arc::clone(&client),
            config.now,
            config.min_retention_threshold,
            config.dry_run,
        );

        stages.spawn(extender.run(extend_rx, cancel.clone()));
    }

    {
        let deleter = BatchDeleter::new(Arc::clone(&stats), Arc::clone(&client), config.dry_run);

        stages.spawn(deleter.run(delete_rx, cancel.clone()));
    }

    let mut first_error: Option<EngineError> = None;

    while let Some(joined) = stages.join_next().await {
        let failure = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(err) => EngineError::Stage {
                message: err.to_string(),
            },
        };

        cancel.cancel();
        record_first(&mut first_error, failure);
    }

    first_error.map_or(Ok(()), Err)
}

/// Keeps the most informative error: the first failure wins, except that a
/// bare cancellation is replaced by whichever error caused it.
fn record_first(first: &mut Option<EngineError>, err: EngineError) {
    match first {
        None => *first = Some(err),
        Some(EngineError::Cancelled) if !matches!(err, EngineError::Cancelled) => {
            *first = Some(err);
        }
        Some(_) => {}
    }
}
