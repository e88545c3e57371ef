//! Retention extension.
//!
//! Commits the retention targets chosen by the processor: when a version's
//! lock is missing, or the requested target leaves less than the configured
//! threshold of remaining time, the provider's retention is updated and the
//! new value written through to the cache.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vsweep_core::{CleanupStats, ObjectVersion};

use crate::channel::SharedReceiver;
use crate::client::BucketClient;
use crate::error::{ClientError, EngineError, EngineResult, StateError};
use crate::limits::EXTENDER_WORKERS;
use crate::state::RetentionState;

/// A retention target chosen by the processor for one version.
///
/// `until` is always a concrete timestamp; requests without a target are
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RetentionRequest {
    /// The version whose retention should reach at least `until`.
    pub object: ObjectVersion,
    /// The requested retention expiry.
    pub until: DateTime<Utc>,
}

#[derive(Debug, Error)]
enum ExtendError {
    #[error("setting object retention via provider: {0}")]
    Provider(ClientError),

    #[error("setting object retention in cache: {0}")]
    Cache(StateError),
}

/// The retention extender stage: a pool of workers sharing one queue.
#[derive(Clone)]
pub(crate) struct RetentionExtender {
    stats: Arc<CleanupStats>,
    state: Arc<dyn RetentionState>,
    client: Arc<dyn BucketClient>,
    now: DateTime<Utc>,
    min_remaining: TimeDelta,
    dry_run: bool,
}

impl RetentionExtender {
    pub(crate) fn new(
        stats: Arc<CleanupStats>,
        state: Arc<dyn RetentionState>,
        client: Arc<dyn BucketClient>,
        now: DateTime<Utc>,
        min_remaining: TimeDelta,
        dry_run: bool,
    ) -> Self {
        Self {
            stats,
            state,
            client,
            now,
            min_remaining: min_remaining.max(TimeDelta::zero()),
            dry_run,
        }
    }

    /// Handles one request.
    ///
    /// The extension is committed when the version has no current lock, or
    /// when the requested target leaves less than `min_remaining` of slack;
    /// otherwise the existing retention is acceptable and nothing happens.
    async fn extend(&self, req: &RetentionRequest) -> Result<(), ExtendError> {
        if req.object.delete_marker {
            // Delete markers don't support retention periods.
            return Ok(());
        }

        let remaining = TimeDelta::seconds((req.until - self.now).num_seconds());

        if req.object.retain_until.is_some() && remaining >= self.min_remaining {
            return Ok(());
        }

        info!(
            key = %req.object.key,
            version = %req.object.version_id,
            remaining_secs = remaining.num_seconds(),
            until = %req.until,
            dry_run = self.dry_run,
            "Extending object retention"
        );

        self.stats.add_retention(&req.object);

        if self.dry_run {
            return Ok(());
        }

        match self
            .client
            .put_object_retention(&req.object.key, &req.object.version_id, req.until)
            .await
        {
            // A vanished version is fine: there is nothing left to protect.
            Ok(()) | Err(ClientError::NotFound { .. }) => {}
            Err(err) => return Err(ExtendError::Provider(err)),
        }

        self.state
            .set_object_retention(&req.object.key, &req.object.version_id, Some(req.until))
            .map_err(ExtendError::Cache)?;

        Ok(())
    }

    /// Runs the worker pool until the request stream closes.
    ///
    /// Per-request failures are logged, counted and swallowed; the stage
    /// itself only fails on cancellation.
    pub(crate) async fn run(
        self,
        rx: mpsc::Receiver<RetentionRequest>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let rx = SharedReceiver::new(rx);
        let mut workers: JoinSet<EngineResult<()>> = JoinSet::new();

        for _ in 0..EXTENDER_WORKERS {
            let extender = self.clone();
            let rx = rx.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                while let Some(req) = rx.recv_or_cancelled(&cancel).await? {
                    if let Err(err) = extender.extend(&req).await {
                        error!(
                            key = %req.object.key,
                            version = %req.object.version_id,
                            error = %err,
                            "Retention extension failed"
                        );
                        extender.stats.add_retention_error();
                    }
                }

                Ok(())
            });
        }

        let mut result = Ok(());

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => result = result.and(Err(err)),
                Err(err) => {
                    result = result.and(Err(EngineError::Stage {
                        message: format!("extender worker: {err}"),
                    }));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::client::SimulatedBucketClient;
    use crate::state::InMemoryRetentionState;

    fn object(retain_until: Option<DateTime<Utc>>) -> ObjectVersion {
        ObjectVersion {
            key: Arc::from("a"),
            version_id: "v1".to_string(),
            last_modified: Utc.with_ymd_and_hms(2004, 1, 1, 0, 0, 0).unwrap(),
            is_latest: true,
            delete_marker: false,
            size: 1,
            retain_until,
        }
    }

    struct Fixture {
        stats: Arc<CleanupStats>,
        state: Arc<InMemoryRetentionState>,
        client: Arc<SimulatedBucketClient>,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                stats: Arc::new(CleanupStats::new()),
                state: Arc::new(InMemoryRetentionState::new()),
                client: Arc::new(SimulatedBucketClient::new("logs")),
                now: Utc.with_ymd_and_hms(2004, 3, 1, 0, 0, 0).unwrap(),
            }
        }

        fn extender(&self, threshold_days: i64, dry_run: bool) -> RetentionExtender {
            RetentionExtender::new(
                Arc::clone(&self.stats),
                Arc::clone(&self.state) as Arc<dyn RetentionState>,
                Arc::clone(&self.client) as Arc<dyn BucketClient>,
                self.now,
                TimeDelta::days(threshold_days),
                dry_run,
            )
        }
    }

    #[tokio::test]
    async fn test_missing_retention_is_committed() {
        let fx = Fixture::new();
        let until = fx.now + TimeDelta::days(10);

        fx.extender(8, false)
            .extend(&RetentionRequest {
                object: object(None),
                until,
            })
            .await
            .unwrap();

        assert_eq!(fx.client.retention_puts().len(), 1);
        assert_eq!(fx.state.get_object_retention("a", "v1").unwrap(), Some(until));
        assert_eq!(fx.stats.snapshot().retention_success_count, 1);
    }

    #[tokio::test]
    async fn test_comfortable_remaining_time_is_left_alone() {
        let fx = Fixture::new();
        let current = fx.now + TimeDelta::days(9);

        fx.extender(8, false)
            .extend(&RetentionRequest {
                object: object(Some(current)),
                until: fx.now + TimeDelta::days(10),
            })
            .await
            .unwrap();

        assert!(fx.client.retention_puts().is_empty());
        assert_eq!(fx.stats.snapshot().retention_success_count, 0);
    }

    #[tokio::test]
    async fn test_low_remaining_time_is_refreshed() {
        let fx = Fixture::new();
        let until = fx.now + TimeDelta::days(5);

        fx.extender(8, false)
            .extend(&RetentionRequest {
                object: object(Some(fx.now + TimeDelta::days(2))),
                until,
            })
            .await
            .unwrap();

        assert_eq!(fx.client.retention_puts().len(), 1);
        assert_eq!(fx.state.get_object_retention("a", "v1").unwrap(), Some(until));
    }

    #[tokio::test]
    async fn test_tombstone_is_skipped() {
        let fx = Fixture::new();
        let mut tombstone = object(None);
        tombstone.delete_marker = true;

        fx.extender(8, false)
            .extend(&RetentionRequest {
                object: tombstone,
                until: fx.now + TimeDelta::days(10),
            })
            .await
            .unwrap();

        assert!(fx.client.retention_puts().is_empty());
        assert_eq!(fx.stats.snapshot().retention_success_count, 0);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_side_effects() {
        let fx = Fixture::new();

        fx.extender(8, true)
            .extend(&RetentionRequest {
                object: object(None),
                until: fx.now + TimeDelta::days(10),
            })
            .await
            .unwrap();

        assert!(fx.client.retention_puts().is_empty());
        assert!(fx.state.records().is_empty());
        assert_eq!(fx.stats.snapshot().retention_success_count, 1);
    }

    #[tokio::test]
    async fn test_vanished_version_is_benign() {
        let fx = Fixture::new();
        fx.client.mark_missing("a", "v1");
        let until = fx.now + TimeDelta::days(10);

        fx.extender(8, false)
            .extend(&RetentionRequest {
                object: object(None),
                until,
            })
            .await
            .unwrap();

        assert_eq!(fx.state.get_object_retention("a", "v1").unwrap(), Some(until));
        assert_eq!(fx.stats.snapshot().retention_error_count, 0);
    }

    #[tokio::test]
    async fn test_worker_pool_swallows_failures() {
        let fx = Fixture::new();
        fx.state.set_failing(true);

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(RetentionRequest {
            object: object(None),
            until: fx.now + TimeDelta::days(10),
        })
        .await
        .unwrap();
        drop(tx);

        fx.extender(8, false).run(rx, cancel).await.unwrap();

        assert_eq!(fx.stats.snapshot().retention_error_count, 1);
    }
}
