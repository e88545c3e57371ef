//! Retention annotation.
//!
//! Fills in `retain_until` on records coming off the enumerator: cache
//! first, provider on a miss, write-through of the answer (including "no
//! retention"). Records that already carry a value pass through untouched;
//! the provider is never re-queried for them.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;
use vsweep_core::{CleanupStats, ObjectVersion};

use crate::channel::{send_or_cancelled, SharedReceiver};
use crate::client::BucketClient;
use crate::error::{ClientError, EngineError, EngineResult, StateError};
use crate::limits::ANNOTATOR_WORKERS;
use crate::state::RetentionState;

#[derive(Debug, Error)]
enum AnnotateError {
    #[error("getting object retention from cache: {0}")]
    CacheGet(StateError),

    #[error("getting object retention from provider: {0}")]
    Provider(ClientError),

    #[error("writing object retention to cache: {0}")]
    CacheSet(StateError),
}

/// The annotator stage: a pool of workers sharing one input queue.
#[derive(Clone)]
pub(crate) struct Annotator {
    stats: Arc<CleanupStats>,
    state: Arc<dyn RetentionState>,
    client: Arc<dyn BucketClient>,
}

impl Annotator {
    pub(crate) fn new(
        stats: Arc<CleanupStats>,
        state: Arc<dyn RetentionState>,
        client: Arc<dyn BucketClient>,
    ) -> Self {
        Self {
            stats,
            state,
            client,
        }
    }

    /// Annotates one record.
    ///
    /// A not-found answer from the provider means the version vanished
    /// while the run was underway; it is cached and forwarded as "no
    /// retention" rather than treated as a failure.
    async fn annotate(&self, mut ov: ObjectVersion) -> Result<ObjectVersion, AnnotateError> {
        if ov.retain_until.is_some() {
            return Ok(ov);
        }

        let mut until = self
            .state
            .get_object_retention(&ov.key, &ov.version_id)
            .map_err(AnnotateError::CacheGet)?;

        // Delete markers don't support retention periods.
        if until.is_none() && !ov.delete_marker {
            until = match self.client.get_object_retention(&ov.key, &ov.version_id).await {
                Ok(until) => until,
                Err(ClientError::NotFound { .. }) => None,
                Err(err) => return Err(AnnotateError::Provider(err)),
            };

            self.state
                .set_object_retention(&ov.key, &ov.version_id, until)
                .map_err(AnnotateError::CacheSet)?;
        }

        ov.retain_until = until;

        Ok(ov)
    }

    /// Runs the worker pool until the input closes.
    ///
    /// A worker that fails on a record logs it, counts it, and drops the
    /// record; the stage itself only fails on cancellation.
    pub(crate) async fn run(
        self,
        rx: mpsc::Receiver<ObjectVersion>,
        tx: mpsc::Sender<ObjectVersion>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let rx = SharedReceiver::new(rx);
        let mut workers: JoinSet<EngineResult<()>> = JoinSet::new();

        for _ in 0..ANNOTATOR_WORKERS {
            let annotator = self.clone();
            let rx = rx.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                while let Some(ov) = rx.recv_or_cancelled(&cancel).await? {
                    let key = Arc::clone(&ov.key);
                    let version_id = ov.version_id.clone();

                    match annotator.annotate(ov).await {
                        Ok(ov) => send_or_cancelled(&tx, &cancel, ov).await?,
                        Err(err) => {
                            error!(
                                key = %key,
                                version = %version_id,
                                error = %err,
                                "Retention annotation failed"
                            );
                            annotator.stats.add_annotation_error();
                        }
                    }
                }

                Ok(())
            });
        }

        drop(tx);

        let mut result = Ok(());

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => result = result.and(Err(err)),
                Err(err) => {
                    result = result.and(Err(EngineError::Stage {
                        message: format!("annotator worker: {err}"),
                    }));
                }
            }
        }

        result
    }
}
