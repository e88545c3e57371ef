//! Batch deletion.
//!
//! An aggregator drains the delete stream into fixed-size batches and hands
//! them to a bounded worker pool. Per-item failures reported by the
//! provider are logged and counted; only cancellation stops the stage.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vsweep_core::{CleanupStats, ObjectVersion};

use crate::channel::{send_or_cancelled, SharedReceiver};
use crate::client::BucketClient;
use crate::error::{EngineError, EngineResult};
use crate::limits::{DELETER_WORKERS, DELETE_BATCH_SIZE};

/// The batch deleter stage.
#[derive(Clone)]
pub(crate) struct BatchDeleter {
    stats: Arc<CleanupStats>,
    client: Arc<dyn BucketClient>,
    dry_run: bool,
}

impl BatchDeleter {
    pub(crate) fn new(
        stats: Arc<CleanupStats>,
        client: Arc<dyn BucketClient>,
        dry_run: bool,
    ) -> Self {
        Self {
            stats,
            client,
            dry_run,
        }
    }

    /// Deletes one batch, recording per-item outcomes.
    ///
    /// A transport-level failure of the whole request counts as one delete
    /// error; the worker carries on with the next batch either way.
    async fn delete_batch(&self, batch: u64, items: Vec<ObjectVersion>) {
        debug_assert!(items.len() <= DELETE_BATCH_SIZE, "batch exceeds the bulk cap");

        for item in &items {
            info!(
                batch,
                dry_run = self.dry_run,
                key = %item.key,
                version = %item.version_id,
                last_modified = %item.last_modified,
                "Delete"
            );

            self.stats.add_delete(item);
        }

        if self.dry_run {
            return;
        }

        match self.client.delete_objects(&items).await {
            Ok(outcome) => {
                self.stats
                    .add_delete_results(outcome.deleted.len() as u64, outcome.errors.len() as u64);

                for item in outcome.errors {
                    error!(
                        batch,
                        key = %item.key,
                        version = %item.version_id,
                        code = %item.code,
                        msg = %item.message,
                        "Delete failed"
                    );
                }
            }
            Err(err) => {
                error!(batch, error = %err, "Delete batch failed");
                self.stats.add_delete_results(0, 1);
            }
        }
    }

    /// Runs the aggregator and worker pool until the input closes.
    pub(crate) async fn run(
        self,
        mut rx: mpsc::Receiver<ObjectVersion>,
        cancel: CancellationToken,
    ) -> EngineResult<()> {
        let (batch_tx, batch_rx) = mpsc::channel::<(u64, Vec<ObjectVersion>)>(1);
        let batch_rx = SharedReceiver::new(batch_rx);

        let mut workers: JoinSet<EngineResult<()>> = JoinSet::new();

        for _ in 0..DELETER_WORKERS {
            let deleter = self.clone();
            let batch_rx = batch_rx.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                while let Some((batch, items)) = batch_rx.recv_or_cancelled(&cancel).await? {
                    deleter.delete_batch(batch, items).await;
                }

                Ok(())
            });
        }

        let aggregated = self
            .aggregate(&mut rx, &batch_tx, &cancel)
            .await;
        drop(batch_tx);

        let mut result = aggregated;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => result = result.and(Err(err)),
                Err(err) => {
                    result = result.and(Err(EngineError::Stage {
                        message: format!("deleter worker: {err}"),
                    }));
                }
            }
        }

        result
    }

    /// Buffers the input into batches of [`DELETE_BATCH_SIZE`], dispatching
    /// the final partial batch when the stream closes.
    async fn aggregate(
        &self,
        rx: &mut mpsc::Receiver<ObjectVersion>,
        batch_tx: &mpsc::Sender<(u64, Vec<ObjectVersion>)>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let mut pending: Vec<ObjectVersion> = Vec::new();
        let mut batch_count: u64 = 0;

        loop {
            let ov = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                ov = rx.recv() => ov,
            };

            match ov {
                Some(ov) => {
                    pending.push(ov);

                    if pending.len() >= DELETE_BATCH_SIZE {
                        let batch: Vec<ObjectVersion> =
                            pending.drain(..DELETE_BATCH_SIZE).collect();

                        send_or_cancelled(batch_tx, cancel, (batch_count, batch)).await?;
                        batch_count += 1;
                    }
                }
                None => break,
            }
        }

        if !pending.is_empty() {
            send_or_cancelled(batch_tx, cancel, (batch_count, pending)).await?;
        }

        Ok(())
    }
}
