//! Cancellation-aware channel helpers shared by the pipeline stages.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};

/// Sends `item`, aborting with [`EngineError::Cancelled`] when the run is
/// cancelled or the receiving stage is gone.
pub(crate) async fn send_or_cancelled<T: Send>(
    tx: &mpsc::Sender<T>,
    cancel: &CancellationToken,
    item: T,
) -> EngineResult<()> {
    tokio::select! {
        // Cancellation wins over a ready send.
        biased;
        () = cancel.cancelled() => Err(EngineError::Cancelled),
        sent = tx.send(item) => sent.map_err(|_| EngineError::Cancelled),
    }
}

/// A receiver shared by a pool of workers.
///
/// `tokio::mpsc` is single-consumer; the worker pools of the annotator,
/// extender and deleter pull from one queue, so the receiver sits behind an
/// async mutex. The lock only ever guards the receive itself.
#[derive(Debug)]
pub(crate) struct SharedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> SharedReceiver<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Receives the next item; `None` once the channel is closed and drained.
    pub(crate) async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }

    /// Receives the next item unless the run is cancelled first.
    pub(crate) async fn recv_or_cancelled(
        &self,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<T>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            item = self.recv() => Ok(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_fails_once_cancelled() {
        let (tx, _rx) = mpsc::channel::<u32>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = send_or_cancelled(&tx, &cancel, 1).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_shared_receiver_drains_then_closes() {
        let (tx, rx) = mpsc::channel(4);
        let shared = SharedReceiver::new(rx);
        let cancel = CancellationToken::new();

        tx.send(1u32).await.unwrap();
        tx.send(2u32).await.unwrap();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(item) = shared.recv_or_cancelled(&cancel).await.unwrap() {
            seen.push(item);
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_shared_receiver_splits_between_clones() {
        let (tx, rx) = mpsc::channel(4);
        let shared = SharedReceiver::new(rx);
        let other = shared.clone();

        tx.send(1u32).await.unwrap();
        tx.send(2u32).await.unwrap();
        drop(tx);

        assert_eq!(shared.recv().await, Some(1));
        assert_eq!(other.recv().await, Some(2));
        assert_eq!(shared.recv().await, None);
    }
}
