//! Bucket version enumeration.
//!
//! Paginates the provider's version listing and emits one [`ObjectVersion`]
//! per regular version and per delete marker, in whatever order the
//! provider returns them. Keys are interned at this boundary so key memory
//! stays proportional to distinct keys, not total versions.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vsweep_core::{KeyInterner, ObjectVersion};

use crate::channel::send_or_cancelled;
use crate::client::BucketClient;
use crate::error::{EngineError, EngineResult};

/// Streams every version of every key into `out`.
///
/// Any page failure fails the stage: the enumeration cannot make partial
/// progress, and the next run restarts it from scratch.
pub(crate) async fn list_object_versions(
    client: &dyn BucketClient,
    out: &mpsc::Sender<ObjectVersion>,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    info!(
        bucket = client.bucket(),
        prefix = client.prefix(),
        "Listing object versions"
    );

    let mut interner = KeyInterner::new();
    let mut cursor = None;

    loop {
        let page = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            page = client.list_object_versions(cursor) => {
                page.map_err(|source| EngineError::List { source })?
            }
        };

        for v in page.versions {
            let record = ObjectVersion {
                key: interner.intern(&v.key),
                version_id: v.version_id,
                last_modified: v.last_modified,
                is_latest: v.is_latest,
                delete_marker: false,
                size: v.size,
                retain_until: None,
            };

            send_or_cancelled(out, cancel, record).await?;
        }

        for marker in page.delete_markers {
            let record = ObjectVersion {
                key: interner.intern(&marker.key),
                version_id: marker.version_id,
                last_modified: marker.last_modified,
                is_latest: marker.is_latest,
                delete_marker: true,
                size: 0,
                retain_until: None,
            };

            send_or_cancelled(out, cancel, record).await?;
        }

        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(()),
        }
    }
}
