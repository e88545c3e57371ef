//! Provider client capability trait.
//!
//! The pipeline consumes the object store through this narrow interface
//! rather than a concrete SDK type, so test doubles can replace the network
//! entirely. The production implementation lives in `vsweep-s3`; the
//! [`SimulatedBucketClient`] below backs the engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vsweep_core::ObjectVersion;

use crate::error::{ClientError, ClientResult};

// -----------------------------------------------------------------------------
// Listing types
// -----------------------------------------------------------------------------

/// Continuation cursor for version-listing pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCursor {
    /// Key to continue listing after.
    pub key_marker: String,
    /// Version to continue listing after.
    pub version_id_marker: String,
}

/// A regular version entry of one listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedVersion {
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
    /// Creation timestamp.
    pub last_modified: DateTime<Utc>,
    /// Whether this version is the current head of the key.
    pub is_latest: bool,
    /// Payload size in bytes.
    pub size: u64,
}

/// A delete-marker entry of one listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedTombstone {
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
    /// Creation timestamp.
    pub last_modified: DateTime<Utc>,
    /// Whether the marker is the current head of the key.
    pub is_latest: bool,
}

/// One page of the bucket's version listing.
#[derive(Debug, Clone, Default)]
pub struct VersionListPage {
    /// Regular versions on this page.
    pub versions: Vec<ListedVersion>,
    /// Delete markers on this page.
    pub delete_markers: Vec<ListedTombstone>,
    /// Cursor for the next page; `None` on the last page.
    pub next: Option<ListCursor>,
}

// -----------------------------------------------------------------------------
// Delete types
// -----------------------------------------------------------------------------

/// A version reported deleted by a bulk-delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedObject {
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
}

/// A per-item failure reported by a bulk-delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteItemError {
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
    /// Provider error code.
    pub code: String,
    /// Provider error message.
    pub message: String,
}

/// Per-item outcomes of one bulk-delete call.
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// Versions the provider removed.
    pub deleted: Vec<DeletedObject>,
    /// Versions the provider refused to remove.
    pub errors: Vec<DeleteItemError>,
}

// -----------------------------------------------------------------------------
// BucketClient trait
// -----------------------------------------------------------------------------

/// Object-store operations the pipeline needs, for one bucket.
///
/// Implementations must be `Send + Sync`; the annotator, extender and
/// deleter pools share one client per run.
#[async_trait]
pub trait BucketClient: Send + Sync {
    /// The bucket this client operates on.
    fn bucket(&self) -> &str;

    /// Key prefix limiting enumeration; empty for the whole bucket.
    fn prefix(&self) -> &str;

    /// Fetches one page of the version listing.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Api`] when the page cannot be fetched. The
    /// enumerator treats this as fatal for the run.
    async fn list_object_versions(
        &self,
        cursor: Option<ListCursor>,
    ) -> ClientResult<VersionListPage>;

    /// Fetches the retention-lock expiry of one version.
    ///
    /// `Ok(None)` means the version carries no retention.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] when the version is gone and
    /// [`ClientError::Api`] for other failures.
    async fn get_object_retention(
        &self,
        key: &str,
        version_id: &str,
    ) -> ClientResult<Option<DateTime<Utc>>>;

    /// Sets the retention-lock expiry of one version.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] when the version is gone and
    /// [`ClientError::Api`] for other failures.
    async fn put_object_retention(
        &self,
        key: &str,
        version_id: &str,
        until: DateTime<Utc>,
    ) -> ClientResult<()>;

    /// Deletes the given versions in one bulk request.
    ///
    /// Per-item failures are reported inside the [`DeleteOutcome`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Api`] when the request as a whole fails.
    async fn delete_objects(&self, objects: &[ObjectVersion]) -> ClientResult<DeleteOutcome>;
}

// -----------------------------------------------------------------------------
// SimulatedBucketClient
// -----------------------------------------------------------------------------

/// In-memory [`BucketClient`] with call recording and failure injection.
///
/// Listing pages are scripted: [`Self::push_page`] appends pages that are
/// then served in order, chained by synthetic cursors. Retention responses
/// are scripted per `(key, version_id)`; unknown versions answer "no
/// retention" like a provider would for an unlocked object.
#[derive(Debug, Default)]
pub struct SimulatedBucketClient {
    bucket: String,
    prefix: String,
    inner: Mutex<SimInner>,
}

#[derive(Debug, Default)]
struct SimInner {
    pages: Vec<VersionListPage>,
    fail_listing_at: Option<usize>,

    retention: HashMap<(String, String), Option<DateTime<Utc>>>,
    missing: HashSet<(String, String)>,

    retention_queries: Vec<(String, String)>,
    retention_puts: Vec<(String, String, DateTime<Utc>)>,

    delete_batches: Vec<Vec<(String, String)>>,
    delete_item_errors: HashSet<(String, String)>,
    fail_delete_transport: bool,
}

impl SimulatedBucketClient {
    /// Creates a client for `bucket` with no prefix.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            inner: Mutex::default(),
        }
    }

    /// Sets the enumeration prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Appends a listing page. Pages are served in push order.
    pub fn push_page(&self, page: VersionListPage) {
        self.lock().pages.push(page);
    }

    /// Makes the listing fail when page `index` is requested.
    pub fn fail_listing_at(&self, index: usize) {
        self.lock().fail_listing_at = Some(index);
    }

    /// Scripts the retention answer for one version.
    pub fn set_retention(&self, key: &str, version_id: &str, until: Option<DateTime<Utc>>) {
        self.lock()
            .retention
            .insert((key.to_string(), version_id.to_string()), until);
    }

    /// Makes retention calls for one version answer not-found.
    pub fn mark_missing(&self, key: &str, version_id: &str) {
        self.lock()
            .missing
            .insert((key.to_string(), version_id.to_string()));
    }

    /// Makes one version fail inside every bulk delete.
    pub fn fail_delete_item(&self, key: &str, version_id: &str) {
        self.lock()
            .delete_item_errors
            .insert((key.to_string(), version_id.to_string()));
    }

    /// Makes every bulk delete fail as a whole.
    pub fn fail_delete_transport(&self) {
        self.lock().fail_delete_transport = true;
    }

    /// Retention lookups issued against the provider so far.
    #[must_use]
    pub fn retention_queries(&self) -> Vec<(String, String)> {
        self.lock().retention_queries.clone()
    }

    /// Retention updates issued against the provider so far.
    #[must_use]
    pub fn retention_puts(&self) -> Vec<(String, String, DateTime<Utc>)> {
        self.lock().retention_puts.clone()
    }

    /// Bulk-delete batches issued so far, as `(key, version_id)` lists.
    #[must_use]
    pub fn delete_batches(&self) -> Vec<Vec<(String, String)>> {
        self.lock().delete_batches.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl BucketClient for SimulatedBucketClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn list_object_versions(
        &self,
        cursor: Option<ListCursor>,
    ) -> ClientResult<VersionListPage> {
        let inner = self.lock();

        let index = cursor
            .as_ref()
            .and_then(|c| c.version_id_marker.parse::<usize>().ok())
            .unwrap_or(0);

        if inner.fail_listing_at == Some(index) {
            return Err(ClientError::Api {
                operation: "ListObjectVersions",
                message: format!("injected failure at page {index}"),
            });
        }

        let Some(page) = inner.pages.get(index) else {
            return Ok(VersionListPage::default());
        };

        let mut page = page.clone();
        page.next = (index + 1 < inner.pages.len()).then(|| ListCursor {
            key_marker: String::new(),
            version_id_marker: (index + 1).to_string(),
        });

        Ok(page)
    }

    async fn get_object_retention(
        &self,
        key: &str,
        version_id: &str,
    ) -> ClientResult<Option<DateTime<Utc>>> {
        let mut inner = self.lock();
        let id = (key.to_string(), version_id.to_string());

        inner.retention_queries.push(id.clone());

        if inner.missing.contains(&id) {
            return Err(ClientError::NotFound {
                key: key.to_string(),
                version_id: version_id.to_string(),
            });
        }

        Ok(inner.retention.get(&id).copied().flatten())
    }

    async fn put_object_retention(
        &self,
        key: &str,
        version_id: &str,
        until: DateTime<Utc>,
    ) -> ClientResult<()> {
        let mut inner = self.lock();
        let id = (key.to_string(), version_id.to_string());

        if inner.missing.contains(&id) {
            return Err(ClientError::NotFound {
                key: key.to_string(),
                version_id: version_id.to_string(),
            });
        }

        inner
            .retention_puts
            .push((key.to_string(), version_id.to_string(), until));
        inner.retention.insert(id, Some(until));

        Ok(())
    }

    async fn delete_objects(&self, objects: &[ObjectVersion]) -> ClientResult<DeleteOutcome> {
        let mut inner = self.lock();

        if inner.fail_delete_transport {
            return Err(ClientError::Api {
                operation: "DeleteObjects",
                message: "injected transport failure".to_string(),
            });
        }

        inner.delete_batches.push(
            objects
                .iter()
                .map(|o| (o.key.to_string(), o.version_id.clone()))
                .collect(),
        );

        let mut outcome = DeleteOutcome::default();

        for object in objects {
            let id = (object.key.to_string(), object.version_id.clone());

            if inner.delete_item_errors.contains(&id) {
                outcome.errors.push(DeleteItemError {
                    key: id.0,
                    version_id: id.1,
                    code: "AccessDenied".to_string(),
                    message: "injected item failure".to_string(),
                });
            } else {
                outcome.deleted.push(DeletedObject {
                    key: id.0,
                    version_id: id.1,
                });
            }
        }

        Ok(outcome)
    }
}
