//! Retention cache capability trait.
//!
//! The cache is a latency optimisation over the provider's per-version
//! retention endpoint; the provider stays authoritative. A miss falls back
//! to the provider, and decisions always fire on values as of the current
//! run, so a stale cache can delay an extension but never cause a deletion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::error::{StateError, StateResult};

/// Retention cache operations, scoped to one bucket.
///
/// `set_object_retention` accepts `None`: a provider answer of "no
/// retention" is cached too, carrying its own update timestamp.
pub trait RetentionState: Send + Sync {
    /// Looks up the cached retention expiry; `None` when absent or cached
    /// as "no retention".
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the cache cannot be read.
    fn get_object_retention(
        &self,
        key: &str,
        version_id: &str,
    ) -> StateResult<Option<DateTime<Utc>>>;

    /// Records the retention expiry (or its absence) for one version.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the cache cannot be written.
    fn set_object_retention(
        &self,
        key: &str,
        version_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> StateResult<()>;

    /// Drops the cached record for one version, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the cache cannot be written.
    fn delete_object_retention(&self, key: &str, version_id: &str) -> StateResult<()>;
}

/// Map-backed [`RetentionState`] for tests.
#[derive(Debug, Default)]
pub struct InMemoryRetentionState {
    records: Mutex<HashMap<(String, String), Option<DateTime<Utc>>>>,
    failing: AtomicBool,
}

impl InMemoryRetentionState {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// All records currently held, keyed by `(key, version_id)`.
    #[must_use]
    pub fn records(&self) -> HashMap<(String, String), Option<DateTime<Utc>>> {
        self.lock().clone()
    }

    fn check(&self, operation: &'static str) -> StateResult<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StateError {
                operation,
                message: "injected failure".to_string(),
            });
        }

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Option<DateTime<Utc>>>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RetentionState for InMemoryRetentionState {
    fn get_object_retention(
        &self,
        key: &str,
        version_id: &str,
    ) -> StateResult<Option<DateTime<Utc>>> {
        self.check("get")?;

        Ok(self
            .lock()
            .get(&(key.to_string(), version_id.to_string()))
            .copied()
            .flatten())
    }

    fn set_object_retention(
        &self,
        key: &str,
        version_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> StateResult<()> {
        self.check("set")?;

        self.lock()
            .insert((key.to_string(), version_id.to_string()), until);

        Ok(())
    }

    fn delete_object_retention(&self, key: &str, version_id: &str) -> StateResult<()> {
        self.check("delete")?;

        self.lock()
            .remove(&(key.to_string(), version_id.to_string()));

        Ok(())
    }
}
