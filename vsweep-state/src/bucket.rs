//! Per-bucket view of the retention store.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use vsweep_engine::{RetentionState, StateError, StateResult};

use crate::error::StoreError;
use crate::store::StoreInner;

/// Retention cache handle scoped to one bucket.
///
/// Implements the engine's [`RetentionState`] seam. Retention expiries are
/// stored at second granularity; a stored NULL means "known to carry no
/// retention", which is distinct from not being stored at all only through
/// the record's update timestamp.
#[derive(Debug, Clone)]
pub struct BucketState {
    inner: Arc<StoreInner>,
    bucket: String,
}

impl BucketState {
    pub(crate) fn new(inner: Arc<StoreInner>, bucket: &str) -> Self {
        Self {
            inner,
            bucket: bucket.to_string(),
        }
    }

    /// The bucket this handle is scoped to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn get(&self, key: &str, version_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.inner.lock();

        let row: Option<Option<i64>> = conn
            .query_row(
                "SELECT retain_until FROM object_retention
                 WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
                (&self.bucket, key, version_id),
                |row| row.get(0),
            )
            .optional()?;

        Ok(row
            .flatten()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
    }

    fn set(
        &self,
        key: &str,
        version_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.inner.lock().execute(
            "INSERT INTO object_retention (bucket, key, version_id, retain_until, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (bucket, key, version_id) DO UPDATE
             SET retain_until = excluded.retain_until, updated_at = excluded.updated_at",
            (
                &self.bucket,
                key,
                version_id,
                until.map(|t| t.timestamp()),
                Utc::now().timestamp(),
            ),
        )?;

        Ok(())
    }

    fn delete(&self, key: &str, version_id: &str) -> Result<(), StoreError> {
        self.inner.lock().execute(
            "DELETE FROM object_retention
             WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
            (&self.bucket, key, version_id),
        )?;

        Ok(())
    }
}

fn state_error(operation: &'static str, err: &StoreError) -> StateError {
    StateError {
        operation,
        message: err.to_string(),
    }
}

impl RetentionState for BucketState {
    fn get_object_retention(
        &self,
        key: &str,
        version_id: &str,
    ) -> StateResult<Option<DateTime<Utc>>> {
        self.get(key, version_id)
            .map_err(|err| state_error("get", &err))
    }

    fn set_object_retention(
        &self,
        key: &str,
        version_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> StateResult<()> {
        self.set(key, version_id, until)
            .map_err(|err| state_error("set", &err))
    }

    fn delete_object_retention(&self, key: &str, version_id: &str) -> StateResult<()> {
        self.delete(key, version_id)
            .map_err(|err| state_error("delete", &err))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::Store;

    fn store() -> Store {
        Store::create_temp(&std::env::temp_dir()).unwrap()
    }

    #[test]
    fn test_roundtrip_and_delete() {
        let bucket = store().bucket("logs").unwrap();
        let until = Utc.with_ymd_and_hms(2004, 4, 1, 12, 30, 0).unwrap();

        assert_eq!(bucket.get_object_retention("k", "v1").unwrap(), None);

        bucket.set_object_retention("k", "v1", Some(until)).unwrap();
        assert_eq!(bucket.get_object_retention("k", "v1").unwrap(), Some(until));

        bucket.delete_object_retention("k", "v1").unwrap();
        assert_eq!(bucket.get_object_retention("k", "v1").unwrap(), None);
    }

    #[test]
    fn test_known_absent_retention_is_stored() {
        let bucket = store().bucket("logs").unwrap();

        bucket.set_object_retention("k", "v1", None).unwrap();
        assert_eq!(bucket.get_object_retention("k", "v1").unwrap(), None);

        // Upgrading the record later works too.
        let until = Utc.with_ymd_and_hms(2004, 4, 1, 0, 0, 0).unwrap();
        bucket.set_object_retention("k", "v1", Some(until)).unwrap();
        assert_eq!(bucket.get_object_retention("k", "v1").unwrap(), Some(until));
    }

    #[test]
    fn test_buckets_are_isolated() {
        let store = store();
        let a = store.bucket("a").unwrap();
        let b = store.bucket("b").unwrap();
        let until = Utc.with_ymd_and_hms(2004, 4, 1, 0, 0, 0).unwrap();

        a.set_object_retention("k", "v1", Some(until)).unwrap();

        assert_eq!(a.get_object_retention("k", "v1").unwrap(), Some(until));
        assert_eq!(b.get_object_retention("k", "v1").unwrap(), None);

        b.delete_object_retention("k", "v1").unwrap();
        assert_eq!(a.get_object_retention("k", "v1").unwrap(), Some(until));
    }
}
