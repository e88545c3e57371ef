//! The SQLite-backed retention store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::Connection;
use tempfile::TempPath;

use crate::bucket::BucketState;
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bucket_metadata (
    name    TEXT PRIMARY KEY,
    seen_at INTEGER NOT NULL
) STRICT;

CREATE TABLE IF NOT EXISTS object_retention (
    bucket       TEXT NOT NULL,
    key          TEXT NOT NULL,
    version_id   TEXT NOT NULL,
    retain_until INTEGER,
    updated_at   INTEGER NOT NULL,
    PRIMARY KEY (bucket, key, version_id)
) STRICT;
";

/// The retention cache database.
///
/// Cloneable handle; all clones share one mutex-guarded connection.
#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

#[derive(Debug)]
pub(crate) struct StoreInner {
    conn: Mutex<Connection>,
    /// Keeps a scratch database file alive (and deleted afterwards) when
    /// the store was not opened from a caller-owned path.
    _scratch: Option<TempPath>,
}

impl StoreInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] when the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_connection(conn, None).map_err(|source| match source {
            StoreError::Query(source) => StoreError::Open {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Creates a store on a scratch file under `dir`. The file is removed
    /// when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error when the scratch file or the database cannot be
    /// created.
    pub fn create_temp(dir: &Path) -> Result<Self, StoreError> {
        let scratch = tempfile::Builder::new()
            .prefix("state")
            .tempfile_in(dir)?
            .into_temp_path();

        let conn = Connection::open(&scratch).map_err(|source| StoreError::Open {
            path: scratch.display().to_string(),
            source,
        })?;

        Self::from_connection(conn, Some(scratch))
    }

    pub(crate) fn from_connection(
        conn: Connection,
        scratch: Option<TempPath>,
    ) -> Result<Self, StoreError> {
        // The local file is scratch: the gzip snapshot is the durable form,
        // so trade durability for fewer fsyncs.
        let _ = conn.pragma_update(None, "journal_mode", "MEMORY");
        let _ = conn.pragma_update(None, "synchronous", "OFF");

        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                _scratch: scratch,
            }),
        })
    }

    /// Returns the cache handle for `name`, recording that the bucket was
    /// seen now.
    ///
    /// # Errors
    ///
    /// Returns an error when the metadata row cannot be written.
    pub fn bucket(&self, name: &str) -> Result<BucketState, StoreError> {
        self.inner.lock().execute(
            "INSERT INTO bucket_metadata (name, seen_at) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET seen_at = excluded.seen_at",
            (name, Utc::now().timestamp()),
        )?;

        Ok(BucketState::new(Arc::clone(&self.inner), name))
    }

    /// Names of all buckets the store has seen.
    ///
    /// # Errors
    ///
    /// Returns an error when the metadata table cannot be read.
    pub fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.inner.lock();
        let mut stmt = conn.prepare("SELECT name FROM bucket_metadata ORDER BY name")?;

        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(names)
    }
}
