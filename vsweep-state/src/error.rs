//! Retention store error type.

use thiserror::Error;

/// Errors raised by the retention store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened or initialized.
    #[error("opening retention store {path}: {source}")]
    Open {
        /// Path of the database file.
        path: String,
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// A query or statement failed.
    #[error("retention store query: {0}")]
    Query(#[from] rusqlite::Error),

    /// Snapshot or scratch-file I/O failed.
    #[error("retention store I/O: {0}")]
    Io(#[from] std::io::Error),
}
