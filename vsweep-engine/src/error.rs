//! Engine error types.
//!
//! Three error families cross the engine's boundaries: [`EngineError`] for
//! whole-run failures, [`ClientError`] for provider calls, and
//! [`StateError`] for retention-cache calls. Per-item failures inside the
//! annotator, extender and deleter are logged and counted without surfacing
//! as any of these.

use thiserror::Error;

/// Result type for pipeline runs.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for provider client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type for retention cache calls.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that fail an entire bucket run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The run's cancellation token fired. Channel operations against a
    /// torn-down pipeline also report this.
    #[error("cleanup run cancelled")]
    Cancelled,

    /// A page of the bucket's version listing could not be fetched. The
    /// enumerator cannot make partial progress, so this fails the run.
    #[error("listing object versions: {source}")]
    List {
        /// The underlying provider error.
        #[source]
        source: ClientError,
    },

    /// A pipeline stage terminated abnormally.
    #[error("pipeline stage failed: {message}")]
    Stage {
        /// Description of the failure.
        message: String,
    },
}

/// Errors returned by provider client implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The object version does not exist (any more). The annotator and the
    /// extender treat this as success: the version may have been removed
    /// concurrently with the run.
    #[error("object not found: {key} ({version_id})")]
    NotFound {
        /// Object key.
        key: String,
        /// Version identifier.
        version_id: String,
    },

    /// Any other provider failure, surfaced after the SDK's own retries.
    #[error("{operation} failed: {message}")]
    Api {
        /// The provider operation that failed.
        operation: &'static str,
        /// Provider error description.
        message: String,
    },
}

/// Error returned by retention cache implementations.
#[derive(Debug, Error)]
#[error("retention cache {operation} failed: {message}")]
pub struct StateError {
    /// The cache operation that failed.
    pub operation: &'static str,
    /// Failure description.
    pub message: String,
}
