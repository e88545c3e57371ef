//! Vsweep State - Persistent retention cache.
//!
//! Caches per-version retention expiries between runs so the annotator can
//! skip most provider lookups. The store is SQLite behind a mutex-guarded
//! connection; durability is deliberately relaxed because the local file is
//! scratch. The durable form is the gzip snapshot uploaded to the
//! persistence bucket at the end of a run.
//!
//! # Layout
//!
//! One database holds every bucket's records. [`Store::bucket`] returns a
//! [`BucketState`] handle scoped to one bucket, which implements the
//! engine's `RetentionState` trait. Records are keyed by
//! `(bucket, key, version_id)` and carry the retention expiry (nullable:
//! "known to have none" is cached too) plus the update timestamp.
//!
//! # Snapshots
//!
//! [`Store::snapshot_to`] writes a gzip-compressed copy of the database via
//! the SQLite backup API; [`Store::open_compressed`] restores one. The two
//! round-trip: a restored store answers every lookup like the original.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bucket;
mod error;
mod snapshot;
mod store;

pub use bucket::BucketState;
pub use error::StoreError;
pub use store::Store;
