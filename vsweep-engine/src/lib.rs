//! Vsweep Engine - The version cleanup pipeline.
//!
//! Buckets on providers without native non-current-version expiration grow
//! unbounded version histories. This crate implements the client-side
//! lifecycle engine that replaces that missing feature: it enumerates every
//! version of every key, decides per key which versions are expired and
//! which must have their retention refreshed, and issues bulk deletions and
//! retention updates.
//!
//! # Pipeline
//!
//! ```text
//! enumerator ──> annotator ──> processor ──┬──> extender
//!   (listing)    (retention     (per-key   └──> deleter
//!                 lookup)        decisions)
//! ```
//!
//! Stages cooperate through bounded channels and unwind together on the
//! first failure; see [`run_cleanup`].
//!
//! # Seams
//!
//! The provider and the retention cache are consumed through the
//! [`BucketClient`] and [`RetentionState`] traits so test doubles can
//! replace the network and the database. [`SimulatedBucketClient`] and
//! [`InMemoryRetentionState`] are those doubles.
//!
//! # Safety model
//!
//! No decision is made for a key until its whole version series has been
//! seen: a listing that never produced the latest version of a key keeps
//! that key's versions alive instead of deleting them. The retention cache
//! is a hint; the provider stays authoritative.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod annotate;
mod channel;
mod client;
mod delete;
mod error;
mod extend;
mod list;
mod pipeline;
mod process;
mod state;

pub use client::{
    BucketClient, DeleteItemError, DeleteOutcome, DeletedObject, ListCursor, ListedTombstone,
    ListedVersion, SimulatedBucketClient, VersionListPage,
};
pub use error::{
    ClientError, ClientResult, EngineError, EngineResult, StateError, StateResult,
};
pub use pipeline::{run_cleanup, CleanupConfig};
pub use state::{InMemoryRetentionState, RetentionState};

/// Pipeline sizing constants.
pub mod limits {
    /// Capacity of every inter-stage channel.
    pub const CHANNEL_CAPACITY: usize = 8;

    /// Workers sharing the annotator's input queue.
    pub const ANNOTATOR_WORKERS: usize = 4;

    /// Workers sharing the extender's request queue.
    pub const EXTENDER_WORKERS: usize = 4;

    /// Workers sharing the deleter's batch queue.
    pub const DELETER_WORKERS: usize = 4;

    /// Versions per bulk-delete request, matching the provider's
    /// per-request object cap.
    pub const DELETE_BATCH_SIZE: usize = 250;
}
