//! Vsweep Core - Shared data model for the version cleanup pipeline.
//!
//! This crate provides the types that flow between pipeline stages: the
//! [`ObjectVersion`] record, the deterministic ordering used for version
//! series, the key interner used at the listing boundary, and the shared
//! [`CleanupStats`] aggregate.
//!
//! # Design Principles
//!
//! - **Explicit absence**: missing timestamps are `Option`, never sentinel
//!   zero values.
//! - **Deterministic ordering**: versions order by `(last_modified,
//!   version_id)` so decisions are reproducible across runs.
//! - **Single shared mutable**: [`CleanupStats`] is the only cross-stage
//!   shared state; everything else flows by value.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod intern;
mod object;
mod stats;

pub use intern::KeyInterner;
pub use object::{version_order, ObjectVersion};
pub use stats::{format_bytes, CleanupStats, SizeStats, StatsSnapshot, TimeRange};
