//! Vsweep S3 - Provider client for S3-compatible object stores.
//!
//! Implements the engine's `BucketClient` seam on top of the AWS SDK:
//! version listing, per-version retention get/put, bulk deletion, and the
//! `state.gz` transfer used for cache persistence.
//!
//! # Bucket addresses
//!
//! Buckets are named either bare (`my-bucket`, resolved through the
//! standard AWS configuration chain) or as a URL
//! (`https://storage.example.net:9000/my-bucket/some/prefix`), which pins a
//! custom endpoint with path-style addressing for S3-compatible services.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod address;
mod client;
mod transfer;

pub use address::{AddressError, BucketAddress};
pub use client::S3BucketClient;
