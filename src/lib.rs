//! s3-sync - S3 prefix mirroring agent
//!
//! Pulls remote S3 prefixes into local directories on a schedule and, after
//! any pass produces a change, bakes the mirrored trees into a container
//! image layer pushed to the configured registries.

pub mod aws;
pub mod error;
pub mod image;
pub mod runner;
pub mod schedule;
pub mod shutdown;
pub mod spec;
pub mod sync;

pub use error::{Result, SyncError};
pub use spec::SyncSpec;
