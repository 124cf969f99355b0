//! Storage collaborators
//!
//! The engine talks to storage through two narrow traits: a [`RangeSource`]
//! that can read any byte range of an object, and a [`MultipartDestination`]
//! that assembles independently uploaded parts into one object.
//!
//! Calls that move part data carry a deadline. Implementations must give up
//! once it passes, returning a transient error, so a stalled connection costs
//! one failed attempt instead of a hung worker. [`time_left`] does the
//! bookkeeping.

mod fs;
mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use fs::{DirDestination, FileSource, STAGING_DIR};
pub use memory::{MemoryDestination, MemorySource};
#[cfg(feature = "s3")]
pub use s3::{S3Context, S3Destination, S3Options, S3Source};

use crate::error::{Result, TransferError};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Component, Path};
use std::time::{Duration, Instant};

/// One entry of the completion manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object store that serves byte ranges
pub trait RangeSource: Send + Sync {
    /// Current size of `key` in bytes
    fn object_size(&self, key: &str) -> Result<u64>;

    /// Last modification time of `key`, if the store tracks one
    fn object_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Stream bytes `[offset, offset + length)` of `key` into `sink`
    ///
    /// Returns the number of bytes written. Errors from `sink` must be
    /// propagated, since the engine uses them to enforce part deadlines.
    fn read_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        deadline: Instant,
        sink: &mut dyn Write,
    ) -> Result<u64>;
}

/// Object store with multipart upload sessions
pub trait MultipartDestination: Send + Sync {
    /// Start a session for `key` and return its upload id
    fn open_multipart(&self, key: &str) -> Result<String>;

    /// Store one part before `deadline` and return its etag
    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
        deadline: Instant,
    ) -> Result<String>;

    /// Assemble the listed parts, in list order, into the final object
    ///
    /// Returns the size of the assembled object.
    fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[CompletedPart])
        -> Result<u64>;

    /// Discard the session and every part uploaded under it
    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;
}

/// Time remaining before `deadline`, or a transient timeout error for `context`
pub fn time_left(deadline: Instant, context: &str) -> Result<Duration> {
    let now = Instant::now();
    if now >= deadline {
        return Err(TransferError::transient(context, "part deadline exceeded"));
    }
    Ok(deadline - now)
}

/// Content-derived etag used by the local providers
pub(crate) fn content_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", &hex::encode(digest)[..32])
}

/// Reject completion manifests that are empty or not strictly ascending
pub(crate) fn check_manifest(parts: &[CompletedPart]) -> Result<()> {
    if parts.is_empty() {
        return Err(TransferError::provider(
            "complete_multipart",
            "completion requires at least one part",
        ));
    }
    if let Some(pair) = parts.windows(2).find(|w| w[0].part_number >= w[1].part_number) {
        return Err(TransferError::provider(
            "complete_multipart",
            format!(
                "InvalidPartOrder: part {} listed after part {}",
                pair[1].part_number, pair[0].part_number
            ),
        ));
    }
    Ok(())
}

/// Reject object keys that would escape a destination root
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TransferError::Validation("empty object key".into()));
    }

    let path = Path::new(key);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(TransferError::Validation(format!(
                    "object key must be a relative path without '..': {}",
                    key
                )))
            }
        }
    }
    Ok(())
}
