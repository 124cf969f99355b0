//! # partcopy - Resumable Multi-Part Object Copy
//!
//! `partcopy` moves very large objects into S3-compatible stores over
//! unreliable networks. An object is split into fixed-size parts that are read
//! by byte range, uploaded independently as multipart-upload parts, and
//! assembled by the destination. Progress is recorded per part in a durable
//! ledger, so an interrupted copy resumes without moving finished parts again.
//!
//! - **Parallel pools**: byte-range readers and part uploaders run as separate
//!   thread pools joined by a bounded queue (backpressure)
//! - **Per-part retries** with exponential backoff and a configurable ceiling
//! - **Resume** from a SQLite ledger or a caller-held JSON snapshot
//! - **Pluggable storage**: in-memory, local directory, and S3 (feature `s3`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use partcopy::{
//!     copy_large_object, DirDestination, FileSource, SqliteLedger, TransferConfig,
//! };
//!
//! # fn main() -> partcopy::Result<()> {
//! let config = TransferConfig::default();
//! let ledger = SqliteLedger::open("transfers.db")?;
//! let source = FileSource::new();
//! let destination = DirDestination::new("/mnt/archive")?;
//!
//! let summary = copy_large_object(
//!     &config,
//!     &ledger,
//!     &source,
//!     &destination,
//!     "/data/train-shard-0001.tar",
//!     "shards/train-shard-0001.tar",
//!     None,
//! )?;
//! println!("{} bytes in {:?}", summary.bytes_moved, summary.elapsed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Resuming
//!
//! Calling the same copy again after a failure picks up the ledger of the
//! earlier run. Callers that keep their own records can export the ledger
//! state with [`Orchestrator::snapshot`] and hand it back as `prior`.
//!
//! ```rust,no_run
//! use partcopy::{MemoryDestination, MemoryLedger, MemorySource, Orchestrator, TransferConfig};
//!
//! # fn main() -> partcopy::Result<()> {
//! # let config = TransferConfig::default();
//! # let source = MemorySource::new();
//! # let destination = MemoryDestination::new();
//! let ledger = MemoryLedger::new();
//! let orchestrator = Orchestrator::new(&config, &ledger, &source, &destination);
//!
//! if orchestrator.run("src.bin", "dst.bin", None).is_err() {
//!     let snapshot = orchestrator.snapshot("src.bin", "dst.bin")?;
//!     let json = snapshot.map(|s| s.to_json()).transpose()?;
//!     // persist `json` somewhere, then later:
//!     // orchestrator.run("src.bin", "dst.bin", Some(&TransferSnapshot::from_json(&json)?))
//! #   let _ = json;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod merge;
pub mod orchestrator;
pub mod part;
pub(crate) mod pipeline;
pub mod planner;
pub mod provider;
pub mod signal;
pub mod spool;

pub use config::{parse_size, RetryPolicy, TransferConfig};
pub use error::{Result, TransferError};
pub use ledger::{Ledger, MemoryLedger, SqliteLedger};
pub use orchestrator::{copy_large_object, Orchestrator, TransferSummary};
pub use part::{
    collapse_runs, PartInfo, PartStatus, TransferId, TransferPlan, TransferRecord,
    TransferSnapshot, TransferState,
};
pub use provider::{
    time_left, CompletedPart, DirDestination, FileSource, MemoryDestination, MemorySource,
    MultipartDestination, RangeSource,
};
pub use signal::CancelHandle;

#[cfg(feature = "s3")]
pub use provider::{S3Context, S3Destination, S3Options, S3Source};
