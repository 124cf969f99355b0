//! Transfer configuration
//!
//! Every tunable of the engine lives in [`TransferConfig`], which is passed by
//! reference into each transfer. Nothing here is process-global, so several
//! independent transfers can run side by side with different settings.
//!
//! Configuration can be loaded from TOML:
//!
//! ```toml
//! part_size = "64MiB"
//! reader_threads = 4
//! writer_threads = 8
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 500
//! ```

use crate::error::{Result, TransferError};
use crate::planner;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Default part size (96 MiB)
pub const DEFAULT_PART_SIZE: u64 = 96 * MIB;

/// Smallest non-final part S3-compatible stores accept (5 MiB)
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * MIB;

/// Parts larger than this are spooled to disk instead of memory (16 MiB)
pub const DEFAULT_SPOOL_THRESHOLD: u64 = 16 * MIB;

/// Default per-part I/O timeout in seconds
pub const DEFAULT_PART_TIMEOUT_SECS: u64 = 900;

/// Retry ceiling and exponential backoff curve, applied per part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts per part (the first try counts)
    #[validate(range(min = 1, max = 1000))]
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Returns true if a part that has failed `attempts` times may be tried again
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff before retry number `attempt` (1-based): `min(base * 2^(attempt-1), max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);

        let millis = if self.jitter && millis > 0 {
            millis + rand::thread_rng().gen_range(0..=millis / 4)
        } else {
            millis
        };
        Duration::from_millis(millis)
    }
}

/// Engine configuration for one transfer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TransferConfig {
    /// Target part size in bytes (the final part may be shorter)
    #[serde(deserialize_with = "deserialize_size")]
    pub part_size: u64,

    /// Split into this many parts instead of using `part_size`; applies
    /// only when a transfer is planned, a resume keeps its stored part size
    #[validate(range(min = 1, max = 10000))]
    pub part_count: Option<u32>,

    /// Minimum size of every non-final part
    #[serde(deserialize_with = "deserialize_size")]
    pub min_part_size: u64,

    /// Number of byte-range reader threads
    #[validate(range(min = 1, max = 256))]
    pub reader_threads: usize,

    /// Number of part uploader threads
    #[validate(range(min = 1, max = 256))]
    pub writer_threads: usize,

    /// Capacity of the ready-part queue between readers and writers
    /// (0 means one slot per writer)
    pub queue_capacity: usize,

    /// Parts larger than this are spooled to disk
    #[serde(deserialize_with = "deserialize_size")]
    pub spool_threshold: u64,

    /// Directory for disk spool files (system temp dir when unset)
    pub spool_dir: Option<PathBuf>,

    /// Deadline in seconds for each read or upload attempt of a part
    #[validate(range(min = 1))]
    pub part_timeout_secs: u64,

    /// Retry ceiling and backoff curve
    #[validate(nested)]
    pub retry: RetryPolicy,

    /// Abort the provider-side multipart session when a part exhausts its
    /// retries. Off by default: an aborted session discards every uploaded
    /// part, so the next run would have to upload them again.
    pub abort_session_on_failure: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            part_count: None,
            min_part_size: DEFAULT_MIN_PART_SIZE,
            reader_threads: 4,
            writer_threads: 10,
            queue_capacity: 0,
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
            spool_dir: None,
            part_timeout_secs: DEFAULT_PART_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            abort_session_on_failure: false,
        }
    }
}

impl TransferConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TransferConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Validate field ranges and cross-field constraints
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        if self.part_size == 0 {
            return Err(TransferError::Validation(
                "part_size must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(TransferError::Validation(format!(
                "retry.max_delay_ms ({}) is smaller than retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }

        Ok(())
    }

    /// Part size for a newly planned transfer of `total_size` bytes
    pub fn part_size_for(&self, total_size: u64) -> Result<u64> {
        match self.part_count {
            Some(count) => planner::part_size_for_count(total_size, count),
            None => Ok(self.part_size),
        }
    }

    /// Effective capacity of the bounded ready queue
    pub fn queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            self.writer_threads
        } else {
            self.queue_capacity
        }
    }

    /// Per-part I/O timeout
    pub fn part_timeout(&self) -> Duration {
        Duration::from_secs(self.part_timeout_secs)
    }
}

/// Parse a human-readable size such as `"96MB"`, `"64MiB"`, `"512k"` or `"1048576"`
///
/// Suffixes are binary multiples regardless of the `i`: `K`, `M`, `G` and `T`
/// (optionally followed by `B` or `iB`) mean powers of 1024.
pub fn parse_size(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(TransferError::Validation(format!(
            "invalid size '{}': missing number",
            text
        )));
    }

    let value: u64 = digits
        .parse()
        .map_err(|e| TransferError::Validation(format!("invalid size '{}': {}", text, e)))?;

    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        "t" | "tb" | "tib" => TIB,
        other => {
            return Err(TransferError::Validation(format!(
                "invalid size '{}': unknown suffix '{}'",
                text, other
            )))
        }
    };

    value.checked_mul(multiplier).ok_or_else(|| {
        TransferError::Validation(format!("invalid size '{}': overflows u64", text))
    })
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Bytes(u64),
        Text(String),
    }

    match RawSize::deserialize(deserializer)? {
        RawSize::Bytes(n) => Ok(n),
        RawSize::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}
