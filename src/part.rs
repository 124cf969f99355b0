//! Transfer data model
//!
//! A transfer splits one source object into contiguous [`PartInfo`] byte
//! ranges. Each part moves through
//! `Planned -> Reading -> Read -> Uploading -> Uploaded`, with `Failed` as the
//! terminal state for parts that exhausted their retries. The object-level
//! facts (source, destination, size, provider session) live in a
//! [`TransferRecord`]; the two together form a [`TransferPlan`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lifecycle state of a single part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartStatus {
    Planned,
    Reading,
    Read,
    Uploading,
    Uploaded,
    Failed,
}

impl PartStatus {
    /// Stable string form used by the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            PartStatus::Planned => "PLANNED",
            PartStatus::Reading => "READING",
            PartStatus::Read => "READ",
            PartStatus::Uploading => "UPLOADING",
            PartStatus::Uploaded => "UPLOADED",
            PartStatus::Failed => "FAILED",
        }
    }

    /// Parse the ledger string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLANNED" => Some(PartStatus::Planned),
            "READING" => Some(PartStatus::Reading),
            "READ" => Some(PartStatus::Read),
            "UPLOADING" => Some(PartStatus::Uploading),
            "UPLOADED" => Some(PartStatus::Uploaded),
            "FAILED" => Some(PartStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contiguous byte range of the source object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    /// 1-based position in the final object
    pub part_number: u32,
    /// First byte of the range in the source object
    pub offset: u64,
    /// Number of bytes in the range
    pub length: u64,
    pub status: PartStatus,
    /// Provider-issued identifier, present once the part is uploaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Failed attempts consumed so far
    #[serde(default)]
    pub attempt_count: u32,
}

impl PartInfo {
    /// A fresh part in the `Planned` state
    pub fn planned(part_number: u32, offset: u64, length: u64) -> Self {
        Self {
            part_number,
            offset,
            length,
            status: PartStatus::Planned,
            etag: None,
            attempt_count: 0,
        }
    }

    /// One past the last byte of the range
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn is_uploaded(&self) -> bool {
        self.status == PartStatus::Uploaded
    }

    /// Drop any partial progress and return to `Planned`
    pub fn reset(&mut self) {
        self.status = PartStatus::Planned;
        self.etag = None;
        self.attempt_count = 0;
    }
}

/// Stable identity of a logical transfer, derived from its endpoints
///
/// Re-invoking the same `(source, destination)` pair yields the same id, which
/// is how a second run finds the ledger of an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Hex length of a derived id (128 bits of SHA-256)
    const HEX_LEN: usize = 32;

    /// Derive the id for a source/destination pair
    pub fn derive(source: &str, destination: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(destination.as_bytes());
        let digest = hex::encode(hasher.finalize());
        TransferId(digest[..Self::HEX_LEN].to_string())
    }

    /// Wrap an id read back from storage
    pub fn from_raw(id: impl Into<String>) -> Self {
        TransferId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Orchestrator state, persisted so a later run knows how the last one ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Planning,
    Transferring,
    Merging,
    Done,
    Aborted,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Planning => "PLANNING",
            TransferState::Transferring => "TRANSFERRING",
            TransferState::Merging => "MERGING",
            TransferState::Done => "DONE",
            TransferState::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLANNING" => Some(TransferState::Planning),
            "TRANSFERRING" => Some(TransferState::Transferring),
            "MERGING" => Some(TransferState::Merging),
            "DONE" => Some(TransferState::Done),
            "ABORTED" => Some(TransferState::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object-level metadata of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub source: String,
    pub destination: String,
    /// Source object size at planning time
    pub total_size: u64,
    /// Source modification time at planning time, when the source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<DateTime<Utc>>,
    pub part_size: u64,
    /// Provider multipart session, `None` until opened or after it was released
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub state: TransferState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// A new record in the `Planning` state
    pub fn new(source: &str, destination: &str, total_size: u64, part_size: u64) -> Self {
        let now = Utc::now();
        Self {
            transfer_id: TransferId::derive(source, destination),
            source: source.to_string(),
            destination: destination.to_string(),
            total_size,
            source_modified: None,
            part_size,
            upload_id: None,
            state: TransferState::Planning,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state` and bump the update timestamp
    pub fn transition(&mut self, state: TransferState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Full partition of one source object, ordered by part number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub record: TransferRecord,
    pub parts: Vec<PartInfo>,
}

impl TransferPlan {
    pub fn transfer_id(&self) -> &TransferId {
        &self.record.transfer_id
    }

    /// Parts that still need to be read and uploaded
    pub fn pending(&self) -> impl Iterator<Item = &PartInfo> {
        self.parts.iter().filter(|p| !p.is_uploaded())
    }

    /// Part numbers not yet uploaded
    pub fn outstanding(&self) -> Vec<u32> {
        self.pending().map(|p| p.part_number).collect()
    }

    /// True once every part is uploaded
    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(PartInfo::is_uploaded)
    }

    /// Bytes covered by uploaded parts
    pub fn uploaded_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| p.is_uploaded())
            .map(|p| p.length)
            .sum()
    }
}

/// Portable copy of a transfer's ledger state
///
/// This is the "part infos" document callers persist between process runs and
/// hand back as the `prior` argument of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub record: TransferRecord,
    pub parts: Vec<PartInfo>,
}

impl TransferSnapshot {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<TransferPlan> for TransferSnapshot {
    fn from(plan: TransferPlan) -> Self {
        Self {
            record: plan.record,
            parts: plan.parts,
        }
    }
}

/// Collapse sorted part numbers into runs: `[1, 2, 3, 5, 7, 8]` -> `"1-3,5,7-8"`
pub fn collapse_runs(numbers: &[u32]) -> String {
    let mut runs: Vec<String> = Vec::new();
    let mut iter = numbers.iter().copied();

    let Some(first) = iter.next() else {
        return String::new();
    };

    fn push(start: u32, end: u32, runs: &mut Vec<String>) {
        if start == end {
            runs.push(start.to_string());
        } else {
            runs.push(format!("{}-{}", start, end));
        }
    }

    let (mut start, mut prev) = (first, first);

    for n in iter {
        if n == prev + 1 {
            prev = n;
        } else {
            push(start, prev, &mut runs);
            start = n;
            prev = n;
        }
    }
    push(start, prev, &mut runs);

    runs.join(",")
}
