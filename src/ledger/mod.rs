//! Durable per-part progress records
//!
//! The ledger is the single source of truth for a transfer. Every part state
//! transition is written here as it happens, keyed by
//! `(transfer_id, part_number)`, so a process that dies at any point can be
//! restarted and pick up where it left off. In-memory plan state is only a
//! cache that is rebuilt from the ledger on resume.

mod sqlite;

pub use sqlite::SqliteLedger;

use crate::error::Result;
use crate::part::{PartInfo, TransferId, TransferPlan, TransferRecord, TransferSnapshot};
use crate::planner;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Persistence backend for transfer progress
///
/// Implementations must be safe to share between reader and writer threads.
/// Concurrent calls only ever touch different `(transfer_id, part_number)`
/// rows, since a part belongs to exactly one worker at a time.
pub trait Ledger: Send + Sync {
    /// Object-level record of a transfer, if one exists
    fn load_record(&self, id: &TransferId) -> Result<Option<TransferRecord>>;

    /// Insert or replace the object-level record
    fn save_record(&self, record: &TransferRecord) -> Result<()>;

    /// Insert or replace one part row
    fn put_part(&self, id: &TransferId, part: &PartInfo) -> Result<()>;

    /// Point read of one part row
    fn get_part(&self, id: &TransferId, part_number: u32) -> Result<Option<PartInfo>>;

    /// All part rows of a transfer, ascending by part number
    fn parts(&self, id: &TransferId) -> Result<Vec<PartInfo>>;

    /// Remove the record and every part row of a transfer
    fn clear(&self, id: &TransferId) -> Result<()>;

    /// Every transfer the ledger knows about
    fn transfers(&self) -> Result<Vec<TransferRecord>>;

    /// Write many part rows; backends may batch this
    fn put_parts(&self, id: &TransferId, parts: &[PartInfo]) -> Result<()> {
        for part in parts {
            self.put_part(id, part)?;
        }
        Ok(())
    }

    /// Rebuild the in-memory plan of a transfer
    fn load_plan(&self, id: &TransferId) -> Result<Option<TransferPlan>> {
        let Some(record) = self.load_record(id)? else {
            return Ok(None);
        };
        let parts = self.parts(id)?;
        Ok(Some(TransferPlan { record, parts }))
    }

    /// Export a transfer for external persistence
    fn snapshot(&self, id: &TransferId) -> Result<Option<TransferSnapshot>> {
        Ok(self.load_plan(id)?.map(TransferSnapshot::from))
    }

    /// Replace a transfer's rows with an externally persisted snapshot
    ///
    /// The snapshot must describe a complete partition of its object.
    fn import(&self, snapshot: &TransferSnapshot) -> Result<()> {
        planner::verify_partition(&snapshot.parts, snapshot.record.total_size)?;
        let id = &snapshot.record.transfer_id;
        self.clear(id)?;
        self.save_record(&snapshot.record)?;
        self.put_parts(id, &snapshot.parts)
    }
}

/// Ledger that lives only as long as the process
///
/// Useful for tests and for one-shot copies where the caller persists
/// [`TransferSnapshot`]s itself.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<TransferId, TransferRecord>>,
    parts: RwLock<BTreeMap<(TransferId, u32), PartInfo>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    fn load_record(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn save_record(&self, record: &TransferRecord) -> Result<()> {
        self.records
            .write()
            .insert(record.transfer_id.clone(), record.clone());
        Ok(())
    }

    fn put_part(&self, id: &TransferId, part: &PartInfo) -> Result<()> {
        self.parts
            .write()
            .insert((id.clone(), part.part_number), part.clone());
        Ok(())
    }

    fn get_part(&self, id: &TransferId, part_number: u32) -> Result<Option<PartInfo>> {
        Ok(self.parts.read().get(&(id.clone(), part_number)).cloned())
    }

    fn parts(&self, id: &TransferId) -> Result<Vec<PartInfo>> {
        let parts = self.parts.read();
        Ok(parts
            .range((id.clone(), 0)..=(id.clone(), u32::MAX))
            .map(|(_, part)| part.clone())
            .collect())
    }

    fn clear(&self, id: &TransferId) -> Result<()> {
        self.records.write().remove(id);
        self.parts.write().retain(|(owner, _), _| owner != id);
        Ok(())
    }

    fn transfers(&self) -> Result<Vec<TransferRecord>> {
        let mut records: Vec<TransferRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
