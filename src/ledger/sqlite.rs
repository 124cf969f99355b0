//! SQLite-backed ledger
//!
//! One `transfers` row per transfer and one `parts` row per
//! `(transfer_id, part_number)`. Every call is its own short transaction, so a
//! crash never loses more than the transition that was in flight.

use super::Ledger;
use crate::error::{Result, TransferError};
use crate::part::{PartInfo, PartStatus, TransferId, TransferRecord, TransferState};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS transfers (
        transfer_id  TEXT PRIMARY KEY,
        source       TEXT NOT NULL,
        destination  TEXT NOT NULL,
        total_size   INTEGER NOT NULL,
        part_size    INTEGER NOT NULL,
        upload_id    TEXT,
        state        TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        updated_at   TEXT NOT NULL,
        source_modified TEXT
    );
    CREATE TABLE IF NOT EXISTS parts (
        transfer_id   TEXT NOT NULL,
        part_number   INTEGER NOT NULL,
        byte_offset   INTEGER NOT NULL,
        byte_length   INTEGER NOT NULL,
        status        TEXT NOT NULL,
        etag          TEXT,
        attempt_count INTEGER NOT NULL,
        PRIMARY KEY (transfer_id, part_number)
    );
"#;

const UPSERT_PART: &str = r#"
    INSERT OR REPLACE INTO parts
        (transfer_id, part_number, byte_offset, byte_length, status, etag, attempt_count)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

const SELECT_PART: &str = r#"
    SELECT part_number, byte_offset, byte_length, status, etag, attempt_count
    FROM parts
"#;

const SELECT_TRANSFER: &str = r#"
    SELECT transfer_id, source, destination, total_size, part_size,
           upload_id, state, created_at, updated_at, source_modified
    FROM transfers
"#;

/// Ledger persisted in a SQLite database file
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) a ledger database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!("Opened ledger database {}", path.as_ref().display());
        Self::init(conn)
    }

    /// Ledger in a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        add_missing_columns(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Ledgers written before `source_modified` existed lack the column
fn add_missing_columns(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('transfers')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if !columns.iter().any(|name| name == "source_modified") {
        debug!("Adding source_modified column to ledger");
        conn.execute("ALTER TABLE transfers ADD COLUMN source_modified TEXT", [])?;
    }
    Ok(())
}

type PartRow = (i64, i64, i64, String, Option<String>, i64);

type TransferRow = (
    String,
    String,
    String,
    i64,
    i64,
    Option<String>,
    String,
    String,
    String,
    Option<String>,
);

fn to_sql_int(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| TransferError::Validation(format!("{} {} does not fit the ledger", what, value)))
}

fn from_sql_int<T: TryFrom<i64>>(value: i64, what: &str) -> Result<T> {
    T::try_from(value)
        .map_err(|_| TransferError::Validation(format!("corrupt ledger: {} is {}", what, value)))
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| TransferError::Validation(format!("corrupt ledger timestamp '{}': {}", text, e)))
}

fn part_from_row(row: PartRow) -> Result<PartInfo> {
    let (part_number, offset, length, status, etag, attempt_count) = row;
    let status = PartStatus::parse(&status).ok_or_else(|| {
        TransferError::Validation(format!("corrupt ledger: unknown part status '{}'", status))
    })?;
    Ok(PartInfo {
        part_number: from_sql_int(part_number, "part_number")?,
        offset: from_sql_int(offset, "byte_offset")?,
        length: from_sql_int(length, "byte_length")?,
        status,
        etag,
        attempt_count: from_sql_int(attempt_count, "attempt_count")?,
    })
}

fn record_from_row(row: TransferRow) -> Result<TransferRecord> {
    let (id, source, destination, total_size, part_size, upload_id, state, created, updated, modified) =
        row;
    let state = TransferState::parse(&state).ok_or_else(|| {
        TransferError::Validation(format!("corrupt ledger: unknown transfer state '{}'", state))
    })?;
    Ok(TransferRecord {
        transfer_id: TransferId::from_raw(id),
        source,
        destination,
        total_size: from_sql_int(total_size, "total_size")?,
        source_modified: modified.as_deref().map(parse_timestamp).transpose()?,
        part_size: from_sql_int(part_size, "part_size")?,
        upload_id,
        state,
        created_at: parse_timestamp(&created)?,
        updated_at: parse_timestamp(&updated)?,
    })
}

fn read_transfer_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransferRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn read_part_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn upsert_part(conn: &Connection, id: &TransferId, part: &PartInfo) -> Result<()> {
    conn.execute(
        UPSERT_PART,
        (
            id.as_str(),
            i64::from(part.part_number),
            to_sql_int(part.offset, "offset")?,
            to_sql_int(part.length, "length")?,
            part.status.as_str(),
            part.etag.as_deref(),
            i64::from(part.attempt_count),
        ),
    )?;
    Ok(())
}

impl Ledger for SqliteLedger {
    fn load_record(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{} WHERE transfer_id = ?1", SELECT_TRANSFER),
                (id.as_str(),),
                read_transfer_row,
            )
            .optional()?;
        row.map(record_from_row).transpose()
    }

    fn save_record(&self, record: &TransferRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO transfers
                (transfer_id, source, destination, total_size, part_size,
                 upload_id, state, created_at, updated_at, source_modified)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            (
                record.transfer_id.as_str(),
                record.source.as_str(),
                record.destination.as_str(),
                to_sql_int(record.total_size, "total_size")?,
                to_sql_int(record.part_size, "part_size")?,
                record.upload_id.as_deref(),
                record.state.as_str(),
                timestamp(&record.created_at),
                timestamp(&record.updated_at),
                record.source_modified.as_ref().map(timestamp),
            ),
        )?;
        Ok(())
    }

    fn put_part(&self, id: &TransferId, part: &PartInfo) -> Result<()> {
        let conn = self.conn.lock();
        upsert_part(&conn, id, part)
    }

    fn put_parts(&self, id: &TransferId, parts: &[PartInfo]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for part in parts {
            upsert_part(&tx, id, part)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_part(&self, id: &TransferId, part_number: u32) -> Result<Option<PartInfo>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{} WHERE transfer_id = ?1 AND part_number = ?2", SELECT_PART),
                (id.as_str(), i64::from(part_number)),
                read_part_row,
            )
            .optional()?;
        row.map(part_from_row).transpose()
    }

    fn parts(&self, id: &TransferId) -> Result<Vec<PartInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE transfer_id = ?1 ORDER BY part_number",
            SELECT_PART
        ))?;
        let rows = stmt
            .query_map((id.as_str(),), read_part_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(part_from_row).collect()
    }

    fn clear(&self, id: &TransferId) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM parts WHERE transfer_id = ?1", (id.as_str(),))?;
        tx.execute("DELETE FROM transfers WHERE transfer_id = ?1", (id.as_str(),))?;
        tx.commit()?;
        debug!("Cleared ledger rows of transfer {}", id);
        Ok(())
    }

    fn transfers(&self) -> Result<Vec<TransferRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at", SELECT_TRANSFER))?;
        let rows = stmt
            .query_map((), read_transfer_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(record_from_row).collect()
    }
}
