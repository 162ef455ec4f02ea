//! Ordered log of local mutations awaiting sync

use crate::error::Result;
use crate::models::{Mutation, MutationAction, MutationEntry, RecordId, RecordKind};
use crate::util::unix_millis_now;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

/// Append-only queue of local intent
pub trait MutationQueue {
    /// Append an entry, assigning the next sequence number
    fn append(&self, entry: &MutationEntry) -> Result<Mutation>;

    /// All entries in sequence order, without removing them
    fn pending(&self) -> Result<Vec<Mutation>>;

    /// Remove and return every entry in one transaction
    fn drain(&self) -> Result<Vec<Mutation>>;

    /// Remove the entries for one record up to and including `up_to_seq`
    fn acknowledge(
        &self,
        kind: RecordKind,
        record_id: &RecordId,
        up_to_seq: i64,
    ) -> Result<usize>;

    /// Number of queued entries
    fn len(&self) -> Result<usize>;

    /// Whether the queue holds no entries
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// `SQLite` implementation of the mutation queue
pub struct SqliteMutationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMutationQueue<'a> {
    /// Create a new queue over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

const SELECT_COLUMNS: &str = "seq, kind, action, record_id, snapshot, timestamp";

/// Append inside whatever transaction the caller holds on `conn`
pub(crate) fn append_entry(conn: &Connection, entry: &MutationEntry) -> Result<Mutation> {
    let last: i64 = conn.query_row(
        "SELECT COALESCE(MAX(timestamp), 0) FROM mutations",
        [],
        |row| row.get(0),
    )?;
    let timestamp = unix_millis_now().max(last);

    conn.execute(
        "INSERT INTO mutations (kind, action, record_id, snapshot, timestamp)
         VALUES (?, ?, ?, ?, ?)",
        params![
            entry.kind.as_str(),
            entry.action.as_str(),
            entry.record_id.as_str(),
            entry.snapshot,
            timestamp,
        ],
    )?;

    Ok(Mutation {
        seq: conn.last_insert_rowid(),
        kind: entry.kind,
        action: entry.action,
        record_id: entry.record_id,
        snapshot: entry.snapshot.clone(),
        timestamp,
    })
}

fn select_all(conn: &Connection) -> Result<Vec<Mutation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM mutations ORDER BY seq"
    ))?;
    let mutations = stmt
        .query_map([], row_to_mutation)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(mutations)
}

fn row_to_mutation(row: &Row<'_>) -> rusqlite::Result<Mutation> {
    let kind: String = row.get(1)?;
    let action: String = row.get(2)?;
    let record_id: String = row.get(3)?;

    Ok(Mutation {
        seq: row.get(0)?,
        kind: kind
            .parse::<RecordKind>()
            .map_err(|e| conversion_error(1, e))?,
        action: action
            .parse::<MutationAction>()
            .map_err(|e| conversion_error(2, e))?,
        record_id: record_id
            .parse::<RecordId>()
            .map_err(|e| conversion_error(3, e.to_string()))?,
        snapshot: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

impl MutationQueue for SqliteMutationQueue<'_> {
    fn append(&self, entry: &MutationEntry) -> Result<Mutation> {
        append_entry(self.conn, entry)
    }

    fn pending(&self) -> Result<Vec<Mutation>> {
        select_all(self.conn)
    }

    fn drain(&self) -> Result<Vec<Mutation>> {
        let tx = self.conn.unchecked_transaction()?;
        let mutations = select_all(&tx)?;
        tx.execute("DELETE FROM mutations", [])?;
        tx.commit()?;
        Ok(mutations)
    }

    fn acknowledge(
        &self,
        kind: RecordKind,
        record_id: &RecordId,
        up_to_seq: i64,
    ) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM mutations WHERE kind = ? AND record_id = ? AND seq <= ?",
            params![kind.as_str(), record_id.as_str(), up_to_seq],
        )?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM mutations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
