//! Per-record sync bookkeeping: remote ids, in-flight markers, blocks

use crate::error::Result;
use crate::models::{RecordId, RecordKind, RecordSyncState};
use crate::util::unix_millis_now;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Repository trait for sync state
pub trait SyncStateRepository {
    /// Get the sync state of one record
    fn get(&self, kind: RecordKind, id: &RecordId) -> Result<Option<RecordSyncState>>;

    /// Record that a push is about to be sent
    fn mark_in_flight(&self, kind: RecordKind, id: &RecordId) -> Result<()>;

    /// Remember the server-assigned id without finishing the push
    fn set_remote_id(&self, kind: RecordKind, id: &RecordId, remote_id: &str) -> Result<()>;

    /// Record a definitive success
    fn record_success(&self, kind: RecordKind, id: &RecordId, remote_id: &str) -> Result<()>;

    /// Record a retriable failure; the in-flight marker is kept
    fn record_failure(&self, kind: RecordKind, id: &RecordId, error: &str) -> Result<()>;

    /// Block the record until it is edited locally.
    ///
    /// The in-flight marker survives, so a create that may have landed is
    /// still looked up before the record is sent again.
    fn block(&self, kind: RecordKind, id: &RecordId, reason: &str) -> Result<()>;

    /// Forget a remote id the server no longer recognizes
    fn forget_remote_id(&self, kind: RecordKind, id: &RecordId) -> Result<()>;

    /// Drop all bookkeeping for a record
    fn remove(&self, kind: RecordKind, id: &RecordId) -> Result<()>;

    /// All records currently blocked
    fn list_blocked(&self) -> Result<Vec<RecordSyncState>>;

    /// Records the server still holds but that no longer exist locally
    fn list_orphaned(&self) -> Result<Vec<RecordSyncState>>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Make sure a row exists so the updates below have something to touch
    fn ensure_row(&self, kind: RecordKind, id: &RecordId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_state (kind, record_id, updated_at) VALUES (?, ?, ?)",
            params![kind.as_str(), id.as_str(), unix_millis_now()],
        )?;
        Ok(())
    }

    fn update(
        &self,
        kind: RecordKind,
        id: &RecordId,
        assignments: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.ensure_row(kind, id)?;
        let sql = format!(
            "UPDATE sync_state SET {assignments}, updated_at = ?2 WHERE kind = ?3 AND record_id = ?4"
        );
        self.conn.execute(
            &sql,
            params![value, unix_millis_now(), kind.as_str(), id.as_str()],
        )?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str =
    "kind, record_id, remote_id, in_flight_since, attempts, last_error, blocked_reason";

fn row_to_state(row: &Row<'_>) -> rusqlite::Result<RecordSyncState> {
    let kind: String = row.get(0)?;
    let record_id: String = row.get(1)?;
    Ok(RecordSyncState {
        kind: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
        })?,
        record_id: record_id.parse().map_err(|e: uuid::Error| {
            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
        })?,
        remote_id: row.get(2)?,
        in_flight_since: row.get(3)?,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        blocked_reason: row.get(6)?,
    })
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn get(&self, kind: RecordKind, id: &RecordId) -> Result<Option<RecordSyncState>> {
        let state = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM sync_state WHERE kind = ? AND record_id = ?"
                ),
                params![kind.as_str(), id.as_str()],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    fn mark_in_flight(&self, kind: RecordKind, id: &RecordId) -> Result<()> {
        self.ensure_row(kind, id)?;
        let now = unix_millis_now();
        self.conn.execute(
            "UPDATE sync_state
             SET in_flight_since = COALESCE(in_flight_since, ?1),
                 attempts = attempts + 1,
                 updated_at = ?1
             WHERE kind = ?2 AND record_id = ?3",
            params![now, kind.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    fn set_remote_id(&self, kind: RecordKind, id: &RecordId, remote_id: &str) -> Result<()> {
        self.update(kind, id, "remote_id = ?1", Some(remote_id))
    }

    fn record_success(&self, kind: RecordKind, id: &RecordId, remote_id: &str) -> Result<()> {
        self.update(
            kind,
            id,
            "remote_id = ?1, in_flight_since = NULL, attempts = 0, last_error = NULL, \
             blocked_reason = NULL",
            Some(remote_id),
        )
    }

    fn record_failure(&self, kind: RecordKind, id: &RecordId, error: &str) -> Result<()> {
        self.update(kind, id, "last_error = ?1", Some(error))
    }

    fn block(&self, kind: RecordKind, id: &RecordId, reason: &str) -> Result<()> {
        self.update(
            kind,
            id,
            "blocked_reason = ?1, last_error = ?1",
            Some(reason),
        )
    }

    fn forget_remote_id(&self, kind: RecordKind, id: &RecordId) -> Result<()> {
        self.update(kind, id, "remote_id = ?1, in_flight_since = NULL", None)
    }

    fn remove(&self, kind: RecordKind, id: &RecordId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_state WHERE kind = ? AND record_id = ?",
            params![kind.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    fn list_blocked(&self) -> Result<Vec<RecordSyncState>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_state
             WHERE blocked_reason IS NOT NULL
             ORDER BY kind, updated_at"
        ))?;
        let states = stmt
            .query_map([], row_to_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn list_orphaned(&self) -> Result<Vec<RecordSyncState>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_state s
             WHERE s.remote_id IS NOT NULL
               AND NOT (s.kind = 'animal' AND EXISTS (SELECT 1 FROM animals a WHERE a.id = s.record_id))
               AND NOT (s.kind = 'care' AND EXISTS (SELECT 1 FROM care_records c WHERE c.id = s.record_id))
             ORDER BY s.kind, s.updated_at"
        ))?;
        let states = stmt
            .query_map([], row_to_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, RecordRepository, SqliteRecordRepository};
    use crate::models::Animal;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_missing_state_is_none() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());
        assert!(repo.get(RecordKind::Animal, &RecordId::new()).unwrap().is_none());
    }

    #[test]
    fn test_in_flight_then_success() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());
        let id = RecordId::new();

        repo.mark_in_flight(RecordKind::Animal, &id).unwrap();
        let in_flight = repo.get(RecordKind::Animal, &id).unwrap().unwrap();
        assert!(in_flight.in_flight_since.is_some());
        assert_eq!(in_flight.attempts, 1);
        assert_eq!(in_flight.remote_id, None);

        repo.record_success(RecordKind::Animal, &id, "665f1c2e").unwrap();
        let done = repo.get(RecordKind::Animal, &id).unwrap().unwrap();
        assert_eq!(done.remote_id.as_deref(), Some("665f1c2e"));
        assert_eq!(done.in_flight_since, None);
        assert_eq!(done.attempts, 0);
    }

    #[test]
    fn test_failure_keeps_in_flight_marker() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());
        let id = RecordId::new();

        repo.mark_in_flight(RecordKind::Care, &id).unwrap();
        let since = repo
            .get(RecordKind::Care, &id)
            .unwrap()
            .unwrap()
            .in_flight_since;
        repo.record_failure(RecordKind::Care, &id, "connection refused")
            .unwrap();
        repo.mark_in_flight(RecordKind::Care, &id).unwrap();

        let state = repo.get(RecordKind::Care, &id).unwrap().unwrap();
        assert_eq!(state.in_flight_since, since);
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_block_and_list_blocked() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());
        let blocked = RecordId::new();
        let fine = RecordId::new();

        repo.block(RecordKind::Animal, &blocked, "breed is required")
            .unwrap();
        repo.mark_in_flight(RecordKind::Animal, &fine).unwrap();

        let listed = repo.list_blocked().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].record_id, blocked);
        assert_eq!(listed[0].blocked_reason.as_deref(), Some("breed is required"));
    }

    #[test]
    fn test_local_edit_clears_block() {
        let db = setup();
        let records = SqliteRecordRepository::new(db.connection());
        let repo = SqliteSyncStateRepository::new(db.connection());

        let mut animal = Animal::new(
            "Nibbles",
            "Rabbit",
            "",
            NaiveDate::from_ymd_opt(2023, 4, 4).unwrap(),
            1.4,
        );
        animal = records.put_animal(&animal).unwrap();
        repo.block(RecordKind::Animal, &animal.id, "breed is required")
            .unwrap();

        animal.breed = "Lop".to_string();
        records.put_animal(&animal).unwrap();

        let state = repo.get(RecordKind::Animal, &animal.id).unwrap().unwrap();
        assert_eq!(state.blocked_reason, None);
        assert!(repo.list_blocked().unwrap().is_empty());
    }

    #[test]
    fn test_forget_remote_id_and_remove() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());
        let id = RecordId::new();

        repo.record_success(RecordKind::Animal, &id, "abc").unwrap();
        repo.forget_remote_id(RecordKind::Animal, &id).unwrap();
        assert_eq!(
            repo.get(RecordKind::Animal, &id).unwrap().unwrap().remote_id,
            None
        );

        repo.remove(RecordKind::Animal, &id).unwrap();
        assert!(repo.get(RecordKind::Animal, &id).unwrap().is_none());
    }

    #[test]
    fn test_list_orphaned_skips_live_and_unpushed_records() {
        let db = setup();
        let records = SqliteRecordRepository::new(db.connection());
        let repo = SqliteSyncStateRepository::new(db.connection());

        let live = records
            .put_animal(&Animal::new(
                "Pip",
                "Rabbit",
                "Lop",
                NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
                2.0,
            ))
            .unwrap();
        repo.record_success(RecordKind::Animal, &live.id, "srv-live")
            .unwrap();

        let gone = RecordId::new();
        repo.record_success(RecordKind::Animal, &gone, "srv-gone")
            .unwrap();

        let gone_care = RecordId::new();
        repo.record_success(RecordKind::Care, &gone_care, "srv-care")
            .unwrap();

        let never_pushed = RecordId::new();
        repo.mark_in_flight(RecordKind::Animal, &never_pushed)
            .unwrap();

        let orphaned: Vec<(RecordKind, RecordId)> = repo
            .list_orphaned()
            .unwrap()
            .into_iter()
            .map(|state| (state.kind, state.record_id))
            .collect();
        assert_eq!(
            orphaned,
            vec![(RecordKind::Animal, gone), (RecordKind::Care, gone_care)]
        );
    }
}
