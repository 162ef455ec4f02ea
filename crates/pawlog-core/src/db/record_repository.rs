//! Animal and care record persistence

use crate::error::Result;
use crate::models::{Animal, CareRecord, CareType, MutationEntry, RecordId, RecordKind};
use crate::util::unix_millis_now;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::mutation_queue::append_entry;

/// Repository trait for the local record stores
pub trait RecordRepository {
    /// Insert or replace an animal, queueing a save for sync
    fn put_animal(&self, animal: &Animal) -> Result<Animal>;

    /// Get an animal by id
    fn get_animal(&self, id: &RecordId) -> Result<Option<Animal>>;

    /// List all animals in storage order
    fn list_animals(&self) -> Result<Vec<Animal>>;

    /// Hard-delete an animal, queueing a delete for sync
    fn delete_animal(&self, id: &RecordId) -> Result<bool>;

    /// Insert or replace a care record, queueing a save for sync
    fn put_care_record(&self, record: &CareRecord) -> Result<CareRecord>;

    /// Get a care record by id
    fn get_care_record(&self, id: &RecordId) -> Result<Option<CareRecord>>;

    /// List all care records in storage order
    fn list_care_records(&self) -> Result<Vec<CareRecord>>;

    /// List care records belonging to one animal
    fn list_care_records_by_animal(&self, animal_id: &RecordId) -> Result<Vec<CareRecord>>;

    /// Hard-delete a care record, queueing a delete for sync
    fn delete_care_record(&self, id: &RecordId) -> Result<bool>;

    /// Records of one kind whose latest version the server has not confirmed
    fn list_unsynced(&self, kind: RecordKind) -> Result<Vec<RecordId>>;

    /// Set `synced` only if the record still carries `expected_last_modified`
    fn mark_synced(
        &self,
        kind: RecordKind,
        id: &RecordId,
        expected_last_modified: i64,
    ) -> Result<bool>;

    /// Whether a record of the given kind exists locally
    fn exists(&self, kind: RecordKind, id: &RecordId) -> Result<bool>;

    /// Find record ids by prefix, used for short-id resolution
    fn find_ids_by_prefix(
        &self,
        kind: RecordKind,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<RecordId>>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

const fn table_for(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Animal => "animals",
        RecordKind::Care => "care_records",
    }
}

const ANIMAL_COLUMNS: &str = "id, name, species, breed, date_of_birth, weight, color, \
     medical_history, vaccinations, last_checkup, synced, last_modified";

const CARE_COLUMNS: &str =
    "id, animal_id, care_type, date, notes, next_due, completed_by, synced, last_modified";

/// Every write is strictly newer than the version it replaces, even when
/// the wall clock stalls or steps backwards.
fn next_stamp(previous: Option<i64>) -> i64 {
    let now = unix_millis_now();
    previous.map_or(now, |previous| now.max(previous + 1))
}

fn previous_stamp(conn: &Connection, kind: RecordKind, id: &RecordId) -> Result<Option<i64>> {
    let stamp = conn
        .query_row(
            &format!(
                "SELECT last_modified FROM {} WHERE id = ?",
                table_for(kind)
            ),
            [id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stamp)
}

/// A fresh local write supersedes whatever made the previous version unpushable
fn clear_blocked(conn: &Connection, kind: RecordKind, id: &RecordId) -> Result<()> {
    conn.execute(
        "UPDATE sync_state SET blocked_reason = NULL, last_error = NULL, updated_at = ?
         WHERE kind = ? AND record_id = ? AND blocked_reason IS NOT NULL",
        params![unix_millis_now(), kind.as_str(), id.as_str()],
    )?;
    Ok(())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn id_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<RecordId> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: uuid::Error| conversion_error(idx, e.to_string()))
}

fn row_to_animal(row: &Row<'_>) -> rusqlite::Result<Animal> {
    let vaccinations: String = row.get(8)?;
    Ok(Animal {
        id: id_column(row, 0)?,
        name: row.get(1)?,
        species: row.get(2)?,
        breed: row.get(3)?,
        date_of_birth: row.get(4)?,
        weight: row.get(5)?,
        color: row.get(6)?,
        medical_history: row.get(7)?,
        vaccinations: serde_json::from_str(&vaccinations)
            .map_err(|e| conversion_error(8, e.to_string()))?,
        last_checkup: row.get(9)?,
        synced: row.get(10)?,
        last_modified: row.get(11)?,
    })
}

fn row_to_care_record(row: &Row<'_>) -> rusqlite::Result<CareRecord> {
    let care_type: String = row.get(2)?;
    Ok(CareRecord {
        id: id_column(row, 0)?,
        animal_id: id_column(row, 1)?,
        care_type: care_type
            .parse::<CareType>()
            .map_err(|e| conversion_error(2, e))?,
        date: row.get(3)?,
        notes: row.get(4)?,
        next_due: row.get(5)?,
        completed_by: row.get(6)?,
        synced: row.get(7)?,
        last_modified: row.get(8)?,
    })
}

impl SqliteRecordRepository<'_> {
    fn delete_record(&self, kind: RecordKind, id: &RecordId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            &format!("DELETE FROM {} WHERE id = ?", table_for(kind)),
            [id.as_str()],
        )?;
        if removed > 0 {
            append_entry(&tx, &MutationEntry::delete(kind, *id))?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn put_animal(&self, animal: &Animal) -> Result<Animal> {
        let tx = self.conn.unchecked_transaction()?;

        let mut stored = animal.clone();
        stored.synced = false;
        stored.last_modified = next_stamp(previous_stamp(&tx, RecordKind::Animal, &animal.id)?);

        tx.execute(
            &format!(
                "INSERT INTO animals ({ANIMAL_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    species = excluded.species,
                    breed = excluded.breed,
                    date_of_birth = excluded.date_of_birth,
                    weight = excluded.weight,
                    color = excluded.color,
                    medical_history = excluded.medical_history,
                    vaccinations = excluded.vaccinations,
                    last_checkup = excluded.last_checkup,
                    synced = excluded.synced,
                    last_modified = excluded.last_modified"
            ),
            params![
                stored.id.as_str(),
                stored.name,
                stored.species,
                stored.breed,
                stored.date_of_birth,
                stored.weight,
                stored.color,
                stored.medical_history,
                serde_json::to_string(&stored.vaccinations)?,
                stored.last_checkup,
                stored.synced,
                stored.last_modified,
            ],
        )?;

        clear_blocked(&tx, RecordKind::Animal, &stored.id)?;
        append_entry(
            &tx,
            &MutationEntry::save(RecordKind::Animal, stored.id, &stored)?,
        )?;
        tx.commit()?;

        Ok(stored)
    }

    fn get_animal(&self, id: &RecordId) -> Result<Option<Animal>> {
        let animal = self
            .conn
            .query_row(
                &format!("SELECT {ANIMAL_COLUMNS} FROM animals WHERE id = ?"),
                [id.as_str()],
                row_to_animal,
            )
            .optional()?;
        Ok(animal)
    }

    fn list_animals(&self) -> Result<Vec<Animal>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ANIMAL_COLUMNS} FROM animals ORDER BY rowid"))?;
        let animals = stmt
            .query_map([], row_to_animal)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(animals)
    }

    fn delete_animal(&self, id: &RecordId) -> Result<bool> {
        self.delete_record(RecordKind::Animal, id)
    }

    fn put_care_record(&self, record: &CareRecord) -> Result<CareRecord> {
        let tx = self.conn.unchecked_transaction()?;

        let mut stored = record.clone();
        stored.synced = false;
        stored.last_modified = next_stamp(previous_stamp(&tx, RecordKind::Care, &record.id)?);

        tx.execute(
            &format!(
                "INSERT INTO care_records ({CARE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    animal_id = excluded.animal_id,
                    care_type = excluded.care_type,
                    date = excluded.date,
                    notes = excluded.notes,
                    next_due = excluded.next_due,
                    completed_by = excluded.completed_by,
                    synced = excluded.synced,
                    last_modified = excluded.last_modified"
            ),
            params![
                stored.id.as_str(),
                stored.animal_id.as_str(),
                stored.care_type.as_str(),
                stored.date,
                stored.notes,
                stored.next_due,
                stored.completed_by,
                stored.synced,
                stored.last_modified,
            ],
        )?;

        clear_blocked(&tx, RecordKind::Care, &stored.id)?;
        append_entry(&tx, &MutationEntry::save(RecordKind::Care, stored.id, &stored)?)?;
        tx.commit()?;

        Ok(stored)
    }

    fn get_care_record(&self, id: &RecordId) -> Result<Option<CareRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {CARE_COLUMNS} FROM care_records WHERE id = ?"),
                [id.as_str()],
                row_to_care_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_care_records(&self) -> Result<Vec<CareRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CARE_COLUMNS} FROM care_records ORDER BY rowid"
        ))?;
        let records = stmt
            .query_map([], row_to_care_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn list_care_records_by_animal(&self, animal_id: &RecordId) -> Result<Vec<CareRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CARE_COLUMNS} FROM care_records WHERE animal_id = ? ORDER BY rowid"
        ))?;
        let records = stmt
            .query_map([animal_id.as_str()], row_to_care_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn delete_care_record(&self, id: &RecordId) -> Result<bool> {
        self.delete_record(RecordKind::Care, id)
    }

    fn list_unsynced(&self, kind: RecordKind) -> Result<Vec<RecordId>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {} WHERE synced = 0 ORDER BY last_modified, rowid",
            table_for(kind)
        ))?;
        let ids = stmt
            .query_map([], |row| id_column(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn mark_synced(
        &self,
        kind: RecordKind,
        id: &RecordId,
        expected_last_modified: i64,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            &format!(
                "UPDATE {} SET synced = 1 WHERE id = ? AND last_modified = ?",
                table_for(kind)
            ),
            params![id.as_str(), expected_last_modified],
        )?;
        Ok(updated > 0)
    }

    fn exists(&self, kind: RecordKind, id: &RecordId) -> Result<bool> {
        let exists = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)",
                table_for(kind)
            ),
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn find_ids_by_prefix(
        &self,
        kind: RecordKind,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<RecordId>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM {} WHERE id LIKE ? || '%' ORDER BY id LIMIT ?",
            table_for(kind)
        ))?;
        let ids = stmt
            .query_map(
                params![prefix, i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| id_column(row, 0),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
