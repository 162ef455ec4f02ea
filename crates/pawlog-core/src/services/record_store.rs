//! Shared record store wrapper used across clients.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{
    Database, MutationQueue, RecordRepository, SqliteMutationQueue, SqliteRecordRepository,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::models::{
    Animal, CareRecord, Mutation, MutationEntry, RecordId, RecordKind, RecordSyncState,
    SyncStatus,
};
use crate::Result;

/// Receives a nudge after every local write.
///
/// Implementations must return immediately; the actual sync runs elsewhere.
pub trait SyncHook: Send + Sync {
    fn request_sync(&self);
}

/// Counts shown by `sync status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub animals: usize,
    pub care_records: usize,
    pub unsynced_animals: usize,
    pub unsynced_care_records: usize,
    pub queued_mutations: usize,
    pub blocked: Vec<RecordSyncState>,
}

/// Thread-safe service for store, queue, and sync bookkeeping operations.
///
/// Every operation takes the same FIFO lock, so writes to one record apply
/// in the order they were issued.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    sync_hook: Option<Arc<dyn SyncHook>>,
}

impl RecordStore {
    /// Open a record store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path = db_path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(&path))
            .await
            .map_err(|error| crate::Error::Database(error.to_string()))??;
        tracing::debug!("Opened local store at {}", db_path.display());

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            sync_hook: None,
        })
    }

    /// Open an in-memory record store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            sync_hook: None,
        })
    }

    /// A handle on the same store that requests a sync after each write.
    #[must_use]
    pub fn with_sync_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.sync_hook = Some(hook);
        self
    }

    /// Filesystem location, if the store is on disk.
    pub fn path(&self) -> Option<&std::path::Path> {
        self.db_path.as_deref()
    }

    fn notify_write(&self) {
        if let Some(hook) = &self.sync_hook {
            hook.request_sync();
        }
    }

    /// Insert or replace an animal. The stored version is returned.
    pub async fn put_animal(&self, animal: &Animal) -> Result<Animal> {
        let stored = {
            let db = self.db.lock().await;
            SqliteRecordRepository::new(db.connection()).put_animal(animal)?
        };
        tracing::debug!("Saved animal {} locally", stored.id);
        self.notify_write();
        Ok(stored)
    }

    /// Fetch an animal by id.
    pub async fn get_animal(&self, id: &RecordId) -> Result<Option<Animal>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).get_animal(id)
    }

    /// List animals in storage order.
    pub async fn list_animals(&self) -> Result<Vec<Animal>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).list_animals()
    }

    /// Delete an animal. Returns whether anything was removed.
    pub async fn delete_animal(&self, id: &RecordId) -> Result<bool> {
        let removed = {
            let db = self.db.lock().await;
            SqliteRecordRepository::new(db.connection()).delete_animal(id)?
        };
        if removed {
            tracing::debug!("Deleted animal {id} locally");
            self.notify_write();
        }
        Ok(removed)
    }

    /// Insert or replace a care record. The stored version is returned.
    pub async fn put_care_record(&self, record: &CareRecord) -> Result<CareRecord> {
        let stored = {
            let db = self.db.lock().await;
            SqliteRecordRepository::new(db.connection()).put_care_record(record)?
        };
        tracing::debug!("Saved care record {} locally", stored.id);
        self.notify_write();
        Ok(stored)
    }

    /// Fetch a care record by id.
    pub async fn get_care_record(&self, id: &RecordId) -> Result<Option<CareRecord>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).get_care_record(id)
    }

    /// List care records in storage order.
    pub async fn list_care_records(&self) -> Result<Vec<CareRecord>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).list_care_records()
    }

    /// List one animal's care records in storage order.
    pub async fn list_care_records_by_animal(
        &self,
        animal_id: &RecordId,
    ) -> Result<Vec<CareRecord>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).list_care_records_by_animal(animal_id)
    }

    /// Delete a care record. Returns whether anything was removed.
    pub async fn delete_care_record(&self, id: &RecordId) -> Result<bool> {
        let removed = {
            let db = self.db.lock().await;
            SqliteRecordRepository::new(db.connection()).delete_care_record(id)?
        };
        if removed {
            tracing::debug!("Deleted care record {id} locally");
            self.notify_write();
        }
        Ok(removed)
    }

    /// Find animal ids starting with `prefix`.
    pub async fn find_animal_ids_by_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<RecordId>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).find_ids_by_prefix(
            RecordKind::Animal,
            prefix,
            limit,
        )
    }

    /// Find care record ids starting with `prefix`.
    pub async fn find_care_record_ids_by_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<RecordId>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).find_ids_by_prefix(
            RecordKind::Care,
            prefix,
            limit,
        )
    }

    /// Per-record sync indicator.
    ///
    /// Missing records report `Synced`: there is nothing left to push for them
    /// except a queued delete, which `pending_mutations` shows.
    pub async fn sync_status(&self, kind: RecordKind, id: &RecordId) -> Result<SyncStatus> {
        let db = self.db.lock().await;
        let records = SqliteRecordRepository::new(db.connection());
        let synced = match kind {
            RecordKind::Animal => records.get_animal(id)?.is_none_or(|animal| animal.synced),
            RecordKind::Care => records
                .get_care_record(id)?
                .is_none_or(|record| record.synced),
        };
        if synced {
            return Ok(SyncStatus::Synced);
        }

        let state = SqliteSyncStateRepository::new(db.connection()).get(kind, id)?;
        Ok(match state.and_then(|state| state.blocked_reason) {
            Some(reason) => SyncStatus::Blocked(reason),
            None => SyncStatus::Pending,
        })
    }

    /// Counts of records, pending work, and blocked records.
    pub async fn summary(&self) -> Result<StoreSummary> {
        let db = self.db.lock().await;
        let records = SqliteRecordRepository::new(db.connection());
        Ok(StoreSummary {
            animals: records.list_animals()?.len(),
            care_records: records.list_care_records()?.len(),
            unsynced_animals: records.list_unsynced(RecordKind::Animal)?.len(),
            unsynced_care_records: records.list_unsynced(RecordKind::Care)?.len(),
            queued_mutations: SqliteMutationQueue::new(db.connection()).len()?,
            blocked: SqliteSyncStateRepository::new(db.connection()).list_blocked()?,
        })
    }

    /// Append a mutation directly. Writes through `put_*`/`delete_*` already do.
    pub async fn append_mutation(&self, entry: &MutationEntry) -> Result<Mutation> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).append(entry)
    }

    /// Queued mutations in sequence order.
    pub async fn pending_mutations(&self) -> Result<Vec<Mutation>> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).pending()
    }

    /// Remove and return every queued mutation.
    ///
    /// Records stay unsynced, so a later pass still pushes them.
    pub async fn drain_mutations(&self) -> Result<Vec<Mutation>> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).drain()
    }

    /// Number of queued mutations.
    pub async fn mutation_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).len()
    }

    /// Drop queue entries for one record up to `up_to_seq`.
    pub async fn acknowledge_mutations(
        &self,
        kind: RecordKind,
        id: &RecordId,
        up_to_seq: i64,
    ) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteMutationQueue::new(db.connection()).acknowledge(kind, id, up_to_seq)
    }

    /// Unsynced records of every kind, animals first.
    pub async fn unsynced_records(&self) -> Result<Vec<(RecordKind, RecordId)>> {
        let db = self.db.lock().await;
        let records = SqliteRecordRepository::new(db.connection());
        let mut unsynced = Vec::new();
        for kind in [RecordKind::Animal, RecordKind::Care] {
            unsynced.extend(records.list_unsynced(kind)?.into_iter().map(|id| (kind, id)));
        }
        Ok(unsynced)
    }

    /// Deleted locally but still known to the server.
    ///
    /// Covers deletes whose queue entries were drained before they were pushed.
    pub async fn orphaned_remote_records(&self) -> Result<Vec<(RecordKind, RecordId)>> {
        let db = self.db.lock().await;
        let states = SqliteSyncStateRepository::new(db.connection()).list_orphaned()?;
        Ok(states
            .into_iter()
            .map(|state| (state.kind, state.record_id))
            .collect())
    }

    /// Whether a record of the given kind exists locally.
    pub async fn contains(&self, kind: RecordKind, id: &RecordId) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).exists(kind, id)
    }

    /// Compare-and-set `synced` after a confirmed push.
    ///
    /// Only succeeds if the record still has the pushed `last_modified`, so an
    /// edit or delete made during the push is never overwritten.
    pub(crate) async fn mark_synced(
        &self,
        kind: RecordKind,
        id: &RecordId,
        expected_last_modified: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).mark_synced(
            kind,
            id,
            expected_last_modified,
        )
    }

    /// Sync bookkeeping for a record.
    pub async fn sync_state(
        &self,
        kind: RecordKind,
        id: &RecordId,
    ) -> Result<Option<RecordSyncState>> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).get(kind, id)
    }

    /// Server id of a record, if it has ever been created remotely.
    pub async fn remote_id(&self, kind: RecordKind, id: &RecordId) -> Result<Option<String>> {
        Ok(self
            .sync_state(kind, id)
            .await?
            .and_then(|state| state.remote_id))
    }

    pub(crate) async fn mark_in_flight(&self, kind: RecordKind, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).mark_in_flight(kind, id)
    }

    pub(crate) async fn set_remote_id(
        &self,
        kind: RecordKind,
        id: &RecordId,
        remote_id: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).set_remote_id(kind, id, remote_id)
    }

    pub(crate) async fn record_push_success(
        &self,
        kind: RecordKind,
        id: &RecordId,
        remote_id: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).record_success(kind, id, remote_id)
    }

    pub(crate) async fn record_push_failure(
        &self,
        kind: RecordKind,
        id: &RecordId,
        error: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).record_failure(kind, id, error)
    }

    pub(crate) async fn block_record(
        &self,
        kind: RecordKind,
        id: &RecordId,
        reason: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).block(kind, id, reason)
    }

    pub(crate) async fn forget_remote_id(&self, kind: RecordKind, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).forget_remote_id(kind, id)
    }

    pub(crate) async fn forget_sync_state(&self, kind: RecordKind, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).remove(kind, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CareType;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHook(AtomicUsize);

    impl SyncHook for CountingHook {
        fn request_sync(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bella() -> Animal {
        Animal::new("Bella", "Dog", "Labrador", date(2019, 8, 12), 28.0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_put_and_list_roundtrip() {
        let store = RecordStore::open_in_memory().await.unwrap();

        let stored = store.put_animal(&bella()).await.unwrap();
        let animals = store.list_animals().await.unwrap();

        assert_eq!(animals, vec![stored]);
        assert_eq!(store.mutation_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_request_sync_through_hook() {
        let hook = Arc::new(CountingHook::default());
        let store = RecordStore::open_in_memory()
            .await
            .unwrap()
            .with_sync_hook(hook.clone());

        let animal = store.put_animal(&bella()).await.unwrap();
        store
            .put_care_record(&CareRecord::new(
                animal.id,
                CareType::Feeding,
                date(2024, 6, 1),
            ))
            .await
            .unwrap();
        store.delete_animal(&animal.id).await.unwrap();
        // Nothing removed, nothing to sync
        store.delete_animal(&animal.id).await.unwrap();

        assert_eq!(hook.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_status_tracks_pending_blocked_and_synced() {
        let store = RecordStore::open_in_memory().await.unwrap();
        let stored = store.put_animal(&bella()).await.unwrap();

        assert_eq!(
            store
                .sync_status(RecordKind::Animal, &stored.id)
                .await
                .unwrap(),
            SyncStatus::Pending
        );

        store
            .block_record(RecordKind::Animal, &stored.id, "species 'Dragon' is unknown")
            .await
            .unwrap();
        assert_eq!(
            store
                .sync_status(RecordKind::Animal, &stored.id)
                .await
                .unwrap(),
            SyncStatus::Blocked("species 'Dragon' is unknown".to_string())
        );

        store
            .mark_synced(RecordKind::Animal, &stored.id, stored.last_modified)
            .await
            .unwrap();
        assert_eq!(
            store
                .sync_status(RecordKind::Animal, &stored.id)
                .await
                .unwrap(),
            SyncStatus::Synced
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_puts_to_one_record_are_serialized() {
        let store = RecordStore::open_in_memory().await.unwrap();
        let base = store.put_animal(&bella()).await.unwrap();

        let mut handles = Vec::new();
        for weight in 1..=10 {
            let store = store.clone();
            let mut animal = base.clone();
            animal.weight = f64::from(weight);
            handles.push(tokio::spawn(async move {
                store.put_animal(&animal).await.unwrap()
            }));
        }
        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap().last_modified);
        }
        stamps.sort_unstable();
        stamps.dedup();

        assert_eq!(stamps.len(), 10);
        let latest = store.get_animal(&base.id).await.unwrap().unwrap();
        assert_eq!(latest.last_modified, *stamps.last().unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_leaves_records_unsynced() {
        let store = RecordStore::open_in_memory().await.unwrap();
        let stored = store.put_animal(&bella()).await.unwrap();

        let drained = store.drain_mutations().await.unwrap();

        assert_eq!(drained.len(), 1);
        assert_eq!(store.mutation_count().await.unwrap(), 0);
        assert_eq!(
            store.unsynced_records().await.unwrap(),
            vec![(RecordKind::Animal, stored.id)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drained_delete_is_still_known_as_orphaned() {
        let store = RecordStore::open_in_memory().await.unwrap();
        let stored = store.put_animal(&bella()).await.unwrap();
        store
            .record_push_success(RecordKind::Animal, &stored.id, "srv-9")
            .await
            .unwrap();
        assert!(store.orphaned_remote_records().await.unwrap().is_empty());

        store.delete_animal(&stored.id).await.unwrap();
        store.drain_mutations().await.unwrap();

        assert_eq!(
            store.orphaned_remote_records().await.unwrap(),
            vec![(RecordKind::Animal, stored.id)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn summary_counts_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open_path(tmp.path().join("nested").join("pawlog.db"))
            .await
            .unwrap();
        let animal = store.put_animal(&bella()).await.unwrap();
        store
            .put_care_record(&CareRecord::new(
                animal.id,
                CareType::Grooming,
                date(2024, 6, 2),
            ))
            .await
            .unwrap();
        store
            .block_record(RecordKind::Animal, &animal.id, "breed is required")
            .await
            .unwrap();

        let summary = store.summary().await.unwrap();

        assert_eq!(summary.animals, 1);
        assert_eq!(summary.care_records, 1);
        assert_eq!(summary.unsynced_animals, 1);
        assert_eq!(summary.unsynced_care_records, 1);
        assert_eq!(summary.queued_mutations, 2);
        assert_eq!(summary.blocked.len(), 1);
        assert!(store.path().is_some());
    }
}
