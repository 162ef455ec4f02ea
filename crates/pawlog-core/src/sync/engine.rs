//! Sync passes: push local changes, record what the server said.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use super::plan::{Intent, PlannedOp, SyncPlan};
use super::remote::{RemoteAnimal, RemoteApi, RemoteCareRecord, RemoteError, RemoteResult};
use crate::config::DEFAULT_PUSH_TIMEOUT_SECS;
use crate::models::{RecordKind, RecordSyncState};
use crate::services::RecordStore;

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Creates and updates the server accepted
    pub pushed: usize,
    /// Remote deletions confirmed (404 included)
    pub deleted: usize,
    /// Queue entries that needed no request at all
    pub collapsed: usize,
    /// Care records waiting for their animal to reach the server
    pub deferred: usize,
    /// Transient failures; retried on the next pass
    pub failed: usize,
    /// Records that need a local edit before they can be pushed
    pub blocked: usize,
    /// Deletes the server refused outright; dropped locally
    pub rejected: usize,
    /// The server rejected our credentials and the pass stopped early
    pub auth_failed: bool,
}

impl SyncReport {
    /// Nothing is left over for a later pass.
    pub const fn is_clean(&self) -> bool {
        self.deferred == 0 && self.failed == 0 && self.blocked == 0 && !self.auth_failed
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pushed => self.pushed += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Collapsed => self.collapsed += 1,
            Outcome::Deferred => self.deferred += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Blocked => self.blocked += 1,
            Outcome::Rejected => self.rejected += 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] crate::Error),
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pushed,
    Deleted,
    Collapsed,
    Deferred,
    Failed,
    Blocked,
    Rejected,
}

enum StepError {
    Storage(crate::Error),
    Unauthorized(String),
}

impl From<crate::Error> for StepError {
    fn from(error: crate::Error) -> Self {
        Self::Storage(error)
    }
}

impl From<serde_json::Error> for StepError {
    fn from(error: serde_json::Error) -> Self {
        Self::Storage(crate::Error::Serialization(error))
    }
}

type StepResult = Result<Outcome, StepError>;

/// Pushes pending local changes to a [`RemoteApi`].
///
/// Passes never overlap: a second caller waits for the running pass to
/// finish. Each record is pushed at most once per pass, sequentially, with
/// every request bounded by the push timeout.
pub struct SyncEngine<R> {
    store: RecordStore,
    remote: R,
    push_timeout: Duration,
    pass_lock: Mutex<()>,
    auth_required: AtomicBool,
    passes: AtomicU64,
}

impl<R: RemoteApi> SyncEngine<R> {
    pub fn new(store: RecordStore, remote: R) -> Self {
        Self {
            store,
            remote,
            push_timeout: Duration::from_secs(DEFAULT_PUSH_TIMEOUT_SECS),
            pass_lock: Mutex::new(()),
            auth_required: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
        self.push_timeout = push_timeout;
        self
    }

    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Set after the server rejected our credentials.
    pub fn requires_authentication(&self) -> bool {
        self.auth_required.load(Ordering::Acquire)
    }

    /// Resume syncing once new credentials are in place.
    pub fn reset_authentication(&self) {
        self.auth_required.store(false, Ordering::Release);
    }

    /// Passes that ran to completion since the engine was created.
    pub fn completed_passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    /// Push everything pending once.
    ///
    /// Per-record failures are reported, not returned. Only storage errors
    /// and a standing authentication failure are errors.
    pub async fn run_pass(&self) -> Result<SyncReport, SyncError> {
        let _pass = self.pass_lock.lock().await;
        if self.requires_authentication() {
            return Err(SyncError::AuthenticationRequired(
                "sign in again to resume syncing".to_string(),
            ));
        }

        let mutations = self.store.pending_mutations().await?;
        let unsynced = self.store.unsynced_records().await?;
        let orphaned = self.store.orphaned_remote_records().await?;
        let plan = SyncPlan::build(&mutations, &unsynced, &orphaned);
        tracing::debug!(
            "Sync plan: {} op(s) from {} queued mutation(s)",
            plan.len(),
            mutations.len()
        );

        let mut report = SyncReport::default();
        for op in plan.ops() {
            let step = match op.intent {
                Intent::Upsert => self.push_upsert(op).await,
                Intent::Delete => self.push_delete(op).await,
            };
            match step {
                Ok(outcome) => report.record(outcome),
                Err(StepError::Unauthorized(message)) => {
                    self.auth_required.store(true, Ordering::Release);
                    tracing::warn!("Stopping sync pass, credentials rejected: {message}");
                    report.auth_failed = true;
                    break;
                }
                Err(StepError::Storage(error)) => return Err(error.into()),
            }
        }

        self.passes.fetch_add(1, Ordering::AcqRel);
        if !plan.is_empty() {
            tracing::info!(
                "Sync pass finished: {} pushed, {} deleted, {} collapsed, {} deferred, {} failed, {} blocked, {} rejected",
                report.pushed,
                report.deleted,
                report.collapsed,
                report.deferred,
                report.failed,
                report.blocked,
                report.rejected
            );
        }
        Ok(report)
    }

    async fn push_upsert(&self, op: &PlannedOp) -> StepResult {
        let kind = op.kind;
        let id = &op.record_id;
        let state = self
            .store
            .sync_state(kind, id)
            .await?
            .unwrap_or_else(|| RecordSyncState::new(kind, *id));

        let (body, last_modified) = match kind {
            RecordKind::Animal => {
                let Some(animal) = self.store.get_animal(id).await? else {
                    return self.skip_missing(op).await;
                };
                if state.blocked_reason.is_some() {
                    return Ok(Outcome::Blocked);
                }
                let problems = animal.validation_errors();
                if !problems.is_empty() {
                    return self.block(op, &problems.join("; ")).await;
                }
                (
                    serde_json::to_value(RemoteAnimal::from(&animal))?,
                    animal.last_modified,
                )
            }
            RecordKind::Care => {
                let Some(record) = self.store.get_care_record(id).await? else {
                    return self.skip_missing(op).await;
                };
                if state.blocked_reason.is_some() {
                    return Ok(Outcome::Blocked);
                }
                let parent = record.animal_id;
                let Some(remote_animal_id) = self.store.remote_id(RecordKind::Animal, &parent).await?
                else {
                    if self.store.contains(RecordKind::Animal, &parent).await? {
                        tracing::debug!("Deferring care record {id}: animal {parent} is not on the server yet");
                        return Ok(Outcome::Deferred);
                    }
                    return self
                        .block(op, &format!("animal {parent} does not exist locally"))
                        .await;
                };
                (
                    serde_json::to_value(RemoteCareRecord::from_local(&record, remote_animal_id))?,
                    record.last_modified,
                )
            }
        };

        self.send_upsert(op, state, &body, last_modified).await
    }

    async fn send_upsert(
        &self,
        op: &PlannedOp,
        mut state: RecordSyncState,
        body: &serde_json::Value,
        last_modified: i64,
    ) -> StepResult {
        let kind = op.kind;
        let id = &op.record_id;

        // A create may have landed without us hearing back
        if state.remote_id.is_none() && state.in_flight_since.is_some() {
            match self.bounded(self.remote.find_by_client_id(kind, id)).await {
                Ok(Some(found)) => {
                    tracing::debug!("Recovered server id {} for {kind} {id}", found.id);
                    self.store.set_remote_id(kind, id, &found.id).await?;
                    state.remote_id = Some(found.id);
                }
                Ok(None) => {}
                Err(error) => return self.remote_failure(op, error).await,
            }
        }

        self.store.mark_in_flight(kind, id).await?;
        let result = match state.remote_id.as_deref() {
            Some(remote_id) => match self.bounded(self.remote.update(kind, remote_id, body)).await {
                Err(RemoteError::NotFound(message)) => {
                    tracing::warn!(
                        "Server no longer has {kind} {id} as {remote_id} ({message}); creating it again"
                    );
                    self.store.forget_remote_id(kind, id).await?;
                    self.store.mark_in_flight(kind, id).await?;
                    self.bounded(self.remote.create(kind, body)).await
                }
                other => other,
            },
            None => self.bounded(self.remote.create(kind, body)).await,
        };

        match result {
            Ok(remote) => {
                self.store.record_push_success(kind, id, &remote.id).await?;
                if !self.store.mark_synced(kind, id, last_modified).await? {
                    tracing::debug!("{kind} {id} changed during push; it stays pending");
                }
                self.acknowledge(op).await?;
                tracing::debug!("Pushed {kind} {id} as {}", remote.id);
                Ok(Outcome::Pushed)
            }
            Err(error) => self.remote_failure(op, error).await,
        }
    }

    async fn push_delete(&self, op: &PlannedOp) -> StepResult {
        let kind = op.kind;
        let id = &op.record_id;

        // Re-created since the plan was built; its newer save is still queued
        if self.store.contains(kind, id).await? {
            self.acknowledge(op).await?;
            return Ok(Outcome::Collapsed);
        }

        let Some(mut state) = self.store.sync_state(kind, id).await? else {
            tracing::debug!("{kind} {id} never reached the server; dropping its delete");
            self.acknowledge(op).await?;
            return Ok(Outcome::Collapsed);
        };

        if state.remote_id.is_none() && state.in_flight_since.is_some() {
            match self.bounded(self.remote.find_by_client_id(kind, id)).await {
                Ok(found) => state.remote_id = found.map(|found| found.id),
                Err(error) => return self.remote_failure(op, error).await,
            }
        }

        let Some(remote_id) = state.remote_id else {
            tracing::debug!("{kind} {id} never reached the server; dropping its delete");
            self.store.forget_sync_state(kind, id).await?;
            self.acknowledge(op).await?;
            return Ok(Outcome::Collapsed);
        };

        match self.bounded(self.remote.delete(kind, &remote_id)).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {
                self.store.forget_sync_state(kind, id).await?;
                self.acknowledge(op).await?;
                tracing::debug!("Deleted {kind} {id} ({remote_id}) on the server");
                Ok(Outcome::Deleted)
            }
            Err(error) => self.remote_failure(op, error).await,
        }
    }

    /// The record vanished after the plan was built; a queued delete follows.
    async fn skip_missing(&self, op: &PlannedOp) -> StepResult {
        self.acknowledge(op).await?;
        Ok(Outcome::Collapsed)
    }

    async fn block(&self, op: &PlannedOp, reason: &str) -> StepResult {
        tracing::warn!(
            "Sync blocked for {} {}: {reason}",
            op.kind,
            op.record_id
        );
        self.store
            .block_record(op.kind, &op.record_id, reason)
            .await?;
        Ok(Outcome::Blocked)
    }

    async fn remote_failure(&self, op: &PlannedOp, error: RemoteError) -> StepResult {
        match error {
            RemoteError::Unauthorized(message) => Err(StepError::Unauthorized(message)),
            RemoteError::Validation(message) => match op.intent {
                Intent::Upsert => self.block(op, &message).await,
                Intent::Delete => {
                    tracing::warn!(
                        "Server refused to delete {} {}: {message}; dropping the delete",
                        op.kind,
                        op.record_id
                    );
                    self.store
                        .forget_sync_state(op.kind, &op.record_id)
                        .await?;
                    self.acknowledge(op).await?;
                    Ok(Outcome::Rejected)
                }
            },
            error => {
                tracing::warn!("Failed to push {} {}: {error}", op.kind, op.record_id);
                self.store
                    .record_push_failure(op.kind, &op.record_id, &error.to_string())
                    .await?;
                Ok(Outcome::Failed)
            }
        }
    }

    async fn acknowledge(&self, op: &PlannedOp) -> Result<(), StepError> {
        if let Some(seq) = op.up_to_seq {
            self.store
                .acknowledge_mutations(op.kind, &op.record_id, seq)
                .await?;
        }
        Ok(())
    }

    async fn bounded<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        tokio::time::timeout(self.push_timeout, request)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Animal, CareRecord, CareType, MutationAction, RecordId, SyncStatus};
    use crate::sync::remote::RemoteRef;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::sync::Notify;

    /// In-memory server with switches for the failure modes a pass must survive.
    #[derive(Default)]
    struct FakeRemote {
        state: StdMutex<FakeState>,
        create_entered: Notify,
        create_release: Notify,
    }

    #[derive(Default)]
    struct FakeState {
        records: Vec<(RecordKind, String, Value)>,
        next_id: u64,
        calls: Vec<String>,
        offline: bool,
        unauthorized: bool,
        failing: HashSet<String>,
        rejecting: HashSet<String>,
        rejecting_deletes: HashSet<String>,
        lose_next_create_response: bool,
        pause_creates: bool,
        delay: Option<Duration>,
    }

    impl FakeState {
        fn gate(&self, body: Option<&Value>) -> RemoteResult<()> {
            if self.offline {
                return Err(RemoteError::Transport("connection refused".to_string()));
            }
            if self.unauthorized {
                return Err(RemoteError::Unauthorized("token expired (401)".to_string()));
            }
            let client_id = body
                .and_then(|body| body["clientId"].as_str())
                .unwrap_or_default();
            if self.failing.contains(client_id) {
                return Err(RemoteError::Server("database unavailable (500)".to_string()));
            }
            if self.rejecting.contains(client_id) {
                return Err(RemoteError::Validation("weight is invalid (400)".to_string()));
            }
            Ok(())
        }
    }

    impl FakeRemote {
        fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
            f(&mut self.state.lock().unwrap())
        }

        fn count(&self, prefix: &str) -> usize {
            self.with(|s| s.calls.iter().filter(|call| call.starts_with(prefix)).count())
        }

        fn stored(&self, kind: RecordKind) -> Vec<Value> {
            self.with(|s| {
                s.records
                    .iter()
                    .filter(|(stored_kind, _, _)| *stored_kind == kind)
                    .map(|(_, _, body)| body.clone())
                    .collect()
            })
        }
    }

    #[async_trait]
    impl RemoteApi for FakeRemote {
        async fn create(&self, kind: RecordKind, body: &Value) -> RemoteResult<RemoteRef> {
            let (pause, delay) = self.with(|s| (s.pause_creates, s.delay));
            if pause {
                self.create_entered.notify_one();
                self.create_release.notified().await;
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.with(|s| {
                s.calls.push(format!("create {kind}"));
                s.gate(Some(body))?;
                s.next_id += 1;
                let id = format!("srv-{}", s.next_id);
                s.records.push((kind, id.clone(), body.clone()));
                if std::mem::take(&mut s.lose_next_create_response) {
                    return Err(RemoteError::Transport("connection reset".to_string()));
                }
                Ok(RemoteRef {
                    id,
                    user_id: Some("user-1".to_string()),
                })
            })
        }

        async fn update(
            &self,
            kind: RecordKind,
            remote_id: &str,
            body: &Value,
        ) -> RemoteResult<RemoteRef> {
            self.with(|s| {
                s.calls.push(format!("update {kind} {remote_id}"));
                s.gate(Some(body))?;
                let Some(existing) = s
                    .records
                    .iter_mut()
                    .find(|(stored_kind, id, _)| *stored_kind == kind && id == remote_id)
                else {
                    return Err(RemoteError::NotFound("record not found (404)".to_string()));
                };
                existing.2 = body.clone();
                Ok(RemoteRef {
                    id: remote_id.to_string(),
                    user_id: None,
                })
            })
        }

        async fn delete(&self, kind: RecordKind, remote_id: &str) -> RemoteResult<()> {
            self.with(|s| {
                s.calls.push(format!("delete {kind} {remote_id}"));
                s.gate(None)?;
                if s.rejecting_deletes.contains(remote_id) {
                    return Err(RemoteError::Validation(
                        "record is locked (422)".to_string(),
                    ));
                }
                let before = s.records.len();
                s.records
                    .retain(|(stored_kind, id, _)| !(*stored_kind == kind && id == remote_id));
                if s.records.len() == before {
                    return Err(RemoteError::NotFound("record not found (404)".to_string()));
                }
                Ok(())
            })
        }

        async fn find_by_client_id(
            &self,
            kind: RecordKind,
            client_id: &RecordId,
        ) -> RemoteResult<Option<RemoteRef>> {
            self.with(|s| {
                s.calls.push(format!("lookup {kind}"));
                s.gate(None)?;
                let client_id = client_id.as_str();
                Ok(s.records
                    .iter()
                    .find(|(stored_kind, _, body)| {
                        *stored_kind == kind && body["clientId"] == client_id
                    })
                    .map(|(_, id, _)| RemoteRef {
                        id: id.clone(),
                        user_id: None,
                    }))
            })
        }

        async fn health(&self) -> RemoteResult<()> {
            self.with(|s| s.gate(None))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn animal(name: &str) -> Animal {
        Animal::new(name, "Dog", "Mixed", date(2021, 4, 1), 14.0)
    }

    async fn setup() -> (RecordStore, Arc<SyncEngine<FakeRemote>>) {
        let store = RecordStore::open_in_memory().await.unwrap();
        let engine = Arc::new(SyncEngine::new(store.clone(), FakeRemote::default()));
        (store, engine)
    }

    async fn status(store: &RecordStore, kind: RecordKind, id: &RecordId) -> SyncStatus {
        store.sync_status(kind, id).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_store_makes_no_requests() {
        let (_store, engine) = setup().await;

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report, SyncReport::default());
        assert!(engine.remote().with(|s| s.calls.is_empty()));
        assert_eq!(engine.completed_passes(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_marks_synced_and_second_pass_is_a_no_op() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Buddy")).await.unwrap();
        assert!(!stored.synced);

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert!(report.is_clean());
        assert!(store.get_animal(&stored.id).await.unwrap().unwrap().synced);
        assert_eq!(store.mutation_count().await.unwrap(), 0);
        assert_eq!(
            store.remote_id(RecordKind::Animal, &stored.id).await.unwrap(),
            Some("srv-1".to_string())
        );

        let again = engine.run_pass().await.unwrap();
        assert_eq!(again, SyncReport::default());
        assert_eq!(engine.remote().count("create"), 1);
        assert_eq!(engine.remote().stored(RecordKind::Animal).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_after_sync_updates_instead_of_creating() {
        let (store, engine) = setup().await;
        let mut stored = store.put_animal(&animal("Buddy")).await.unwrap();
        engine.run_pass().await.unwrap();

        stored.weight = 15.5;
        store.put_animal(&stored).await.unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(engine.remote().count("create"), 1);
        assert_eq!(engine.remote().count("update animal srv-1"), 1);
        assert_eq!(engine.remote().stored(RecordKind::Animal)[0]["weight"], 15.5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn several_saves_collapse_into_one_push() {
        let (store, engine) = setup().await;
        let mut stored = store.put_animal(&animal("Buddy")).await.unwrap();
        for weight in [15.0, 16.0, 17.0] {
            stored.weight = weight;
            stored = store.put_animal(&stored).await.unwrap();
        }

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(engine.remote().count("create"), 1);
        assert_eq!(engine.remote().stored(RecordKind::Animal)[0]["weight"], 17.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partial_failure_leaves_only_the_failing_record_pending() {
        let (store, engine) = setup().await;
        let first = store.put_animal(&animal("One")).await.unwrap();
        let second = store.put_animal(&animal("Two")).await.unwrap();
        let third = store.put_animal(&animal("Three")).await.unwrap();
        engine
            .remote()
            .with(|s| s.failing.insert(second.id.as_str()));

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.pushed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(status(&store, RecordKind::Animal, &first.id).await, SyncStatus::Synced);
        assert_eq!(status(&store, RecordKind::Animal, &second.id).await, SyncStatus::Pending);
        assert_eq!(status(&store, RecordKind::Animal, &third.id).await, SyncStatus::Synced);

        let remaining = store.pending_mutations().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].record_id, second.id);
        let state = store
            .sync_state(RecordKind::Animal, &second.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            state.last_error.as_deref(),
            Some("Remote server error: database unavailable (500)")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_create_syncs_after_reconnect() {
        let (store, engine) = setup().await;
        engine.remote().with(|s| s.offline = true);

        let stored = store.put_animal(&animal("Scout")).await.unwrap();
        let offline = engine.run_pass().await.unwrap();
        assert_eq!(offline.failed, 1);
        assert_eq!(status(&store, RecordKind::Animal, &stored.id).await, SyncStatus::Pending);

        engine.remote().with(|s| s.offline = false);
        let online = engine.run_pass().await.unwrap();

        assert_eq!(online.pushed, 1);
        assert_eq!(status(&store, RecordKind::Animal, &stored.id).await, SyncStatus::Synced);
        // The failed create never reached storage, so lookup finds nothing and one create lands
        assert_eq!(engine.remote().stored(RecordKind::Animal).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lost_create_response_does_not_duplicate() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Echo")).await.unwrap();
        engine
            .remote()
            .with(|s| s.lose_next_create_response = true);

        let first = engine.run_pass().await.unwrap();
        assert_eq!(first.failed, 1);
        assert!(store
            .sync_state(RecordKind::Animal, &stored.id)
            .await
            .unwrap()
            .unwrap()
            .in_flight_since
            .is_some());

        let second = engine.run_pass().await.unwrap();

        assert_eq!(second.pushed, 1);
        assert_eq!(engine.remote().count("create"), 1);
        assert_eq!(engine.remote().count("lookup animal"), 1);
        assert_eq!(engine.remote().count("update animal srv-1"), 1);
        assert_eq!(engine.remote().stored(RecordKind::Animal).len(), 1);
        assert_eq!(status(&store, RecordKind::Animal, &stored.id).await, SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_during_push_is_not_resurrected() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Ghost")).await.unwrap();
        engine.remote().with(|s| s.pause_creates = true);

        let pass = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_pass().await.unwrap() }
        });
        engine.remote().create_entered.notified().await;
        assert!(store.delete_animal(&stored.id).await.unwrap());
        engine.remote().create_release.notify_one();
        let report = pass.await.unwrap();

        assert_eq!(report.pushed, 1);
        assert!(store.get_animal(&stored.id).await.unwrap().is_none());
        let queued = store.pending_mutations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, MutationAction::Delete);

        engine.remote().with(|s| s.pause_creates = false);
        let cleanup = engine.run_pass().await.unwrap();

        assert_eq!(cleanup.deleted, 1);
        assert!(engine.remote().stored(RecordKind::Animal).is_empty());
        assert!(store.get_animal(&stored.id).await.unwrap().is_none());
        assert!(store
            .sync_state(RecordKind::Animal, &stored.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.mutation_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_during_push_stays_pending() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Blink")).await.unwrap();
        engine.remote().with(|s| s.pause_creates = true);

        let pass = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_pass().await.unwrap() }
        });
        engine.remote().create_entered.notified().await;
        let mut edited = stored.clone();
        edited.name = "Blinky".to_string();
        let edited = store.put_animal(&edited).await.unwrap();
        engine.remote().create_release.notify_one();
        pass.await.unwrap();

        let current = store.get_animal(&stored.id).await.unwrap().unwrap();
        assert!(!current.synced);
        assert_eq!(current.last_modified, edited.last_modified);

        engine.remote().with(|s| s.pause_creates = false);
        engine.run_pass().await.unwrap();
        assert!(store.get_animal(&stored.id).await.unwrap().unwrap().synced);
        assert_eq!(engine.remote().stored(RecordKind::Animal)[0]["name"], "Blinky");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_unpushed_record_collapses() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Brief")).await.unwrap();
        store.delete_animal(&stored.id).await.unwrap();

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.collapsed, 1);
        assert!(engine.remote().with(|s| s.calls.is_empty()));
        assert_eq!(store.mutation_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_already_gone_on_server_counts_as_deleted() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Gone")).await.unwrap();
        engine.run_pass().await.unwrap();
        engine.remote().with(|s| s.records.clear());

        store.delete_animal(&stored.id).await.unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(engine.remote().count("delete animal srv-1"), 1);
        assert_eq!(store.mutation_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_record_missing_on_server_recreates_it() {
        let (store, engine) = setup().await;
        let mut stored = store.put_animal(&animal("Phoenix")).await.unwrap();
        engine.run_pass().await.unwrap();
        engine.remote().with(|s| s.records.clear());

        stored.color = "Red".to_string();
        store.put_animal(&stored).await.unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(engine.remote().count("create"), 2);
        assert_eq!(
            store.remote_id(RecordKind::Animal, &stored.id).await.unwrap(),
            Some("srv-2".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn care_record_uses_server_animal_id() {
        let (store, engine) = setup().await;
        let parent = store.put_animal(&animal("Rocky")).await.unwrap();
        let care = store
            .put_care_record(&CareRecord::new(parent.id, CareType::Veterinary, date(2024, 7, 1)))
            .await
            .unwrap();

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.pushed, 2);
        let pushed = engine.remote().stored(RecordKind::Care);
        assert_eq!(pushed[0]["animalId"], "srv-1");
        assert_eq!(pushed[0]["clientId"], care.id.as_str());
        assert_eq!(status(&store, RecordKind::Care, &care.id).await, SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn care_record_waits_for_its_animal() {
        let (store, engine) = setup().await;
        let parent = store.put_animal(&animal("Rocky")).await.unwrap();
        let care = store
            .put_care_record(&CareRecord::new(parent.id, CareType::Feeding, date(2024, 7, 2)))
            .await
            .unwrap();
        engine
            .remote()
            .with(|s| s.failing.insert(parent.id.as_str()));

        let first = engine.run_pass().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(first.deferred, 1);
        assert_eq!(engine.remote().count("create care"), 0);
        assert_eq!(status(&store, RecordKind::Care, &care.id).await, SyncStatus::Pending);

        engine.remote().with(|s| s.failing.clear());
        let second = engine.run_pass().await.unwrap();

        // The rejected create never stored anything, so the animal is srv-1
        assert_eq!(second.pushed, 2);
        assert_eq!(engine.remote().stored(RecordKind::Care)[0]["animalId"], "srv-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn orphan_care_record_is_blocked() {
        let (store, engine) = setup().await;
        let orphan = store
            .put_care_record(&CareRecord::new(
                RecordId::new(),
                CareType::Grooming,
                date(2024, 7, 3),
            ))
            .await
            .unwrap();

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.blocked, 1);
        assert!(matches!(
            status(&store, RecordKind::Care, &orphan.id).await,
            SyncStatus::Blocked(reason) if reason.contains("does not exist locally")
        ));
        assert!(engine.remote().with(|s| s.calls.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_record_is_blocked_until_edited() {
        let (store, engine) = setup().await;
        let mut dragon = animal("Smaug");
        dragon.species = "Dragon".to_string();
        let mut stored = store.put_animal(&dragon).await.unwrap();

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.blocked, 1);
        assert!(engine.remote().with(|s| s.calls.is_empty()));
        assert!(matches!(
            status(&store, RecordKind::Animal, &stored.id).await,
            SyncStatus::Blocked(_)
        ));

        // Still blocked, still no request
        engine.run_pass().await.unwrap();
        assert!(engine.remote().with(|s| s.calls.is_empty()));

        stored.species = "Other".to_string();
        store.put_animal(&stored).await.unwrap();
        let fixed = engine.run_pass().await.unwrap();

        assert_eq!(fixed.pushed, 1);
        assert_eq!(status(&store, RecordKind::Animal, &stored.id).await, SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_validation_error_blocks_without_retrying() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Heavy")).await.unwrap();
        engine
            .remote()
            .with(|s| s.rejecting.insert(stored.id.as_str()));

        let report = engine.run_pass().await.unwrap();
        assert_eq!(report.blocked, 1);
        engine.run_pass().await.unwrap();

        assert_eq!(engine.remote().count("create"), 1);
        assert_eq!(
            status(&store, RecordKind::Animal, &stored.id).await,
            SyncStatus::Blocked("weight is invalid (400)".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unauthorized_stops_pass_until_reset() {
        let (store, engine) = setup().await;
        store.put_animal(&animal("One")).await.unwrap();
        store.put_animal(&animal("Two")).await.unwrap();
        engine.remote().with(|s| s.unauthorized = true);

        let report = engine.run_pass().await.unwrap();
        assert!(report.auth_failed);
        assert_eq!(engine.remote().count("create"), 1);
        assert!(engine.requires_authentication());

        let error = engine.run_pass().await.unwrap_err();
        assert!(matches!(error, SyncError::AuthenticationRequired(_)));
        assert_eq!(engine.remote().count("create"), 1);

        engine.remote().with(|s| s.unauthorized = false);
        engine.reset_authentication();
        let resumed = engine.run_pass().await.unwrap();
        assert_eq!(resumed.pushed, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_push_times_out_and_stays_pending() {
        let store = RecordStore::open_in_memory().await.unwrap();
        let engine = SyncEngine::new(store.clone(), FakeRemote::default())
            .with_push_timeout(Duration::from_millis(50));
        engine
            .remote()
            .with(|s| s.delay = Some(Duration::from_millis(500)));
        let stored = store.put_animal(&animal("Sloth")).await.unwrap();

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.failed, 1);
        let state = store
            .sync_state(RecordKind::Animal, &stored.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.last_error.as_deref(), Some("Remote request timed out"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drained_queue_falls_back_to_unsynced_scan() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Drift")).await.unwrap();
        store.drain_mutations().await.unwrap();

        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.pushed, 1);
        assert_eq!(status(&store, RecordKind::Animal, &stored.id).await, SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drained_delete_still_reaches_the_server() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Ghost")).await.unwrap();
        engine.run_pass().await.unwrap();

        store.delete_animal(&stored.id).await.unwrap();
        store.drain_mutations().await.unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(engine.remote().count("delete animal srv-1"), 1);
        assert!(engine.remote().stored(RecordKind::Animal).is_empty());
        assert!(store
            .sync_state(RecordKind::Animal, &stored.id)
            .await
            .unwrap()
            .is_none());

        let again = engine.run_pass().await.unwrap();
        assert_eq!(again, SyncReport::default());
        assert_eq!(engine.remote().count("delete"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_refused_by_server_is_dropped_not_retried() {
        let (store, engine) = setup().await;
        let stored = store.put_animal(&animal("Locked")).await.unwrap();
        engine.run_pass().await.unwrap();
        engine
            .remote()
            .with(|s| s.rejecting_deletes.insert("srv-1".to_string()));

        store.delete_animal(&stored.id).await.unwrap();
        let report = engine.run_pass().await.unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(store.mutation_count().await.unwrap(), 0);
        assert!(store
            .sync_state(RecordKind::Animal, &stored.id)
            .await
            .unwrap()
            .is_none());

        let again = engine.run_pass().await.unwrap();
        assert_eq!(again, SyncReport::default());
        assert_eq!(engine.remote().count("delete"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_passes_do_not_double_push() {
        let (store, engine) = setup().await;
        for name in ["A", "B", "C"] {
            store.put_animal(&animal(name)).await.unwrap();
        }

        let passes: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.run_pass().await.unwrap() })
            })
            .collect();
        let mut pushed = 0;
        for pass in passes {
            pushed += pass.await.unwrap().pushed;
        }

        assert_eq!(pushed, 3);
        assert_eq!(engine.remote().count("create"), 3);
    }
}
