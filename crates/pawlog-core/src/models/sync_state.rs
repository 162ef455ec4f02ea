//! Per-record sync bookkeeping

use serde::{Deserialize, Serialize};

use super::{RecordId, RecordKind};

/// Sync bookkeeping for one local record.
///
/// Lives beside the record rather than inside it so that a deleted record's
/// remote identity survives until the deletion has been pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSyncState {
    pub kind: RecordKind,
    pub record_id: RecordId,
    /// Identifier assigned by the remote service on create
    pub remote_id: Option<String>,
    /// Set while a create/update may have reached the server unacknowledged
    pub in_flight_since: Option<i64>,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Non-empty when retrying cannot succeed without a local edit
    pub blocked_reason: Option<String>,
}

impl RecordSyncState {
    #[must_use]
    pub const fn new(kind: RecordKind, record_id: RecordId) -> Self {
        Self {
            kind,
            record_id,
            remote_id: None,
            in_flight_since: None,
            attempts: 0,
            last_error: None,
            blocked_reason: None,
        }
    }
}

/// What the UI shows next to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
    Blocked(String),
}

impl SyncStatus {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Blocked(_) => "blocked",
        }
    }
}
