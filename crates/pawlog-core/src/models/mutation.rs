//! Mutation queue entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{RecordId, RecordKind};

/// What a local write intended to do to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Save,
    Delete,
}

impl MutationAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "save" => Ok(Self::Save),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown mutation action '{other}'")),
        }
    }
}

/// A mutation about to be appended to the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEntry {
    pub kind: RecordKind,
    pub action: MutationAction,
    pub record_id: RecordId,
    /// Record data for saves, `{"id": ...}` for deletes
    pub snapshot: serde_json::Value,
}

impl MutationEntry {
    pub fn save<T: Serialize>(
        kind: RecordKind,
        record_id: RecordId,
        record: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            kind,
            action: MutationAction::Save,
            record_id,
            snapshot: serde_json::to_value(record)?,
        })
    }

    #[must_use]
    pub fn delete(kind: RecordKind, record_id: RecordId) -> Self {
        Self {
            kind,
            action: MutationAction::Delete,
            record_id,
            snapshot: serde_json::json!({ "id": record_id }),
        }
    }
}

/// A queued mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Queue position; strictly increasing in append order
    pub seq: i64,
    pub kind: RecordKind,
    pub action: MutationAction,
    pub record_id: RecordId,
    pub snapshot: serde_json::Value,
    /// Append time (Unix ms), never lower than any earlier entry's
    pub timestamp: i64,
}
