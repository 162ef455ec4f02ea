//! Contract between the sync engine and the remote service.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Animal, CareRecord, CareType, RecordId, RecordKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote request failed: {0}")]
    Transport(String),
    #[error("Remote request timed out")]
    Timeout,
    #[error("Remote rejected credentials: {0}")]
    Unauthorized(String),
    #[error("Remote rejected record: {0}")]
    Validation(String),
    #[error("Remote record not found: {0}")]
    NotFound(String),
    #[error("Remote server error: {0}")]
    Server(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// Map a non-success HTTP status to an error variant.
    #[must_use]
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 | 422 => Self::Validation(message),
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            _ => Self::Server(message),
        }
    }

    /// Whether the same request might succeed later without a local change.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Server(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Identity the server assigned to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// The remote collections, one per record kind.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a record; the body carries the local id as `clientId`.
    async fn create(&self, kind: RecordKind, body: &serde_json::Value) -> RemoteResult<RemoteRef>;

    /// Replace the record stored under `remote_id`.
    async fn update(
        &self,
        kind: RecordKind,
        remote_id: &str,
        body: &serde_json::Value,
    ) -> RemoteResult<RemoteRef>;

    async fn delete(&self, kind: RecordKind, remote_id: &str) -> RemoteResult<()>;

    /// Find a record previously created from `client_id`, if the server kept it.
    async fn find_by_client_id(
        &self,
        kind: RecordKind,
        client_id: &RecordId,
    ) -> RemoteResult<Option<RemoteRef>>;

    /// Cheap reachability probe.
    async fn health(&self) -> RemoteResult<()>;
}

/// Animal as sent to the server. Sync metadata stays local.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAnimal {
    pub client_id: RecordId,
    pub name: String,
    pub species: String,
    pub breed: String,
    pub date_of_birth: NaiveDate,
    pub weight: f64,
    pub color: String,
    pub medical_history: String,
    pub vaccinations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkup: Option<NaiveDate>,
}

impl From<&Animal> for RemoteAnimal {
    fn from(animal: &Animal) -> Self {
        Self {
            client_id: animal.id,
            name: animal.name.clone(),
            species: animal.species.clone(),
            breed: animal.breed.clone(),
            date_of_birth: animal.date_of_birth,
            weight: animal.weight,
            color: animal.color.clone(),
            medical_history: animal.medical_history.clone(),
            vaccinations: animal.vaccinations.clone(),
            last_checkup: animal.last_checkup,
        }
    }
}

/// Care record as sent to the server, pointing at the server's animal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCareRecord {
    pub client_id: RecordId,
    pub animal_id: String,
    pub care_type: CareType,
    pub date: NaiveDate,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
}

impl RemoteCareRecord {
    #[must_use]
    pub fn from_local(record: &CareRecord, remote_animal_id: impl Into<String>) -> Self {
        Self {
            client_id: record.id,
            animal_id: remote_animal_id.into(),
            care_type: record.care_type,
            date: record.date,
            notes: record.notes.clone(),
            next_due: record.next_due,
            completed_by: record.completed_by.clone(),
        }
    }
}
