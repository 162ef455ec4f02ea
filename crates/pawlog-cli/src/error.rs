use std::io;

use pawlog_core::auth::AuthError;
use pawlog_core::sync::{RemoteError, SyncError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] pawlog_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Animal not found for id/prefix: {0}")]
    AnimalNotFound(String),
    #[error("Care record not found for id/prefix: {0}")]
    CareRecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Profile '{0}' is not signed in. Run `pawlog auth login --email <email> --password <password>`."
    )]
    NotSignedIn(String),
    #[error("{0}")]
    InvalidInput(String),
}
