//! Database layer for Pawlog

mod connection;
mod migrations;
mod mutation_queue;
mod record_repository;
mod sync_state_repository;

pub use connection::Database;
pub use mutation_queue::{MutationQueue, SqliteMutationQueue};
pub use record_repository::{RecordRepository, SqliteRecordRepository};
pub use sync_state_repository::{SqliteSyncStateRepository, SyncStateRepository};
