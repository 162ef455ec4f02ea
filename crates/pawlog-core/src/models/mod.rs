//! Data models for Pawlog

mod animal;
mod care_record;
mod mutation;
mod record;
mod sync_state;

pub use animal::{Animal, KNOWN_SPECIES};
pub use care_record::{CareRecord, CareType};
pub use mutation::{Mutation, MutationAction, MutationEntry};
pub use record::{RecordId, RecordKind};
pub use sync_state::{RecordSyncState, SyncStatus};
