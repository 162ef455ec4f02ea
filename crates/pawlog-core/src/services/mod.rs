//! Async services shared by every client front-end

mod record_store;

pub use record_store::{RecordStore, StoreSummary, SyncHook};
