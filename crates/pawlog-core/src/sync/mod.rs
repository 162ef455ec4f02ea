//! Push-only synchronization with the pet-care API.
//!
//! The engine drains the mutation queue (falling back to a scan of unsynced
//! records), pushes each record through a [`RemoteApi`], and records the
//! outcome in the per-record sync state. The trigger layer decides when a
//! pass runs.

mod engine;
mod http;
mod plan;
mod remote;
mod trigger;

pub use engine::{SyncEngine, SyncError, SyncReport};
pub use http::HttpRemoteApi;
pub use plan::{Intent, PlannedOp, SyncPlan};
pub use remote::{RemoteApi, RemoteAnimal, RemoteCareRecord, RemoteError, RemoteRef, RemoteResult};
pub use trigger::{Connectivity, ConnectivityMonitor, SchedulerOptions, SyncHandle, SyncScheduler};

pub(crate) use http::parse_api_error;
