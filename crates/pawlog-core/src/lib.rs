//! pawlog-core - Core library for Pawlog
//!
//! This crate contains the models, local store, mutation queue, and sync
//! engine shared by every Pawlog client. Records are written locally first
//! and pushed to the pet-care API whenever a sync pass runs.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Animal, CareRecord, CareType, RecordId, RecordKind, SyncStatus};
pub use services::{RecordStore, SyncHook};
