//! Shared cross-client state types.

use serde::Serialize;

use crate::sync::SyncReport;

/// Sync indicator published by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No pass has run yet
    Idle,
    Offline,
    Syncing,
    Synced,
    /// Last pass left records behind (failed, deferred, or blocked)
    Pending,
    /// Credentials were rejected; nothing syncs until the user signs in
    NeedsAuth,
    Error,
}

impl SyncState {
    pub const fn from_report(report: &SyncReport) -> Self {
        if report.auth_failed {
            Self::NeedsAuth
        } else if report.is_clean() {
            Self::Synced
        } else {
            Self::Pending
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::NeedsAuth => "needs sign-in",
            Self::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_maps_to_state() {
        assert_eq!(SyncState::from_report(&SyncReport::default()), SyncState::Synced);

        let leftover = SyncReport {
            pushed: 2,
            deferred: 1,
            ..Default::default()
        };
        assert_eq!(SyncState::from_report(&leftover), SyncState::Pending);

        let rejected = SyncReport {
            failed: 1,
            auth_failed: true,
            ..Default::default()
        };
        assert_eq!(SyncState::from_report(&rejected), SyncState::NeedsAuth);
    }
}
