use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pawlog_core::services::StoreSummary;
use pawlog_core::state::SyncState;
use pawlog_core::sync::{
    Connectivity, RemoteApi, SchedulerOptions, SyncEngine, SyncError, SyncReport, SyncScheduler,
};

use crate::commands::common::{format_mutation_line, open_store, short_id, SyncContext};
use crate::error::CliError;

/// Background interval for `sync watch` when the profile sets none.
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

pub async fn run_sync(db_path: &Path, global_profile: Option<&str>) -> Result<(), CliError> {
    let context = SyncContext::load(global_profile)?;
    context.require_session()?;
    let store = open_store(db_path).await?;
    let engine =
        SyncEngine::new(store, context.remote()?).with_push_timeout(context.settings.push_timeout());

    let report = engine.run_pass().await?;
    if report.auth_failed {
        return Err(rejected_session(&context.profile_name));
    }

    println!("{}", format_sync_report(&report));
    Ok(())
}

pub async fn run_sync_status(db_path: &Path, as_json: bool) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let summary = store.summary().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in format_summary_lines(&summary) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_sync_queue(db_path: &Path, as_json: bool, drain: bool) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    if drain {
        let drained = store.drain_mutations().await?;
        tracing::info!("Drained {} queued mutations", drained.len());
        println!(
            "Removed {} queued mutation(s); unsynced and deleted records are still pushed on the next sync",
            drained.len()
        );
        return Ok(());
    }

    let pending = store.pending_mutations().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
    } else if pending.is_empty() {
        println!("Mutation queue is empty.");
    } else {
        for mutation in &pending {
            println!("{}", format_mutation_line(mutation));
        }
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C, probing the backend for reachability.
pub async fn run_sync_watch(
    db_path: &Path,
    global_profile: Option<&str>,
    probe_interval_secs: u64,
) -> Result<(), CliError> {
    let context = SyncContext::load(global_profile)?;
    context.require_session()?;
    let store = open_store(db_path).await?;
    let engine = Arc::new(
        SyncEngine::new(store, context.remote()?)
            .with_push_timeout(context.settings.push_timeout()),
    );

    let interval = context
        .settings
        .sync_interval()
        .unwrap_or(Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS));
    let scheduler = SyncScheduler::start(
        Arc::clone(&engine),
        SchedulerOptions {
            initial: Connectivity::Offline,
            interval: Some(interval),
        },
    );
    let handle = scheduler.handle();
    let mut states = handle.subscribe();
    let mut last_state = handle.state();
    let mut probe = tokio::time::interval(Duration::from_secs(probe_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    println!(
        "Watching profile '{}' against {}; press Ctrl-C to stop",
        context.profile_name,
        engine.remote().base_url()
    );

    let outcome = loop {
        tokio::select! {
            _ = probe.tick() => {
                let connectivity = match engine.remote().health().await {
                    Ok(()) => Connectivity::Online,
                    Err(error) => {
                        tracing::debug!("Health probe failed: {error}");
                        Connectivity::Offline
                    }
                };
                if handle.set_connectivity(connectivity) {
                    tracing::info!("Backend reachable; syncing");
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = *states.borrow_and_update();
                if state != last_state {
                    println!("sync: {}", state.label());
                    last_state = state;
                }
                if state == SyncState::NeedsAuth {
                    break Err(rejected_session(&context.profile_name));
                }
            }
            result = &mut shutdown => {
                break result.map_err(CliError::from);
            }
        }
    };

    scheduler.shutdown().await;
    outcome
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut line = format!(
        "Sync completed: {} pushed, {} deleted, {} skipped",
        report.pushed, report.deleted, report.collapsed
    );
    if !report.is_clean() {
        line.push_str(&format!(
            "; {} deferred, {} failed, {} blocked",
            report.deferred, report.failed, report.blocked
        ));
    }
    if report.rejected > 0 {
        line.push_str(&format!(
            "; {} delete(s) refused by the server",
            report.rejected
        ));
    }
    line
}

pub fn format_summary_lines(summary: &StoreSummary) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Animals:       {} ({} unsynced)",
            summary.animals, summary.unsynced_animals
        ),
        format!(
            "Care records:  {} ({} unsynced)",
            summary.care_records, summary.unsynced_care_records
        ),
        format!("Queued:        {}", summary.queued_mutations),
    ];
    if !summary.blocked.is_empty() {
        lines.push(format!("Blocked:       {}", summary.blocked.len()));
        for state in &summary.blocked {
            lines.push(format!(
                "  {:<6}  {:<13}  {}",
                state.kind.as_str(),
                short_id(&state.record_id),
                state.blocked_reason.as_deref().unwrap_or("")
            ));
        }
    }
    lines
}

fn rejected_session(profile_name: &str) -> CliError {
    CliError::Sync(SyncError::AuthenticationRequired(format!(
        "the server rejected the session for profile '{profile_name}'; run `pawlog auth login`"
    )))
}
