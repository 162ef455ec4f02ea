//! When sync passes run.
//!
//! A single worker task owns the engine. Triggers (local writes, regained
//! connectivity, the periodic timer) only wake it. Wakes that arrive while a
//! pass is running collapse into a single follow-up pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::engine::{SyncEngine, SyncError};
use super::remote::RemoteApi;
use crate::services::SyncHook;
use crate::state::SyncState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Tracks reachability and reports when it comes back.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    current: Connectivity,
}

impl ConnectivityMonitor {
    pub const fn new(initial: Connectivity) -> Self {
        Self { current: initial }
    }

    pub const fn current(&self) -> Connectivity {
        self.current
    }

    pub fn is_online(&self) -> bool {
        self.current == Connectivity::Online
    }

    /// Record a new observation. Returns `true` only on offline to online.
    pub fn observe(&mut self, next: Connectivity) -> bool {
        let regained = self.current == Connectivity::Offline && next == Connectivity::Online;
        self.current = next;
        regained
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub initial: Connectivity,
    /// Run a pass this long after the last one when nothing else wakes the worker.
    pub interval: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            initial: Connectivity::Online,
            interval: None,
        }
    }
}

struct Shared {
    wake: Notify,
    connectivity: Mutex<ConnectivityMonitor>,
    shutdown: AtomicBool,
    state: watch::Sender<SyncState>,
}

/// Cheap, cloneable way to poke the scheduler.
#[derive(Clone)]
pub struct SyncHandle {
    shared: Arc<Shared>,
}

impl SyncHandle {
    /// Ask for a pass soon. Never blocks and never starts a second worker.
    pub fn request_sync(&self) {
        self.shared.wake.notify_one();
    }

    /// Feed a connectivity observation. Returns whether it triggered a sync.
    pub fn set_connectivity(&self, connectivity: Connectivity) -> bool {
        let regained = self
            .shared
            .connectivity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(connectivity);

        if connectivity == Connectivity::Offline {
            self.shared.state.send_replace(SyncState::Offline);
        }
        if regained {
            tracing::info!("Connectivity regained; requesting sync");
            self.request_sync();
        }
        regained
    }

    pub fn is_online(&self) -> bool {
        self.shared
            .connectivity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_online()
    }

    pub fn state(&self) -> SyncState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.shared.state.subscribe()
    }

    /// Stop the worker after any running pass.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

impl SyncHook for SyncHandle {
    fn request_sync(&self) {
        Self::request_sync(self);
    }
}

/// Owns the background sync worker.
pub struct SyncScheduler {
    handle: SyncHandle,
    worker: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the worker on the current Tokio runtime.
    pub fn start<R>(engine: Arc<SyncEngine<R>>, options: SchedulerOptions) -> Self
    where
        R: RemoteApi + 'static,
    {
        let initial_state = if options.initial == Connectivity::Online {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        let (state, _) = watch::channel(initial_state);
        let shared = Arc::new(Shared {
            wake: Notify::new(),
            connectivity: Mutex::new(ConnectivityMonitor::new(options.initial)),
            shutdown: AtomicBool::new(false),
            state,
        });

        let worker = tokio::spawn(run_worker(engine, Arc::clone(&shared), options.interval));
        Self {
            handle: SyncHandle { shared },
            worker,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(error) = self.worker.await {
            tracing::warn!("Sync worker ended abnormally: {error}");
        }
    }
}

async fn run_worker<R: RemoteApi>(
    engine: Arc<SyncEngine<R>>,
    shared: Arc<Shared>,
    interval: Option<Duration>,
) {
    loop {
        match interval {
            Some(period) => {
                tokio::select! {
                    () = shared.wake.notified() => {}
                    () = tokio::time::sleep(period) => {
                        tracing::debug!("Periodic sync tick");
                    }
                }
            }
            None => shared.wake.notified().await,
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let online = shared
            .connectivity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_online();
        if !online {
            tracing::debug!("Offline; sync request deferred until connectivity returns");
            shared.state.send_replace(SyncState::Offline);
            continue;
        }

        shared.state.send_replace(SyncState::Syncing);
        let next = match engine.run_pass().await {
            Ok(report) => SyncState::from_report(&report),
            Err(SyncError::AuthenticationRequired(message)) => {
                tracing::warn!("Sync paused: {message}");
                SyncState::NeedsAuth
            }
            Err(error) => {
                tracing::error!("Sync pass failed: {error}");
                SyncState::Error
            }
        };
        shared.state.send_replace(next);
    }

    tracing::debug!("Sync worker stopped");
}
