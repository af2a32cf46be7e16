//! Debounced auto-save.
//!
//! Every local mutation schedules a save; the save runs once no further
//! mutation arrived for the debounce period. The coordinator runs on its
//! own task and receives commands over a channel, so a burst of mutations
//! costs one export, one local write and one push per auto provider.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};
use wellsync_providers::BoxFuture;

use crate::local::{LocalSnapshotFile, LocalStore};
use crate::notify::{Notifier, NotifyKind, report_failure};
use crate::sync::SnapshotSyncEngine;

/// A local change that should eventually be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    /// What changed, for logs only.
    pub entity: String,
    pub at: DateTime<Utc>,
}

impl MutationEvent {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            at: Utc::now(),
        }
    }
}

/// The action run when the debounce period elapses.
pub trait Persist: Send + Sync {
    fn persist(&self) -> BoxFuture<'_, ()>;
}

/// Commands that can be sent to the coordinator.
#[derive(Debug)]
enum AutoSaveCommand {
    Mutation(MutationEvent),
    /// Drop the pending save.
    Cancel,
    /// Run the pending save now and acknowledge.
    Flush(oneshot::Sender<()>),
}

/// Coalesces bursts of mutations into single persist calls.
pub struct AutoSaveCoordinator {
    command_tx: mpsc::Sender<AutoSaveCommand>,
    task: JoinHandle<()>,
}

impl AutoSaveCoordinator {
    /// Spawns the coordinator task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(persist: Arc<dyn Persist>, debounce: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let task = tokio::spawn(run(command_rx, persist, debounce));
        Self { command_tx, task }
    }

    /// Schedules a save, restarting the debounce period.
    pub fn schedule(&self, event: MutationEvent) {
        match self.command_tx.try_send(AutoSaveCommand::Mutation(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("auto-save queue full, save already pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("auto-save coordinator is gone");
            }
        }
    }

    /// Drops a pending save.
    pub fn cancel(&self) {
        if self.command_tx.try_send(AutoSaveCommand::Cancel).is_err() {
            debug!("could not cancel pending auto-save");
        }
    }

    /// Runs a pending save immediately and waits for it.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .command_tx
            .send(AutoSaveCommand::Flush(done_tx))
            .await
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }

    /// Saves anything pending and stops the task.
    pub async fn shutdown(self) {
        let Self { command_tx, task } = self;
        drop(command_tx);
        if let Err(e) = task.await {
            warn!("auto-save task ended abnormally: {}", e);
        }
    }
}

async fn run(
    mut command_rx: mpsc::Receiver<AutoSaveCommand>,
    persist: Arc<dyn Persist>,
    debounce: Duration,
) {
    let timer = sleep(debounce);
    tokio::pin!(timer);
    let mut pending = 0usize;

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(AutoSaveCommand::Mutation(event)) => {
                    pending += 1;
                    trace!(entity = %event.entity, pending, "mutation scheduled");
                    timer.as_mut().reset(Instant::now() + debounce);
                }
                Some(AutoSaveCommand::Cancel) => {
                    if pending > 0 {
                        debug!(pending, "pending auto-save cancelled");
                    }
                    pending = 0;
                }
                Some(AutoSaveCommand::Flush(done)) => {
                    if pending > 0 {
                        debug!(pending, "flushing auto-save");
                        pending = 0;
                        persist.persist().await;
                    }
                    let _ = done.send(());
                }
                None => {
                    if pending > 0 {
                        debug!(pending, "saving before shutdown");
                        persist.persist().await;
                    }
                    break;
                }
            },
            () = &mut timer, if pending > 0 => {
                debug!(
                    coalesced = pending,
                    delay_ms = debounce.as_millis() as u64,
                    "debounce elapsed, saving"
                );
                pending = 0;
                persist.persist().await;
            }
        }
    }
}

/// Exports the snapshot and fans it out to the local file and every
/// auto-sync provider.
///
/// The local write and each push are independent: one failing does not
/// stop the others.
pub struct SnapshotFlush {
    local: Arc<dyn LocalStore>,
    file: Option<Arc<dyn LocalSnapshotFile>>,
    engines: Vec<Arc<SnapshotSyncEngine>>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<FlushState>,
}

#[derive(Debug, Default)]
struct FlushState {
    /// Mutation count at the last completed export.
    last_count: Option<u64>,
    /// Set once the local file could not be regained.
    file_unavailable: bool,
}

impl SnapshotFlush {
    pub fn new(
        local: Arc<dyn LocalStore>,
        file: Option<Arc<dyn LocalSnapshotFile>>,
        engines: Vec<Arc<SnapshotSyncEngine>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            local,
            file,
            engines,
            notifier,
            state: Mutex::new(FlushState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FlushState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush(&self) {
        let count = self.local.mutation_count();
        if self.state().last_count == Some(count) {
            debug!(count, "nothing changed since last save");
            return;
        }

        let snapshot = match self.local.export_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("failed to export snapshot: {}", e);
                self.notifier
                    .notify(NotifyKind::Error, &format!("Could not save journal: {}", e));
                return;
            }
        };

        self.write_local(&snapshot).await;

        for engine in self.engines.iter().filter(|e| e.is_auto()) {
            let result = engine.push(&snapshot).await;
            if let (false, Some(kind)) = (result.success, result.error_kind) {
                let message = format!(
                    "Auto-sync to {} failed: {}",
                    engine.kind().display_name(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
                report_failure(self.notifier.as_ref(), kind, &message);
            }
        }

        self.state().last_count = Some(count);
    }

    async fn write_local(&self, snapshot: &str) {
        let Some(file) = &self.file else {
            return;
        };
        if self.state().file_unavailable {
            trace!("local backup file unavailable, skipping");
            return;
        }

        if !file.has_permission().await {
            debug!("local backup permission lost, resolving file again");
            if !file.reresolve().await {
                warn!("local backup file unavailable until reconfigured");
                self.state().file_unavailable = true;
                return;
            }
        }

        if let Err(e) = file.write(snapshot).await {
            warn!("failed to write local backup: {}", e);
            self.notifier
                .notify(NotifyKind::Error, &format!("Could not write local backup: {}", e));
        }
    }
}

impl Persist for SnapshotFlush {
    fn persist(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.flush())
    }
}
