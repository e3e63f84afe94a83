//! Per-pane lifecycle state machine.
//!
//! `idle -> spawning -> running -> {suspended, closed, error}`, with
//! `suspended -> running` on resume. A pane that exits is closed, never
//! silently reset to idle; the only path out of running/spawning/suspended
//! driven by an external event is [`Inner::mark_exited`].

use super::registry::lock;
use super::Inner;
use crate::models::{PaneKey, PaneStatus, PendingInit};
use crate::pty::{PtyError, SpawnedPty};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaneError {
    #[error("workspace or pane no longer exists")]
    Missing,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("workspace deactivated before the pane could spawn")]
    Stale,
    #[error("terminal did not become ready in time")]
    ReadyTimeout,
    #[error("write failed: {0}")]
    Write(String),
    #[error("boot canceled")]
    Canceled,
}

/// Clonable in-flight spawn: concurrent `ensure_spawned` calls for the same
/// pane all await this one future instead of issuing duplicate spawns.
pub(crate) type SharedSpawn = Shared<BoxFuture<'static, Result<SpawnedPty, PaneError>>>;

impl Inner {
    /// Drive the pane toward running, queueing `init` for delivery on
    /// terminal readiness. No-op if the pane's workspace is not active. A
    /// suspended pane is resumed in place, falling back to a full respawn if
    /// the resume fails. Spawn failures land on the pane as `error` status;
    /// this layer never retries (retry is the boot scheduler's job).
    pub(crate) async fn ensure_spawned(
        self: &Arc<Self>,
        key: &PaneKey,
        init: Option<PendingInit>,
    ) -> Result<(), PaneError> {
        if let Some(init) = init {
            self.registry.queue_init(key, init);
        }

        if !self.is_active(key.workspace) {
            return Ok(());
        }
        let status = self.pane_status(key).ok_or(PaneError::Missing)?;

        match status {
            PaneStatus::Running => {
                self.flush_pending_init(key).await;
                Ok(())
            }
            PaneStatus::Suspended => match self.pty.resume(key).await {
                Ok(()) => {
                    self.set_pane_status(key, PaneStatus::Running);
                    self.flush_pending_init(key).await;
                    Ok(())
                }
                Err(e) => {
                    tracing::debug!(pane = %key, error = %e, "in-place resume failed, respawning");
                    self.spawn_pane(key).await
                }
            },
            _ => self.spawn_pane(key).await,
        }
    }

    /// Spawn the pane's pty, deduplicating concurrent callers through a
    /// shared future. Exactly one spawn call reaches the pty service per
    /// in-flight attempt.
    async fn spawn_pane(self: &Arc<Self>, key: &PaneKey) -> Result<(), PaneError> {
        let spawn = {
            let mut inflight = lock(&self.registry.inflight);
            match inflight.get(key) {
                Some(existing) => existing.clone(),
                None => {
                    let inner = Arc::clone(self);
                    let task_key = key.clone();
                    let fut: SharedSpawn =
                        async move { inner.do_spawn(task_key).await }.boxed().shared();
                    inflight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let result = spawn.await;
        lock(&self.registry.inflight).remove(key);

        match result {
            Ok(_) => {
                self.flush_pending_init(key).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The single spawn attempt behind the shared future. Runs the full
    /// transition: spawning status, limiter slot, pty spawn (with one
    /// close-and-retry on a stale handle), then running or error.
    async fn do_spawn(self: Arc<Self>, key: PaneKey) -> Result<SpawnedPty, PaneError> {
        let cwd = self
            .workspace(key.workspace)
            .and_then(|ws| ws.panes.get(&key.pane).map(|p| p.cwd.clone()))
            .ok_or(PaneError::Missing)?;

        self.set_pane_status(&key, PaneStatus::Spawning);

        let epoch = self.registry.epoch();
        let _slot = self.limiter.acquire().await;

        // The limiter wait is a suspension point; the workspace may have
        // been deactivated while we queued.
        if self.registry.epoch() != epoch && !self.is_active(key.workspace) {
            self.set_pane_status(&key, PaneStatus::Idle);
            return Err(PaneError::Stale);
        }

        let spawned = match self.pty.spawn(&key, &cwd).await {
            Ok(spawned) => Ok(spawned),
            Err(PtyError::AlreadyExists(_)) => {
                // Stale handle from a previous life of this pane: close it
                // once and retry exactly once.
                if let Err(e) = self.pty.close(&key).await {
                    tracing::debug!(pane = %key, error = %e, "closing stale pty failed");
                }
                self.pty.spawn(&key, &cwd).await
            }
            Err(e) => Err(e),
        };

        match spawned {
            Ok(spawned) => {
                self.update_pane(&key, |pane| {
                    pane.status = PaneStatus::Running;
                    pane.error = None;
                    pane.shell = Some(spawned.shell.clone());
                    pane.cwd = spawned.cwd.clone();
                });
                Ok(spawned)
            }
            Err(e) => {
                let reason = e.to_string();
                self.update_pane(&key, |pane| {
                    pane.status = PaneStatus::Error;
                    pane.error = Some(reason.clone());
                });
                Err(PaneError::Spawn(reason))
            }
        }
    }

    /// The pane's process is gone (exit or transport error): transition to
    /// closed and drop all of its runtime state.
    pub(crate) fn mark_exited(&self, key: &PaneKey, error: Option<String>) {
        self.registry.clear_pane(key);
        lock(&self.input_buffers).remove(key);
        self.update_pane(key, |pane| {
            pane.status = PaneStatus::Closed;
            pane.error = error;
        });
    }

    /// Deliver the pane's pending init command if its terminal surface is
    /// ready. At-least-once: a failed write puts the entry back for the next
    /// readiness signal or `ensure_spawned` call.
    pub(crate) async fn flush_pending_init(&self, key: &PaneKey) {
        if !self.registry.is_ready(key) {
            return;
        }
        let Some(init) = self.registry.take_init(key) else {
            return;
        };
        match self.pty.write(key, init.command.as_bytes(), init.execute).await {
            Ok(()) => {
                let command = init.command;
                self.update_pane(key, |pane| pane.last_command = Some(command.clone()));
            }
            Err(e) => {
                tracing::warn!(pane = %key, error = %e, "pending init delivery failed, keeping it queued");
                self.registry.restore_init(key, init);
            }
        }
    }

    /// Wait for the pane's terminal-ready signal, bounded by `timeout`.
    pub(crate) async fn wait_ready(
        &self,
        key: &PaneKey,
        timeout: std::time::Duration,
    ) -> Result<(), PaneError> {
        let mut ready = self.registry.ready_receiver(key);
        let result = match tokio::time::timeout(timeout, ready.wait_for(|r| *r)).await {
            Ok(Ok(_)) => Ok(()),
            // Channel gone means the pane was torn down while we waited.
            Ok(Err(_)) => Err(PaneError::Missing),
            Err(_) => Err(PaneError::ReadyTimeout),
        };
        result
    }
}
