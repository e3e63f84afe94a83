//! Runtime registry owned by the session manager.
//!
//! Everything here is process-local bookkeeping partitioned by workspace or
//! pane key: none of it is persisted, and concurrent operations on different
//! panes never contend beyond a brief map lock.

use super::boot::BootRun;
use super::lifecycle::SharedSpawn;
use crate::models::{PaneKey, PendingInit, WorkspaceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Poison-recovering lock: state behind these mutexes stays consistent even
/// if a holder panicked, so we keep going with whatever is there.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub(crate) struct RuntimeRegistry {
    pending_init: Mutex<HashMap<PaneKey, PendingInit>>,
    ready: Mutex<HashMap<PaneKey, watch::Sender<bool>>>,
    pub(crate) inflight: Mutex<HashMap<PaneKey, SharedSpawn>>,
    pub(crate) boot_runs: Mutex<HashMap<WorkspaceId, BootRun>>,
    suspend_timers: Mutex<HashMap<WorkspaceId, JoinHandle<()>>>,
    /// Bumped on every activation change; suspendable operations capture it
    /// and abort cleanly when it has moved on.
    epoch: AtomicU64,
}

impl RuntimeRegistry {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Queue (or coalesce into) the pane's pending init entry: last command
    /// wins, the execute flag sticks once any request asked for it.
    pub(crate) fn queue_init(&self, key: &PaneKey, init: PendingInit) {
        let mut pending = lock(&self.pending_init);
        match pending.get_mut(key) {
            Some(existing) => {
                existing.command = init.command;
                existing.execute |= init.execute;
            }
            None => {
                pending.insert(key.clone(), init);
            }
        }
    }

    pub(crate) fn take_init(&self, key: &PaneKey) -> Option<PendingInit> {
        lock(&self.pending_init).remove(key)
    }

    /// Put a failed delivery back, unless a newer entry arrived in the
    /// meantime (the newer one wins).
    pub(crate) fn restore_init(&self, key: &PaneKey, init: PendingInit) {
        lock(&self.pending_init).entry(key.clone()).or_insert(init);
    }

    pub(crate) fn has_pending_init(&self, key: &PaneKey) -> bool {
        lock(&self.pending_init).contains_key(key)
    }

    fn ready_sender(&self, key: &PaneKey) -> watch::Sender<bool> {
        lock(&self.ready)
            .entry(key.clone())
            .or_insert_with(|| watch::channel(false).0)
            .clone()
    }

    pub(crate) fn mark_ready(&self, key: &PaneKey) {
        self.ready_sender(key).send_replace(true);
    }

    pub(crate) fn is_ready(&self, key: &PaneKey) -> bool {
        lock(&self.ready)
            .get(key)
            .map(|tx| *tx.borrow())
            .unwrap_or(false)
    }

    pub(crate) fn ready_receiver(&self, key: &PaneKey) -> watch::Receiver<bool> {
        self.ready_sender(key).subscribe()
    }

    /// Drop all per-pane runtime state: pending init, readiness signal and
    /// its waiters, in-flight spawn dedup entry.
    pub(crate) fn clear_pane(&self, key: &PaneKey) {
        lock(&self.pending_init).remove(key);
        lock(&self.ready).remove(key);
        lock(&self.inflight).remove(key);
    }

    pub(crate) fn arm_suspend_timer(&self, workspace: WorkspaceId, timer: JoinHandle<()>) {
        if let Some(old) = lock(&self.suspend_timers).insert(workspace, timer) {
            old.abort();
        }
    }

    pub(crate) fn cancel_suspend_timer(&self, workspace: WorkspaceId) {
        if let Some(timer) = lock(&self.suspend_timers).remove(&workspace) {
            timer.abort();
        }
    }

    pub(crate) fn clear_workspace(&self, workspace: WorkspaceId) {
        self.cancel_suspend_timer(workspace);
        lock(&self.pending_init).retain(|key, _| key.workspace != workspace);
        lock(&self.ready).retain(|key, _| key.workspace != workspace);
        lock(&self.inflight).retain(|key, _| key.workspace != workspace);
        if let Some(run) = lock(&self.boot_runs).remove(&workspace) {
            run.controller.cancel();
        }
    }
}
