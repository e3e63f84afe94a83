//! Which workspace is live, and what happens to the others.
//!
//! Exactly one workspace has running panes. Activation resumes and spawns
//! its panes and kicks an agent boot run; the workspace losing the spotlight
//! gets its boot paused and an inactivity timer armed, after which its
//! running panes are suspended to give their resources back to the host.

use super::Inner;
use crate::models::{PaneKey, PaneStatus, WorkspaceId};
use std::sync::Arc;

impl Inner {
    pub(crate) fn set_active_workspace(self: &Arc<Self>, workspace: WorkspaceId) -> bool {
        let previous = {
            let mut state = super::registry::lock(&self.state);
            if !state.workspaces.contains_key(&workspace) {
                return false;
            }
            let previous = state.active;
            state.active = Some(workspace);
            previous
        };

        self.registry.bump_epoch();
        // Reactivating before the inactivity window elapses means no
        // suspend happens at all.
        self.registry.cancel_suspend_timer(workspace);

        if let Some(previous) = previous.filter(|prev| *prev != workspace) {
            self.pause_boot(previous);
            self.arm_suspend_timer(previous);
        }

        if previous != Some(workspace) {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.activate_workspace(workspace).await });
        }
        self.persist.schedule();
        true
    }

    /// Bring an activated workspace's panes back to life. Runs off the
    /// caller's path so activation never blocks the interactive surface.
    async fn activate_workspace(self: Arc<Self>, workspace: WorkspaceId) {
        let epoch = self.registry.epoch();
        let panes: Vec<(PaneKey, PaneStatus)> = self
            .workspace(workspace)
            .map(|ws| {
                ws.pane_order
                    .iter()
                    .filter_map(|id| {
                        ws.panes
                            .get(id)
                            .map(|p| (PaneKey::new(workspace, id.clone()), p.status))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (key, status) in &panes {
            if *status != PaneStatus::Suspended {
                continue;
            }
            match self.pty.resume(key).await {
                Ok(()) => self.set_pane_status(key, PaneStatus::Running),
                // A pane that fails to resume stays suspended; the next
                // ensure_spawned falls back to a respawn.
                Err(e) => tracing::debug!(pane = %key, error = %e, "resume on activation failed"),
            }
        }

        if self.registry.epoch() != epoch {
            return;
        }

        self.resume_boot(workspace);
        // The boot plan is built from pane statuses as they are now, before
        // the blanket spawn below marks everything running.
        self.start_boot(workspace);

        for (key, _) in &panes {
            if self.registry.epoch() != epoch {
                return;
            }
            if let Err(e) = self.ensure_spawned(key, None).await {
                tracing::debug!(pane = %key, error = %e, "spawn on activation failed");
            }
        }
    }

    /// After the inactivity window, suspend every running pane of a
    /// workspace that is still inactive. Reactivation aborts the timer.
    fn arm_suspend_timer(self: &Arc<Self>, workspace: WorkspaceId) {
        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.config.suspend_after).await;
            if inner.is_active(workspace) {
                return;
            }
            inner.suspend_workspace(workspace).await;
        });
        self.registry.arm_suspend_timer(workspace, timer);
    }

    async fn suspend_workspace(self: Arc<Self>, workspace: WorkspaceId) {
        let running: Vec<PaneKey> = self
            .workspace(workspace)
            .map(|ws| {
                ws.pane_order
                    .iter()
                    .filter(|id| {
                        ws.panes
                            .get(*id)
                            .map(|p| p.status == PaneStatus::Running)
                            .unwrap_or(false)
                    })
                    .map(|id| PaneKey::new(workspace, id.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for key in running {
            match self.pty.suspend(&key).await {
                Ok(()) => self.set_pane_status(&key, PaneStatus::Suspended),
                // Panes that refuse to suspend are left running.
                Err(e) => {
                    tracing::debug!(pane = %key, error = %e, "suspend on inactivity failed")
                }
            }
        }
    }
}
