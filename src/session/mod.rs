//! The session orchestration core.
//!
//! [`SessionManager`] owns all workspace/pane state plus the process-local
//! runtime registry, and drives the pty service without ever blocking the
//! caller: spawns are throttled and deduplicated, agent boots are scheduled
//! per workspace, inactive workspaces are suspended on a timer, input is
//! coalesced, and every state change feeds a debounced persistence pipeline.

mod activation;
mod boot;
mod input;
mod lifecycle;
mod limiter;
mod persist;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::PaneError;

use crate::layout::{self, FocusDirection};
use crate::models::{
    AgentAllocation, Blueprint, BootSession, NamedSnapshot, Pane, PaneId, PaneKey, PaneStatus,
    PendingInit, Section, SessionSnapshot, Workspace, WorkspaceId,
};
use crate::persistence::SnapshotStore;
use crate::pty::{PtyError, PtyEvent, PtyEvents, PtyService};
use anyhow::{Context, Result};
use input::InputBuffer;
use limiter::SpawnLimiter;
use persist::{PersistPipeline, SnapshotSink};
use registry::{lock, RuntimeRegistry};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrent pty spawn calls allowed in flight.
    pub spawn_limit: usize,
    /// Concurrent agent boot tasks per workspace.
    pub boot_parallelism: usize,
    /// Retries per boot task after the first attempt.
    pub boot_retry_limit: u32,
    /// Base backoff between boot retries, multiplied by the attempt number.
    pub boot_backoff: Duration,
    /// Delay between boot task dispatches.
    pub boot_stagger: Duration,
    /// How long a boot task waits for the pane's terminal-ready signal.
    pub boot_ready_timeout: Duration,
    /// Boot tasks at or above this duration count as slow for backpressure.
    pub boot_slow_threshold: Duration,
    /// Keystroke coalescing window.
    pub input_debounce: Duration,
    /// Snapshot write debounce.
    pub persist_debounce: Duration,
    /// Inactivity window before a deactivated workspace's panes are
    /// suspended.
    pub suspend_after: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            spawn_limit: limiter::DEFAULT_SPAWN_LIMIT,
            boot_parallelism: 3,
            boot_retry_limit: 1,
            boot_backoff: Duration::from_millis(500),
            boot_stagger: Duration::from_millis(150),
            boot_ready_timeout: Duration::from_secs(3),
            boot_slow_threshold: Duration::from_secs(5),
            input_debounce: Duration::from_millis(16),
            persist_debounce: Duration::from_millis(400),
            suspend_after: Duration::from_secs(300),
        }
    }
}

/// In-memory session state. Workspaces are stored behind `Arc` and replaced
/// wholesale on mutation, so readers never observe a partially-updated pane
/// map.
pub(crate) struct SessionState {
    pub(crate) workspaces: HashMap<WorkspaceId, Arc<Workspace>>,
    pub(crate) order: Vec<WorkspaceId>,
    pub(crate) active: Option<WorkspaceId>,
    pub(crate) active_section: Section,
    pub(crate) echo_input: bool,
    pub(crate) ui_preferences: HashMap<String, serde_json::Value>,
}

impl SessionState {
    fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let order: Vec<WorkspaceId> = snapshot.workspaces.iter().map(|ws| ws.id).collect();
        let workspaces = snapshot
            .workspaces
            .into_iter()
            .map(|ws| (ws.id, Arc::new(ws)))
            .collect();
        Self {
            workspaces,
            order,
            active: snapshot.active_workspace,
            active_section: snapshot.active_section,
            echo_input: snapshot.echo_input,
            ui_preferences: snapshot.ui_preferences,
        }
    }

    fn to_snapshot(&self) -> SessionSnapshot {
        let mut snapshot = SessionSnapshot::empty();
        snapshot.workspaces = self
            .order
            .iter()
            .filter_map(|id| self.workspaces.get(id))
            .map(|ws| (**ws).clone())
            .collect();
        snapshot.active_workspace = self.active;
        snapshot.active_section = self.active_section;
        snapshot.echo_input = self.echo_input;
        snapshot.ui_preferences = self.ui_preferences.clone();
        snapshot
    }
}

pub(crate) struct Inner {
    pub(crate) config: OrchestratorConfig,
    pub(crate) pty: Arc<dyn PtyService>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) registry: RuntimeRegistry,
    pub(crate) limiter: SpawnLimiter,
    pub(crate) persist: PersistPipeline,
    store: Option<SnapshotStore>,
    pub(crate) input_buffers: Mutex<HashMap<PaneKey, InputBuffer>>,
    output_sink: Mutex<Option<mpsc::UnboundedSender<(PaneKey, Vec<u8>)>>>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Build the orchestrator on top of a pty service and the on-disk store,
    /// loading the persisted session (with legacy migration) if one exists.
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: OrchestratorConfig,
        pty: Arc<dyn PtyService>,
        store: SnapshotStore,
        events: PtyEvents,
    ) -> Self {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "could not load saved session, starting fresh");
                None
            }
        };
        Self::with_parts(
            config,
            pty,
            Box::new(store.clone()),
            Some(store),
            snapshot,
            events,
        )
    }

    pub(crate) fn with_parts(
        config: OrchestratorConfig,
        pty: Arc<dyn PtyService>,
        sink: Box<dyn SnapshotSink>,
        store: Option<SnapshotStore>,
        snapshot: Option<SessionSnapshot>,
        events: PtyEvents,
    ) -> Self {
        let state = SessionState::from_snapshot(snapshot.unwrap_or_else(SessionSnapshot::empty));
        let debounce = config.persist_debounce;
        let spawn_limit = config.spawn_limit;
        let inner = Arc::new_cyclic(|weak| Inner {
            config,
            pty,
            state: Mutex::new(state),
            registry: RuntimeRegistry::default(),
            limiter: SpawnLimiter::new(spawn_limit),
            persist: PersistPipeline::spawn(sink, weak.clone(), debounce),
            store,
            input_buffers: Mutex::new(HashMap::new()),
            output_sink: Mutex::new(None),
        });

        tokio::spawn(run_event_pump(inner.clone(), events));

        Self { inner }
    }

    /// Where the rendering collaborator receives raw pane output.
    pub fn set_output_sink(&self, sink: mpsc::UnboundedSender<(PaneKey, Vec<u8>)>) {
        *lock(&self.inner.output_sink) = Some(sink);
    }

    // ---- workspace operations -------------------------------------------

    /// Create a workspace with `pane_count` panes and activate it.
    pub fn create_workspace(
        &self,
        name: impl Into<String>,
        root: PathBuf,
        pane_count: usize,
        agents: Vec<AgentAllocation>,
    ) -> WorkspaceId {
        let mut ws = Workspace::new(name, root);
        ws.agents = agents;
        ws.set_pane_count(pane_count);
        let id = ws.id;
        {
            let mut state = lock(&self.inner.state);
            state.workspaces.insert(id, Arc::new(ws));
            state.order.push(id);
        }
        self.inner.persist.schedule();
        self.set_active_workspace(id);
        id
    }

    /// Make `workspace` the single live workspace: cancel its pending
    /// suspend timer, resume and spawn its panes, and kick off an agent boot
    /// run; the previously active workspace gets its boot paused and an
    /// inactivity timer armed. Returns false if the workspace is unknown.
    pub fn set_active_workspace(&self, workspace: WorkspaceId) -> bool {
        self.inner.set_active_workspace(workspace)
    }

    /// Close every pane and remove the workspace. The most recently updated
    /// remaining workspace becomes active.
    pub async fn close_workspace(&self, workspace: WorkspaceId) -> bool {
        let (exists, is_last, panes) = {
            let state = lock(&self.inner.state);
            match state.workspaces.get(&workspace) {
                Some(ws) => (
                    true,
                    state.order.len() == 1,
                    ws.pane_order
                        .iter()
                        .map(|id| PaneKey::new(workspace, id.clone()))
                        .collect::<Vec<_>>(),
                ),
                None => (false, false, Vec::new()),
            }
        };
        if !exists {
            return false;
        }

        // Make sure the final state of the last workspace reaches disk
        // before it disappears from the in-memory session.
        if is_last {
            self.inner.persist.flush().await;
        }

        self.inner.registry.clear_workspace(workspace);
        for key in panes {
            self.inner.registry.clear_pane(&key);
            let pty = self.inner.pty.clone();
            spawn_best_effort("close pane on workspace close", async move {
                pty.close(&key).await
            });
        }

        let next = {
            let mut state = lock(&self.inner.state);
            state.workspaces.remove(&workspace);
            state.order.retain(|id| *id != workspace);
            if state.active == Some(workspace) {
                state.active = None;
                state
                    .workspaces
                    .values()
                    .max_by_key(|ws| ws.updated_at)
                    .map(|ws| ws.id)
            } else {
                None
            }
        };
        if let Some(next) = next {
            self.set_active_workspace(next);
        }
        self.inner.persist.schedule();
        true
    }

    /// Grow or shrink a workspace to exactly `count` panes. New panes start
    /// idle; removed panes have their ptys closed best-effort.
    pub fn set_pane_count(&self, workspace: WorkspaceId, count: usize) -> bool {
        let mut removed = Vec::new();
        let updated = self.inner.update_workspace(workspace, |ws| {
            removed = ws.set_pane_count(count);
        });
        for id in removed {
            let key = PaneKey::new(workspace, id);
            self.inner.registry.clear_pane(&key);
            let pty = self.inner.pty.clone();
            spawn_best_effort("close removed pane", async move { pty.close(&key).await });
        }
        updated
    }

    pub fn toggle_zoom(&self, workspace: WorkspaceId, pane: &str) -> bool {
        let pane = pane.to_string();
        self.inner
            .update_workspace(workspace, |ws| ws.toggle_zoom(&pane))
    }

    /// Resolve which pane should receive focus when moving from `from` in
    /// `direction`. Pure read; ties break by pane-order index.
    pub fn move_focus(
        &self,
        workspace: WorkspaceId,
        from: &str,
        direction: FocusDirection,
    ) -> Option<PaneId> {
        let ws = self.inner.workspace(workspace)?;
        layout::resolve_focus(&ws.layout, &ws.pane_order, from, direction)
    }

    // ---- pane operations ------------------------------------------------

    /// Drive the pane to running in the active workspace, queueing `init`
    /// for delivery once its terminal is ready. See the lifecycle engine for
    /// the full contract. Failures are recorded on the pane as well as
    /// returned.
    pub async fn ensure_spawned(
        &self,
        key: &PaneKey,
        init: Option<PendingInit>,
    ) -> Result<(), PaneError> {
        self.inner.ensure_spawned(key, init).await
    }

    /// External notice that the pane's process is gone. The only path out of
    /// running/spawning/suspended driven by the pty service.
    pub fn mark_exited(&self, key: &PaneKey, error: Option<String>) {
        self.inner.mark_exited(key, error);
    }

    /// Raised once by the rendering layer after the pane's first successful
    /// paint; releases any pending init command.
    pub async fn terminal_ready(&self, key: &PaneKey) {
        self.inner.registry.mark_ready(key);
        self.inner.flush_pending_init(key).await;
    }

    /// Coalesced keystroke input. With the global echo flag set, input to
    /// any pane of the active workspace fans out to all of its panes.
    pub fn send_input(&self, key: &PaneKey, bytes: &[u8]) {
        self.inner.send_input(key, bytes);
    }

    pub async fn resize_pane(&self, key: &PaneKey, rows: u16, cols: u16) {
        if let Err(e) = self.inner.pty.resize(key, rows, cols).await {
            tracing::debug!(pane = %key, error = %e, "resize failed (best-effort)");
        }
    }

    // ---- agent boot -----------------------------------------------------

    /// Start (or join) the workspace's agent boot run. Idempotent while a
    /// run is in flight: the existing run's progress is returned.
    pub fn start_boot(&self, workspace: WorkspaceId) -> BootSession {
        self.inner.start_boot(workspace)
    }

    pub fn pause_boot(&self, workspace: WorkspaceId) {
        self.inner.pause_boot(workspace);
    }

    pub fn resume_boot(&self, workspace: WorkspaceId) {
        self.inner.resume_boot(workspace);
    }

    pub fn cancel_boot(&self, workspace: WorkspaceId) {
        self.inner.cancel_boot(workspace);
    }

    pub fn boot_progress(&self, workspace: WorkspaceId) -> Option<BootSession> {
        self.inner.boot_progress(workspace)
    }

    /// Wait for the workspace's current boot run to finish.
    pub async fn wait_boot(&self, workspace: WorkspaceId) {
        self.inner.wait_boot(workspace).await;
    }

    // ---- persistence ----------------------------------------------------

    /// Write the current snapshot now, through the same ordered queue as
    /// debounced writes.
    pub async fn flush(&self) {
        self.inner.persist.flush().await;
    }

    /// Capture the live session under `name` in the named snapshot list.
    pub fn save_named_snapshot(&self, name: impl Into<String>) -> Result<()> {
        let store = self.store()?;
        let mut snapshots = store.load_snapshots()?;
        snapshots.push(NamedSnapshot::new(name, self.inner.current_snapshot()));
        store.save_snapshots(&snapshots)
    }

    /// Replace the live session with a named snapshot. Flushes the current
    /// state first, then tears down every running pane.
    pub async fn restore_snapshot(&self, name: &str) -> Result<bool> {
        let store = self.store()?;
        let named = match store.load_snapshots()?.into_iter().find(|s| s.name == name) {
            Some(named) => named,
            None => return Ok(false),
        };

        self.inner.persist.flush().await;

        let live: Vec<PaneKey> = {
            let state = lock(&self.inner.state);
            state
                .workspaces
                .values()
                .flat_map(|ws| {
                    ws.pane_order
                        .iter()
                        .filter(|id| {
                            ws.panes
                                .get(*id)
                                .map(|p| p.status != PaneStatus::Idle)
                                .unwrap_or(false)
                        })
                        .map(|id| PaneKey::new(ws.id, id.clone()))
                })
                .collect()
        };
        let old_workspaces: Vec<WorkspaceId> = lock(&self.inner.state).order.clone();
        for ws in old_workspaces {
            self.inner.registry.clear_workspace(ws);
        }
        for key in live {
            let pty = self.inner.pty.clone();
            spawn_best_effort("close pane on snapshot restore", async move {
                pty.close(&key).await
            });
        }

        let mut snapshot = named.snapshot;
        for ws in snapshot.workspaces.iter_mut() {
            for pane in ws.panes.values_mut() {
                pane.status = PaneStatus::Idle;
            }
        }
        let activate = snapshot.active_workspace;
        {
            let mut state = lock(&self.inner.state);
            *state = SessionState::from_snapshot(snapshot);
            // Activation below re-establishes the active workspace.
            state.active = None;
        }
        self.inner.persist.schedule();
        if let Some(ws) = activate {
            self.set_active_workspace(ws);
        }
        Ok(true)
    }

    /// Save a workspace's shape (pane count, directories, agents) as a
    /// reusable blueprint.
    pub fn save_blueprint(&self, name: impl Into<String>, workspace: WorkspaceId) -> Result<()> {
        let store = self.store()?;
        let ws = self
            .inner
            .workspace(workspace)
            .context("workspace not found")?;
        let mut blueprints = store.load_blueprints()?;
        blueprints.push(Blueprint::from_workspace(name, &ws));
        store.save_blueprints(&blueprints)
    }

    /// Instantiate a blueprint as a fresh workspace: panes in the recorded
    /// directories, autorun commands queued as pending init, agents ready to
    /// boot on activation.
    pub fn create_workspace_from_blueprint(&self, name: &str) -> Result<Option<WorkspaceId>> {
        let store = self.store()?;
        let blueprint = match store.load_blueprints()?.into_iter().find(|b| b.name == name) {
            Some(b) => b,
            None => return Ok(None),
        };

        let root = blueprint
            .directories
            .first()
            .cloned()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let id = self.create_workspace(
            blueprint.name.clone(),
            root,
            blueprint.pane_count,
            blueprint.agents.clone(),
        );

        self.inner.update_workspace(id, |ws| {
            for (pane_id, dir) in ws.pane_order.clone().iter().zip(&blueprint.directories) {
                if let Some(pane) = ws.panes.get_mut(pane_id) {
                    pane.cwd = dir.clone();
                }
            }
        });
        if let Some(ws) = self.inner.workspace(id) {
            for (pane_id, command) in ws.pane_order.iter().zip(&blueprint.autorun) {
                self.inner.registry.queue_init(
                    &PaneKey::new(id, pane_id.clone()),
                    PendingInit::new(command.clone(), true),
                );
            }
        }
        Ok(Some(id))
    }

    // ---- derived views --------------------------------------------------

    pub fn workspaces(&self) -> Vec<Arc<Workspace>> {
        let state = lock(&self.inner.state);
        state
            .order
            .iter()
            .filter_map(|id| state.workspaces.get(id).cloned())
            .collect()
    }

    pub fn workspace(&self, id: WorkspaceId) -> Option<Arc<Workspace>> {
        self.inner.workspace(id)
    }

    pub fn active_workspace(&self) -> Option<Arc<Workspace>> {
        let id = lock(&self.inner.state).active?;
        self.inner.workspace(id)
    }

    pub fn pane_statuses(&self, workspace: WorkspaceId) -> Vec<(PaneId, PaneStatus)> {
        self.inner
            .workspace(workspace)
            .map(|ws| {
                ws.pane_order
                    .iter()
                    .filter_map(|id| ws.panes.get(id).map(|p| (id.clone(), p.status)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn echo_input(&self) -> bool {
        lock(&self.inner.state).echo_input
    }

    pub fn set_echo_input(&self, echo: bool) {
        lock(&self.inner.state).echo_input = echo;
        self.inner.persist.schedule();
    }

    pub fn set_active_section(&self, section: Section) {
        lock(&self.inner.state).active_section = section;
        self.inner.persist.schedule();
    }

    pub fn set_ui_preference(&self, key: impl Into<String>, value: serde_json::Value) {
        lock(&self.inner.state)
            .ui_preferences
            .insert(key.into(), value);
        self.inner.persist.schedule();
    }

    fn store(&self) -> Result<&SnapshotStore> {
        self.inner
            .store
            .as_ref()
            .context("no snapshot store configured")
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

impl Inner {
    pub(crate) fn is_active(&self, workspace: WorkspaceId) -> bool {
        lock(&self.state).active == Some(workspace)
    }

    pub(crate) fn workspace(&self, id: WorkspaceId) -> Option<Arc<Workspace>> {
        lock(&self.state).workspaces.get(&id).cloned()
    }

    pub(crate) fn pane_status(&self, key: &PaneKey) -> Option<PaneStatus> {
        self.workspace(key.workspace)?
            .panes
            .get(&key.pane)
            .map(|p| p.status)
    }

    /// Copy-on-write workspace mutation: clone, mutate, swap the `Arc`, then
    /// schedule a persist. Readers holding the old `Arc` keep a consistent
    /// view.
    pub(crate) fn update_workspace(
        &self,
        id: WorkspaceId,
        f: impl FnOnce(&mut Workspace),
    ) -> bool {
        let updated = {
            let mut state = lock(&self.state);
            match state.workspaces.get(&id) {
                Some(arc) => {
                    let mut ws = (**arc).clone();
                    f(&mut ws);
                    ws.updated_at = chrono::Utc::now();
                    state.workspaces.insert(id, Arc::new(ws));
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist.schedule();
        }
        updated
    }

    pub(crate) fn update_pane(&self, key: &PaneKey, f: impl FnOnce(&mut Pane)) -> bool {
        let mut found = false;
        self.update_workspace(key.workspace, |ws| {
            if let Some(pane) = ws.panes.get_mut(&key.pane) {
                f(pane);
                found = true;
            }
        });
        found
    }

    pub(crate) fn set_pane_status(&self, key: &PaneKey, status: PaneStatus) {
        self.update_pane(key, |pane| {
            pane.status = status;
            if status != PaneStatus::Error {
                pane.error = None;
            }
        });
    }

    pub(crate) fn current_snapshot(&self) -> SessionSnapshot {
        lock(&self.state).to_snapshot()
    }
}

async fn run_event_pump(inner: Arc<Inner>, mut events: PtyEvents) {
    while let Some((key, event)) = events.recv().await {
        match event {
            PtyEvent::Output(bytes) => {
                if let Some(sink) = lock(&inner.output_sink).as_ref() {
                    let _ = sink.send((key, bytes));
                }
            }
            PtyEvent::Exited(code) => {
                let error = (code != 0).then(|| format!("process exited with status {}", code));
                inner.mark_exited(&key, error);
            }
            PtyEvent::Error(reason) => {
                inner.mark_exited(&key, Some(reason));
            }
        }
    }
}

/// Fire-and-forget pty call whose failure is non-fatal by policy. The
/// failure is still observed in the log rather than silently dropped.
pub(crate) fn spawn_best_effort<F>(what: &'static str, fut: F)
where
    F: Future<Output = std::result::Result<(), PtyError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            tracing::debug!(error = %e, "{} failed (best-effort)", what);
        }
    });
}
