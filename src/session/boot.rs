//! Per-workspace agent boot scheduling.
//!
//! A boot run turns the workspace's agent allocation into a launch plan and
//! feeds it through a bounded-parallelism dispatcher with staggered starts,
//! one retry with backoff, and a crude adaptive brake: three consecutive
//! slow-or-failed tasks halve the parallelism for the rest of the run.

use super::lifecycle::PaneError;
use super::registry::lock;
use super::Inner;
use crate::models::{BootSession, BootStatus, PaneKey, PaneStatus, WorkspaceId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Consecutive slow/failed completions before parallelism is halved.
const SLOW_STREAK_LIMIT: u32 = 3;

/// Pause/cancel switchboard for one boot run. Pausing stops new dispatches
/// but lets in-flight tasks finish; cancellation is cooperative and only
/// makes the loop stop issuing work, in-flight pty calls are not aborted.
pub(crate) struct BootController {
    paused: AtomicBool,
    canceled: AtomicBool,
    max_parallelism: AtomicUsize,
    resumed: Notify,
}

impl BootController {
    pub(crate) fn new(parallelism: usize) -> Self {
        Self {
            paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            max_parallelism: AtomicUsize::new(parallelism.max(1)),
            resumed: Notify::new(),
        }
    }

    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    pub(crate) fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub(crate) fn max_parallelism(&self) -> usize {
        self.max_parallelism.load(Ordering::SeqCst)
    }

    fn set_max_parallelism(&self, value: usize) {
        self.max_parallelism.store(value.max(1), Ordering::SeqCst);
    }

    async fn wait_while_paused(&self) {
        loop {
            if self.is_canceled() || !self.is_paused() {
                return;
            }
            let resumed = self.resumed.notified();
            // Re-check after registering so a resume between the check and
            // the await cannot be missed.
            if self.is_canceled() || !self.is_paused() {
                return;
            }
            resumed.await;
        }
    }
}

pub(crate) struct BootRun {
    pub(crate) controller: Arc<BootController>,
    pub(crate) session: Arc<Mutex<BootSession>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone)]
struct BootTask {
    key: PaneKey,
    command: String,
}

#[derive(Default)]
struct SlowStreak {
    consecutive: u32,
    degraded: bool,
}

impl Inner {
    /// Start a boot run for the workspace, or join the one already in
    /// flight. Returns the run's progress counters.
    pub(crate) fn start_boot(self: &Arc<Self>, workspace: WorkspaceId) -> BootSession {
        let mut runs = lock(&self.registry.boot_runs);
        if let Some(run) = runs.get(&workspace) {
            let snapshot = lock(&run.session).clone();
            if !snapshot.is_finished() && snapshot.status != BootStatus::Idle {
                return snapshot;
            }
        }

        let plan = self.build_boot_plan(workspace);
        let mut session = BootSession::new(plan.len());
        let controller = Arc::new(BootController::new(self.config.boot_parallelism));

        if plan.is_empty() {
            session.status = BootStatus::Completed;
            session.finished_at = Some(chrono::Utc::now());
            let snapshot = session.clone();
            runs.insert(
                workspace,
                BootRun {
                    controller,
                    session: Arc::new(Mutex::new(session)),
                    driver: Mutex::new(None),
                },
            );
            return snapshot;
        }

        session.status = BootStatus::Running;
        let session = Arc::new(Mutex::new(session));
        let snapshot = lock(&session).clone();

        let driver = tokio::spawn(Arc::clone(self).run_boot(
            plan,
            Arc::clone(&controller),
            Arc::clone(&session),
        ));
        runs.insert(
            workspace,
            BootRun {
                controller,
                session,
                driver: Mutex::new(Some(driver)),
            },
        );
        snapshot
    }

    pub(crate) fn pause_boot(&self, workspace: WorkspaceId) {
        if let Some(run) = lock(&self.registry.boot_runs).get(&workspace) {
            run.controller.pause();
            let mut session = lock(&run.session);
            if session.status == BootStatus::Running {
                session.status = BootStatus::Paused;
            }
        }
    }

    pub(crate) fn resume_boot(&self, workspace: WorkspaceId) {
        if let Some(run) = lock(&self.registry.boot_runs).get(&workspace) {
            run.controller.resume();
            let mut session = lock(&run.session);
            if session.status == BootStatus::Paused {
                session.status = BootStatus::Running;
            }
        }
    }

    pub(crate) fn cancel_boot(&self, workspace: WorkspaceId) {
        if let Some(run) = lock(&self.registry.boot_runs).get(&workspace) {
            run.controller.cancel();
        }
    }

    pub(crate) fn boot_progress(&self, workspace: WorkspaceId) -> Option<BootSession> {
        lock(&self.registry.boot_runs)
            .get(&workspace)
            .map(|run| lock(&run.session).clone())
    }

    pub(crate) async fn wait_boot(&self, workspace: WorkspaceId) {
        let driver = lock(&self.registry.boot_runs)
            .get(&workspace)
            .and_then(|run| lock(&run.driver).take());
        if let Some(driver) = driver {
            let _ = driver.await;
        }
    }

    /// Zip enabled agent launches with eligible panes in pane order. Panes
    /// already running or suspended are skipped; the plan is capped by
    /// whichever runs out first.
    fn build_boot_plan(&self, workspace: WorkspaceId) -> Vec<BootTask> {
        let Some(ws) = self.workspace(workspace) else {
            return Vec::new();
        };

        let commands: Vec<String> = ws
            .agents
            .iter()
            .filter(|alloc| alloc.enabled)
            .flat_map(|alloc| std::iter::repeat(alloc.command.clone()).take(alloc.count))
            .collect();

        ws.pane_order
            .iter()
            .filter(|id| {
                ws.panes
                    .get(*id)
                    .map(|p| !p.status.is_live())
                    .unwrap_or(false)
            })
            .zip(commands)
            .map(|(id, command)| BootTask {
                key: PaneKey::new(workspace, id.clone()),
                command,
            })
            .collect()
    }

    async fn run_boot(
        self: Arc<Self>,
        plan: Vec<BootTask>,
        controller: Arc<BootController>,
        session: Arc<Mutex<BootSession>>,
    ) {
        let permits = Arc::new(Semaphore::new(controller.max_parallelism()));
        let streak = Arc::new(Mutex::new(SlowStreak::default()));
        let mut tasks = JoinSet::new();

        for (index, task) in plan.into_iter().enumerate() {
            if controller.is_canceled() {
                break;
            }
            controller.wait_while_paused().await;
            if controller.is_canceled() {
                break;
            }
            if index > 0 {
                tokio::time::sleep(self.config.boot_stagger).await;
            }
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            {
                let mut s = lock(&session);
                s.queued -= 1;
                s.running += 1;
            }

            let inner = Arc::clone(&self);
            let controller = Arc::clone(&controller);
            let session = Arc::clone(&session);
            let streak = Arc::clone(&streak);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let started = Instant::now();
                let result = inner.run_boot_task(&task, &controller).await;
                let failed = result.is_err();
                let canceled = controller.is_canceled();

                {
                    let mut s = lock(&session);
                    s.running -= 1;
                    // A canceled run discards results; the task neither
                    // completed nor failed from the session's perspective.
                    if canceled {
                        s.queued += 1;
                    } else if failed {
                        s.failed += 1;
                    } else {
                        s.completed += 1;
                    }
                }

                let slow = failed || started.elapsed() >= inner.config.boot_slow_threshold;
                let degrade_now = {
                    let mut streak = lock(&streak);
                    if slow {
                        streak.consecutive += 1;
                        if streak.consecutive >= SLOW_STREAK_LIMIT && !streak.degraded {
                            streak.degraded = true;
                            true
                        } else {
                            false
                        }
                    } else {
                        streak.consecutive = 0;
                        false
                    }
                };
                if degrade_now {
                    let current = controller.max_parallelism();
                    let halved = current - current / 2;
                    let shrink_by = current - halved;
                    controller.set_max_parallelism(halved);
                    tracing::info!(
                        parallelism = halved,
                        "boot tasks running slow, degrading parallelism for this run"
                    );
                    for _ in 0..shrink_by {
                        let permits = Arc::clone(&permits);
                        // Swallow one permit for good; this run never gets
                        // it back.
                        tokio::spawn(async move {
                            if let Ok(permit) = permits.acquire_owned().await {
                                permit.forget();
                            }
                        });
                    }
                }

                drop(permit);
            });
        }

        while tasks.join_next().await.is_some() {}

        let mut s = lock(&session);
        s.status = if controller.is_canceled() {
            BootStatus::Canceled
        } else if s.failed > 0 {
            BootStatus::Failed
        } else {
            BootStatus::Completed
        };
        s.finished_at = Some(chrono::Utc::now());
    }

    /// One launch: spawn the pane, wait for its terminal, submit the agent
    /// command. Retried up to the configured limit with linear backoff; the
    /// final failure is recorded on the pane.
    async fn run_boot_task(
        self: &Arc<Self>,
        task: &BootTask,
        controller: &BootController,
    ) -> Result<(), PaneError> {
        let mut last_err = PaneError::Canceled;
        for attempt in 0..=self.config.boot_retry_limit {
            if controller.is_canceled() {
                return Err(PaneError::Canceled);
            }
            if attempt > 0 {
                tokio::time::sleep(self.config.boot_backoff * attempt).await;
            }
            match self.try_boot_task(task).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(
                        pane = %task.key,
                        attempt,
                        error = %e,
                        "agent launch attempt failed"
                    );
                    last_err = e;
                }
            }
        }

        let reason = last_err.to_string();
        self.update_pane(&task.key, |pane| {
            pane.status = PaneStatus::Error;
            pane.error = Some(reason.clone());
        });
        Err(last_err)
    }

    async fn try_boot_task(self: &Arc<Self>, task: &BootTask) -> Result<(), PaneError> {
        self.ensure_spawned(&task.key, None).await?;
        self.wait_ready(&task.key, self.config.boot_ready_timeout)
            .await?;
        self.pty
            .write(&task.key, task.command.as_bytes(), true)
            .await
            .map_err(|e| PaneError::Write(e.to_string()))?;
        let command = task.command.clone();
        self.update_pane(&task.key, |pane| {
            pane.last_command = Some(command.clone());
        });
        Ok(())
    }
}
