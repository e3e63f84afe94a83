//! Test doubles for the orchestration core: a scriptable in-memory pty
//! service and snapshot sinks that count writes.

use super::persist::SnapshotSink;
use super::{OrchestratorConfig, SessionManager};
use crate::models::{PaneKey, SessionSnapshot};
use crate::pty::{PtyError, PtyEvent, PtyService, SpawnedPty};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteRecord {
    pub key: PaneKey,
    pub data: Vec<u8>,
    pub execute: bool,
}

/// In-memory [`PtyService`] that records every call and can be scripted to
/// fail spawns, writes, resumes or suspends.
#[derive(Default)]
pub(crate) struct MockPty {
    pub spawn_calls: AtomicUsize,
    concurrent_spawns: AtomicUsize,
    pub max_concurrent_spawns: AtomicUsize,
    /// How long each spawn call takes; lets tests observe overlap.
    pub spawn_delay: Mutex<Duration>,
    /// Keys whose spawn fails with `SpawnFailed`.
    pub fail_spawn: Mutex<HashSet<PaneKey>>,
    /// Keys that report `AlreadyExists` until closed once.
    pub stale: Mutex<HashSet<PaneKey>>,
    pub live: Mutex<HashSet<PaneKey>>,
    pub writes: Mutex<Vec<WriteRecord>>,
    /// Fail this many upcoming write calls.
    pub write_failures: AtomicUsize,
    pub closes: Mutex<Vec<PaneKey>>,
    pub suspends: Mutex<Vec<PaneKey>>,
    pub resumes: Mutex<Vec<PaneKey>>,
    pub fail_suspend: AtomicBool,
    pub fail_resume: AtomicBool,
}

impl MockPty {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn writes_to(&self, key: &PaneKey) -> Vec<WriteRecord> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.key == *key)
            .cloned()
            .collect()
    }

    pub(crate) fn set_spawn_delay(&self, delay: Duration) {
        *self.spawn_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl PtyService for MockPty {
    async fn spawn(&self, key: &PaneKey, cwd: &Path) -> Result<SpawnedPty, PtyError> {
        self.spawn_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.concurrent_spawns.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_spawns.fetch_max(now, Ordering::SeqCst);

        let delay = *self.spawn_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.concurrent_spawns.fetch_sub(1, Ordering::SeqCst);

        if self.fail_spawn.lock().unwrap().contains(key) {
            return Err(PtyError::SpawnFailed {
                key: key.clone(),
                reason: "scripted failure".into(),
            });
        }
        if self.stale.lock().unwrap().contains(key) || self.live.lock().unwrap().contains(key) {
            return Err(PtyError::AlreadyExists(key.clone()));
        }
        self.live.lock().unwrap().insert(key.clone());
        Ok(SpawnedPty {
            cwd: cwd.to_path_buf(),
            shell: "/bin/zsh".into(),
        })
    }

    async fn write(&self, key: &PaneKey, data: &[u8], execute: bool) -> Result<(), PtyError> {
        if self
            .write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PtyError::io(key, "scripted write failure"));
        }
        self.writes.lock().unwrap().push(WriteRecord {
            key: key.clone(),
            data: data.to_vec(),
            execute,
        });
        Ok(())
    }

    async fn resize(&self, _key: &PaneKey, _rows: u16, _cols: u16) -> Result<(), PtyError> {
        Ok(())
    }

    async fn close(&self, key: &PaneKey) -> Result<(), PtyError> {
        self.stale.lock().unwrap().remove(key);
        self.live.lock().unwrap().remove(key);
        self.closes.lock().unwrap().push(key.clone());
        Ok(())
    }

    async fn suspend(&self, key: &PaneKey) -> Result<(), PtyError> {
        if self.fail_suspend.load(Ordering::SeqCst) {
            return Err(PtyError::io(key, "scripted suspend failure"));
        }
        self.suspends.lock().unwrap().push(key.clone());
        Ok(())
    }

    async fn resume(&self, key: &PaneKey) -> Result<(), PtyError> {
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(PtyError::io(key, "scripted resume failure"));
        }
        self.resumes.lock().unwrap().push(key.clone());
        Ok(())
    }
}

pub(crate) struct NullSink;

impl SnapshotSink for NullSink {
    fn persist(&self, _snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingSink {
    pub writes: AtomicUsize,
    pub last: Mutex<Option<SessionSnapshot>>,
}

impl SnapshotSink for Arc<CountingSink> {
    fn persist(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

/// Orchestrator timings scaled down so tests stay fast under the paused
/// tokio clock.
pub(crate) fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        boot_stagger: Duration::from_millis(10),
        boot_backoff: Duration::from_millis(20),
        boot_ready_timeout: Duration::from_millis(500),
        boot_slow_threshold: Duration::from_millis(400),
        input_debounce: Duration::from_millis(16),
        persist_debounce: Duration::from_millis(50),
        suspend_after: Duration::from_millis(200),
        ..OrchestratorConfig::default()
    }
}

pub(crate) type EventSender = mpsc::UnboundedSender<(PaneKey, PtyEvent)>;

pub(crate) fn manager(pty: Arc<MockPty>) -> (SessionManager, EventSender) {
    manager_with(pty, fast_config())
}

pub(crate) fn manager_with(
    pty: Arc<MockPty>,
    config: OrchestratorConfig,
) -> (SessionManager, EventSender) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let manager =
        SessionManager::with_parts(config, pty, Box::new(NullSink), None, None, events_rx);
    (manager, events_tx)
}

/// Same as [`manager_with`] but with a write-counting snapshot sink.
pub(crate) fn manager_with_sink(
    pty: Arc<MockPty>,
    config: OrchestratorConfig,
) -> (SessionManager, Arc<CountingSink>) {
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(CountingSink::default());
    let manager = SessionManager::with_parts(
        config,
        pty,
        Box::new(Arc::clone(&sink)),
        None,
        None,
        events_rx,
    );
    (manager, sink)
}
