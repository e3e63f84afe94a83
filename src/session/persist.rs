//! Debounced, strictly-ordered snapshot writes.
//!
//! Every state change schedules a persist; a single global debounce timer
//! collapses bursts into one write. All writes go through one serial task,
//! so they can never reorder or run concurrently, and a failed write is
//! logged and skipped rather than wedging the queue. An explicit flush
//! cancels the pending timer and writes immediately, through the same task.

use super::Inner;
use crate::models::SessionSnapshot;
use crate::persistence::SnapshotStore;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Destination for serialized snapshots. The on-disk store is the real one;
/// tests count writes through this seam.
pub(crate) trait SnapshotSink: Send + Sync + 'static {
    fn persist(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()>;
}

impl SnapshotSink for SnapshotStore {
    fn persist(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.save(snapshot)
    }
}

enum PersistCmd {
    Schedule,
    Flush(oneshot::Sender<()>),
}

pub(crate) struct PersistPipeline {
    tx: mpsc::UnboundedSender<PersistCmd>,
}

impl PersistPipeline {
    pub(crate) fn spawn(
        sink: Box<dyn SnapshotSink>,
        inner: Weak<Inner>,
        debounce: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(sink, inner, debounce, rx));
        Self { tx }
    }

    /// Re-arm the debounce timer; the write happens once mutations go quiet.
    pub(crate) fn schedule(&self) {
        let _ = self.tx.send(PersistCmd::Schedule);
    }

    /// Write the current snapshot now and wait for it to hit the sink.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PersistCmd::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(
    sink: Box<dyn SnapshotSink>,
    inner: Weak<Inner>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<PersistCmd>,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        let cmd = match deadline {
            Some(at) => {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => cmd,
                        None => {
                            // Manager dropped with a write pending: get the
                            // final state down before exiting.
                            write_snapshot(&*sink, &inner);
                            break;
                        }
                    },
                    _ = tokio::time::sleep_until(at) => {
                        deadline = None;
                        write_snapshot(&*sink, &inner);
                        continue;
                    }
                }
            }
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };

        match cmd {
            PersistCmd::Schedule => {
                deadline = Some(Instant::now() + debounce);
            }
            PersistCmd::Flush(done) => {
                deadline = None;
                write_snapshot(&*sink, &inner);
                let _ = done.send(());
            }
        }
    }
}

/// Take the snapshot as it is right now and hand it to the sink. Failures
/// do not abort the queue: the next flush writes the then-latest state.
fn write_snapshot(sink: &dyn SnapshotSink, inner: &Weak<Inner>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let snapshot = inner.current_snapshot();
    if let Err(e) = sink.persist(&snapshot) {
        tracing::warn!(error = %e, "session snapshot write failed, will retry on next change");
    }
}
