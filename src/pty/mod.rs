//! Boundary to the pseudo-terminal transport.
//!
//! The orchestration core only ever talks to a [`PtyService`]; the
//! portable-pty backed implementation lives in [`native`], and tests inject
//! mocks. Output, exit and error events flow back asynchronously over a
//! channel keyed by [`PaneKey`].

mod native;

pub use native::NativePtyService;

use crate::models::PaneKey;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What the pty service reports back from a successful spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedPty {
    pub cwd: PathBuf,
    pub shell: String,
}

#[derive(Debug, Clone, Error)]
pub enum PtyError {
    #[error("pane {0} already has a live pty")]
    AlreadyExists(PaneKey),
    #[error("failed to spawn pane {key}: {reason}")]
    SpawnFailed { key: PaneKey, reason: String },
    #[error("pane {0} has no live pty")]
    NotFound(PaneKey),
    #[error("pty io failed for pane {key}: {reason}")]
    Io { key: PaneKey, reason: String },
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl PtyError {
    pub(crate) fn io(key: &PaneKey, err: impl std::fmt::Display) -> Self {
        PtyError::Io {
            key: key.clone(),
            reason: err.to_string(),
        }
    }
}

/// Asynchronous per-pane events emitted by the transport.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Output(Vec<u8>),
    Exited(i32),
    Error(String),
}

pub type PtyEvents = tokio::sync::mpsc::UnboundedReceiver<(PaneKey, PtyEvent)>;

#[async_trait]
pub trait PtyService: Send + Sync {
    /// Spawn the pane's shell process in `cwd`.
    async fn spawn(&self, key: &PaneKey, cwd: &Path) -> Result<SpawnedPty, PtyError>;

    /// Write raw bytes; with `execute` the transport submits them as a
    /// command (appends a newline).
    async fn write(&self, key: &PaneKey, data: &[u8], execute: bool) -> Result<(), PtyError>;

    async fn resize(&self, key: &PaneKey, rows: u16, cols: u16) -> Result<(), PtyError>;

    /// Tear down the pane's process and forget the handle.
    async fn close(&self, key: &PaneKey) -> Result<(), PtyError>;

    /// Pause the pane's process without destroying it.
    async fn suspend(&self, key: &PaneKey) -> Result<(), PtyError>;

    /// Restart a suspended pane's process in place.
    async fn resume(&self, key: &PaneKey) -> Result<(), PtyError>;
}
