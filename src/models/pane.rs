use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type WorkspaceId = Uuid;
pub type PaneId = String;

/// Composite key addressing one pane's runtime resources (pty handle, pending
/// init entry, input buffer, readiness signal). Pane ids are only unique
/// within their workspace, so every runtime map is keyed by this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneKey {
    pub workspace: WorkspaceId,
    pub pane: PaneId,
}

impl PaneKey {
    pub fn new(workspace: WorkspaceId, pane: impl Into<PaneId>) -> Self {
        Self {
            workspace,
            pane: pane.into(),
        }
    }
}

impl fmt::Display for PaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ws = self.workspace.to_string();
        write!(f, "{}:{}", &ws[..8], self.pane)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaneStatus {
    #[default]
    Idle,
    Spawning,
    Running,
    Suspended,
    Closed,
    Error,
}

impl PaneStatus {
    /// A pane with a live backing process (running or merely stopped).
    pub fn is_live(self) -> bool {
        matches!(self, PaneStatus::Running | PaneStatus::Suspended)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pane {
    pub id: PaneId,
    pub title: String,
    pub cwd: PathBuf,
    /// Shell reported by the pty service once the pane has spawned.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub status: PaneStatus,
    /// Last command written to this pane with the execute flag.
    #[serde(default)]
    pub last_command: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Pane {
    pub fn new(id: impl Into<PaneId>, cwd: PathBuf) -> Self {
        let id = id.into();
        let title = id
            .strip_prefix("pane-")
            .map(|n| format!("Pane {}", n))
            .unwrap_or_else(|| id.clone());
        Self {
            id,
            title,
            cwd,
            shell: None,
            status: PaneStatus::Idle,
            last_command: None,
            error: None,
        }
    }
}

/// Queued "type this, optionally press enter" command waiting for the pane's
/// terminal surface to report ready. At most one per pane; later requests
/// coalesce (last command wins, execute sticks once requested).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInit {
    pub command: String,
    pub execute: bool,
}

impl PendingInit {
    pub fn new(command: impl Into<String>, execute: bool) -> Self {
        Self {
            command: command.into(),
            execute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pane_key_display_is_short() {
        let key = PaneKey::new(Uuid::new_v4(), "pane-3");
        let shown = key.to_string();
        assert!(shown.ends_with(":pane-3"));
        assert_eq!(shown.len(), 8 + 1 + "pane-3".len());
    }

    #[test]
    fn pane_title_derived_from_id() {
        let pane = Pane::new("pane-4", PathBuf::from("/tmp"));
        assert_eq!(pane.title, "Pane 4");
        assert_eq!(pane.status, PaneStatus::Idle);
    }
}
