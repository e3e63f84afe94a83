use super::workspace::{AgentAllocation, Workspace};
use super::WorkspaceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Current on-disk snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    #[default]
    Workspaces,
    Terminal,
    Kanban,
}

/// The sole unit of durable session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub workspaces: Vec<Workspace>,
    #[serde(default)]
    pub active_workspace: Option<WorkspaceId>,
    #[serde(default)]
    pub active_section: Section,
    #[serde(default)]
    pub echo_input: bool,
    #[serde(default)]
    pub ui_preferences: HashMap<String, serde_json::Value>,
}

impl SessionSnapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            workspaces: Vec::new(),
            active_workspace: None,
            active_section: Section::default(),
            echo_input: false,
            ui_preferences: HashMap::new(),
        }
    }
}

/// A user-named, timestamped copy of the full session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedSnapshot {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub snapshot: SessionSnapshot,
}

impl NamedSnapshot {
    pub fn new(name: impl Into<String>, snapshot: SessionSnapshot) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            snapshot,
        }
    }
}

/// A named workspace template: how many panes, which directories they open
/// in, what to run in them, and the agent allocation to boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub pane_count: usize,
    /// Per-pane working directories, applied in pane order; panes past the
    /// end of this list fall back to the workspace root.
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Commands queued as pending init for the first panes, in order.
    #[serde(default)]
    pub autorun: Vec<String>,
    #[serde(default)]
    pub agents: Vec<AgentAllocation>,
    pub created_at: DateTime<Utc>,
}

impl Blueprint {
    pub fn from_workspace(name: impl Into<String>, ws: &Workspace) -> Self {
        let directories = ws
            .pane_order
            .iter()
            .filter_map(|id| ws.panes.get(id))
            .map(|p| p.cwd.clone())
            .collect();
        Self {
            name: name.into(),
            pane_count: ws.pane_count(),
            directories,
            autorun: Vec::new(),
            agents: ws.agents.clone(),
            created_at: Utc::now(),
        }
    }
}
