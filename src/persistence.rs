//! Durable storage for the session snapshot, named snapshots and blueprints.
//!
//! Everything lives as pretty-printed JSON under the platform config
//! directory. Writing is synchronous; ordering and debouncing are the
//! persistence pipeline's job (`session::persist`), not the store's.

use crate::models::{
    Blueprint, NamedSnapshot, Pane, PaneId, PaneStatus, SessionSnapshot, Workspace,
    SNAPSHOT_VERSION,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Named snapshots and blueprints are pruned to this many entries, oldest
/// first.
pub const MAX_NAMED_ENTRIES: usize = 20;

const SESSION_FILE: &str = "session.json";
const SNAPSHOTS_FILE: &str = "snapshots.json";
const BLUEPRINTS_FILE: &str = "blueprints.json";

/// Pre-workspace on-disk shape: one flat pane set. Detected by the missing
/// `version` field and migrated into a single workspace on load.
#[derive(Debug, Deserialize)]
struct LegacySnapshot {
    #[serde(default)]
    pane_order: Vec<PaneId>,
    #[serde(default)]
    panes: HashMap<PaneId, Pane>,
    #[serde(default)]
    root: Option<PathBuf>,
    #[serde(default)]
    echo_input: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new() -> Result<Self> {
        let dir = dirs::config_dir()
            .context("could not find config directory")?
            .join("deskmux");
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    /// Store rooted at an explicit directory, used by tests and the CLI's
    /// `--state-dir` override.
    pub fn with_dir(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Load the live session snapshot, migrating the legacy single-workspace
    /// shape if that is what is on disk. Pane statuses are reset to idle:
    /// ptys do not survive a restart.
    pub fn load(&self) -> Result<Option<SessionSnapshot>> {
        let path = self.path(SESSION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;

        let mut snapshot = if value.get("version").is_some() {
            serde_json::from_value::<SessionSnapshot>(value)?
        } else {
            migrate_legacy(serde_json::from_value::<LegacySnapshot>(value)?)
        };

        for ws in snapshot.workspaces.iter_mut() {
            for pane in ws.panes.values_mut() {
                if pane.status != PaneStatus::Idle {
                    pane.status = PaneStatus::Idle;
                }
            }
        }
        snapshot.version = SNAPSHOT_VERSION;

        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let contents = serde_json::to_string_pretty(snapshot)?;
        fs::write(self.path(SESSION_FILE), contents)?;
        Ok(())
    }

    pub fn load_snapshots(&self) -> Result<Vec<NamedSnapshot>> {
        self.load_list(SNAPSHOTS_FILE)
    }

    /// Persist the named snapshot list, pruned to [`MAX_NAMED_ENTRIES`]
    /// newest entries.
    pub fn save_snapshots(&self, snapshots: &[NamedSnapshot]) -> Result<()> {
        let pruned = prune(snapshots, |s| s.created_at);
        let contents = serde_json::to_string_pretty(&pruned)?;
        fs::write(self.path(SNAPSHOTS_FILE), contents)?;
        Ok(())
    }

    pub fn load_blueprints(&self) -> Result<Vec<Blueprint>> {
        self.load_list(BLUEPRINTS_FILE)
    }

    pub fn save_blueprints(&self, blueprints: &[Blueprint]) -> Result<()> {
        let pruned = prune(blueprints, |b| b.created_at);
        let contents = serde_json::to_string_pretty(&pruned)?;
        fs::write(self.path(BLUEPRINTS_FILE), contents)?;
        Ok(())
    }

    fn load_list<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

fn prune<T: Clone>(items: &[T], created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) -> Vec<T> {
    if items.len() <= MAX_NAMED_ENTRIES {
        return items.to_vec();
    }
    let mut sorted = items.to_vec();
    sorted.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    sorted.truncate(MAX_NAMED_ENTRIES);
    sorted
}

fn migrate_legacy(legacy: LegacySnapshot) -> SessionSnapshot {
    let root = legacy
        .root
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut ws = Workspace::new("main", root);
    ws.pane_order = legacy.pane_order;
    ws.panes = legacy.panes;
    // Legacy ids are "pane-N"; keep the counter ahead of the largest one.
    ws.next_pane_seq = ws
        .pane_order
        .iter()
        .filter_map(|id| id.strip_prefix("pane-"))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    ws.retile();

    let active = ws.id;
    let mut snapshot = SessionSnapshot::empty();
    snapshot.workspaces = vec![ws];
    snapshot.active_workspace = Some(active);
    snapshot.echo_input = legacy.echo_input;
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;
    use tempfile::TempDir;

    fn store() -> (TempDir, SnapshotStore) {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::with_dir(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    fn sample_snapshot() -> SessionSnapshot {
        let mut ws = Workspace::new("alpha", PathBuf::from("/tmp/alpha"));
        ws.set_pane_count(3);
        let active = ws.id;
        let mut snapshot = SessionSnapshot::empty();
        snapshot.workspaces = vec![ws];
        snapshot.active_workspace = Some(active);
        snapshot.active_section = Section::Terminal;
        snapshot.echo_input = true;
        snapshot
    }

    #[test]
    fn load_missing_file_is_none() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = store();
        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.workspaces.len(), 1);
        assert_eq!(loaded.active_workspace, snapshot.active_workspace);
        assert_eq!(loaded.active_section, Section::Terminal);
        assert!(loaded.echo_input);
        assert_eq!(loaded.workspaces[0].pane_order.len(), 3);
    }

    #[test]
    fn load_resets_pane_statuses_to_idle() {
        let (_dir, store) = store();
        let mut snapshot = sample_snapshot();
        for pane in snapshot.workspaces[0].panes.values_mut() {
            pane.status = PaneStatus::Running;
        }
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap().unwrap();
        for pane in loaded.workspaces[0].panes.values() {
            assert_eq!(pane.status, PaneStatus::Idle);
        }
    }

    #[test]
    fn legacy_flat_shape_migrates_to_one_workspace() {
        let (dir, store) = store();
        let legacy = serde_json::json!({
            "pane_order": ["pane-1", "pane-2"],
            "panes": {
                "pane-1": { "id": "pane-1", "title": "Pane 1", "cwd": "/tmp" },
                "pane-2": { "id": "pane-2", "title": "Pane 2", "cwd": "/tmp" }
            },
            "root": "/tmp",
            "echo_input": true
        });
        fs::write(
            dir.path().join(SESSION_FILE),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.workspaces.len(), 1);
        let ws = &loaded.workspaces[0];
        assert_eq!(ws.pane_order, vec!["pane-1", "pane-2"]);
        assert_eq!(ws.next_pane_seq, 2);
        assert_eq!(loaded.active_workspace, Some(ws.id));
        assert!(loaded.echo_input);
        // Migrated panes get a regenerated tiling layout.
        assert_eq!(ws.layout.len(), 2);
    }

    #[test]
    fn named_snapshots_are_pruned_to_the_cap() {
        let (_dir, store) = store();
        let snapshots: Vec<NamedSnapshot> = (0..MAX_NAMED_ENTRIES + 5)
            .map(|i| NamedSnapshot::new(format!("snap-{}", i), SessionSnapshot::empty()))
            .collect();
        store.save_snapshots(&snapshots).unwrap();

        let loaded = store.load_snapshots().unwrap();
        assert_eq!(loaded.len(), MAX_NAMED_ENTRIES);
    }

    #[test]
    fn blueprints_round_trip() {
        let (_dir, store) = store();
        let mut ws = Workspace::new("beta", PathBuf::from("/tmp/beta"));
        ws.set_pane_count(2);
        let blueprint = Blueprint::from_workspace("two-pane", &ws);
        store.save_blueprints(&[blueprint]).unwrap();

        let loaded = store.load_blueprints().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "two-pane");
        assert_eq!(loaded[0].pane_count, 2);
        assert_eq!(loaded[0].directories.len(), 2);
    }
}
