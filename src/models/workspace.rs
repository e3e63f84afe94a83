use super::pane::{Pane, PaneId, WorkspaceId};
use crate::layout::{self, PaneRect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Tiling,
    Freeform,
}

/// Desired agent launches for one configured profile, e.g. two `claude`
/// instances. Consumed in pane order by the boot scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAllocation {
    pub profile: String,
    pub command: String,
    pub enabled: bool,
    pub count: usize,
}

impl AgentAllocation {
    pub fn new(profile: impl Into<String>, command: impl Into<String>, count: usize) -> Self {
        Self {
            profile: profile.into(),
            command: command.into(),
            enabled: true,
            count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub root: PathBuf,
    /// Display order of panes. Invariant: no duplicates, every id present in
    /// `panes`, and `zoomed_pane` (if set) appears here.
    pub pane_order: Vec<PaneId>,
    pub panes: HashMap<PaneId, Pane>,
    #[serde(default)]
    pub layout: Vec<PaneRect>,
    #[serde(default)]
    pub layout_mode: LayoutMode,
    #[serde(default)]
    pub zoomed_pane: Option<PaneId>,
    #[serde(default)]
    pub agents: Vec<AgentAllocation>,
    /// Monotone pane id counter: shrinking then growing the pane count never
    /// reuses an id.
    #[serde(default)]
    pub next_pane_seq: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Workspace {
    pub fn new(name: impl Into<String>, root: PathBuf) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            root,
            pane_order: Vec::new(),
            panes: HashMap::new(),
            layout: Vec::new(),
            layout_mode: LayoutMode::default(),
            zoomed_pane: None,
            agents: Vec::new(),
            next_pane_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pane(&self, id: &str) -> Option<&Pane> {
        self.panes.get(id)
    }

    pub fn pane_count(&self) -> usize {
        self.pane_order.len()
    }

    /// Add one pane at the end of the order, cwd defaulting to the
    /// workspace root.
    pub fn push_pane(&mut self) -> PaneId {
        self.next_pane_seq += 1;
        let id = format!("pane-{}", self.next_pane_seq);
        self.panes
            .insert(id.clone(), Pane::new(id.clone(), self.root.clone()));
        self.pane_order.push(id.clone());
        id
    }

    /// Grow or shrink to exactly `count` panes. Returns the ids that were
    /// removed so the caller can tear down their runtime resources.
    pub fn set_pane_count(&mut self, count: usize) -> Vec<PaneId> {
        while self.pane_order.len() < count {
            self.push_pane();
        }
        let mut removed = Vec::new();
        while self.pane_order.len() > count {
            if let Some(id) = self.pane_order.pop() {
                self.panes.remove(&id);
                if self.zoomed_pane.as_deref() == Some(id.as_str()) {
                    self.zoomed_pane = None;
                }
                removed.push(id);
            }
        }
        self.retile();
        removed
    }

    /// Regenerate the tiling layout from the current pane order. Freeform
    /// layouts are user-managed and left alone.
    pub fn retile(&mut self) {
        if self.layout_mode == LayoutMode::Tiling {
            self.layout = layout::tile(&self.pane_order);
        }
    }

    pub fn toggle_zoom(&mut self, pane: &str) {
        if self.zoomed_pane.as_deref() == Some(pane) {
            self.zoomed_pane = None;
        } else if self.pane_order.iter().any(|id| id == pane) {
            self.zoomed_pane = Some(pane.to_string());
        }
    }

    pub fn display_root(&self) -> String {
        self.root
            .to_str()
            .map(|s| {
                if let Some(home) = dirs::home_dir() {
                    if let Some(home_str) = home.to_str() {
                        if s.starts_with(home_str) {
                            return format!("~{}", &s[home_str.len()..]);
                        }
                    }
                }
                s.to_string()
            })
            .unwrap_or_else(|| self.root.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaneStatus;

    fn ws(panes: usize) -> Workspace {
        let mut ws = Workspace::new("test", PathBuf::from("/tmp/test"));
        ws.set_pane_count(panes);
        ws
    }

    #[test]
    fn grow_adds_sequential_pane_ids() {
        let mut ws = ws(2);
        assert_eq!(ws.pane_order, vec!["pane-1", "pane-2"]);
        let removed = ws.set_pane_count(5);
        assert!(removed.is_empty());
        assert_eq!(
            ws.pane_order,
            vec!["pane-1", "pane-2", "pane-3", "pane-4", "pane-5"]
        );
        for id in &ws.pane_order {
            assert_eq!(ws.panes[id].status, PaneStatus::Idle);
        }
    }

    #[test]
    fn shrink_removes_from_the_end_and_never_reuses_ids() {
        let mut ws = ws(3);
        let removed = ws.set_pane_count(1);
        assert_eq!(removed, vec!["pane-3", "pane-2"]);
        assert_eq!(ws.pane_order, vec!["pane-1"]);
        ws.set_pane_count(2);
        assert_eq!(ws.pane_order, vec!["pane-1", "pane-4"]);
    }

    #[test]
    fn shrink_clears_zoom_on_removed_pane() {
        let mut ws = ws(3);
        ws.toggle_zoom("pane-3");
        assert_eq!(ws.zoomed_pane.as_deref(), Some("pane-3"));
        ws.set_pane_count(2);
        assert_eq!(ws.zoomed_pane, None);
    }

    #[test]
    fn zoom_toggles_and_rejects_unknown_panes() {
        let mut ws = ws(2);
        ws.toggle_zoom("pane-9");
        assert_eq!(ws.zoomed_pane, None);
        ws.toggle_zoom("pane-1");
        assert_eq!(ws.zoomed_pane.as_deref(), Some("pane-1"));
        ws.toggle_zoom("pane-1");
        assert_eq!(ws.zoomed_pane, None);
    }

    #[test]
    fn set_pane_count_regenerates_tiling_layout() {
        let mut ws = ws(5);
        assert_eq!(ws.layout.len(), 5);
        for row in [0u16, 1] {
            let width: u16 = ws
                .layout
                .iter()
                .filter(|r| r.y == row)
                .map(|r| r.width)
                .sum();
            assert_eq!(width, crate::layout::GRID_WIDTH);
        }
    }
}
