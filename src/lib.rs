//! Session orchestration core for a multi-workspace terminal multiplexer.
//!
//! The crate is the headless half of the application: it owns the
//! workspace/pane data model, spawns and supervises pty-backed panes, boots
//! configured agents into them, suspends inactive workspaces, coalesces
//! keystroke input, and persists the whole session as a JSON snapshot. A
//! rendering front end drives it through [`session::SessionManager`] and
//! receives pane output over a channel.

pub mod layout;
pub mod models;
pub mod persistence;
pub mod pty;
pub mod session;

pub use layout::{FocusDirection, PaneRect, GRID_WIDTH};
pub use models::{
    AgentAllocation, Blueprint, BootSession, BootStatus, NamedSnapshot, Pane, PaneId, PaneKey,
    PaneStatus, PendingInit, Section, SessionSnapshot, Workspace, WorkspaceId,
};
pub use persistence::SnapshotStore;
pub use pty::{NativePtyService, PtyError, PtyEvent, PtyEvents, PtyService};
pub use session::{OrchestratorConfig, PaneError, SessionManager};
