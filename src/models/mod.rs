mod boot;
mod pane;
mod snapshot;
mod workspace;

pub use boot::{BootSession, BootStatus};
pub use pane::{Pane, PaneId, PaneKey, PaneStatus, PendingInit, WorkspaceId};
pub use snapshot::{Blueprint, NamedSnapshot, Section, SessionSnapshot, SNAPSHOT_VERSION};
pub use workspace::{AgentAllocation, LayoutMode, Workspace};
