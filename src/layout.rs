//! Tiling-grid generation and geometric focus movement.
//!
//! Panes are laid out on a fixed 12-unit-wide grid. The tiling generator is
//! deterministic for a given pane order; directional focus resolution works
//! on the resulting rectangles and breaks ties by pane-order index so
//! repeated presses always land on the same pane.

use crate::models::PaneId;
use serde::{Deserialize, Serialize};

/// Fixed width of the layout grid, in columns.
pub const GRID_WIDTH: u16 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneRect {
    pub pane: PaneId,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusDirection {
    Left,
    Right,
    Up,
    Down,
}

/// Lay out `pane_ids` in rows of up to `ceil(sqrt(N))` panes. Within a row
/// the grid width is split as evenly as possible: `width / count` each, with
/// the first `width % count` panes one unit wider, so every row sums to
/// exactly [`GRID_WIDTH`].
pub fn tile(pane_ids: &[PaneId]) -> Vec<PaneRect> {
    if pane_ids.is_empty() {
        return Vec::new();
    }
    let columns = (1usize..).find(|c| c * c >= pane_ids.len()).unwrap_or(1);

    let mut rects = Vec::with_capacity(pane_ids.len());
    for (row, chunk) in pane_ids.chunks(columns).enumerate() {
        let count = chunk.len() as u16;
        let base = GRID_WIDTH / count;
        let extra = GRID_WIDTH % count;
        let mut x = 0u16;
        for (col, pane) in chunk.iter().enumerate() {
            let width = base + u16::from((col as u16) < extra);
            rects.push(PaneRect {
                pane: pane.clone(),
                x,
                y: row as u16,
                width,
                height: 1,
            });
            x += width;
        }
    }
    rects
}

/// Resolve the pane that focus should move to from `current` in `direction`.
///
/// Candidates are panes whose center lies strictly on the requested side
/// along the primary axis. They are ranked by primary-axis distance, then
/// cross-axis distance, then original pane-order index, all ascending; the
/// top candidate wins. Centers are compared at doubled coordinates to stay
/// in integer arithmetic.
pub fn resolve_focus(
    layout: &[PaneRect],
    order: &[PaneId],
    current: &str,
    direction: FocusDirection,
) -> Option<PaneId> {
    let from = layout.iter().find(|r| r.pane == current)?;
    let (fx, fy) = center2(from);

    let order_index = |pane: &str| {
        order
            .iter()
            .position(|id| id == pane)
            .unwrap_or(usize::MAX)
    };

    layout
        .iter()
        .filter(|r| r.pane != current)
        .filter_map(|r| {
            let (cx, cy) = center2(r);
            let (primary, cross) = match direction {
                FocusDirection::Left if cx < fx => (fx - cx, fy.abs_diff(cy)),
                FocusDirection::Right if cx > fx => (cx - fx, fy.abs_diff(cy)),
                FocusDirection::Up if cy < fy => (fy - cy, fx.abs_diff(cx)),
                FocusDirection::Down if cy > fy => (cy - fy, fx.abs_diff(cx)),
                _ => return None,
            };
            Some((primary, cross, order_index(&r.pane), r.pane.clone()))
        })
        .min_by_key(|(primary, cross, idx, _)| (*primary, *cross, *idx))
        .map(|(_, _, _, pane)| pane)
}

fn center2(rect: &PaneRect) -> (u32, u32) {
    (
        2 * rect.x as u32 + rect.width as u32,
        2 * rect.y as u32 + rect.height as u32,
    )
}
