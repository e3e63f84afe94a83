//! Keystroke coalescing.
//!
//! Raw input bytes accumulate in a per-pane buffer behind a short debounce
//! window, so a paste or an echo-to-all-panes broadcast turns into one pty
//! write instead of one per keystroke. Bytes never reorder: each pane has at
//! most one drain task, and it writes whole buffers in arrival order.

use super::registry::lock;
use super::Inner;
use crate::models::PaneKey;
use std::mem;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct InputBuffer {
    bytes: Vec<u8>,
    /// True while a drain task owns this pane's debounce window. New bytes
    /// join the window in progress rather than restarting it.
    armed: bool,
}

impl Inner {
    /// Queue input for delivery. With the global echo flag set, input to any
    /// pane of the active workspace is broadcast to all of its panes.
    pub(crate) fn send_input(self: &Arc<Self>, key: &PaneKey, bytes: &[u8]) {
        let echo_targets = {
            let state = lock(&self.state);
            if state.echo_input && state.active == Some(key.workspace) {
                state.workspaces.get(&key.workspace).map(|ws| {
                    ws.pane_order
                        .iter()
                        .map(|id| PaneKey::new(key.workspace, id.clone()))
                        .collect::<Vec<_>>()
                })
            } else {
                None
            }
        };

        match echo_targets {
            Some(targets) => {
                for target in targets {
                    self.queue_input(&target, bytes);
                }
            }
            None => self.queue_input(key, bytes),
        }
    }

    fn queue_input(self: &Arc<Self>, key: &PaneKey, bytes: &[u8]) {
        let mut buffers = lock(&self.input_buffers);
        let buffer = buffers.entry(key.clone()).or_default();
        buffer.bytes.extend_from_slice(bytes);
        if !buffer.armed {
            buffer.armed = true;
            let inner = Arc::clone(self);
            let key = key.clone();
            tokio::spawn(async move { inner.drain_input(key).await });
        }
    }

    /// One debounce-and-write cycle per iteration. If more bytes arrived
    /// while the write was in flight, a new cycle starts immediately.
    async fn drain_input(self: Arc<Self>, key: PaneKey) {
        loop {
            tokio::time::sleep(self.config.input_debounce).await;

            let chunk = {
                let mut buffers = lock(&self.input_buffers);
                match buffers.get_mut(&key) {
                    Some(buffer) => mem::take(&mut buffer.bytes),
                    None => return,
                }
            };

            if !chunk.is_empty() {
                if let Err(e) = self.pty.write(&key, &chunk, false).await {
                    tracing::debug!(pane = %key, error = %e, "coalesced input write failed");
                }
            }

            let mut buffers = lock(&self.input_buffers);
            match buffers.get_mut(&key) {
                Some(buffer) if !buffer.bytes.is_empty() => continue,
                Some(buffer) => {
                    buffer.armed = false;
                    return;
                }
                None => return,
            }
        }
    }
}
