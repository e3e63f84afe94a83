use super::{PtyError, PtyEvent, PtyEvents, PtyService, SpawnedPty};
use crate::models::PaneKey;
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc;

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

struct PaneHandle {
    master: Box<dyn MasterPty + Send>,
    child_killer: Box<dyn ChildKiller + Send + Sync>,
    process_id: Option<u32>,
    writer: Box<dyn Write + Send>,
}

/// [`PtyService`] backed by the host's native pty system. One OS process per
/// pane, a blocking reader thread per pane feeding the shared event channel.
pub struct NativePtyService {
    handles: Mutex<HashMap<PaneKey, PaneHandle>>,
    events_tx: mpsc::UnboundedSender<(PaneKey, PtyEvent)>,
}

impl NativePtyService {
    pub fn new() -> (Self, PtyEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                handles: Mutex::new(HashMap::new()),
                events_tx,
            },
            events_rx,
        )
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<PaneKey, PaneHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pump one pane's output until EOF, then report the real exit status.
    fn read_pane_output(
        key: PaneKey,
        reader: &mut Box<dyn Read + Send>,
        events_tx: mpsc::UnboundedSender<(PaneKey, PtyEvent)>,
        mut child: Box<dyn Child + Send + Sync>,
    ) {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    let exit_code = match child.wait() {
                        Ok(status) => status.exit_code() as i32,
                        Err(_) => 1,
                    };
                    let _ = events_tx.send((key, PtyEvent::Exited(exit_code)));
                    break;
                }
                Ok(n) => {
                    let data = buf[..n].to_vec();
                    if events_tx.send((key.clone(), PtyEvent::Output(data))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = events_tx.send((key, PtyEvent::Error(e.to_string())));
                    break;
                }
            }
        }
    }

    #[cfg(unix)]
    fn signal_process_group(pgid: libc::pid_t, signal: i32) -> Result<(), std::io::Error> {
        // portable-pty uses setsid() on spawn, so pid == pgid for the child.
        let result = unsafe { libc::kill(-pgid, signal) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(unix)]
    fn signal_pane(
        &self,
        key: &PaneKey,
        signal: i32,
        what: &'static str,
    ) -> Result<(), PtyError> {
        let handles = self.handles();
        let handle = handles
            .get(key)
            .ok_or_else(|| PtyError::NotFound(key.clone()))?;
        let pgid = handle
            .process_id
            .filter(|pid| *pid > 0)
            .map(|pid| pid as libc::pid_t)
            .ok_or(PtyError::Unsupported(what))?;
        Self::signal_process_group(pgid, signal).map_err(|e| PtyError::io(key, e))
    }
}

#[async_trait]
impl PtyService for NativePtyService {
    async fn spawn(&self, key: &PaneKey, cwd: &Path) -> Result<SpawnedPty, PtyError> {
        if self.handles().contains_key(key) {
            return Err(PtyError::AlreadyExists(key.clone()));
        }

        let spawn_failed = |reason: String| PtyError::SpawnFailed {
            key: key.clone(),
            reason,
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_failed(e.to_string()))?;

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(cwd);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_failed(e.to_string()))?;
        let child_killer = child.clone_killer();
        let process_id = child.process_id();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_failed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_failed(e.to_string()))?;

        let events_tx = self.events_tx.clone();
        let reader_key = key.clone();
        std::thread::spawn(move || {
            Self::read_pane_output(reader_key, &mut reader, events_tx, child);
        });

        self.handles().insert(
            key.clone(),
            PaneHandle {
                master: pair.master,
                child_killer,
                process_id,
                writer,
            },
        );

        Ok(SpawnedPty {
            cwd: cwd.to_path_buf(),
            shell,
        })
    }

    async fn write(&self, key: &PaneKey, data: &[u8], execute: bool) -> Result<(), PtyError> {
        let mut handles = self.handles();
        let handle = handles
            .get_mut(key)
            .ok_or_else(|| PtyError::NotFound(key.clone()))?;
        handle
            .writer
            .write_all(data)
            .and_then(|_| {
                if execute {
                    handle.writer.write_all(b"\n")?;
                }
                handle.writer.flush()
            })
            .map_err(|e| PtyError::io(key, e))
    }

    async fn resize(&self, key: &PaneKey, rows: u16, cols: u16) -> Result<(), PtyError> {
        let handles = self.handles();
        let handle = handles
            .get(key)
            .ok_or_else(|| PtyError::NotFound(key.clone()))?;
        handle
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::io(key, e))
    }

    async fn close(&self, key: &PaneKey) -> Result<(), PtyError> {
        let mut handle = self
            .handles()
            .remove(key)
            .ok_or_else(|| PtyError::NotFound(key.clone()))?;

        #[cfg(unix)]
        if let Some(pgid) = handle.process_id.filter(|pid| *pid > 0) {
            if Self::signal_process_group(pgid as libc::pid_t, libc::SIGKILL).is_ok() {
                return Ok(());
            }
        }

        handle.child_killer.kill().map_err(|e| PtyError::io(key, e))
    }

    #[cfg(unix)]
    async fn suspend(&self, key: &PaneKey) -> Result<(), PtyError> {
        self.signal_pane(key, libc::SIGSTOP, "suspend")
    }

    #[cfg(not(unix))]
    async fn suspend(&self, _key: &PaneKey) -> Result<(), PtyError> {
        Err(PtyError::Unsupported("suspend"))
    }

    #[cfg(unix)]
    async fn resume(&self, key: &PaneKey) -> Result<(), PtyError> {
        self.signal_pane(key, libc::SIGCONT, "resume")
    }

    #[cfg(not(unix))]
    async fn resume(&self, _key: &PaneKey) -> Result<(), PtyError> {
        Err(PtyError::Unsupported("resume"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_pty::ExitStatus;
    use std::io;
    use uuid::Uuid;

    #[derive(Debug)]
    struct TestChild {
        exit_status: ExitStatus,
    }

    impl ChildKiller for TestChild {
        fn kill(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
            Box::new(TestChild {
                exit_status: self.exit_status.clone(),
            })
        }
    }

    impl Child for TestChild {
        fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
            Ok(Some(self.exit_status.clone()))
        }

        fn wait(&mut self) -> io::Result<ExitStatus> {
            Ok(self.exit_status.clone())
        }

        fn process_id(&self) -> Option<u32> {
            None
        }

        #[cfg(windows)]
        fn as_raw_handle(&self) -> Option<std::os::windows::io::RawHandle> {
            None
        }
    }

    struct ChunkedReader {
        chunks: Vec<Vec<u8>>,
        index: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.index >= self.chunks.len() {
                return Ok(0);
            }
            let chunk = &self.chunks[self.index];
            let len = chunk.len().min(buf.len());
            buf[..len].copy_from_slice(&chunk[..len]);
            self.index += 1;
            Ok(len)
        }
    }

    #[test]
    fn reader_emits_output_then_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = PaneKey::new(Uuid::new_v4(), "pane-1");
        let mut reader: Box<dyn Read + Send> = Box::new(ChunkedReader {
            chunks: vec![b"hello".to_vec(), b"world".to_vec()],
            index: 0,
        });
        let child = Box::new(TestChild {
            exit_status: ExitStatus::with_exit_code(0),
        });

        NativePtyService::read_pane_output(key.clone(), &mut reader, tx, child);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            (k, PtyEvent::Output(data)) if *k == key && data == b"hello"
        ));
        assert!(matches!(
            &events[1],
            (k, PtyEvent::Output(data)) if *k == key && data == b"world"
        ));
        assert!(matches!(
            &events[2],
            (k, PtyEvent::Exited(0)) if *k == key
        ));
    }

    #[tokio::test]
    async fn operations_on_unknown_pane_report_not_found() {
        let (service, _events) = NativePtyService::new();
        let key = PaneKey::new(Uuid::new_v4(), "pane-1");

        assert!(matches!(
            service.write(&key, b"x", false).await,
            Err(PtyError::NotFound(_))
        ));
        assert!(matches!(
            service.resize(&key, 24, 80).await,
            Err(PtyError::NotFound(_))
        ));
        assert!(matches!(
            service.close(&key).await,
            Err(PtyError::NotFound(_))
        ));
    }
}
