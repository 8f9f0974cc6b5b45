//! Named pipes carrying backend output to the consumer.
//!
//! On unix a FIFO is created in the configured temp directory by an external
//! setup process (`mkfifo`). Elsewhere the pipe degrades to the backend's
//! standard output and the write end is the `-` marker.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::PipeConfig;
use crate::engine::process::{
    CancelToken, CaptureMode, ManagedProcess, PidRegistry, ProcessSpec, ProcessState,
};

const OPEN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("pipe setup for {pipe} failed: {reason}")]
    SetupFailed { pipe: String, reason: String },

    #[error("pipe setup for {pipe} did not finish within {timeout:?}")]
    SetupTimeout { pipe: String, timeout: Duration },

    #[error("pipe setup for {pipe} was cancelled")]
    Cancelled { pipe: String },

    #[error("failed to open pipe {pipe}: {source}")]
    Open {
        pipe: String,
        #[source]
        source: io::Error,
    },

    #[error("no writer opened pipe {pipe} within {timeout:?}")]
    OpenTimeout { pipe: String, timeout: Duration },

    #[error("pipe {pipe} has no readable end; read the backend's stdout instead")]
    NotAFifo { pipe: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// Filesystem FIFO
    Fifo,
    /// The backend's standard output stands in for the pipe
    StdStream,
}

#[derive(Debug)]
pub struct PipeHandle {
    name: String,
    path: PathBuf,
    mode: PipeMode,
    setup_override: Option<Vec<String>>,
    scheduled: AtomicBool,
    removed: AtomicBool,
}

impl PipeHandle {
    /// Allocate a uniquely named pipe. Nothing touches the filesystem until [`setup`](Self::setup).
    pub fn create(prefix: &str, config: &PipeConfig) -> Self {
        let mode = if cfg!(unix) {
            PipeMode::Fifo
        } else {
            PipeMode::StdStream
        };
        Self::with_mode(prefix, &config.dir(), mode)
    }

    pub fn with_mode(prefix: &str, dir: &Path, mode: PipeMode) -> Self {
        let name = unique_name(prefix);
        let path = dir.join(&name);
        trace!(pipe = %name, ?mode, "Allocated pipe");
        Self {
            name,
            path,
            mode,
            setup_override: None,
            scheduled: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        }
    }

    /// Replace the setup command (mainly to simulate a stuck `mkfifo`).
    pub fn with_setup_command(mut self, command: Vec<String>) -> Self {
        self.setup_override = Some(command);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> PipeMode {
        self.mode
    }

    pub fn is_fifo(&self) -> bool {
        self.mode == PipeMode::Fifo
    }

    /// Argument handed to the backend as its output target.
    pub fn write_end(&self) -> String {
        match self.mode {
            PipeMode::Fifo => self.path.to_string_lossy().into_owned(),
            PipeMode::StdStream => "-".to_string(),
        }
    }

    /// Command that creates the pipe, if this mode needs one.
    pub fn setup_command(&self) -> Option<Vec<String>> {
        match self.mode {
            PipeMode::StdStream => None,
            PipeMode::Fifo => Some(self.setup_override.clone().unwrap_or_else(|| {
                vec![
                    "mkfifo".to_string(),
                    "-m".to_string(),
                    "600".to_string(),
                    self.path.to_string_lossy().into_owned(),
                ]
            })),
        }
    }

    /// Run the setup process and wait (bounded) for it to finish.
    ///
    /// The setup process is tracked in `registry` while it runs and handed
    /// back so the caller can supervise it together with the backend. Modes
    /// that need no setup return `Ok(None)`.
    pub fn setup(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
        registry: &PidRegistry,
    ) -> Result<Option<ManagedProcess>, PipeError> {
        let Some(command) = self.setup_command() else {
            return Ok(None);
        };

        let process = ProcessSpec::new(command, CaptureMode::Lines)
            .timeout(timeout)
            .terminate_grace(Duration::from_millis(200))
            .registry(registry.clone())
            .build();
        let handle = process.run_detached().map_err(|e| PipeError::SetupFailed {
            pipe: self.name.clone(),
            reason: e.to_string(),
        })?;

        while !process.wait_terminal(OPEN_POLL) {
            if cancel.is_cancelled() {
                debug!(pipe = %self.name, "Pipe setup cancelled");
                process.stop();
                let _ = handle.join();
                return Err(PipeError::Cancelled {
                    pipe: self.name.clone(),
                });
            }
        }
        let outcome = handle.join().unwrap_or_else(|_| process.outcome());

        if outcome.timed_out {
            warn!(pipe = %self.name, "Pipe setup timed out");
            return Err(PipeError::SetupTimeout {
                pipe: self.name.clone(),
                timeout,
            });
        }
        match outcome.state {
            ProcessState::Succeeded if self.exists() => {
                debug!(pipe = %self.name, path = %self.path.display(), "Pipe ready");
                Ok(Some(process))
            }
            ProcessState::Succeeded => Err(PipeError::SetupFailed {
                pipe: self.name.clone(),
                reason: "setup finished but no FIFO exists".to_string(),
            }),
            ProcessState::Failed { reason, .. } => Err(PipeError::SetupFailed {
                pipe: self.name.clone(),
                reason: if outcome.lines.is_empty() {
                    reason
                } else {
                    format!("{reason}: {}", outcome.lines.join(" "))
                },
            }),
            _ => Err(PipeError::Cancelled {
                pipe: self.name.clone(),
            }),
        }
    }

    /// True when the FIFO is present on disk.
    pub fn exists(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if self.mode == PipeMode::Fifo {
                return fs::metadata(&self.path)
                    .map(|meta| meta.file_type().is_fifo())
                    .unwrap_or(false);
            }
        }
        false
    }

    /// Open the read end, waiting up to `timeout` for a writer.
    pub fn read_end(&self, timeout: Duration) -> Result<File, PipeError> {
        self.open_reader(timeout, || false)
    }

    /// Open the read end. Opening a FIFO blocks until a writer appears, so the
    /// open runs on a helper thread; `give_up` is polled so a dead backend or
    /// a cancellation ends the wait early.
    pub fn open_reader(
        &self,
        timeout: Duration,
        give_up: impl Fn() -> bool,
    ) -> Result<File, PipeError> {
        if self.mode != PipeMode::Fifo {
            return Err(PipeError::NotAFifo {
                pipe: self.name.clone(),
            });
        }

        let path = self.path.clone();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(File::open(&path));
        });

        let deadline = Instant::now() + timeout;
        loop {
            match rx.recv_timeout(OPEN_POLL) {
                Ok(Ok(file)) => return Ok(file),
                Ok(Err(source)) => {
                    return Err(PipeError::Open {
                        pipe: self.name.clone(),
                        source,
                    });
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(PipeError::Open {
                        pipe: self.name.clone(),
                        source: io::Error::other("opener thread vanished"),
                    });
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if give_up() || Instant::now() >= deadline {
                        self.unblock_opener();
                        return Err(PipeError::OpenTimeout {
                            pipe: self.name.clone(),
                            timeout,
                        });
                    }
                }
            }
        }
    }

    /// Release a helper thread stuck in `open()` by briefly appearing as a writer.
    fn unblock_opener(&self) {
        #[cfg(unix)]
        {
            use std::fs::OpenOptions;
            use std::os::unix::fs::OpenOptionsExt;
            let _ = OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path);
        }
    }

    /// Mark the FIFO for removal once the owning request completes. Idempotent.
    pub fn delete_later(&self) {
        if !self.scheduled.swap(true, Ordering::SeqCst) {
            trace!(pipe = %self.name, "Pipe scheduled for removal");
        }
    }

    pub fn is_scheduled_for_removal(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Remove the FIFO from disk. Idempotent; also runs on drop.
    pub fn cleanup(&self) {
        if self.mode != PipeMode::Fifo || self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => trace!(pipe = %self.name, "Removed pipe"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(pipe = %self.name, "Failed to remove pipe: {e}"),
        }
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// `<prefix>_<thread>_<millis>_<random>`: unique across threads and processes.
pub fn unique_name(prefix: &str) -> String {
    let thread: String = format!("{:?}", thread::current().id())
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{thread}_{millis}_{}", &random[..8])
}
