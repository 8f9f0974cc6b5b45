//! Launching a selected engine: pipe setup, companion files, process start
//! and the live handle the consumer reads from.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, host_processing_units};
use crate::engine::availability::{ExecutableError, locate_executable};
use crate::engine::core::strategy::MAX_OUTPUT_BUFFER;
use crate::engine::core::{
    BuildContext, CompanionFile, Invocation, MediaInfo, OutputParameters, PipeSlot,
    ResourceDescriptor, Sink, build_command, format_command, thread_count,
};
use crate::engine::pipe::{PipeError, PipeHandle};
use crate::engine::process::{
    CancelToken, CaptureMode, ManagedProcess, PidRegistry, ProcessOutcome, ProcessSpec,
    ProcessState,
};
use crate::engine::registry::{EngineDescriptor, EngineId};

const READY_POLL: Duration = Duration::from_millis(50);

/// Diagnostic lines retained for a streaming backend.
pub const STREAM_DIAGNOSTIC_LINES: usize = 500;

/// Pipe name prefix for streaming launches.
pub const PIPE_PREFIX: &str = "transflow";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Executable(#[from] ExecutableError),

    #[error(transparent)]
    Pipe(PipeError),

    #[error("failed to write companion file {}: {source}", path.display())]
    Companion {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{engine} failed: {reason}")]
    BackendFailed {
        engine: EngineId,
        reason: String,
        lines: Vec<String>,
    },

    #[error("{engine} produced no output")]
    EmptyOutput { engine: EngineId },

    #[error("{engine} writes to a file; there is no stream to read")]
    NoStream { engine: EngineId },

    #[error("launch was cancelled")]
    Cancelled,
}

impl From<PipeError> for LaunchError {
    fn from(error: PipeError) -> Self {
        match error {
            PipeError::Cancelled { .. } => LaunchError::Cancelled,
            other => LaunchError::Pipe(other),
        }
    }
}

/// Everything decided before anything is started.
pub struct LaunchPlan {
    pub engine: &'static EngineDescriptor,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub pipes: Vec<PipeHandle>,
    pub companions: Vec<CompanionFile>,
    pub capture: CaptureMode,
    pub startup_wait: Duration,
    pub stdin: Option<Box<dyn Read + Send>>,
}

impl std::fmt::Debug for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchPlan")
            .field("engine", &self.engine.id)
            .field("command", &self.command)
            .field("pipes", &self.pipes)
            .field("companions", &self.companions)
            .field("capture", &self.capture)
            .field("startup_wait", &self.startup_wait)
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

pub struct Launcher<'a> {
    config: &'a Config,
    available_units: u32,
    registry: PidRegistry,
}

impl<'a> Launcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            available_units: host_processing_units(),
            registry: PidRegistry::new(),
        }
    }

    pub fn with_available_units(mut self, units: u32) -> Self {
        self.available_units = units;
        self
    }

    pub fn with_registry(mut self, registry: PidRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &PidRegistry {
        &self.registry
    }

    /// Terminate every backend this launcher started that is still alive.
    pub fn shutdown(&self) {
        self.registry.terminate_all();
    }

    /// Allocate pipes, fill scratch fields and build the command.
    pub fn plan(
        &self,
        engine: &'static EngineDescriptor,
        resource: &ResourceDescriptor,
        media: &MediaInfo,
        params: &mut OutputParameters,
    ) -> LaunchPlan {
        let strategy = engine.strategy;
        strategy.prepare(params, &self.config.pipes.dir());

        if strategy.streams_via_pipe() && params.output_file.is_none() {
            if params.pipe_slots.is_empty() {
                params.pipe_slots.push(PipeSlot::default());
            }
            for slot in params.pipe_slots.iter_mut().filter(|s| s.pipe.is_none()) {
                slot.pipe = Some(PipeHandle::create(PIPE_PREFIX, &self.config.pipes));
            }
        }

        let ctx = BuildContext::new(self.config, self.available_units);
        let command = build_command(engine, resource, media, params, &ctx);

        let (companions, capture) = {
            let view: &OutputParameters = params;
            let inv = Invocation {
                engine,
                resource,
                media,
                params: view,
                config: self.config,
                threads: thread_count(&self.config.transcode, self.available_units),
            };
            let capture = if strategy.one_shot() {
                CaptureMode::Bytes {
                    initial_capacity: view
                        .output_buffer_hint
                        .unwrap_or_else(|| strategy.output_buffer_hint(view, media))
                        .min(MAX_OUTPUT_BUFFER),
                }
            } else {
                match inv.sink() {
                    Sink::Stdout => CaptureMode::Stream,
                    Sink::File(_) | Sink::Pipe(_) => CaptureMode::Discard,
                }
            };
            (strategy.companion_files(&inv), capture)
        };

        let pipes = params
            .pipe_slots
            .iter_mut()
            .filter_map(|slot| slot.pipe.take())
            .collect();

        LaunchPlan {
            engine,
            command,
            env: executable_env(&engine.executable(self.config)),
            pipes,
            companions,
            capture,
            startup_wait: params.startup_wait,
            stdin: params.take_stdin(),
        }
    }

    /// Start a streaming transcode and return once the backend is running.
    pub fn launch(
        &self,
        engine: &'static EngineDescriptor,
        resource: &ResourceDescriptor,
        media: &MediaInfo,
        mut params: OutputParameters,
        cancel: &CancelToken,
    ) -> Result<LiveTranscode, LaunchError> {
        if cancel.is_cancelled() {
            return Err(LaunchError::Cancelled);
        }
        locate_executable(engine.program, &engine.executable(self.config))?;
        let plan = self.plan(engine, resource, media, &mut params);
        self.launch_plan(plan, cancel)
    }

    /// Start a prepared plan. Pipes are created first; the backend only
    /// starts once every pipe exists.
    pub fn launch_plan(
        &self,
        mut plan: LaunchPlan,
        cancel: &CancelToken,
    ) -> Result<LiveTranscode, LaunchError> {
        let companions = write_companions(&plan.companions)?;
        let mut guard = CleanupGuard {
            pipes: &plan.pipes,
            companions: &companions,
            armed: true,
        };

        let mut setups = Vec::with_capacity(plan.pipes.len());
        for pipe in &plan.pipes {
            let setup = pipe.setup(self.config.pipes.setup_timeout(), cancel, &self.registry)?;
            setups.extend(setup);
            pipe.delete_later();
        }
        if cancel.is_cancelled() {
            return Err(LaunchError::Cancelled);
        }

        let mut spec = ProcessSpec::new(plan.command.clone(), plan.capture)
            .terminate_grace(self.config.pipes.terminate_timeout())
            .registry(self.registry.clone());
        for (key, value) in &plan.env {
            spec = spec.env(key.clone(), value.clone());
        }
        if let Some(stdin) = plan.stdin.take() {
            spec = spec.stdin(stdin);
        }
        // Streams can run for hours; keep only a diagnostic tail
        if !matches!(plan.capture, CaptureMode::Bytes { .. }) {
            spec = spec.keep_last_lines(STREAM_DIAGNOSTIC_LINES);
        }
        let process = spec.build();
        for setup in setups {
            process.attach(setup);
        }

        info!(engine = %plan.engine.id, command = %format_command(&plan.command), "Launching backend");
        let handle = process.run_detached().map_err(|e| LaunchError::Spawn {
            program: plan.command.first().cloned().unwrap_or_default(),
            reason: e.to_string(),
        })?;

        let ready = await_ready(&process, plan.startup_wait, cancel);
        if cancel.is_cancelled() {
            process.stop();
            let _ = handle.join();
            return Err(LaunchError::Cancelled);
        }
        if !ready {
            debug!(process = %process.name(), "Backend not reported running yet, continuing");
        }
        if let ProcessState::Failed { reason, .. } = process.state() {
            let _ = handle.join();
            return Err(LaunchError::BackendFailed {
                engine: plan.engine.id,
                reason,
                lines: process.lines(),
            });
        }

        guard.armed = false;
        drop(guard);
        Ok(LiveTranscode {
            engine: plan.engine.id,
            command: plan.command,
            process,
            handle: Mutex::new(Some(handle)),
            pipes: plan.pipes,
            companions,
            cancel: cancel.clone(),
            reader_timeout: self.config.pipes.reader_timeout(),
        })
    }

    /// Run a one-shot engine to completion and return its captured stdout.
    ///
    /// Engines that can produce nothing on a first attempt (an image with no
    /// embedded thumbnail) get one retry with adjusted parameters.
    pub fn run_one_shot(
        &self,
        engine: &'static EngineDescriptor,
        resource: &ResourceDescriptor,
        media: &MediaInfo,
        mut params: OutputParameters,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, LaunchError> {
        locate_executable(engine.program, &engine.executable(self.config))?;

        loop {
            if cancel.is_cancelled() {
                return Err(LaunchError::Cancelled);
            }
            let plan = self.plan(engine, resource, media, &mut params);
            let outcome = self.run_plan_to_end(plan, cancel)?;

            if !outcome.output.is_empty() {
                debug!(engine = %engine.id, bytes = outcome.output.len(), "One-shot output captured");
                return Ok(outcome.output);
            }
            if engine.strategy.retry_after_empty_output(&mut params, media) {
                debug!(engine = %engine.id, "Empty output, retrying with adjusted parameters");
                continue;
            }
            return match outcome.state {
                ProcessState::Failed { reason, .. } => Err(LaunchError::BackendFailed {
                    engine: engine.id,
                    reason,
                    lines: outcome.lines,
                }),
                _ => Err(LaunchError::EmptyOutput { engine: engine.id }),
            };
        }
    }

    fn run_plan_to_end(
        &self,
        plan: LaunchPlan,
        cancel: &CancelToken,
    ) -> Result<ProcessOutcome, LaunchError> {
        let live = self.launch_plan(plan, cancel)?;
        while !live.process.wait_terminal(READY_POLL) {
            if cancel.is_cancelled() {
                live.cancel();
                return Err(LaunchError::Cancelled);
            }
        }
        Ok(live.wait())
    }
}

/// Make programs living next to a configured executable resolvable.
fn executable_env(executable: &Path) -> Vec<(String, String)> {
    match executable.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => vec![("PATH".to_string(), dir.to_string_lossy().into_owned())],
        None => Vec::new(),
    }
}

fn write_companions(files: &[CompanionFile]) -> Result<Vec<PathBuf>, LaunchError> {
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        if let Err(source) = fs::write(&file.path, &file.contents) {
            remove_files(&written);
            return Err(LaunchError::Companion {
                path: file.path.clone(),
                source,
            });
        }
        debug!(path = %file.path.display(), "Wrote companion file");
        written.push(file.path.clone());
    }
    Ok(written)
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), "Failed to remove companion file: {e}");
            }
        }
    }
}

/// Wait until the process leaves `Pending`, bounded by `limit` and the cancel flag.
fn await_ready(process: &ManagedProcess, limit: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if process.wait_for(READY_POLL, |state| *state != ProcessState::Pending) {
            return true;
        }
        if cancel.is_cancelled() || Instant::now() >= deadline {
            return false;
        }
    }
}

/// Removes pipes and companion files when a launch bails out early.
struct CleanupGuard<'p> {
    pipes: &'p [PipeHandle],
    companions: &'p [PathBuf],
    armed: bool,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for pipe in self.pipes {
            pipe.cleanup();
        }
        remove_files(self.companions);
    }
}

/// A running backend and the stream it feeds.
pub struct LiveTranscode {
    engine: EngineId,
    command: Vec<String>,
    process: ManagedProcess,
    handle: Mutex<Option<JoinHandle<ProcessOutcome>>>,
    pipes: Vec<PipeHandle>,
    companions: Vec<PathBuf>,
    cancel: CancelToken,
    reader_timeout: Duration,
}

impl std::fmt::Debug for LiveTranscode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveTranscode")
            .field("engine", &self.engine)
            .field("process", &self.process)
            .field("pipes", &self.pipes)
            .finish_non_exhaustive()
    }
}

impl LiveTranscode {
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn process(&self) -> &ManagedProcess {
        &self.process
    }

    pub fn state(&self) -> ProcessState {
        self.process.state()
    }

    /// Diagnostic lines the backend has written so far.
    pub fn results(&self) -> Vec<String> {
        self.process.lines()
    }

    pub fn pipe_path(&self) -> Option<&Path> {
        self.pipes.first().map(PipeHandle::path)
    }

    /// Readable end of the output stream: the FIFO when there is one,
    /// otherwise the backend's stdout. Gives up when the backend dies or the
    /// launch is cancelled before anything opens the pipe.
    pub fn read_end(&self) -> Result<Box<dyn Read + Send>, LaunchError> {
        if let Some(pipe) = self.pipes.iter().find(|p| p.is_fifo()) {
            let file = pipe.open_reader(self.reader_timeout, || {
                self.cancel.is_cancelled() || self.process.state().is_terminal()
            })?;
            return Ok(Box::new(file));
        }
        if let Some(stdout) = self.process.take_stdout() {
            return Ok(Box::new(stdout));
        }
        Err(LaunchError::NoStream {
            engine: self.engine,
        })
    }

    /// Stop the backend and everything attached to it. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.process.stop();
        for pipe in &self.pipes {
            pipe.cleanup();
        }
    }

    /// Block until the backend ends, then remove pipes scheduled for removal.
    pub fn wait(&self) -> ProcessOutcome {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let outcome = match handle.map(JoinHandle::join) {
            Some(Ok(outcome)) => outcome,
            _ => self.process.wait(),
        };
        for pipe in self.pipes.iter().filter(|p| p.is_scheduled_for_removal()) {
            pipe.cleanup();
        }
        outcome
    }
}

impl Drop for LiveTranscode {
    fn drop(&mut self) {
        if !self.process.state().is_terminal() {
            self.cancel();
        }
        remove_files(&self.companions);
    }
}
