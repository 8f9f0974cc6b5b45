//! Supervision of external backend processes.
//!
//! A [`ManagedProcess`] owns one OS child: it spawns it, drains its output
//! on helper threads, tracks its lifecycle in a `Condvar`-guarded state and
//! tears it down on request. Failures never escape as panics or errors;
//! they end in [`ProcessState::Failed`] with the captured diagnostic lines.

use std::collections::{HashSet, VecDeque};
use std::env;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::engine::core::format_command;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_millis(1000);

static PROCESS_COUNTER: AtomicU64 = AtomicU64::new(0);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Pending,
    Running { pid: u32 },
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
    Stopped,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Succeeded | ProcessState::Failed { .. } | ProcessState::Stopped
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }
}

/// What happens to the child's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Collected line by line together with stderr
    Lines,
    /// Collected whole into a buffer pre-sized to `initial_capacity`
    Bytes { initial_capacity: usize },
    /// Left open for a consumer, see [`ManagedProcess::take_stdout`]
    Stream,
    Discard,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub state: ProcessState,
    /// stderr lines (and stdout lines in [`CaptureMode::Lines`])
    pub lines: Vec<String>,
    /// stdout bytes in [`CaptureMode::Bytes`]
    pub output: Vec<u8>,
    /// Ended because the configured timeout expired
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.state == ProcessState::Succeeded
    }

    pub fn exit_code(&self) -> Option<i32> {
        match &self.state {
            ProcessState::Succeeded => Some(0),
            ProcessState::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Shared cancellation flag checked by every blocking wait in a launch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// PID registry
// ============================================================================

/// Live child pids, so everything can be torn down on shutdown.
#[derive(Debug, Clone, Default)]
pub struct PidRegistry {
    pids: Arc<Mutex<HashSet<u32>>>,
}

impl PidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pid: u32) {
        lock(&self.pids).insert(pid);
    }

    pub fn remove(&self, pid: u32) {
        lock(&self.pids).remove(&pid);
    }

    pub fn contains(&self, pid: u32) -> bool {
        lock(&self.pids).contains(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = lock(&self.pids).iter().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pids).is_empty()
    }

    /// Ask every registered process group to terminate.
    pub fn terminate_all(&self) {
        for pid in self.pids() {
            debug!(pid, "Terminating registered process");
            signal_group(pid, Signal::Terminate);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let Some(target) = group_target(pid) else {
        warn!(pid, "Pid out of range, not signalling");
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory we own; a
    // stale group id only makes it fail with ESRCH.
    unsafe {
        libc::kill(target, sig);
    }
}

/// kill(2) target for the process group led by `pid`. Children run in their
/// own group (pgid == pid). Pids that do not fit `pid_t`, and 0 (our own
/// group), yield `None`.
#[cfg(unix)]
fn group_target(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid)
        .ok()
        .filter(|pgid| *pgid > 0)
        .map(|pgid| -pgid)
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}

// ============================================================================
// Builder
// ============================================================================

/// Everything needed to start a process; turned into a [`ManagedProcess`] by `build`.
pub struct ProcessSpec {
    command: Vec<String>,
    capture: CaptureMode,
    env: Vec<(String, String)>,
    work_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    terminate_grace: Duration,
    stdin: Option<Box<dyn Read + Send>>,
    registry: Option<PidRegistry>,
    line_limit: Option<usize>,
}

impl ProcessSpec {
    pub fn new(command: Vec<String>, capture: CaptureMode) -> Self {
        Self {
            command,
            capture,
            env: Vec::new(),
            work_dir: None,
            timeout: None,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            stdin: None,
            registry: None,
            line_limit: None,
        }
    }

    /// Extra environment. `PATH` entries are prepended to the inherited PATH.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Kill the process if it runs longer than this.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn stdin(mut self, source: Box<dyn Read + Send>) -> Self {
        self.stdin = Some(source);
        self
    }

    pub fn registry(mut self, registry: PidRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Retain only the newest `limit` diagnostic lines. Every line is still
    /// traced as it arrives; 0 keeps nothing in memory.
    pub fn keep_last_lines(mut self, limit: usize) -> Self {
        self.line_limit = Some(limit);
        self
    }

    pub fn build(self) -> ManagedProcess {
        let base = self
            .command
            .first()
            .and_then(|program| Path::new(program).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "process".to_string());
        let name = format!(
            "{base}-{}",
            PROCESS_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
        );

        let capacity = match self.capture {
            CaptureMode::Bytes { initial_capacity } => initial_capacity,
            _ => 0,
        };

        ManagedProcess {
            inner: Arc::new(Inner {
                name,
                command: self.command,
                capture: self.capture,
                env: self.env,
                work_dir: self.work_dir,
                timeout: self.timeout,
                terminate_grace: self.terminate_grace,
                registry: self.registry,
                line_limit: self.line_limit,
                stdin: Mutex::new(self.stdin),
                child: Mutex::new(None),
                state: Mutex::new(ProcessState::Pending),
                state_changed: Condvar::new(),
                lines: Mutex::new(VecDeque::new()),
                output: Mutex::new(Vec::with_capacity(capacity)),
                stdout: Mutex::new(None),
                attached: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                timed_out: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// Managed process
// ============================================================================

struct Inner {
    name: String,
    command: Vec<String>,
    capture: CaptureMode,
    env: Vec<(String, String)>,
    work_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    terminate_grace: Duration,
    registry: Option<PidRegistry>,
    line_limit: Option<usize>,
    stdin: Mutex<Option<Box<dyn Read + Send>>>,
    child: Mutex<Option<Child>>,
    state: Mutex<ProcessState>,
    state_changed: Condvar,
    lines: Mutex<VecDeque<String>>,
    output: Mutex<Vec<u8>>,
    stdout: Mutex<Option<ChildStdout>>,
    attached: Mutex<Vec<ManagedProcess>>,
    started: AtomicBool,
    stop_requested: AtomicBool,
    timed_out: AtomicBool,
}

/// Handle to a supervised OS process. Clones share the same process.
#[derive(Clone)]
pub struct ManagedProcess {
    inner: Arc<Inner>,
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("name", &self.inner.name)
            .field("command", &self.inner.command)
            .field("state", &self.state())
            .finish()
    }
}

impl ManagedProcess {
    pub fn new(command: Vec<String>, capture: CaptureMode) -> Self {
        ProcessSpec::new(command, capture).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn command(&self) -> &[String] {
        &self.inner.command
    }

    pub fn state(&self) -> ProcessState {
        lock(&self.inner.state).clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.state().pid()
    }

    /// Diagnostic lines captured so far (the newest ones when a limit is set).
    pub fn lines(&self) -> Vec<String> {
        lock(&self.inner.lines).iter().cloned().collect()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    /// Tie a dependent process to this one: it is stopped when this one ends.
    pub fn attach(&self, dependent: ManagedProcess) {
        if self.state().is_terminal() {
            dependent.stop();
            return;
        }
        lock(&self.inner.attached).push(dependent);
    }

    /// Processes currently tied to this one through [`attach`](Self::attach).
    pub fn dependents(&self) -> Vec<ManagedProcess> {
        lock(&self.inner.attached).clone()
    }

    /// Run on the calling thread until the process ends.
    pub fn run_blocking(&self) -> ProcessOutcome {
        self.run()
    }

    /// Run on a new supervisory thread named after the process.
    pub fn run_detached(&self) -> io::Result<JoinHandle<ProcessOutcome>> {
        let this = self.clone();
        thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || this.run())
    }

    /// Stdout of a [`CaptureMode::Stream`] process, available once it is running.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        lock(&self.inner.stdout).take()
    }

    /// Block until `pred` holds for the state or `timeout` elapses. Returns the final verdict.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&ProcessState) -> bool) -> bool {
        let guard = lock(&self.inner.state);
        let (guard, _) = self
            .inner
            .state_changed
            .wait_timeout_while(guard, timeout, |state| !pred(state))
            .unwrap_or_else(PoisonError::into_inner);
        pred(&guard)
    }

    pub fn wait_terminal(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, ProcessState::is_terminal)
    }

    /// Block until the process has ended. Must only be called on a started process.
    pub fn wait(&self) -> ProcessOutcome {
        {
            let guard = lock(&self.inner.state);
            let _guard = self
                .inner
                .state_changed
                .wait_while(guard, |state| !state.is_terminal())
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.outcome()
    }

    /// Snapshot of the outcome. Captured stdout bytes are moved out on the first call.
    pub fn outcome(&self) -> ProcessOutcome {
        ProcessOutcome {
            state: self.state(),
            lines: self.lines(),
            output: std::mem::take(&mut *lock(&self.inner.output)),
            timed_out: self.inner.timed_out.load(Ordering::SeqCst),
        }
    }

    /// Terminate the process (SIGTERM, then a hard kill after the grace period)
    /// and every attached dependent. Safe to call any number of times.
    pub fn stop(&self) {
        self.signal_stop();
        self.stop_attached();

        if self.inner.started.load(Ordering::SeqCst) && !self.state().is_terminal() {
            let limit = self.inner.terminate_grace + Duration::from_secs(1);
            if !self.wait_terminal(limit) {
                warn!(process = %self.inner.name, "Process did not stop in time");
            }
        }
    }

    fn signal_stop(&self) {
        if self.inner.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.inner.started.load(Ordering::SeqCst) {
            debug!(process = %self.inner.name, "Stopped before start");
            self.finish(ProcessState::Stopped);
            return;
        }
        if let Some(pid) = self.pid() {
            debug!(process = %self.inner.name, pid, "Stopping process");
            self.terminate(pid);
        }
    }

    fn terminate(&self, pid: u32) {
        let guard = lock(&self.inner.child);
        // Child already reaped: the pid may belong to someone else now
        if guard.is_none() {
            return;
        }
        if cfg!(unix) {
            signal_group(pid, Signal::Terminate);
        } else {
            drop(guard);
            self.hard_kill(pid);
        }
    }

    fn hard_kill(&self, pid: u32) {
        let mut guard = lock(&self.inner.child);
        if let Some(child) = guard.as_mut() {
            signal_group(pid, Signal::Kill);
            let _ = child.kill();
        }
    }

    fn stop_attached(&self) {
        let dependents = std::mem::take(&mut *lock(&self.inner.attached));
        for dependent in dependents {
            trace!(process = %self.inner.name, dependent = %dependent.name(), "Stopping attached process");
            dependent.stop();
        }
    }

    fn finish(&self, state: ProcessState) {
        let mut current = lock(&self.inner.state);
        if !current.is_terminal() {
            *current = state;
        }
        self.inner.state_changed.notify_all();
    }

    fn mark_running(&self, pid: u32) {
        let mut current = lock(&self.inner.state);
        if *current == ProcessState::Pending {
            *current = ProcessState::Running { pid };
        }
        self.inner.state_changed.notify_all();
    }

    fn record(&self, line: String) {
        let mut lines = lock(&self.inner.lines);
        lines.push_back(line);
        if let Some(limit) = self.inner.line_limit {
            while lines.len() > limit {
                lines.pop_front();
            }
        }
    }

    fn run(&self) -> ProcessOutcome {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!(process = %self.inner.name, "Process was already started");
            return self.wait();
        }
        if self.is_stop_requested() {
            self.finish(ProcessState::Stopped);
            return self.outcome();
        }

        let Some((program, rest)) = self.inner.command.split_first() else {
            self.finish(ProcessState::Failed {
                exit_code: None,
                reason: "empty command".to_string(),
            });
            return self.outcome();
        };

        let mut cmd = Command::new(program);
        cmd.args(rest);
        self.apply_env(&mut cmd);
        if let Some(dir) = &self.inner.work_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let feed = lock(&self.inner.stdin).take();
        cmd.stdin(if feed.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(match self.inner.capture {
            CaptureMode::Discard => Stdio::null(),
            _ => Stdio::piped(),
        });
        cmd.stderr(Stdio::piped());

        debug!(
            process = %self.inner.name,
            command = %format_command(&self.inner.command),
            "Starting process"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to start {program}: {e}");
                warn!(process = %self.inner.name, "{reason}");
                self.record(reason.clone());
                self.finish(ProcessState::Failed {
                    exit_code: None,
                    reason,
                });
                self.stop_attached();
                return self.outcome();
            }
        };

        let pid = child.id();
        if let Some(registry) = &self.inner.registry {
            registry.insert(pid);
        }

        if let (Some(mut source), Some(mut sink)) = (feed, child.stdin.take()) {
            let name = self.inner.name.clone();
            thread::spawn(move || {
                if let Err(e) = io::copy(&mut source, &mut sink) {
                    trace!(process = %name, "stdin feed ended: {e}");
                }
            });
        }

        let mut readers = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_line_reader(stderr, "stderr"));
        }
        match self.inner.capture {
            CaptureMode::Lines => {
                if let Some(stdout) = child.stdout.take() {
                    readers.push(self.spawn_line_reader(stdout, "stdout"));
                }
            }
            CaptureMode::Bytes { initial_capacity } => {
                if let Some(mut stdout) = child.stdout.take() {
                    let this = self.clone();
                    readers.push(thread::spawn(move || {
                        let mut buf = Vec::with_capacity(initial_capacity);
                        if let Err(e) = stdout.read_to_end(&mut buf) {
                            this.record(format!("stdout read failed: {e}"));
                        }
                        *lock(&this.inner.output) = buf;
                    }));
                }
            }
            CaptureMode::Stream => {
                *lock(&self.inner.stdout) = child.stdout.take();
            }
            CaptureMode::Discard => {}
        }

        *lock(&self.inner.child) = Some(child);
        self.mark_running(pid);
        if self.is_stop_requested() {
            self.terminate(pid);
        }

        let status = self.poll_until_exit(pid);
        for reader in readers {
            let _ = reader.join();
        }
        if let Some(registry) = &self.inner.registry {
            registry.remove(pid);
        }

        let state = if self.inner.timed_out.load(Ordering::SeqCst) {
            ProcessState::Failed {
                exit_code: status.and_then(|s| s.code()),
                reason: format!("timed out after {:?}", self.inner.timeout.unwrap_or_default()),
            }
        } else if self.is_stop_requested() {
            ProcessState::Stopped
        } else {
            match status {
                Some(status) if status.success() => ProcessState::Succeeded,
                Some(status) => ProcessState::Failed {
                    exit_code: status.code(),
                    reason: describe_exit(status),
                },
                None => ProcessState::Failed {
                    exit_code: None,
                    reason: "lost track of process".to_string(),
                },
            }
        };

        match &state {
            ProcessState::Failed { reason, .. } => {
                warn!(process = %self.inner.name, pid, "Process failed: {reason}")
            }
            other => debug!(process = %self.inner.name, pid, state = ?other, "Process finished"),
        }

        self.finish(state);
        self.stop_attached();
        self.outcome()
    }

    fn apply_env(&self, cmd: &mut Command) {
        for (key, value) in &self.inner.env {
            if key == "PATH" {
                let mut paths: Vec<PathBuf> = env::split_paths(value).collect();
                if let Some(existing) = env::var_os("PATH") {
                    paths.extend(env::split_paths(&existing));
                }
                match env::join_paths(paths) {
                    Ok(joined) => {
                        cmd.env("PATH", joined);
                    }
                    Err(e) => warn!(process = %self.inner.name, "Ignoring invalid PATH entry: {e}"),
                }
            } else {
                cmd.env(key, value);
            }
        }
    }

    fn spawn_line_reader<R: Read + Send + 'static>(
        &self,
        stream: R,
        label: &'static str,
    ) -> JoinHandle<()> {
        let this = self.clone();
        thread::spawn(move || {
            let reader = BufReader::new(stream);
            for line in reader.lines().map_while(Result::ok) {
                trace!(process = %this.inner.name, stream = label, "{line}");
                this.record(line);
            }
        })
    }

    fn poll_until_exit(&self, pid: u32) -> Option<ExitStatus> {
        let started = Instant::now();
        let mut kill_at: Option<Instant> = None;
        let mut killed = false;

        loop {
            {
                let mut guard = lock(&self.inner.child);
                let child = guard.as_mut()?;
                match child.try_wait() {
                    Ok(Some(status)) => {
                        guard.take();
                        return Some(status);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(process = %self.inner.name, "Failed to poll process: {e}");
                        let _ = child.kill();
                        let status = child.wait().ok();
                        guard.take();
                        return status;
                    }
                }
            }

            if let Some(limit) = self.inner.timeout {
                if started.elapsed() >= limit && !self.inner.timed_out.swap(true, Ordering::SeqCst) {
                    warn!(process = %self.inner.name, "Process timed out after {limit:?}");
                    self.record(format!("timed out after {limit:?}"));
                    self.signal_stop();
                }
            }

            if self.is_stop_requested() && !killed {
                let deadline = *kill_at.get_or_insert_with(|| Instant::now() + self.inner.terminate_grace);
                if Instant::now() >= deadline {
                    debug!(process = %self.inner.name, pid, "Grace period over, killing");
                    self.hard_kill(pid);
                    killed = true;
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => "exited abnormally".to_string(),
    }
}
