// Pipe setup, launch ordering and one-shot runs against real processes
#![cfg(unix)]

use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::common::helpers::{config_in, sh};
use transflow::config::Config;
use transflow::engine::launch::{LaunchError, LaunchPlan, Launcher, LiveTranscode, PIPE_PREFIX};
use transflow::engine::pipe::{PipeError, PipeHandle};
use transflow::engine::process::{CancelToken, CaptureMode, ProcessState};
use transflow::engine::registry::{EngineId, descriptor};
use transflow::engine::{MediaInfo, MediaKind, OutputParameters, ResourceDescriptor};

fn plan_with(command: Vec<String>, pipes: Vec<PipeHandle>, capture: CaptureMode) -> LaunchPlan {
    LaunchPlan {
        engine: descriptor(EngineId::MEncoderVideo).unwrap(),
        command,
        env: Vec::new(),
        pipes,
        companions: Vec::new(),
        capture,
        startup_wait: Duration::from_secs(2),
        stdin: None,
    }
}

fn marker_backend(dir: &Path) -> (Vec<String>, std::path::PathBuf) {
    let marker = dir.join("backend-ran");
    (sh(&format!("touch '{}'", marker.display())), marker)
}

fn fake_program(dir: &Path, name: &str, script: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn test_stuck_pipe_setup_times_out_and_backend_never_starts() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.pipes.setup_timeout_ms = 300;
    let launcher = Launcher::new(&config);

    let pipe = PipeHandle::create(PIPE_PREFIX, &config.pipes).with_setup_command(sh("sleep 5"));
    let (command, marker) = marker_backend(dir.path());

    let started = Instant::now();
    let result = launcher.launch_plan(plan_with(command, vec![pipe], CaptureMode::Discard), &CancelToken::new());

    assert!(
        matches!(result, Err(LaunchError::Pipe(PipeError::SetupTimeout { .. }))),
        "unexpected result: {result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!marker.exists());
}

#[test]
fn test_cancel_during_pipe_setup_returns_promptly() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.pipes.setup_timeout_ms = 10_000;
    let launcher = Launcher::new(&config);

    let pipe = PipeHandle::create(PIPE_PREFIX, &config.pipes).with_setup_command(sh("sleep 5"));
    let (command, marker) = marker_backend(dir.path());

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        remote.cancel();
    });

    let started = Instant::now();
    let result = launcher.launch_plan(plan_with(command, vec![pipe], CaptureMode::Discard), &cancel);
    canceller.join().unwrap();

    assert!(matches!(result, Err(LaunchError::Cancelled)), "unexpected result: {result:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!marker.exists());
}

#[test]
fn test_failed_pipe_setup_is_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(&dir.path().join("missing"));
    let launcher = Launcher::new(&config);

    let pipe = PipeHandle::create(PIPE_PREFIX, &config.pipes);
    let (command, marker) = marker_backend(dir.path());

    let result = launcher.launch_plan(plan_with(command, vec![pipe], CaptureMode::Discard), &CancelToken::new());
    assert!(
        matches!(result, Err(LaunchError::Pipe(PipeError::SetupFailed { .. }))),
        "unexpected result: {result:?}"
    );
    assert!(!marker.exists());
}

#[test]
fn test_backend_writes_through_fifo() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let launcher = Launcher::new(&config);

    let pipe = PipeHandle::create(PIPE_PREFIX, &config.pipes);
    let target = pipe.write_end();
    // Exits non-zero if started before the FIFO exists
    let command = sh(&format!("[ -p '{target}' ] && echo hello > '{target}'"));

    let live = launcher
        .launch_plan(plan_with(command, vec![pipe], CaptureMode::Discard), &CancelToken::new())
        .unwrap();
    let fifo = live.pipe_path().unwrap().to_path_buf();
    assert!(fifo.exists());

    let mut text = String::new();
    live.read_end().unwrap().read_to_string(&mut text).unwrap();
    assert_eq!(text, "hello\n");
    assert!(live.wait().success());
    assert!(!fifo.exists());
}

#[test]
fn test_reader_gives_up_when_backend_dies() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let launcher = Launcher::new(&config);

    let pipe = PipeHandle::create(PIPE_PREFIX, &config.pipes);
    let live = launcher
        .launch_plan(plan_with(sh("exit 0"), vec![pipe], CaptureMode::Discard), &CancelToken::new())
        .unwrap();

    let started = Instant::now();
    let result = live.read_end();
    assert!(matches!(result, Err(LaunchError::Pipe(PipeError::OpenTimeout { .. }))));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_shutdown_terminates_running_backends() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let launcher = Launcher::new(&config);

    let live = launcher
        .launch_plan(plan_with(sh("sleep 30"), Vec::new(), CaptureMode::Discard), &CancelToken::new())
        .unwrap();
    assert!(!launcher.registry().is_empty());

    let started = Instant::now();
    launcher.shutdown();
    let outcome = live.wait();
    assert!(!outcome.success());
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Whether a process with this pid still exists.
fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence and delivers nothing
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn launch_live_fifo_backend(launcher: &Launcher, config: &Config) -> LiveTranscode {
    let pipe = PipeHandle::create(PIPE_PREFIX, &config.pipes);
    launcher
        .launch_plan(plan_with(sh("exec sleep 30"), vec![pipe], CaptureMode::Discard), &CancelToken::new())
        .unwrap()
}

#[test]
fn test_pipe_setup_is_attached_to_backend() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let launcher = Launcher::new(&config);

    let live = launch_live_fifo_backend(&launcher, &config);
    let dependents = live.process().dependents();
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].command()[0], "mkfifo");
    assert!(dependents[0].state().is_terminal());
    live.cancel();
}

#[test]
fn test_cancel_after_spawn_leaves_no_backend_or_fifo() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let launcher = Launcher::new(&config);

    let live = launch_live_fifo_backend(&launcher, &config);
    let pid = live.process().pid().expect("backend is running");
    let fifo = live.pipe_path().unwrap().to_path_buf();
    assert!(pid_alive(pid));
    assert!(fifo.exists());

    let started = Instant::now();
    live.cancel();
    assert_eq!(live.state(), ProcessState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!pid_alive(pid));
    assert!(!fifo.exists());
    assert!(launcher.registry().is_empty());
}

#[test]
fn test_dropping_live_transcode_stops_backend() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let launcher = Launcher::new(&config);

    let live = launch_live_fifo_backend(&launcher, &config);
    let pid = live.process().pid().expect("backend is running");
    let fifo = live.pipe_path().unwrap().to_path_buf();

    drop(live);
    assert!(!pid_alive(pid));
    assert!(!fifo.exists());
    assert!(launcher.registry().is_empty());
}

fn raw_image() -> ResourceDescriptor {
    ResourceDescriptor::new("/photos/a.nef", MediaKind::Image)
}

fn dcraw_config(dir: &Path, script: &str) -> Config {
    let mut config = config_in(dir);
    config.programs.dcraw.path = Some(fake_program(dir, "dcraw", script));
    config
}

#[test]
fn test_one_shot_returns_captured_output() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dcraw_config(dir.path(), "printf JPEGDATA");
    let launcher = Launcher::new(&config);

    let mut params = OutputParameters::default();
    params.thumbnail = true;
    let bytes = launcher
        .run_one_shot(
            descriptor(EngineId::DCRaw).unwrap(),
            &raw_image(),
            &MediaInfo::default(),
            params,
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(bytes, b"JPEGDATA");
}

#[test]
fn test_one_shot_retries_without_thumbnail() {
    let dir = tempfile::TempDir::new().unwrap();
    // No embedded thumbnail: -e produces nothing, a half-size decode works
    let config = dcraw_config(
        dir.path(),
        "case \"$1\" in -e) exit 0 ;; esac\nfor a in \"$@\"; do [ \"$a\" = -h ] && printf HALF; done\nexit 0",
    );
    let launcher = Launcher::new(&config);

    let mut params = OutputParameters::default();
    params.thumbnail = true;
    let bytes = launcher
        .run_one_shot(
            descriptor(EngineId::DCRaw).unwrap(),
            &raw_image(),
            &MediaInfo::default(),
            params,
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(bytes, b"HALF");
}

#[test]
fn test_one_shot_empty_output_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dcraw_config(dir.path(), "exit 0");
    let launcher = Launcher::new(&config);

    let result = launcher.run_one_shot(
        descriptor(EngineId::DCRaw).unwrap(),
        &raw_image(),
        &MediaInfo::default(),
        OutputParameters::default(),
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(LaunchError::EmptyOutput { engine: EngineId::DCRaw })));
}

#[test]
fn test_one_shot_failure_keeps_diagnostics() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dcraw_config(dir.path(), "echo 'Cannot decode file' >&2\nexit 1");
    let launcher = Launcher::new(&config);

    let result = launcher.run_one_shot(
        descriptor(EngineId::DCRaw).unwrap(),
        &raw_image(),
        &MediaInfo::default(),
        OutputParameters::default(),
        &CancelToken::new(),
    );
    match result {
        Err(LaunchError::BackendFailed { engine, lines, .. }) => {
            assert_eq!(engine, EngineId::DCRaw);
            assert!(lines.iter().any(|l| l.contains("Cannot decode file")));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
