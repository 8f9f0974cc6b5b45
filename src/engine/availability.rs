//! Backend executable availability: probing, caching and the selection gate.

use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::process::{CaptureMode, ProcessSpec};
use crate::engine::registry::{EngineDescriptor, EngineId, Program, all_engines};

/// Why an engine cannot run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutableError {
    /// The program itself is missing or broken; every engine using it is out
    #[error("{program}: {reason}")]
    General { program: Program, reason: String },

    /// The program works but lacks something one engine needs
    #[error("{engine}: missing {feature} ({reason})")]
    Specific {
        engine: EngineId,
        feature: String,
        reason: String,
    },
}

#[derive(Debug, Default)]
struct Tables {
    programs: HashMap<Program, Result<String, String>>,
    features: HashMap<Program, HashSet<String>>,
    specific: HashMap<EngineId, HashMap<String, String>>,
}

/// Probe results shared between the launcher and selection.
///
/// Programs that were never probed count as available.
#[derive(Debug, Default)]
pub struct AvailabilityTable {
    tables: RwLock<Tables>,
}

impl AvailabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.tables.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        f(&mut self.tables.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn mark_available(&self, program: Program, version: impl Into<String>) {
        let version = version.into();
        self.write(|t| t.programs.insert(program, Ok(version)));
    }

    pub fn mark_general(&self, program: Program, reason: impl Into<String>) {
        let reason = reason.into();
        self.write(|t| t.programs.insert(program, Err(reason)));
    }

    pub fn mark_specific(&self, engine: EngineId, feature: impl Into<String>, reason: impl Into<String>) {
        let (feature, reason) = (feature.into(), reason.into());
        self.write(|t| {
            t.specific.entry(engine).or_default().insert(feature, reason);
        });
    }

    /// Record the encoder/feature list a program reported.
    pub fn set_features(&self, program: Program, features: HashSet<String>) {
        self.write(|t| t.features.insert(program, features));
    }

    pub fn is_probed(&self, program: Program) -> bool {
        self.read(|t| t.programs.contains_key(&program))
    }

    pub fn version(&self, program: Program) -> Option<String> {
        self.read(|t| t.programs.get(&program).and_then(|r| r.as_ref().ok().cloned()))
    }

    pub fn general_error(&self, program: Program) -> Option<ExecutableError> {
        self.read(|t| match t.programs.get(&program) {
            Some(Err(reason)) => Some(ExecutableError::General {
                program,
                reason: reason.clone(),
            }),
            _ => None,
        })
    }

    /// Whether `engine` cannot provide `feature`.
    pub fn lacks(&self, engine: &EngineDescriptor, feature: &str) -> bool {
        self.read(|t| {
            let marked = t
                .specific
                .get(&engine.id)
                .is_some_and(|m| m.contains_key(feature));
            let unlisted = t
                .features
                .get(&engine.program)
                .is_some_and(|known| !known.contains(feature));
            marked || unlisted
        })
    }

    /// All reasons the engine cannot serve a request needing `features`.
    pub fn errors(&self, engine: &EngineDescriptor, features: &[String]) -> Vec<ExecutableError> {
        let mut errors: Vec<ExecutableError> =
            self.general_error(engine.program).into_iter().collect();
        for feature in features {
            if self.lacks(engine, feature) {
                let reason = self
                    .read(|t| {
                        t.specific
                            .get(&engine.id)
                            .and_then(|m| m.get(feature))
                            .cloned()
                    })
                    .unwrap_or_else(|| format!("not listed by {}", engine.program));
                errors.push(ExecutableError::Specific {
                    engine: engine.id,
                    feature: feature.clone(),
                    reason,
                });
            }
        }
        errors
    }

    pub fn is_available(&self, engine: &EngineDescriptor, features: &[String]) -> bool {
        self.errors(engine, features).is_empty()
    }

    pub fn reset(&self) {
        self.write(|t| *t = Tables::default());
    }
}

// ============================================================================
// Selection gate
// ============================================================================

/// Availability/enablement predicate consulted by engine selection.
pub trait EngineGate {
    fn permits(&self, engine: &EngineDescriptor, features: &[String]) -> bool;
}

/// Permits every engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl EngineGate for OpenGate {
    fn permits(&self, _engine: &EngineDescriptor, _features: &[String]) -> bool {
        true
    }
}

/// Honors the configured disabled list and, when present, probe results.
#[derive(Debug, Clone, Copy)]
pub struct ConfigGate<'a> {
    pub config: &'a Config,
    pub availability: Option<&'a AvailabilityTable>,
}

impl<'a> ConfigGate<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            availability: None,
        }
    }

    pub fn with_availability(mut self, availability: &'a AvailabilityTable) -> Self {
        self.availability = Some(availability);
        self
    }
}

impl EngineGate for ConfigGate<'_> {
    fn permits(&self, engine: &EngineDescriptor, features: &[String]) -> bool {
        if self.config.engines.is_disabled(engine.id) {
            return false;
        }
        self.availability
            .is_none_or(|table| table.is_available(engine, features))
    }
}

// ============================================================================
// Probing
// ============================================================================

/// Resolve a configured executable to a runnable file.
///
/// Bare names are looked up on PATH; anything with a directory part must
/// exist as given.
pub fn locate_executable(program: Program, path: &Path) -> Result<PathBuf, ExecutableError> {
    let general = |reason: String| ExecutableError::General { program, reason };

    if path.components().count() > 1 {
        return if is_executable(path) {
            Ok(path.to_path_buf())
        } else if path.exists() {
            Err(general(format!("{} is not executable", path.display())))
        } else {
            Err(general(format!("{} does not exist", path.display())))
        };
    }

    let search = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search)
        .flat_map(|dir| {
            let plain = dir.join(path);
            let exe = dir.join(path).with_extension("exe");
            [plain, exe]
        })
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| general(format!("{} not found on PATH", path.display())))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Run the engine's version probe and parse the version string.
pub fn probe_version(
    engine: &EngineDescriptor,
    config: &Config,
    timeout: Duration,
) -> Result<String, ExecutableError> {
    let exe = locate_executable(engine.program, &engine.executable(config))?;
    let mut command = vec![exe.to_string_lossy().into_owned()];
    command.extend(engine.strategy.version_args().iter().map(|a| a.to_string()));

    let outcome = ProcessSpec::new(command, CaptureMode::Lines)
        .timeout(timeout)
        .build()
        .run_blocking();

    if outcome.timed_out {
        return Err(ExecutableError::General {
            program: engine.program,
            reason: format!("version probe timed out after {timeout:?}"),
        });
    }
    engine
        .strategy
        .parse_version(&outcome.text())
        .ok_or_else(|| ExecutableError::General {
            program: engine.program,
            reason: format!("could not read a version ({:?})", outcome.state),
        })
}

/// Encoder names from `ffmpeg -hide_banner -encoders` output.
pub fn parse_encoder_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

fn probe_encoders(exe: &Path, timeout: Duration) -> Option<HashSet<String>> {
    let command = vec![
        exe.to_string_lossy().into_owned(),
        "-hide_banner".to_string(),
        "-encoders".to_string(),
    ];
    let outcome = ProcessSpec::new(command, CaptureMode::Lines)
        .timeout(timeout)
        .build()
        .run_blocking();
    if !outcome.success() {
        return None;
    }
    let encoders = parse_encoder_list(&outcome.text());
    (!encoders.is_empty()).then_some(encoders)
}

/// Probe one engine's program (once per program) and record the result.
pub fn check_engine(
    engine: &EngineDescriptor,
    config: &Config,
    table: &AvailabilityTable,
    timeout: Duration,
) -> Result<String, ExecutableError> {
    if let Some(error) = table.general_error(engine.program) {
        return Err(error);
    }
    if let Some(version) = table.version(engine.program) {
        return Ok(version);
    }

    match probe_version(engine, config, timeout) {
        Ok(version) => {
            info!(engine = %engine.id, program = %engine.program, %version, "Backend available");
            table.mark_available(engine.program, version.clone());
            if engine.program == Program::Ffmpeg {
                let exe = engine.executable(config);
                if let Some(encoders) = locate_executable(engine.program, &exe)
                    .ok()
                    .and_then(|path| probe_encoders(&path, timeout))
                {
                    debug!(count = encoders.len(), "Recorded ffmpeg encoders");
                    table.set_features(engine.program, encoders);
                }
            }
            Ok(version)
        }
        Err(error) => {
            warn!(engine = %engine.id, "Backend unavailable: {error}");
            if let ExecutableError::General { reason, .. } = &error {
                table.mark_general(engine.program, reason.clone());
            }
            Err(error)
        }
    }
}

/// One row of the engine availability report.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub engine: EngineId,
    pub name: &'static str,
    pub program: Program,
    pub status: EngineStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Available { version: String },
    Unavailable { reason: String },
    Disabled,
    UnsupportedPlatform,
}

/// Probe every registered engine.
pub fn check_all(config: &Config, table: &AvailabilityTable, timeout: Duration) -> Vec<EngineReport> {
    all_engines()
        .into_iter()
        .map(|engine| {
            let status = if !engine.platform.is_current() {
                EngineStatus::UnsupportedPlatform
            } else if config.engines.is_disabled(engine.id) {
                EngineStatus::Disabled
            } else {
                match check_engine(engine, config, table, timeout) {
                    Ok(version) => EngineStatus::Available { version },
                    Err(error) => EngineStatus::Unavailable {
                        reason: error.to_string(),
                    },
                }
            };
            EngineReport {
                engine: engine.id,
                name: engine.name,
                program: engine.program,
                status,
            }
        })
        .collect()
}
