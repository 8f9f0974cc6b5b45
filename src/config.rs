// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::core::RendererCapabilities;
use crate::engine::registry::{EngineId, Program};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engines: EnginesConfig,

    #[serde(default)]
    pub programs: ProgramsConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub pipes: PipeConfig,

    /// Renderer declarations selectable by name from the CLI
    #[serde(default)]
    pub renderers: Vec<RendererCapabilities>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnginesConfig {
    /// Engine identifiers (current or historical) that must never be selected
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl EnginesConfig {
    pub fn is_disabled(&self, id: EngineId) -> bool {
        self.disabled
            .iter()
            .any(|entry| EngineId::parse(entry) == Some(id))
    }
}

/// Executable location and extra arguments for one backend program.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgramConfig {
    /// Configured executable path (defaults to the program name on PATH)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Alternate executable; wins over `path` when set
    #[serde(default)]
    pub alternate_path: Option<PathBuf>,

    /// Appended verbatim (shell-tokenized) after the generated options
    #[serde(default)]
    pub custom_options: String,
}

impl ProgramConfig {
    pub fn resolve(&self, default_name: &str) -> PathBuf {
        self.alternate_path
            .clone()
            .or_else(|| self.path.clone())
            .unwrap_or_else(|| PathBuf::from(default_name))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramsConfig {
    #[serde(default)]
    pub ffmpeg: ProgramConfig,
    #[serde(default)]
    pub mencoder: ProgramConfig,
    #[serde(default)]
    pub vlc: ProgramConfig,
    #[serde(default)]
    pub tsmuxer: ProgramConfig,
    #[serde(default)]
    pub dcraw: ProgramConfig,
    #[serde(default)]
    pub youtube_dl: ProgramConfig,
}

impl ProgramsConfig {
    pub fn get(&self, program: Program) -> &ProgramConfig {
        match program {
            Program::Ffmpeg => &self.ffmpeg,
            Program::Mencoder => &self.mencoder,
            Program::Vlc => &self.vlc,
            Program::TsMuxer => &self.tsmuxer,
            Program::Dcraw => &self.dcraw,
            Program::YoutubeDl => &self.youtube_dl,
        }
    }

    pub fn get_mut(&mut self, program: Program) -> &mut ProgramConfig {
        match program {
            Program::Ffmpeg => &mut self.ffmpeg,
            Program::Mencoder => &mut self.mencoder,
            Program::Vlc => &mut self.vlc,
            Program::TsMuxer => &mut self.tsmuxer,
            Program::Dcraw => &mut self.dcraw,
            Program::YoutubeDl => &mut self.youtube_dl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Let backends use several threads
    #[serde(default = "default_true_config")]
    pub multithreading: bool,

    /// Thread count handed to backends (omitted when it equals the CPU count)
    #[serde(default = "default_thread_count")]
    pub thread_count: u32,

    /// ffmpeg -loglevel for spawned backends
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,

    /// Maximum video bitrate in Mbps (0 = unlimited)
    #[serde(default)]
    pub max_video_bitrate_mbps: u32,

    /// Resample audio with unusual sample rates to 48 kHz
    #[serde(default = "default_true_config")]
    pub resample_audio: bool,

    /// Always resample audio to 44.1 kHz
    #[serde(default)]
    pub force_44k: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Directory for FIFOs and companion files (defaults to the system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// How long the pipe setup process may take before the request fails
    #[serde(default = "default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,

    /// Default window for a backend to come up
    #[serde(default = "default_startup_wait_ms")]
    pub startup_wait_ms: u64,

    /// Grace period between SIGTERM and a hard kill
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,

    /// How long a reader waits for the backend to open the pipe
    #[serde(default = "default_reader_timeout_ms")]
    pub reader_timeout_ms: u64,
}

fn default_true_config() -> bool {
    true
}

fn default_thread_count() -> u32 {
    host_processing_units()
}

fn default_loglevel() -> String {
    "warning".to_string()
}

fn default_audio_bitrate() -> u32 {
    448
}

fn default_setup_timeout_ms() -> u64 {
    2000
}

fn default_startup_wait_ms() -> u64 {
    2000
}

fn default_terminate_timeout_ms() -> u64 {
    1000
}

fn default_reader_timeout_ms() -> u64 {
    10_000
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            multithreading: true,
            thread_count: default_thread_count(),
            loglevel: default_loglevel(),
            audio_bitrate_kbps: default_audio_bitrate(),
            max_video_bitrate_mbps: 0,
            resample_audio: true,
            force_44k: false,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            setup_timeout_ms: default_setup_timeout_ms(),
            startup_wait_ms: default_startup_wait_ms(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
            reader_timeout_ms: default_reader_timeout_ms(),
        }
    }
}

impl PipeConfig {
    pub fn dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn startup_wait(&self) -> Duration {
        Duration::from_millis(self.startup_wait_ms)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn reader_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_timeout_ms)
    }
}

/// Logical CPUs on this host (at least 1).
pub fn host_processing_units() -> u32 {
    let mut sys = sysinfo::System::new();
    sys.refresh_cpu();
    let cpus = sys.cpus().len();
    if cpus > 0 {
        cpus as u32
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("transflow")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("transflow")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // Fall back to built-in defaults when the directory isn't writable
            if let Err(e) = config.save() {
                tracing::warn!("Could not create default config file: {e:#}");
                eprintln!(
                    "Using built-in defaults. Run 'transflow init-config' to create a config file."
                );
            }

            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<()> {
        if !Self::exists() {
            Config::default().save()?;
        }
        Ok(())
    }

    pub fn renderer(&self, name: &str) -> Option<&RendererCapabilities> {
        self.renderers
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }
}
