//! Per-backend hooks plugged into the shared command pipeline.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::engine::core::{MediaInfo, OutputParameters, RendererCapabilities, ResourceDescriptor};
use crate::engine::registry::EngineDescriptor;

/// Where the backend writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    File(PathBuf),
    /// Write end of a named pipe
    Pipe(String),
    /// Backend writes to its standard output
    Stdout,
}

/// A file a backend needs on disk before it starts (e.g. a mux script).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Everything a strategy may look at while contributing arguments.
pub struct Invocation<'a> {
    pub engine: &'a EngineDescriptor,
    pub resource: &'a ResourceDescriptor,
    pub media: &'a MediaInfo,
    pub params: &'a OutputParameters,
    pub config: &'a Config,
    /// Result of the thread policy; `None` means "let the backend decide"
    pub threads: Option<u32>,
}

impl Invocation<'_> {
    /// Input locator, or the stdin marker when the resource is fed internally.
    pub fn input_locator(&self) -> &str {
        if self.params.is_stdin_fed() {
            "-"
        } else {
            &self.resource.locator
        }
    }

    pub fn renderer(&self) -> &RendererCapabilities {
        &self.params.renderer
    }

    pub fn sink(&self) -> Sink {
        if let Some(path) = &self.params.output_file {
            return Sink::File(path.clone());
        }
        match self.params.pipe_slots.iter().find_map(|s| s.pipe.as_ref()) {
            Some(pipe) if pipe.is_fifo() => Sink::Pipe(pipe.write_end()),
            _ => Sink::Stdout,
        }
    }

    pub fn scratch(&self, key: &str) -> Option<&str> {
        self.params.scratch.get(key).map(String::as_str)
    }
}

/// Backend-specific behavior behind the shared pipeline.
///
/// Each hook returns the arguments for one section of the command line; the
/// pipeline decides the section order. Hooks must be pure functions of the
/// invocation so the same request always builds the same command.
pub trait EngineStrategy: Send + Sync {
    /// Format predicate: can this backend read the resource at all?
    fn accepts(&self, resource: &ResourceDescriptor, media: &MediaInfo) -> bool;

    /// Containers the backend can produce; the renderer predicate checks against these.
    fn output_containers(&self) -> &'static [&'static str];

    /// Encoders or features the backend executable must support for this request.
    fn required_features(
        &self,
        _resource: &ResourceDescriptor,
        _renderer: &RendererCapabilities,
    ) -> Vec<String> {
        Vec::new()
    }

    /// Whether renderer/header options in ffmpeg syntax apply to this backend.
    fn uses_option_table(&self) -> bool {
        false
    }

    fn global_args(&self, _inv: &Invocation) -> Vec<String> {
        Vec::new()
    }

    fn seek_args(&self, seconds: &str) -> Vec<String>;

    fn input_args(&self, inv: &Invocation) -> Vec<String>;

    fn thread_args(&self, _threads: u32) -> Vec<String> {
        Vec::new()
    }

    fn output_args(&self, _inv: &Invocation) -> Vec<String> {
        Vec::new()
    }

    fn sink_args(&self, inv: &Invocation, sink: &Sink) -> Vec<String>;

    /// Streaming output goes through a named pipe rather than stdout.
    fn streams_via_pipe(&self) -> bool {
        false
    }

    /// Backend runs to completion and its stdout is captured whole.
    fn one_shot(&self) -> bool {
        false
    }

    /// Initial capacity for one-shot capture.
    fn output_buffer_hint(&self, _params: &OutputParameters, media: &MediaInfo) -> usize {
        media
            .size_bytes
            .map(capped_buffer)
            .unwrap_or(DEFAULT_OUTPUT_BUFFER)
    }

    /// Fill backend scratch fields (companion file locations) before the build.
    fn prepare(&self, _params: &mut OutputParameters, _temp_dir: &Path) {}

    /// Files that must exist before the backend starts.
    fn companion_files(&self, _inv: &Invocation) -> Vec<CompanionFile> {
        Vec::new()
    }

    /// Adjust params for a second attempt after a one-shot run produced no output.
    fn retry_after_empty_output(&self, _params: &mut OutputParameters, _media: &MediaInfo) -> bool {
        false
    }

    /// Arguments that make the executable print its version and exit.
    fn version_args(&self) -> &'static [&'static str] {
        &["-version"]
    }

    /// Pull a version string out of the version probe output.
    fn parse_version(&self, output: &str) -> Option<String> {
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// Default one-shot buffer when the source size is unknown.
pub const DEFAULT_OUTPUT_BUFFER: usize = 5_000_000;

/// Upper bound on any pre-sized capture buffer; larger outputs still grow past it.
pub const MAX_OUTPUT_BUFFER: usize = 64 << 20;

/// Buffer size for `bytes` of expected output, clamped to [`MAX_OUTPUT_BUFFER`].
pub fn capped_buffer(bytes: u64) -> usize {
    usize::try_from(bytes).map_or(MAX_OUTPUT_BUFFER, |b| b.min(MAX_OUTPUT_BUFFER))
}

pub(crate) fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

pub(crate) fn sink_target(sink: &Sink, stdout_marker: &str) -> String {
    match sink {
        Sink::File(path) => path.to_string_lossy().into_owned(),
        Sink::Pipe(path) => path.clone(),
        Sink::Stdout => stdout_marker.to_string(),
    }
}

/// Protocols every network-capable backend understands.
pub(crate) const STREAM_PROTOCOLS: &[&str] = &[
    "http", "https", "mms", "mmsh", "mmst", "rtmp", "rtsp", "rtp", "udp", "hls",
];

/// Scratch key holding the generated AviSynth script path.
pub const AVS_SCRIPT_KEY: &str = "avs_script";

pub(crate) fn prepare_avisynth(params: &mut OutputParameters, temp_dir: &Path) {
    params.scratch.entry(AVS_SCRIPT_KEY.to_string()).or_insert_with(|| {
        let name = format!("transflow_{}.avs", uuid::Uuid::new_v4().simple());
        temp_dir.join(name).to_string_lossy().into_owned()
    });
}

/// Frame-server script that opens the resource with FFMS2.
pub(crate) fn avisynth_companion(inv: &Invocation) -> Vec<CompanionFile> {
    let Some(path) = inv.scratch(AVS_SCRIPT_KEY) else {
        return Vec::new();
    };
    let source = inv.resource.locator.replace('"', "");
    let contents = format!(
        "video = FFVideoSource(\"{source}\")\naudio = FFAudioSource(\"{source}\")\nAudioDub(video, audio)\n"
    );
    vec![CompanionFile {
        path: PathBuf::from(path),
        contents,
    }]
}

/// `<name> version <x>` banner parsing shared by ffmpeg-family tools.
pub(crate) fn version_after_keyword(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        words.find(|w| w.eq_ignore_ascii_case("version"))?;
        words.next().map(str::to_string)
    })
}
