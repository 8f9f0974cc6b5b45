use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::pipe::PipeHandle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Image,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        };
        f.write_str(s)
    }
}

/// What kind of request an engine is meant to serve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Purpose {
    VideoSimpleFile,
    AudioSimpleFile,
    VideoWebStream,
    AudioWebStream,
    Misc,
}

impl Purpose {
    /// Web-stream purposes only serve URLs, simple-file purposes only serve local files.
    pub fn serves(&self, resource: &ResourceDescriptor) -> bool {
        match self {
            Purpose::VideoSimpleFile | Purpose::AudioSimpleFile => !resource.is_web_stream(),
            Purpose::VideoWebStream | Purpose::AudioWebStream => resource.is_web_stream(),
            Purpose::Misc => true,
        }
    }
}

// ============================================================================
// Request inputs
// ============================================================================

/// The media resource a request wants played.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
    /// File path or URL
    pub locator: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_codec: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(locator: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            locator: locator.into(),
            kind,
            container: None,
            video_codec: None,
            audio_codec: None,
        }
    }

    pub fn with_container(mut self, container: &str) -> Self {
        self.container = Some(container.to_ascii_lowercase());
        self
    }

    pub fn with_codecs(mut self, video: Option<&str>, audio: Option<&str>) -> Self {
        self.video_codec = video.map(str::to_ascii_lowercase);
        self.audio_codec = audio.map(str::to_ascii_lowercase);
        self
    }

    /// URL scheme, lowercased, if the locator has one.
    pub fn protocol(&self) -> Option<String> {
        let (scheme, _) = self.locator.split_once("://")?;
        let valid = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
        valid.then(|| scheme.to_ascii_lowercase())
    }

    pub fn is_web_stream(&self) -> bool {
        matches!(self.protocol(), Some(p) if p != "file" && p != "screen")
    }

    pub fn is_screen_capture(&self) -> bool {
        self.protocol().as_deref() == Some("screen")
    }

    pub fn container_is(&self, candidates: &[&str]) -> bool {
        self.container
            .as_deref()
            .is_some_and(|c| candidates.contains(&c))
    }

    pub fn video_codec_is(&self, candidates: &[&str]) -> bool {
        self.video_codec
            .as_deref()
            .is_some_and(|c| candidates.contains(&c))
    }

    pub fn audio_codec_is(&self, candidates: &[&str]) -> bool {
        self.audio_codec
            .as_deref()
            .is_some_and(|c| candidates.contains(&c))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioTrack {
    pub id: u32,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub lang: Option<String>,
}

/// Probed media metadata. Probing happens elsewhere; this is consumed as data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub frame_rate: Option<f64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
    /// Size of the source in bytes (used to size one-shot output buffers)
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

impl MediaInfo {
    pub fn first_audio(&self) -> Option<&AudioTrack> {
        self.audio_tracks.first()
    }
}

/// What a target renderer can consume. Read-only for this crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RendererCapabilities {
    #[serde(default)]
    pub name: String,
    /// Container the renderer wants transcoded output in (mpegps, mpegts, wav, mp3, ...)
    #[serde(default)]
    pub transcode_container: Option<String>,
    #[serde(default)]
    pub transcode_video_codec: Option<String>,
    #[serde(default)]
    pub transcode_audio_codec: Option<String>,
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub max_height: Option<u32>,
    /// Renderer only accepts 44.1 kHz audio
    #[serde(default)]
    pub force_44k: bool,
    /// Extra ffmpeg options declared for this renderer
    #[serde(default)]
    pub custom_ffmpeg_options: String,
}

impl RendererCapabilities {
    pub fn container(&self) -> Option<&str> {
        self.transcode_container.as_deref()
    }

    /// Whether an image or video of the given size has to be scaled down.
    pub fn needs_downscale(&self, width: Option<u32>, height: Option<u32>) -> bool {
        let over = |size: Option<u32>, max: Option<u32>| match (size, max) {
            (Some(s), Some(m)) => m > 0 && s > m,
            _ => false,
        };
        over(width, self.max_width) || over(height, self.max_height)
    }
}

// ============================================================================
// Output parameters
// ============================================================================

/// One stream the backend must produce. The pipe is allocated at launch time.
#[derive(Debug, Default)]
pub struct PipeSlot {
    pub pipe: Option<PipeHandle>,
}

/// Per-request output parameters.
///
/// Not `Clone`: one value is moved into exactly one build+launch sequence.
pub struct OutputParameters {
    /// Seek start in seconds (0 = from the beginning)
    pub seek_start: f64,
    /// Seek end in seconds (0 = until the end)
    pub seek_end: f64,
    /// Consumer-side buffering hint; carried for the stream reader, never read here
    pub min_buffer_size: usize,
    /// Consumer-side buffering hint; carried for the stream reader, never read here
    pub max_buffer_size: usize,
    /// Upper bound on how long launch waits for the backend to be running
    pub startup_wait: Duration,
    /// Consumer-side display flag, passed through untouched
    pub hide_buffering: bool,
    pub pipe_slots: Vec<PipeSlot>,
    pub renderer: RendererCapabilities,
    /// Write to this file instead of streaming
    pub output_file: Option<PathBuf>,
    /// 0-based audio track to map when the source has several
    pub audio_track: Option<u32>,
    /// HTTP header blob forwarded to web-stream backends
    pub header: Option<String>,
    /// One-shot image engines extract the embedded thumbnail instead of decoding
    pub thumbnail: bool,
    /// Initial capacity for buffered stdout capture
    pub output_buffer_hint: Option<usize>,
    /// Backend-specific scratch values (e.g. companion file locations)
    pub scratch: BTreeMap<String, String>,
    stdin: Option<Box<dyn Read + Send>>,
    stdin_fed: bool,
}

impl Default for OutputParameters {
    fn default() -> Self {
        Self {
            seek_start: 0.0,
            seek_end: 0.0,
            min_buffer_size: 1,
            max_buffer_size: 400,
            startup_wait: Duration::from_millis(2000),
            hide_buffering: false,
            pipe_slots: Vec::new(),
            renderer: RendererCapabilities::default(),
            output_file: None,
            audio_track: None,
            header: None,
            thumbnail: false,
            output_buffer_hint: None,
            scratch: BTreeMap::new(),
            stdin: None,
            stdin_fed: false,
        }
    }
}

impl OutputParameters {
    pub fn new(renderer: RendererCapabilities) -> Self {
        Self {
            renderer,
            ..Self::default()
        }
    }

    /// Feed the resource through the backend's stdin.
    pub fn set_stdin(&mut self, source: Box<dyn Read + Send>) {
        self.stdin = Some(source);
        self.stdin_fed = true;
    }

    pub fn take_stdin(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdin.take()
    }

    /// True when the input locator is replaced by the stdin marker.
    pub fn is_stdin_fed(&self) -> bool {
        self.stdin_fed
    }

    /// Write end of the first pipe slot, if one was allocated.
    pub fn pipe_write_end(&self) -> Option<String> {
        self.pipe_slots
            .iter()
            .find_map(|slot| slot.pipe.as_ref())
            .map(|pipe| pipe.write_end())
    }
}

impl fmt::Debug for OutputParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputParameters")
            .field("seek_start", &self.seek_start)
            .field("seek_end", &self.seek_end)
            .field("min_buffer_size", &self.min_buffer_size)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("startup_wait", &self.startup_wait)
            .field("hide_buffering", &self.hide_buffering)
            .field("pipe_slots", &self.pipe_slots)
            .field("renderer", &self.renderer.name)
            .field("output_file", &self.output_file)
            .field("audio_track", &self.audio_track)
            .field("thumbnail", &self.thumbnail)
            .field("stdin_fed", &self.stdin_fed)
            .finish_non_exhaustive()
    }
}

/// Format seconds the way backends expect them: integral values without a fraction.
pub fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 {
        format!("{}", seconds as i64)
    } else {
        let s = format!("{:.3}", seconds);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
