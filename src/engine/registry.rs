//! Static catalog of every backend engine this build knows about.
//!
//! The table order is the selection preference order: the matcher walks it
//! front to back and the first engine able to serve a request wins. Engines
//! that only exist on one platform are filtered out at lookup time.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::engine::core::dcraw::DcrawStrategy;
use crate::engine::core::ffmpeg::{FfmpegStrategy, FfmpegVariant};
use crate::engine::core::mencoder::MencoderStrategy;
use crate::engine::core::strategy::EngineStrategy;
use crate::engine::core::tsmuxer::TsMuxerStrategy;
use crate::engine::core::vlc::{VlcStrategy, VlcVariant};
use crate::engine::core::youtube_dl::YoutubeDlStrategy;
use crate::engine::core::{MediaKind, Purpose};

// ============================================================================
// Identity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineId {
    AviSynthFFmpeg,
    AviSynthMEncoder,
    FFmpegAudio,
    MEncoderVideo,
    FFmpegVideo,
    VLCVideo,
    FFmpegWebVideo,
    MEncoderWebVideo,
    VLCWebVideo,
    TsMuxeRVideo,
    TsMuxeRAudio,
    VLCAudioStreaming,
    VLCVideoStreaming,
    DCRaw,
    YoutubeDl,
}

impl EngineId {
    pub const ALL: [EngineId; 15] = [
        EngineId::AviSynthFFmpeg,
        EngineId::AviSynthMEncoder,
        EngineId::FFmpegAudio,
        EngineId::MEncoderVideo,
        EngineId::FFmpegVideo,
        EngineId::VLCVideo,
        EngineId::FFmpegWebVideo,
        EngineId::MEncoderWebVideo,
        EngineId::VLCWebVideo,
        EngineId::TsMuxeRVideo,
        EngineId::TsMuxeRAudio,
        EngineId::VLCAudioStreaming,
        EngineId::VLCVideoStreaming,
        EngineId::DCRaw,
        EngineId::YoutubeDl,
    ];

    /// Stable identifier used in configuration files
    pub fn key(&self) -> &'static str {
        match self {
            Self::AviSynthFFmpeg => "avsffmpeg",
            Self::AviSynthMEncoder => "avsmencoder",
            Self::FFmpegAudio => "ffmpegaudio",
            Self::MEncoderVideo => "mencoder",
            Self::FFmpegVideo => "ffmpegvideo",
            Self::VLCVideo => "vlcvideo",
            Self::FFmpegWebVideo => "ffmpegwebvideo",
            Self::MEncoderWebVideo => "mencoderwebvideo",
            Self::VLCWebVideo => "vlcwebvideo",
            Self::TsMuxeRVideo => "tsmuxer",
            Self::TsMuxeRAudio => "tsmuxeraudio",
            Self::VLCAudioStreaming => "vlcaudiostreaming",
            Self::VLCVideoStreaming => "vlcvideostreaming",
            Self::DCRaw => "dcraw",
            Self::YoutubeDl => "youtubedl",
        }
    }

    /// Identifiers older configuration files may still carry
    fn historical_keys(&self) -> &'static [&'static str] {
        match self {
            Self::AviSynthFFmpeg => &["avisynthffmpeg", "ffmpegavisynth"],
            Self::AviSynthMEncoder => &["avisynthmencoder", "mencoderavisynth"],
            Self::FFmpegAudio => &["ffmpegaudiotranscoder"],
            Self::MEncoderVideo => &["mencodervideo"],
            Self::FFmpegVideo => &["ffmpeg"],
            Self::VLCVideo => &["vlctranscoder", "vlc"],
            Self::FFmpegWebVideo => &["ffmpegwebvideotranscoder", "ffmpegdvrmsremux"],
            Self::MEncoderWebVideo => &["mencoderwebvideotranscoder"],
            Self::VLCWebVideo => &["vlcwebvideotranscoder", "webvideo"],
            Self::TsMuxeRVideo => &["tsmuxervideo"],
            Self::TsMuxeRAudio => &[],
            Self::VLCAudioStreaming => &["vlcaudio", "audiostreaming"],
            Self::VLCVideoStreaming => &["videostreaming"],
            Self::DCRaw => &["rawthumbs", "dcrawthumbnailer"],
            Self::YoutubeDl => &["youtube-dl", "ytdl", "yt-dlp"],
        }
    }

    /// Parse any current or historical identifier, ignoring case and whitespace.
    pub fn parse(text: &str) -> Option<EngineId> {
        let wanted = normalize_id(text);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|id| {
            normalize_id(id.key()) == wanted
                || normalize_id(&format!("{id:?}")) == wanted
                || id
                    .historical_keys()
                    .iter()
                    .any(|old| normalize_id(old) == wanted)
        })
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn normalize_id(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Executables
// ============================================================================

/// External program family an engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Program {
    Ffmpeg,
    Mencoder,
    Vlc,
    TsMuxer,
    Dcraw,
    YoutubeDl,
}

impl Program {
    /// Executable name looked up on PATH when nothing is configured
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Mencoder => "mencoder",
            Self::Vlc => "vlc",
            Self::TsMuxer => "tsMuxeR",
            Self::Dcraw => "dcraw",
            Self::YoutubeDl => "youtube-dl",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Any,
    Windows,
}

impl Platform {
    pub fn is_current(&self) -> bool {
        match self {
            Platform::Any => true,
            Platform::Windows => cfg!(windows),
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

pub struct EngineDescriptor {
    pub id: EngineId,
    pub name: &'static str,
    pub kind: MediaKind,
    pub purpose: Purpose,
    /// Backend can start output from an arbitrary offset
    pub time_seekable: bool,
    pub program: Program,
    pub platform: Platform,
    pub strategy: &'static dyn EngineStrategy,
}

impl EngineDescriptor {
    /// Executable to run: alternate path override, configured path, or the program name.
    pub fn executable(&self, config: &Config) -> PathBuf {
        config
            .programs
            .get(self.program)
            .resolve(self.program.default_name())
    }
}

impl fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("purpose", &self.purpose)
            .field("time_seekable", &self.time_seekable)
            .field("program", &self.program)
            .field("platform", &self.platform)
            .finish()
    }
}

impl PartialEq for EngineDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

static FFMPEG_VIDEO: FfmpegStrategy = FfmpegStrategy::new(FfmpegVariant::Video);
static FFMPEG_AUDIO: FfmpegStrategy = FfmpegStrategy::new(FfmpegVariant::Audio);
static FFMPEG_WEB: FfmpegStrategy = FfmpegStrategy::new(FfmpegVariant::WebVideo);
static FFMPEG_AVISYNTH: FfmpegStrategy = FfmpegStrategy::new(FfmpegVariant::AviSynth);
static MENCODER_VIDEO: MencoderStrategy = MencoderStrategy::file();
static MENCODER_WEB: MencoderStrategy = MencoderStrategy::web();
static MENCODER_AVISYNTH: MencoderStrategy = MencoderStrategy::avisynth();
static VLC_VIDEO: VlcStrategy = VlcStrategy::new(VlcVariant::Video);
static VLC_WEB: VlcStrategy = VlcStrategy::new(VlcVariant::WebVideo);
static VLC_AUDIO_STREAM: VlcStrategy = VlcStrategy::new(VlcVariant::AudioStreaming);
static VLC_VIDEO_STREAM: VlcStrategy = VlcStrategy::new(VlcVariant::VideoStreaming);
static TSMUXER_VIDEO: TsMuxerStrategy = TsMuxerStrategy::new(false);
static TSMUXER_AUDIO: TsMuxerStrategy = TsMuxerStrategy::new(true);
static DCRAW: DcrawStrategy = DcrawStrategy;
static YOUTUBE_DL: YoutubeDlStrategy = YoutubeDlStrategy;

static ENGINES: [EngineDescriptor; 15] = [
    EngineDescriptor {
        id: EngineId::AviSynthFFmpeg,
        name: "AviSynth/FFmpeg",
        kind: MediaKind::Video,
        purpose: Purpose::VideoSimpleFile,
        time_seekable: true,
        program: Program::Ffmpeg,
        platform: Platform::Windows,
        strategy: &FFMPEG_AVISYNTH,
    },
    EngineDescriptor {
        id: EngineId::AviSynthMEncoder,
        name: "AviSynth/MEncoder",
        kind: MediaKind::Video,
        purpose: Purpose::VideoSimpleFile,
        time_seekable: true,
        program: Program::Mencoder,
        platform: Platform::Windows,
        strategy: &MENCODER_AVISYNTH,
    },
    EngineDescriptor {
        id: EngineId::FFmpegAudio,
        name: "FFmpeg Audio",
        kind: MediaKind::Audio,
        purpose: Purpose::AudioSimpleFile,
        time_seekable: true,
        program: Program::Ffmpeg,
        platform: Platform::Any,
        strategy: &FFMPEG_AUDIO,
    },
    EngineDescriptor {
        id: EngineId::MEncoderVideo,
        name: "MEncoder",
        kind: MediaKind::Video,
        purpose: Purpose::VideoSimpleFile,
        time_seekable: true,
        program: Program::Mencoder,
        platform: Platform::Any,
        strategy: &MENCODER_VIDEO,
    },
    EngineDescriptor {
        id: EngineId::FFmpegVideo,
        name: "FFmpeg",
        kind: MediaKind::Video,
        purpose: Purpose::VideoSimpleFile,
        time_seekable: true,
        program: Program::Ffmpeg,
        platform: Platform::Any,
        strategy: &FFMPEG_VIDEO,
    },
    EngineDescriptor {
        id: EngineId::VLCVideo,
        name: "VLC",
        kind: MediaKind::Video,
        purpose: Purpose::VideoSimpleFile,
        time_seekable: true,
        program: Program::Vlc,
        platform: Platform::Any,
        strategy: &VLC_VIDEO,
    },
    EngineDescriptor {
        id: EngineId::FFmpegWebVideo,
        name: "FFmpeg Web Video",
        kind: MediaKind::Video,
        purpose: Purpose::VideoWebStream,
        time_seekable: false,
        program: Program::Ffmpeg,
        platform: Platform::Any,
        strategy: &FFMPEG_WEB,
    },
    EngineDescriptor {
        id: EngineId::MEncoderWebVideo,
        name: "MEncoder Web Video",
        kind: MediaKind::Video,
        purpose: Purpose::VideoWebStream,
        time_seekable: false,
        program: Program::Mencoder,
        platform: Platform::Any,
        strategy: &MENCODER_WEB,
    },
    EngineDescriptor {
        id: EngineId::VLCWebVideo,
        name: "VLC Web Video",
        kind: MediaKind::Video,
        purpose: Purpose::VideoWebStream,
        time_seekable: false,
        program: Program::Vlc,
        platform: Platform::Any,
        strategy: &VLC_WEB,
    },
    EngineDescriptor {
        id: EngineId::TsMuxeRVideo,
        name: "tsMuxeR",
        kind: MediaKind::Video,
        purpose: Purpose::VideoSimpleFile,
        time_seekable: false,
        program: Program::TsMuxer,
        platform: Platform::Any,
        strategy: &TSMUXER_VIDEO,
    },
    EngineDescriptor {
        id: EngineId::TsMuxeRAudio,
        name: "tsMuxeR Audio",
        kind: MediaKind::Audio,
        purpose: Purpose::AudioSimpleFile,
        time_seekable: false,
        program: Program::TsMuxer,
        platform: Platform::Any,
        strategy: &TSMUXER_AUDIO,
    },
    EngineDescriptor {
        id: EngineId::VLCAudioStreaming,
        name: "VLC Audio Streaming",
        kind: MediaKind::Audio,
        purpose: Purpose::AudioWebStream,
        time_seekable: false,
        program: Program::Vlc,
        platform: Platform::Any,
        strategy: &VLC_AUDIO_STREAM,
    },
    EngineDescriptor {
        id: EngineId::VLCVideoStreaming,
        name: "VLC Video Streaming",
        kind: MediaKind::Video,
        purpose: Purpose::VideoWebStream,
        time_seekable: false,
        program: Program::Vlc,
        platform: Platform::Any,
        strategy: &VLC_VIDEO_STREAM,
    },
    EngineDescriptor {
        id: EngineId::DCRaw,
        name: "DCRaw",
        kind: MediaKind::Image,
        purpose: Purpose::Misc,
        time_seekable: false,
        program: Program::Dcraw,
        platform: Platform::Any,
        strategy: &DCRAW,
    },
    EngineDescriptor {
        id: EngineId::YoutubeDl,
        name: "youtube-dl",
        kind: MediaKind::Video,
        purpose: Purpose::VideoWebStream,
        time_seekable: false,
        program: Program::YoutubeDl,
        platform: Platform::Any,
        strategy: &YOUTUBE_DL,
    },
];

/// Every engine usable on this platform, in preference order.
pub fn all_engines() -> Vec<&'static EngineDescriptor> {
    ENGINES.iter().filter(|e| e.platform.is_current()).collect()
}

/// Descriptor for `id`, if that engine exists on this platform.
pub fn descriptor(id: EngineId) -> Option<&'static EngineDescriptor> {
    ENGINES
        .iter()
        .find(|e| e.id == id && e.platform.is_current())
}

/// Resolve a user- or config-supplied identifier. Unknown input is logged, not fatal.
pub fn resolve(text: &str) -> Option<EngineId> {
    let id = EngineId::parse(text);
    if id.is_none() {
        warn!(identifier = text, "Unknown engine identifier");
    }
    id
}
