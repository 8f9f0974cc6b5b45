use std::path::{Path, PathBuf};

use crate::engine::core::strategy::{
    CompanionFile, EngineStrategy, Invocation, Sink, args, sink_target, version_after_keyword,
};
use crate::engine::core::{MediaInfo, MediaKind, OutputParameters, ResourceDescriptor};

/// Scratch key holding the meta file location.
pub const META_FILE_KEY: &str = "tsmuxer_meta";

const REMUXABLE_CONTAINERS: &[&str] = &["mkv", "mp4", "m4v", "mov", "ts", "m2ts"];

/// tsMuxeR remuxing elementary streams into MPEG-TS without re-encoding.
#[derive(Debug)]
pub struct TsMuxerStrategy {
    audio_only: bool,
}

impl TsMuxerStrategy {
    pub const fn new(audio_only: bool) -> Self {
        Self { audio_only }
    }

    fn video_track(codec: &str) -> Option<&'static str> {
        match codec {
            "h264" | "avc" => Some("V_MPEG4/ISO/AVC"),
            "hevc" | "h265" => Some("V_MPEGH/ISO/HEVC"),
            "vc1" => Some("V_MS/VFW/WVC1"),
            "mpeg2" | "mpeg2video" => Some("V_MPEG-2"),
            _ => None,
        }
    }

    fn audio_track(codec: &str) -> Option<&'static str> {
        match codec {
            "ac3" | "eac3" => Some("A_AC3"),
            "dts" => Some("A_DTS"),
            "aac" => Some("A_AAC"),
            "lpcm" | "pcm" => Some("A_LPCM"),
            _ => None,
        }
    }

    /// Meta file describing which tracks to mux.
    pub fn meta_contents(&self, resource: &ResourceDescriptor) -> String {
        let source = &resource.locator;
        let mut lines = vec!["MUXOPT --no-pcr-on-video-pid --new-audio-pes --vbr --vbv-len=500".to_string()];
        let mut track = 1;
        if !self.audio_only {
            if let Some(v) = resource.video_codec.as_deref().and_then(Self::video_track) {
                lines.push(format!("{v}, \"{source}\", insertSEI, contSPS, track={track}"));
                track += 1;
            }
        }
        if let Some(a) = resource.audio_codec.as_deref().and_then(Self::audio_track) {
            lines.push(format!("{a}, \"{source}\", track={track}"));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

impl EngineStrategy for TsMuxerStrategy {
    fn accepts(&self, resource: &ResourceDescriptor, _media: &MediaInfo) -> bool {
        let audio_ok = resource
            .audio_codec
            .as_deref()
            .is_some_and(|c| Self::audio_track(c).is_some());
        if self.audio_only {
            resource.kind == MediaKind::Audio && audio_ok
        } else {
            resource.kind == MediaKind::Video
                && resource.container_is(REMUXABLE_CONTAINERS)
                && resource
                    .video_codec
                    .as_deref()
                    .is_some_and(|c| Self::video_track(c).is_some())
        }
    }

    fn output_containers(&self) -> &'static [&'static str] {
        &["mpegts"]
    }

    fn seek_args(&self, _seconds: &str) -> Vec<String> {
        Vec::new()
    }

    fn input_args(&self, inv: &Invocation) -> Vec<String> {
        inv.scratch(META_FILE_KEY)
            .map(|path| vec![path.to_string()])
            .unwrap_or_default()
    }

    fn sink_args(&self, _inv: &Invocation, sink: &Sink) -> Vec<String> {
        args([sink_target(sink, "-")])
    }

    fn streams_via_pipe(&self) -> bool {
        true
    }

    fn prepare(&self, params: &mut OutputParameters, temp_dir: &Path) {
        params.scratch.entry(META_FILE_KEY.to_string()).or_insert_with(|| {
            let name = format!("tsmuxer_{}.meta", uuid::Uuid::new_v4().simple());
            temp_dir.join(name).to_string_lossy().into_owned()
        });
    }

    fn companion_files(&self, inv: &Invocation) -> Vec<CompanionFile> {
        match inv.scratch(META_FILE_KEY) {
            Some(path) => vec![CompanionFile {
                path: PathBuf::from(path),
                contents: self.meta_contents(inv.resource),
            }],
            None => Vec::new(),
        }
    }

    fn version_args(&self) -> &'static [&'static str] {
        &[]
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        version_after_keyword(output).map(|v| v.trim_end_matches('.').to_string())
    }
}
