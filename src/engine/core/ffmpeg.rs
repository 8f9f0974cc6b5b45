use std::path::Path;

use crate::engine::core::strategy::{
    AVS_SCRIPT_KEY, CompanionFile, EngineStrategy, Invocation, STREAM_PROTOCOLS, Sink, args,
    avisynth_companion, prepare_avisynth, sink_target, version_after_keyword,
};
use crate::engine::core::{
    MediaInfo, MediaKind, OutputParameters, RendererCapabilities, ResourceDescriptor,
    format_seconds,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegVariant {
    Video,
    Audio,
    WebVideo,
    /// Reads the source through a generated AviSynth script (Windows)
    AviSynth,
}

#[derive(Debug)]
pub struct FfmpegStrategy {
    variant: FfmpegVariant,
}

/// Muxer and default encoders for a renderer's target container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerTarget {
    pub muxer: &'static str,
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub extra: &'static [&'static str],
}

pub fn container_target(container: Option<&str>) -> ContainerTarget {
    match container {
        Some("mpegts") => ContainerTarget {
            muxer: "mpegts",
            video_codec: "mpeg2video",
            audio_codec: "ac3",
            extra: &[],
        },
        Some("mkv") => ContainerTarget {
            muxer: "matroska",
            video_codec: "libx264",
            audio_codec: "aac",
            extra: &[],
        },
        Some("webm") => ContainerTarget {
            muxer: "webm",
            video_codec: "libvpx-vp9",
            audio_codec: "libopus",
            extra: &[],
        },
        Some("mp4") => ContainerTarget {
            muxer: "mp4",
            video_codec: "libx264",
            audio_codec: "aac",
            // Streamable mp4 without seeking back to write the moov atom
            extra: &["-movflags", "frag_keyframe+empty_moov"],
        },
        _ => ContainerTarget {
            muxer: "vob",
            video_codec: "mpeg2video",
            audio_codec: "ac3",
            extra: &[],
        },
    }
}

/// Map a renderer codec name to the ffmpeg encoder that produces it.
pub fn video_encoder(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "h264" | "avc" => "libx264".to_string(),
        "hevc" | "h265" => "libx265".to_string(),
        "mpeg2" | "mpeg2video" => "mpeg2video".to_string(),
        "vp9" => "libvpx-vp9".to_string(),
        "av1" => "libsvtav1".to_string(),
        other => other.to_string(),
    }
}

pub fn audio_encoder(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "mp3" => "libmp3lame".to_string(),
        "opus" => "libopus".to_string(),
        "vorbis" => "libvorbis".to_string(),
        "lpcm" | "pcm" => "pcm_s16be".to_string(),
        other => other.to_string(),
    }
}

fn screen_grabber() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("gdigrab", "desktop")
    } else if cfg!(target_os = "macos") {
        ("avfoundation", "1:none")
    } else {
        ("x11grab", ":0.0")
    }
}

impl FfmpegStrategy {
    pub const fn new(variant: FfmpegVariant) -> Self {
        Self { variant }
    }

    fn wants_44k(inv: &Invocation) -> bool {
        inv.renderer().force_44k || inv.config.transcode.force_44k
    }

    fn end_time_args(inv: &Invocation, out: &mut Vec<String>) {
        let params = inv.params;
        if params.seek_end > 0.0 && params.seek_end > params.seek_start {
            out.push("-t".to_string());
            out.push(format_seconds(params.seek_end - params.seek_start));
        }
    }

    fn audio_output(&self, inv: &Invocation) -> Vec<String> {
        let transcode = &inv.config.transcode;
        let mut out = Vec::new();

        if let Some(track) = inv.params.audio_track {
            out.extend(args(["-map".to_string(), format!("0:a:{track}")]));
        }
        out.push("-vn".to_string());

        if Self::wants_44k(inv) {
            out.extend(args(["-ar", "44100"]));
        } else if transcode.resample_audio {
            let source_rate = inv.media.first_audio().and_then(|a| a.sample_rate);
            if !matches!(source_rate, Some(44100) | Some(48000)) {
                out.extend(args(["-ar", "48000"]));
            }
        }

        Self::end_time_args(inv, &mut out);

        match inv.renderer().container() {
            Some("wav") => out.extend(args(["-c:a", "pcm_s16le", "-f", "wav"])),
            Some("mp3") => {
                let bitrate = transcode.audio_bitrate_kbps.min(320);
                out.extend(args([
                    "-c:a".to_string(),
                    "libmp3lame".to_string(),
                    "-b:a".to_string(),
                    format!("{bitrate}k"),
                    "-f".to_string(),
                    "mp3".to_string(),
                ]));
            }
            Some("flac") => out.extend(args(["-c:a", "flac", "-f", "flac"])),
            _ => out.extend(args(["-c:a", "pcm_s16be", "-f", "s16be"])),
        }
        out
    }

    fn video_output(&self, inv: &Invocation) -> Vec<String> {
        let renderer = inv.renderer();
        let media = inv.media;
        let transcode = &inv.config.transcode;
        let screen = inv.resource.is_screen_capture();
        let mut out = Vec::new();

        if !screen && (inv.params.audio_track.is_some() || media.audio_tracks.len() > 1) {
            let track = inv.params.audio_track.unwrap_or(0);
            out.extend(args([
                "-map".to_string(),
                "0:v:0".to_string(),
                "-map".to_string(),
                format!("0:a:{track}"),
            ]));
        }

        if renderer.needs_downscale(media.width, media.height) {
            let dim = |max: Option<u32>, actual: Option<u32>| {
                max.filter(|m| *m > 0)
                    .or(actual)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-2".to_string())
            };
            let w = dim(renderer.max_width, media.width);
            let h = dim(renderer.max_height, media.height);
            out.push("-vf".to_string());
            out.push(format!(
                "scale=w={w}:h={h}:force_original_aspect_ratio=decrease"
            ));
        }

        let target = container_target(renderer.container());
        let vcodec = renderer
            .transcode_video_codec
            .as_deref()
            .map(video_encoder)
            .unwrap_or_else(|| target.video_codec.to_string());
        out.extend(args(["-c:v".to_string(), vcodec]));

        if transcode.max_video_bitrate_mbps > 0 {
            let rate = transcode.max_video_bitrate_mbps;
            out.extend(args([
                "-maxrate".to_string(),
                format!("{rate}M"),
                "-bufsize".to_string(),
                format!("{}M", rate * 2),
            ]));
        }

        if screen {
            out.push("-an".to_string());
        } else {
            let acodec = renderer
                .transcode_audio_codec
                .as_deref()
                .map(audio_encoder)
                .unwrap_or_else(|| target.audio_codec.to_string());
            out.extend(args([
                "-c:a".to_string(),
                acodec,
                "-b:a".to_string(),
                format!("{}k", transcode.audio_bitrate_kbps),
            ]));
            if Self::wants_44k(inv) {
                out.extend(args(["-ar", "44100"]));
            }
        }

        Self::end_time_args(inv, &mut out);

        out.extend(args(target.extra.iter().copied()));
        out.extend(args(["-f", target.muxer]));
        out
    }
}

impl EngineStrategy for FfmpegStrategy {
    fn accepts(&self, resource: &ResourceDescriptor, _media: &MediaInfo) -> bool {
        match self.variant {
            FfmpegVariant::Audio => resource.kind == MediaKind::Audio,
            FfmpegVariant::Video => resource.kind == MediaKind::Video,
            FfmpegVariant::WebVideo => {
                resource.kind == MediaKind::Video
                    && resource
                        .protocol()
                        .is_some_and(|p| STREAM_PROTOCOLS.contains(&p.as_str()))
            }
            FfmpegVariant::AviSynth => {
                resource.kind == MediaKind::Video && !resource.is_screen_capture()
            }
        }
    }

    fn output_containers(&self) -> &'static [&'static str] {
        match self.variant {
            FfmpegVariant::Audio => &["wav", "mp3", "lpcm", "flac"],
            _ => &["mpegps", "mpegts", "mkv", "webm", "mp4"],
        }
    }

    fn required_features(
        &self,
        _resource: &ResourceDescriptor,
        renderer: &RendererCapabilities,
    ) -> Vec<String> {
        if self.variant == FfmpegVariant::Audio {
            return match renderer.container() {
                Some("mp3") => vec!["libmp3lame".to_string()],
                _ => Vec::new(),
            };
        }
        let target = container_target(renderer.container());
        let video = renderer
            .transcode_video_codec
            .as_deref()
            .map(video_encoder)
            .unwrap_or_else(|| target.video_codec.to_string());
        let audio = renderer
            .transcode_audio_codec
            .as_deref()
            .map(audio_encoder)
            .unwrap_or_else(|| target.audio_codec.to_string());
        vec![video, audio]
    }

    fn uses_option_table(&self) -> bool {
        true
    }

    fn global_args(&self, inv: &Invocation) -> Vec<String> {
        args([
            "-y".to_string(),
            "-loglevel".to_string(),
            inv.config.transcode.loglevel.clone(),
        ])
    }

    fn seek_args(&self, seconds: &str) -> Vec<String> {
        args(["-ss", seconds])
    }

    fn input_args(&self, inv: &Invocation) -> Vec<String> {
        if inv.resource.is_screen_capture() {
            let (grabber, display) = screen_grabber();
            let width = inv.media.width.unwrap_or(1920);
            let height = inv.media.height.unwrap_or(1080);
            let rate = inv.media.frame_rate.unwrap_or(25.0);
            return args([
                "-f".to_string(),
                grabber.to_string(),
                "-framerate".to_string(),
                format_seconds(rate),
                "-video_size".to_string(),
                format!("{width}x{height}"),
                "-i".to_string(),
                display.to_string(),
            ]);
        }

        let locator = match self.variant {
            FfmpegVariant::AviSynth => inv
                .scratch(AVS_SCRIPT_KEY)
                .unwrap_or_else(|| inv.input_locator())
                .to_string(),
            // ffmpeg only speaks MMS over HTTP
            FfmpegVariant::WebVideo if inv.resource.locator.starts_with("mms://") => {
                inv.resource.locator.replacen("mms://", "mmsh://", 1)
            }
            _ => inv.input_locator().to_string(),
        };
        args(["-i".to_string(), locator])
    }

    fn thread_args(&self, threads: u32) -> Vec<String> {
        args(["-threads".to_string(), threads.to_string()])
    }

    fn output_args(&self, inv: &Invocation) -> Vec<String> {
        match self.variant {
            FfmpegVariant::Audio => self.audio_output(inv),
            _ => self.video_output(inv),
        }
    }

    fn sink_args(&self, _inv: &Invocation, sink: &Sink) -> Vec<String> {
        vec![sink_target(sink, "pipe:1")]
    }

    fn streams_via_pipe(&self) -> bool {
        self.variant == FfmpegVariant::WebVideo
    }

    fn prepare(&self, params: &mut OutputParameters, temp_dir: &Path) {
        if self.variant == FfmpegVariant::AviSynth {
            prepare_avisynth(params, temp_dir);
        }
    }

    fn companion_files(&self, inv: &Invocation) -> Vec<CompanionFile> {
        match self.variant {
            FfmpegVariant::AviSynth => avisynth_companion(inv),
            _ => Vec::new(),
        }
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        version_after_keyword(output)
    }
}
