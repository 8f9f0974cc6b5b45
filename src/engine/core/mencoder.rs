use std::path::Path;

use crate::engine::core::strategy::{
    AVS_SCRIPT_KEY, CompanionFile, EngineStrategy, Invocation, STREAM_PROTOCOLS, Sink, args,
    avisynth_companion, prepare_avisynth, sink_target,
};
use crate::engine::core::{MediaInfo, MediaKind, OutputParameters, ResourceDescriptor, format_seconds};

/// MEncoder producing MPEG-PS/TS for DLNA renderers.
#[derive(Debug)]
pub struct MencoderStrategy {
    web: bool,
    avisynth: bool,
}

impl MencoderStrategy {
    pub const fn file() -> Self {
        Self {
            web: false,
            avisynth: false,
        }
    }

    pub const fn web() -> Self {
        Self {
            web: true,
            avisynth: false,
        }
    }

    pub const fn avisynth() -> Self {
        Self {
            web: false,
            avisynth: true,
        }
    }

    fn lavcopts(inv: &Invocation) -> String {
        let renderer = inv.renderer();
        let vcodec = match renderer.transcode_video_codec.as_deref() {
            Some("h264") | Some("avc") => "libx264",
            Some("mpeg4") => "mpeg4",
            _ => "mpeg2video",
        };
        let mut opts = format!(
            "vcodec={vcodec}:acodec=ac3:abitrate={}",
            inv.config.transcode.audio_bitrate_kbps
        );
        let max_rate = inv.config.transcode.max_video_bitrate_mbps;
        if max_rate > 0 {
            opts.push_str(&format!(":vrc_maxrate={}:vrc_buf_size=1835", max_rate * 1000));
        }
        if let Some(threads) = inv.threads {
            opts.push_str(&format!(":threads={threads}"));
        }
        opts
    }
}

impl EngineStrategy for MencoderStrategy {
    fn accepts(&self, resource: &ResourceDescriptor, _media: &MediaInfo) -> bool {
        if resource.kind != MediaKind::Video || resource.is_screen_capture() {
            return false;
        }
        if self.web {
            resource
                .protocol()
                .is_some_and(|p| STREAM_PROTOCOLS.contains(&p.as_str()) && p != "hls")
        } else {
            // Blu-ray playlists and AVCHD streams confuse the demuxer
            !resource.container_is(&["m2ts", "mpls"])
        }
    }

    fn output_containers(&self) -> &'static [&'static str] {
        &["mpegps", "mpegts"]
    }

    fn global_args(&self, _inv: &Invocation) -> Vec<String> {
        args(["-quiet"])
    }

    fn seek_args(&self, seconds: &str) -> Vec<String> {
        args(["-ss", seconds])
    }

    fn input_args(&self, inv: &Invocation) -> Vec<String> {
        let locator = if self.avisynth {
            inv.scratch(AVS_SCRIPT_KEY)
                .unwrap_or_else(|| inv.input_locator())
        } else {
            inv.input_locator()
        };
        args([locator])
    }

    fn output_args(&self, inv: &Invocation) -> Vec<String> {
        let renderer = inv.renderer();
        let media = inv.media;
        let params = inv.params;
        let mut out = Vec::new();

        if let Some(track) = params.audio_track {
            out.extend(args(["-aid".to_string(), track.to_string()]));
        }

        let mut filters = Vec::new();
        if renderer.needs_downscale(media.width, media.height) {
            let w = renderer.max_width.filter(|w| *w > 0).or(media.width);
            let h = renderer.max_height.filter(|h| *h > 0).or(media.height);
            let w = w.map(|v| v.to_string()).unwrap_or_else(|| "-3".to_string());
            let h = h.map(|v| v.to_string()).unwrap_or_else(|| "-3".to_string());
            filters.push(format!("scale={w}:{h}"));
        }
        if renderer.force_44k || inv.config.transcode.force_44k {
            out.extend(args(["-srate", "44100"]));
        }
        if !filters.is_empty() {
            out.push("-vf".to_string());
            out.push(filters.join(","));
        }

        out.extend(args(["-oac", "lavc", "-ovc", "lavc"]));
        match renderer.container() {
            Some("mpegts") => out.extend(args(["-of", "lavf", "-lavfopts", "format=mpegts"])),
            _ => out.extend(args([
                "-of",
                "mpeg",
                "-mpegopts",
                "format=mpeg2:muxrate=500000:vbuf_size=1194:abuf_size=64",
            ])),
        }
        out.push("-lavcopts".to_string());
        out.push(Self::lavcopts(inv));

        if params.seek_end > 0.0 && params.seek_end > params.seek_start {
            out.push("-endpos".to_string());
            out.push(format_seconds(params.seek_end - params.seek_start));
        }
        out
    }

    fn sink_args(&self, _inv: &Invocation, sink: &Sink) -> Vec<String> {
        args(["-o".to_string(), sink_target(sink, "-")])
    }

    fn streams_via_pipe(&self) -> bool {
        true
    }

    fn prepare(&self, params: &mut OutputParameters, temp_dir: &Path) {
        if self.avisynth {
            prepare_avisynth(params, temp_dir);
        }
    }

    fn companion_files(&self, inv: &Invocation) -> Vec<CompanionFile> {
        if self.avisynth {
            avisynth_companion(inv)
        } else {
            Vec::new()
        }
    }

    fn version_args(&self) -> &'static [&'static str] {
        &["-list-options"]
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        output
            .lines()
            .find(|line| line.starts_with("MEncoder"))
            .and_then(|line| line.split_whitespace().nth(1))
            .map(str::to_string)
    }
}
