use crate::engine::core::strategy::{EngineStrategy, Invocation, STREAM_PROTOCOLS, Sink, args, sink_target};
use crate::engine::core::{MediaInfo, MediaKind, ResourceDescriptor, format_seconds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlcVariant {
    Video,
    WebVideo,
    AudioStreaming,
    VideoStreaming,
}

/// VLC driven headless through a `--sout` transcode chain.
#[derive(Debug)]
pub struct VlcStrategy {
    variant: VlcVariant,
}

impl VlcStrategy {
    pub const fn new(variant: VlcVariant) -> Self {
        Self { variant }
    }

    fn video_chain(&self, inv: &Invocation, dst: &str) -> String {
        let renderer = inv.renderer();
        let transcode = &inv.config.transcode;
        let (vcodec, mux) = match renderer.container() {
            Some("mpegts") => match renderer.transcode_video_codec.as_deref() {
                Some("h264") | Some("avc") => ("h264", "ts"),
                _ => ("mp2v", "ts"),
            },
            _ => ("mp2v", "ps"),
        };
        let samplerate = if renderer.force_44k || transcode.force_44k {
            44100
        } else {
            48000
        };

        let mut transcode_opts = vec![
            format!("vcodec={vcodec}"),
            "vb=4096".to_string(),
            "acodec=a52".to_string(),
            format!("ab={}", transcode.audio_bitrate_kbps),
            "channels=2".to_string(),
            format!("samplerate={samplerate}"),
        ];
        if renderer.needs_downscale(inv.media.width, inv.media.height) {
            if let Some(w) = renderer.max_width.filter(|w| *w > 0) {
                transcode_opts.push(format!("maxwidth={w}"));
            }
            if let Some(h) = renderer.max_height.filter(|h| *h > 0) {
                transcode_opts.push(format!("maxheight={h}"));
            }
        }
        if let Some(threads) = inv.threads {
            transcode_opts.push(format!("threads={threads}"));
        }

        format!(
            "#transcode{{{}}}:standard{{access=file,mux={mux},dst={dst}}}",
            transcode_opts.join(",")
        )
    }

    fn audio_chain(&self, inv: &Invocation, dst: &str) -> String {
        let renderer = inv.renderer();
        let transcode = &inv.config.transcode;
        let samplerate = if renderer.force_44k || transcode.force_44k {
            44100
        } else {
            48000
        };
        match renderer.container() {
            Some("mp3") => format!(
                "#transcode{{acodec=mp3,ab={},samplerate={samplerate}}}:standard{{access=file,mux=raw,dst={dst}}}",
                transcode.audio_bitrate_kbps.min(320)
            ),
            _ => format!(
                "#transcode{{acodec=s16l,channels=2,samplerate={samplerate}}}:standard{{access=file,mux=wav,dst={dst}}}"
            ),
        }
    }
}

impl EngineStrategy for VlcStrategy {
    fn accepts(&self, resource: &ResourceDescriptor, _media: &MediaInfo) -> bool {
        let protocol = resource.protocol();
        let streamable = protocol
            .as_deref()
            .is_some_and(|p| STREAM_PROTOCOLS.contains(&p));
        match self.variant {
            VlcVariant::Video => resource.kind == MediaKind::Video && !resource.is_screen_capture(),
            VlcVariant::WebVideo => resource.kind == MediaKind::Video && streamable,
            VlcVariant::AudioStreaming => resource.kind == MediaKind::Audio && streamable,
            VlcVariant::VideoStreaming => {
                resource.kind == MediaKind::Video
                    && matches!(protocol.as_deref(), Some("rtp" | "rtsp" | "udp" | "mms"))
            }
        }
    }

    fn output_containers(&self) -> &'static [&'static str] {
        match self.variant {
            VlcVariant::AudioStreaming => &["mp3", "wav"],
            _ => &["mpegps", "mpegts"],
        }
    }

    fn global_args(&self, _inv: &Invocation) -> Vec<String> {
        args(["-I", "dummy", "--no-repeat", "--no-loop"])
    }

    fn seek_args(&self, seconds: &str) -> Vec<String> {
        vec![format!("--start-time={seconds}")]
    }

    fn input_args(&self, inv: &Invocation) -> Vec<String> {
        args([inv.input_locator()])
    }

    fn output_args(&self, inv: &Invocation) -> Vec<String> {
        let params = inv.params;
        let mut out = Vec::new();
        if let Some(track) = params.audio_track {
            out.push(format!("--audio-track={track}"));
        }
        if params.seek_end > 0.0 && params.seek_end > params.seek_start {
            out.push(format!("--stop-time={}", format_seconds(params.seek_end)));
        }
        out.push("vlc://quit".to_string());
        out
    }

    fn sink_args(&self, inv: &Invocation, sink: &Sink) -> Vec<String> {
        let dst = sink_target(sink, "-");
        let chain = match self.variant {
            VlcVariant::AudioStreaming => self.audio_chain(inv, &dst),
            _ => self.video_chain(inv, &dst),
        };
        args(["--sout".to_string(), chain])
    }

    fn streams_via_pipe(&self) -> bool {
        matches!(self.variant, VlcVariant::Video | VlcVariant::WebVideo)
    }

    fn version_args(&self) -> &'static [&'static str] {
        &["--version"]
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        output
            .lines()
            .find(|line| line.starts_with("VLC"))
            .and_then(|line| {
                line.split_whitespace()
                    .find(|w| w.starts_with(|c: char| c.is_ascii_digit()))
            })
            .map(str::to_string)
    }
}
