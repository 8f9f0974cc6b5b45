use crate::engine::core::strategy::{EngineStrategy, Invocation, Sink, args, sink_target};
use crate::engine::core::{MediaInfo, MediaKind, ResourceDescriptor};

/// youtube-dl fetching web video and writing the native stream to stdout.
#[derive(Debug)]
pub struct YoutubeDlStrategy;

impl EngineStrategy for YoutubeDlStrategy {
    fn accepts(&self, resource: &ResourceDescriptor, _media: &MediaInfo) -> bool {
        resource.kind == MediaKind::Video
            && matches!(resource.protocol().as_deref(), Some("http" | "https"))
    }

    fn output_containers(&self) -> &'static [&'static str] {
        &["mp4", "webm", "mkv"]
    }

    fn global_args(&self, _inv: &Invocation) -> Vec<String> {
        args(["--quiet", "--no-warnings", "--no-playlist"])
    }

    fn seek_args(&self, _seconds: &str) -> Vec<String> {
        Vec::new()
    }

    fn input_args(&self, inv: &Invocation) -> Vec<String> {
        args([inv.resource.locator.as_str()])
    }

    fn output_args(&self, inv: &Invocation) -> Vec<String> {
        let format = match inv.renderer().container() {
            Some(ext @ ("mp4" | "webm")) => format!("best[ext={ext}]/best"),
            _ => "best".to_string(),
        };
        args(["-f".to_string(), format])
    }

    fn sink_args(&self, _inv: &Invocation, sink: &Sink) -> Vec<String> {
        args(["-o".to_string(), sink_target(sink, "-")])
    }

    fn version_args(&self) -> &'static [&'static str] {
        &["--version"]
    }
}
