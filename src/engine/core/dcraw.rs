use crate::engine::core::strategy::{
    DEFAULT_OUTPUT_BUFFER, EngineStrategy, Invocation, Sink, args, capped_buffer,
};
use crate::engine::core::{MediaInfo, MediaKind, OutputParameters, ResourceDescriptor};

/// Scratch flag asking for a half-size decode.
pub const HALF_SIZE_KEY: &str = "dcraw_half_size";

/// Buffer for an embedded thumbnail.
pub const THUMBNAIL_BUFFER: usize = 150_000;

/// Fallback buffer for a half-size decode of unknown size.
pub const HALF_SIZE_BUFFER: usize = 500_000;

const RAW_EXTENSIONS: &[&str] = &[
    "3fr", "arw", "cr2", "cr3", "crw", "dcr", "dng", "erf", "kdc", "mef", "mos", "mrw", "nef",
    "nrw", "orf", "pef", "raf", "raw", "rw2", "sr2", "srf", "x3f",
];

/// dcraw decoding camera raw files to stdout in one shot.
#[derive(Debug)]
pub struct DcrawStrategy;

fn is_raw(resource: &ResourceDescriptor) -> bool {
    if resource.container_is(RAW_EXTENSIONS) {
        return true;
    }
    std::path::Path::new(&resource.locator)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| RAW_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl EngineStrategy for DcrawStrategy {
    fn accepts(&self, resource: &ResourceDescriptor, _media: &MediaInfo) -> bool {
        resource.kind == MediaKind::Image && !resource.is_web_stream() && is_raw(resource)
    }

    fn output_containers(&self) -> &'static [&'static str] {
        &["ppm", "jpeg"]
    }

    fn global_args(&self, inv: &Invocation) -> Vec<String> {
        if inv.params.thumbnail {
            return args(["-e", "-c"]);
        }
        let mut out = args(["-c", "-M", "-w"]);
        let half = inv.scratch(HALF_SIZE_KEY).is_some()
            || inv
                .renderer()
                .needs_downscale(inv.media.width, inv.media.height);
        if half {
            out.push("-h".to_string());
        }
        out
    }

    fn seek_args(&self, _seconds: &str) -> Vec<String> {
        Vec::new()
    }

    fn input_args(&self, inv: &Invocation) -> Vec<String> {
        args([inv.resource.locator.as_str()])
    }

    // dcraw always writes to stdout with -c
    fn sink_args(&self, _inv: &Invocation, _sink: &Sink) -> Vec<String> {
        Vec::new()
    }

    fn one_shot(&self) -> bool {
        true
    }

    fn output_buffer_hint(&self, params: &OutputParameters, media: &MediaInfo) -> usize {
        if params.thumbnail {
            THUMBNAIL_BUFFER
        } else if params.scratch.contains_key(HALF_SIZE_KEY) {
            media
                .size_bytes
                .map(|size| capped_buffer(size / 4))
                .unwrap_or(HALF_SIZE_BUFFER)
        } else {
            media
                .size_bytes
                .map(capped_buffer)
                .unwrap_or(DEFAULT_OUTPUT_BUFFER)
        }
    }

    /// Files without an embedded thumbnail get a half-size decode instead.
    fn retry_after_empty_output(&self, params: &mut OutputParameters, _media: &MediaInfo) -> bool {
        if !params.thumbnail {
            return false;
        }
        params.thumbnail = false;
        params
            .scratch
            .insert(HALF_SIZE_KEY.to_string(), "1".to_string());
        params.output_buffer_hint = None;
        true
    }

    fn version_args(&self) -> &'static [&'static str] {
        &[]
    }

    fn parse_version(&self, output: &str) -> Option<String> {
        let marker = "decoder \"dcraw\"";
        let at = output.find(marker)?;
        output[at + marker.len()..]
            .split_whitespace()
            .next()
            .map(str::to_string)
    }
}
