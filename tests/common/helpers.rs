#![allow(dead_code)]

use std::path::Path;
use transflow::config::Config;
use transflow::engine::registry::{EngineId, descriptor};
use transflow::engine::{
    BuildContext, MediaInfo, MediaKind, OutputParameters, RendererCapabilities,
    ResourceDescriptor, build_command,
};

/// CPU count used for every test build so the thread rule is predictable
pub const TEST_UNITS: u32 = 4;

/// Config with pipes and companion files under `dir`
pub fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.pipes.temp_dir = Some(dir.to_path_buf());
    config.transcode.thread_count = TEST_UNITS;
    config
}

pub fn renderer(container: &str) -> RendererCapabilities {
    RendererCapabilities {
        name: format!("{}-renderer", container),
        transcode_container: Some(container.to_string()),
        ..Default::default()
    }
}

pub fn video(locator: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(locator, MediaKind::Video)
}

pub fn audio(locator: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(locator, MediaKind::Audio)
}

/// Build a command for `id` with default media info
pub fn build(
    config: &Config,
    id: EngineId,
    resource: &ResourceDescriptor,
    params: &OutputParameters,
) -> Vec<String> {
    build_with_media(config, id, resource, &MediaInfo::default(), params)
}

pub fn build_with_media(
    config: &Config,
    id: EngineId,
    resource: &ResourceDescriptor,
    media: &MediaInfo,
    params: &OutputParameters,
) -> Vec<String> {
    let engine = descriptor(id).unwrap_or_else(|| panic!("{} not registered here", id));
    build_command(
        engine,
        resource,
        media,
        params,
        &BuildContext::new(config, TEST_UNITS),
    )
}

#[cfg(unix)]
pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}
