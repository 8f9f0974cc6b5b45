//! Engine selection: the first registered engine that can read the resource,
//! produce something the renderer consumes, and is permitted by the gate.

use tracing::{debug, trace};

use crate::engine::availability::EngineGate;
use crate::engine::core::{MediaInfo, RendererCapabilities, ResourceDescriptor};
use crate::engine::registry::{EngineDescriptor, all_engines};

/// Why an engine was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Platform,
    MediaKind,
    Purpose,
    Format,
    Renderer,
    Gate,
}

/// Check one engine against a request. `Ok` means it can serve it.
pub fn evaluate(
    engine: &EngineDescriptor,
    resource: &ResourceDescriptor,
    media: &MediaInfo,
    renderer: &RendererCapabilities,
    gate: &dyn EngineGate,
) -> Result<(), Rejection> {
    if !engine.platform.is_current() {
        return Err(Rejection::Platform);
    }
    if engine.kind != resource.kind {
        return Err(Rejection::MediaKind);
    }
    if !engine.purpose.serves(resource) {
        return Err(Rejection::Purpose);
    }
    if !engine.strategy.accepts(resource, media) {
        return Err(Rejection::Format);
    }
    if !renderer_accepts(engine, renderer) {
        return Err(Rejection::Renderer);
    }
    let features = engine.strategy.required_features(resource, renderer);
    if !gate.permits(engine, &features) {
        return Err(Rejection::Gate);
    }
    Ok(())
}

/// Whether the renderer can consume what the engine produces.
pub fn renderer_accepts(engine: &EngineDescriptor, renderer: &RendererCapabilities) -> bool {
    match renderer.container() {
        None => true,
        Some(container) => engine
            .strategy
            .output_containers()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(container)),
    }
}

/// Engines from `engines`, in order, that can serve the request.
pub fn compatible_from(
    engines: &[&'static EngineDescriptor],
    resource: &ResourceDescriptor,
    media: &MediaInfo,
    renderer: &RendererCapabilities,
    gate: &dyn EngineGate,
) -> Vec<&'static EngineDescriptor> {
    engines
        .iter()
        .copied()
        .filter(|engine| match evaluate(engine, resource, media, renderer, gate) {
            Ok(()) => true,
            Err(rejection) => {
                trace!(engine = %engine.id, ?rejection, locator = %resource.locator, "Engine rejected");
                false
            }
        })
        .collect()
}

pub fn compatible_engines(
    resource: &ResourceDescriptor,
    media: &MediaInfo,
    renderer: &RendererCapabilities,
    gate: &dyn EngineGate,
) -> Vec<&'static EngineDescriptor> {
    compatible_from(&all_engines(), resource, media, renderer, gate)
}

/// First engine in `engines` able to serve the request, or `None` when the
/// combination is unsupported.
pub fn select_from(
    engines: &[&'static EngineDescriptor],
    resource: &ResourceDescriptor,
    media: &MediaInfo,
    renderer: &RendererCapabilities,
    gate: &dyn EngineGate,
) -> Option<&'static EngineDescriptor> {
    let selected = engines
        .iter()
        .copied()
        .find(|engine| evaluate(engine, resource, media, renderer, gate).is_ok());
    match selected {
        Some(engine) => debug!(engine = %engine.id, locator = %resource.locator, "Selected engine"),
        None => debug!(locator = %resource.locator, kind = %resource.kind, "No engine can serve resource"),
    }
    selected
}

/// Select from the full registry in precedence order.
pub fn select_engine(
    resource: &ResourceDescriptor,
    media: &MediaInfo,
    renderer: &RendererCapabilities,
    gate: &dyn EngineGate,
) -> Option<&'static EngineDescriptor> {
    select_from(&all_engines(), resource, media, renderer, gate)
}
