// Engine selection against the full registry

use crate::common::helpers::{audio, renderer, video};
use proptest::prelude::*;
use transflow::config::Config;
use transflow::engine::availability::{AvailabilityTable, ConfigGate, OpenGate};
use transflow::engine::matcher::{compatible_engines, renderer_accepts, select_engine};
use transflow::engine::registry::{EngineId, Program};
use transflow::engine::{MediaInfo, MediaKind, RendererCapabilities, ResourceDescriptor};

#[test]
fn test_web_stream_never_goes_to_file_engines() {
    let resource = video("http://example.com/live.ts");
    let engine = select_engine(&resource, &MediaInfo::default(), &renderer("mpegts"), &OpenGate)
        .expect("web video should be supported");
    assert!(engine.purpose.serves(&resource));
    assert_eq!(engine.id, EngineId::FFmpegWebVideo);
}

#[test]
fn test_unsupported_combination_is_not_found() {
    let resource = ResourceDescriptor::new("/photos/a.png", MediaKind::Image);
    assert!(select_engine(&resource, &MediaInfo::default(), &renderer("mpegps"), &OpenGate).is_none());
}

#[test]
fn test_unavailable_program_falls_through_to_next_engine() {
    let config = Config::default();
    let table = AvailabilityTable::new();
    table.mark_general(Program::Ffmpeg, "not installed");
    let gate = ConfigGate::new(&config).with_availability(&table);

    let resource = audio("/music/a.m2ts").with_codecs(None, Some("ac3"));
    let engine = select_engine(&resource, &MediaInfo::default(), &RendererCapabilities::default(), &gate)
        .expect("tsMuxeR audio remuxes ac3");
    assert_eq!(engine.id, EngineId::TsMuxeRAudio);
}

#[test]
fn test_historical_identifier_disables_engine() {
    let mut config = Config::default();
    config.engines.disabled = vec!["FFmpegAudioTranscoder".to_string()];
    let gate = ConfigGate::new(&config);
    let resource = audio("/music/a.flac");
    let engine = select_engine(&resource, &MediaInfo::default(), &renderer("wav"), &gate);
    assert!(engine.map_or(true, |e| e.id != EngineId::FFmpegAudio));
}

fn arb_resource() -> impl Strategy<Value = ResourceDescriptor> {
    let locators = prop_oneof![
        Just("/media/film.mkv"),
        Just("/media/disc.m2ts"),
        Just("/media/song.flac"),
        Just("/media/photo.nef"),
        Just("http://host/stream"),
        Just("mms://host/radio"),
        Just("rtsp://cam/feed"),
        Just("screen://"),
    ];
    let kinds = prop_oneof![
        Just(MediaKind::Audio),
        Just(MediaKind::Video),
        Just(MediaKind::Image)
    ];
    let containers = prop_oneof![
        Just(None),
        Just(Some("mkv")),
        Just(Some("m2ts")),
        Just(Some("mpegts")),
        Just(Some("flac")),
    ];
    let vcodecs = prop_oneof![Just(None), Just(Some("h264")), Just(Some("mpeg2video"))];
    (locators, kinds, containers, vcodecs).prop_map(|(locator, kind, container, vcodec)| {
        let mut resource = ResourceDescriptor::new(locator, kind).with_codecs(vcodec, Some("ac3"));
        if let Some(container) = container {
            resource = resource.with_container(container);
        }
        resource
    })
}

fn arb_renderer() -> impl Strategy<Value = RendererCapabilities> {
    prop_oneof![
        Just(None),
        Just(Some("mpegps")),
        Just(Some("mpegts")),
        Just(Some("webm")),
        Just(Some("wav")),
        Just(Some("mp3")),
        Just(Some("gif")),
    ]
    .prop_map(|container| RendererCapabilities {
        transcode_container: container.map(str::to_string),
        ..Default::default()
    })
}

proptest! {
    #[test]
    fn selection_is_first_compatible_engine(resource in arb_resource(), renderer in arb_renderer()) {
        let media = MediaInfo::default();
        let compatible = compatible_engines(&resource, &media, &renderer, &OpenGate);
        let selected = select_engine(&resource, &media, &renderer, &OpenGate);

        prop_assert_eq!(selected.map(|e| e.id), compatible.first().map(|e| e.id));
        if let Some(engine) = selected {
            prop_assert_eq!(engine.kind, resource.kind);
            prop_assert!(engine.strategy.accepts(&resource, &media));
            prop_assert!(renderer_accepts(engine, &renderer));
        }
    }

    #[test]
    fn disabling_the_selected_engine_changes_the_choice(resource in arb_resource(), renderer in arb_renderer()) {
        let media = MediaInfo::default();
        if let Some(first) = select_engine(&resource, &media, &renderer, &OpenGate) {
            let mut config = Config::default();
            config.engines.disabled = vec![first.id.key().to_string()];
            let gate = ConfigGate::new(&config);
            let next = select_engine(&resource, &media, &renderer, &gate);
            prop_assert!(next.map_or(true, |e| e.id != first.id));
        }
    }
}
