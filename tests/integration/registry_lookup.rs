// Engine identifiers and the registry table

use proptest::prelude::*;
use transflow::engine::registry::{EngineId, all_engines, descriptor, resolve};
use transflow::engine::{MediaKind, Purpose};

#[test]
fn test_unknown_identifier_resolves_to_none() {
    assert_eq!(resolve("NOT_A_REAL_ENGINE"), None);
    assert_eq!(resolve("   "), None);
}

#[test]
fn test_historical_identifiers_still_resolve() {
    let cases = [
        ("ffmpegaudiotranscoder", EngineId::FFmpegAudio),
        ("ffmpeg", EngineId::FFmpegVideo),
        ("mencoderwebvideotranscoder", EngineId::MEncoderWebVideo),
        ("VLCWebVideoTranscoder", EngineId::VLCWebVideo),
        ("tsmuxervideo", EngineId::TsMuxeRVideo),
        ("dcrawthumbnailer", EngineId::DCRaw),
        ("yt-dlp", EngineId::YoutubeDl),
    ];
    for (text, expected) in cases {
        assert_eq!(resolve(text), Some(expected), "{text}");
    }
}

#[test]
fn test_display_is_config_key() {
    for id in EngineId::ALL {
        assert_eq!(id.to_string(), id.key());
        assert_eq!(resolve(&id.to_string()), Some(id));
    }
}

#[test]
fn test_table_order_on_this_platform() {
    let ids: Vec<EngineId> = all_engines().iter().map(|e| e.id).collect();
    let mut expected = Vec::new();
    if cfg!(windows) {
        expected.extend([EngineId::AviSynthFFmpeg, EngineId::AviSynthMEncoder]);
    }
    expected.extend([
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
    ]);
    assert_eq!(ids, expected);
}

#[test]
fn test_descriptor_purposes_match_kinds() {
    for engine in all_engines() {
        match engine.purpose {
            Purpose::VideoSimpleFile | Purpose::VideoWebStream => {
                assert_eq!(engine.kind, MediaKind::Video, "{}", engine.id)
            }
            Purpose::AudioSimpleFile | Purpose::AudioWebStream => {
                assert_eq!(engine.kind, MediaKind::Audio, "{}", engine.id)
            }
            Purpose::Misc => {}
        }
    }
}

#[test]
fn test_web_engines_cannot_seek() {
    for engine in all_engines() {
        if matches!(engine.purpose, Purpose::VideoWebStream | Purpose::AudioWebStream) {
            assert!(!engine.time_seekable, "{}", engine.id);
        }
    }
    assert!(descriptor(EngineId::FFmpegVideo).is_some_and(|e| e.time_seekable));
}

fn scramble(key: &str, upper: &[bool], space_at: usize) -> String {
    let mut out: String = key
        .chars()
        .zip(upper.iter().cycle())
        .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
        .collect();
    let at = space_at % (out.len() + 1);
    out.insert(at, ' ');
    out
}

proptest! {
    #[test]
    fn parse_ignores_case_and_spacing(
        index in 0usize..EngineId::ALL.len(),
        upper in prop::collection::vec(any::<bool>(), 1..8),
        space_at in 0usize..32,
    ) {
        let id = EngineId::ALL[index];
        let text = scramble(id.key(), &upper, space_at);
        prop_assert_eq!(EngineId::parse(&text), Some(id));
    }
}
