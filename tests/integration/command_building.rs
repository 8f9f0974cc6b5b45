// Command construction across engines

use crate::common::assertions::*;
use crate::common::helpers::{TEST_UNITS, audio, build, build_with_media, config_in, renderer, video};
use proptest::prelude::*;
use transflow::engine::registry::EngineId;
use transflow::engine::{AudioTrack, MediaInfo, OutputParameters};

fn params_for(container: &str) -> OutputParameters {
    OutputParameters::new(renderer(container))
}

#[test]
fn test_seek_precedes_input_and_container_follows_renderer() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let mut params = params_for("mpegps");
    params.seek_start = 30.0;

    let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params);

    let ss = position(&args, "-ss");
    assert_eq!(args[ss + 1], "30");
    assert_eq!(args[ss + 2], "-i");
    assert_eq!(args[ss + 3], "/films/a.mkv");
    assert_flag_value(&args, "-f", "vob");
    assert_flag_value(&args, "-c:v", "mpeg2video");
}

#[test]
fn test_mencoder_seek_and_mpeg_output() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let mut params = params_for("mpegps");
    params.seek_start = 30.0;

    let args = build(&config, EngineId::MEncoderVideo, &video("/films/a.avi"), &params);
    let ss = position(&args, "-ss");
    assert_eq!(args[ss + 1], "30");
    assert_eq!(args[ss + 2], "/films/a.avi");
    assert_flag_value(&args, "-of", "mpeg");
}

#[test]
fn test_thread_flag_omitted_when_matching_cpu_count() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params_for("mpegps"));
    assert_args_not_contain(&args, "-threads");
}

#[test]
fn test_thread_flag_present_when_count_differs() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.transcode.thread_count = TEST_UNITS * 2;
    let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params_for("mpegps"));
    assert_flag_value(&args, "-threads", &(TEST_UNITS * 2).to_string());
}

#[test]
fn test_thread_flag_present_when_multithreading_disabled() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.transcode.multithreading = false;
    let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params_for("mpegps"));
    assert_flag_value(&args, "-threads", &TEST_UNITS.to_string());
}

#[test]
fn test_renderer_options_emitted_exactly_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let mut caps = renderer("mpegts");
    caps.custom_ffmpeg_options = "-probesize 5M -y -vf yadif -sn".to_string();
    let params = OutputParameters::new(caps);

    let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params);
    for flag in ["-probesize", "-y", "-vf", "-sn"] {
        assert_occurrences(&args, flag, 1);
    }
    assert_before(&args, "-probesize", "-i");
    assert_before(&args, "-i", "-sn");
}

#[test]
fn test_renderer_filter_extends_downscale() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let mut caps = renderer("mpegts");
    caps.max_width = Some(1280);
    caps.max_height = Some(720);
    caps.custom_ffmpeg_options = "-vf yadif -f matroska".to_string();
    let params = OutputParameters::new(caps);
    let media = MediaInfo {
        width: Some(1920),
        height: Some(1080),
        ..Default::default()
    };

    let args = build_with_media(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &media, &params);
    assert_occurrences(&args, "-vf", 1);
    assert_occurrences(&args, "-f", 1);
    assert_flag_value(
        &args,
        "-vf",
        "scale=w=1280:h=720:force_original_aspect_ratio=decrease,yadif",
    );
    assert_flag_value(&args, "-f", "matroska");
}

#[test]
fn test_audio_track_selection_and_end_time() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let media = MediaInfo {
        audio_tracks: vec![
            AudioTrack {
                id: 0,
                sample_rate: Some(48000),
                ..Default::default()
            },
            AudioTrack {
                id: 1,
                sample_rate: Some(48000),
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    let mut params = params_for("wav");
    params.audio_track = Some(1);
    params.seek_start = 5.0;
    params.seek_end = 20.5;

    let args = build_with_media(&config, EngineId::FFmpegAudio, &audio("/music/live.mka"), &media, &params);
    assert_flag_value(&args, "-map", "0:a:1");
    assert_flag_value(&args, "-t", "15.5");
    assert_args_not_contain(&args, "-ar");
}

#[test]
fn test_seek_ignored_for_engines_without_time_seeking() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let mut params = params_for("mpegts");
    params.seek_start = 30.0;
    let args = build(&config, EngineId::FFmpegWebVideo, &video("http://host/live.ts"), &params);
    assert_args_not_contain(&args, "-ss");
}

#[test]
fn test_headers_forwarded_to_web_streams_before_input() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let mut params = params_for("mpegts");
    params.header = Some("User-Agent: Box/1.0 Cookie: s=1".to_string());
    let args = build(&config, EngineId::FFmpegWebVideo, &video("http://host/live.ts"), &params);
    assert_flag_value(&args, "-headers", "User-Agent: Box/1.0\r\nCookie: s=1\r\n");
    assert_before(&args, "-headers", "-i");
}

#[test]
fn test_max_bitrate_caps_video() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.transcode.max_video_bitrate_mbps = 12;
    let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params_for("mpegts"));
    assert_flag_value(&args, "-maxrate", "12M");
    assert_flag_value(&args, "-bufsize", "24M");
}

#[test]
fn test_program_custom_options_come_last_before_sink() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.programs.ffmpeg.custom_options = "-metadata 'title=Late Show'".to_string();
    let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params_for("mpegts"));
    let n = args.len();
    assert_eq!(args[n - 3], "-metadata");
    assert_eq!(args[n - 2], "title=Late Show");
    assert_eq!(args[n - 1], "pipe:1");
}

#[test]
fn test_dcraw_thumbnail_and_full_decode() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config_in(dir.path());
    let image = transflow::engine::ResourceDescriptor::new("/photos/a.nef", transflow::engine::MediaKind::Image);

    let mut params = OutputParameters::default();
    params.thumbnail = true;
    let args = build(&config, EngineId::DCRaw, &image, &params);
    assert_eq!(&args[1..], ["-e", "-c", "/photos/a.nef"]);

    let args = build(&config, EngineId::DCRaw, &image, &OutputParameters::default());
    assert_args_contain(&args, "-w");
    assert_args_not_contain(&args, "-e");
}

proptest! {
    #[test]
    fn builds_are_deterministic(
        seek in 0u32..7200,
        end_extra in 0u32..600,
        track in proptest::option::of(0u32..3),
        container in prop_oneof![Just("mpegps"), Just("mpegts"), Just("mkv"), Just("mp4")],
        engine in prop_oneof![Just(EngineId::FFmpegVideo), Just(EngineId::MEncoderVideo), Just(EngineId::VLCVideo)],
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_in(dir.path());
        let make = || {
            let mut params = params_for(container);
            params.seek_start = f64::from(seek);
            params.seek_end = if end_extra > 0 { f64::from(seek + end_extra) } else { 0.0 };
            params.audio_track = track;
            params
        };
        let resource = video("/films/a.mkv");
        let first = build(&config, engine, &resource, &make());
        let second = build(&config, engine, &resource, &make());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn seek_flag_present_only_when_seeking(seek in 0u32..100) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_in(dir.path());
        let mut params = params_for("mpegps");
        params.seek_start = f64::from(seek);
        let args = build(&config, EngineId::FFmpegVideo, &video("/films/a.mkv"), &params);
        prop_assert_eq!(args.iter().any(|a| a == "-ss"), seek > 0);
    }
}
