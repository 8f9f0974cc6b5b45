// Config files on disk

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use transflow::config::Config;
use transflow::engine::registry::EngineId;

#[test]
fn test_save_and_load_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.programs.vlc.path = Some(PathBuf::from("/usr/bin/cvlc"));
    config.programs.ffmpeg.custom_options = "-metadata 'title=A B'".to_string();
    config.transcode.max_video_bitrate_mbps = 20;
    config.pipes.setup_timeout_ms = 750;
    config.engines.disabled = vec!["vlctranscoder".to_string()];
    config.save_to(&path)?;

    let loaded = Config::load_from(&path)?;
    assert_eq!(loaded.programs.vlc.path, config.programs.vlc.path);
    assert_eq!(loaded.programs.ffmpeg.custom_options, "-metadata 'title=A B'");
    assert_eq!(loaded.transcode.max_video_bitrate_mbps, 20);
    assert_eq!(loaded.pipes.setup_timeout(), Duration::from_millis(750));
    assert!(loaded.engines.is_disabled(EngineId::VLCVideo));
    Ok(())
}

#[test]
fn test_renderer_declarations() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[[renderers]]
name = "LivingRoomTV"
transcode_container = "mpegts"
transcode_video_codec = "h264"
max_width = 1920
max_height = 1080
custom_ffmpeg_options = "-probesize 5M"

[[renderers]]
name = "Kitchen Radio"
transcode_container = "mp3"
force_44k = true
"#,
    )?;

    let config = Config::load_from(&path)?;
    assert_eq!(config.renderers.len(), 2);

    let tv = config.renderer("livingroomtv").expect("case-insensitive lookup");
    assert_eq!(tv.container(), Some("mpegts"));
    assert_eq!(tv.max_width, Some(1920));
    assert_eq!(tv.custom_ffmpeg_options, "-probesize 5M");

    let radio = config.renderer("Kitchen Radio").expect("declared renderer");
    assert!(radio.force_44k);
    assert!(config.renderer("Bedroom").is_none());
    Ok(())
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let err = Config::load_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}

#[test]
fn test_invalid_toml_names_the_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[transcode]\nthread_count = \"many\"\n").unwrap();
    let err = Config::load_from(&path).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Failed to parse config file"));
    assert!(message.contains("broken.toml"));
}

#[test]
fn test_empty_file_gives_defaults() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("config.toml");
    fs::write(&path, "")?;
    let config = Config::load_from(&path)?;
    let defaults = Config::default();
    assert_eq!(config.transcode.thread_count, defaults.transcode.thread_count);
    assert_eq!(config.pipes.reader_timeout(), defaults.pipes.reader_timeout());
    assert!(config.pipes.temp_dir.is_none());
    assert_eq!(config.pipes.dir(), std::env::temp_dir());
    Ok(())
}
