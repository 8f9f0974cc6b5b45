// Command construction: request data model, option table, per-backend strategies

mod command;
pub mod dcraw;
pub mod ffmpeg;
mod log;
pub mod mencoder;
pub mod options;
pub mod strategy;
pub mod tsmuxer;
mod types;
pub mod vlc;
pub mod youtube_dl;

pub use command::{BuildContext, apply_custom_options, build_command, format_command, thread_count};
pub use log::init_logging;
pub use options::{OptionScope, OptionTable, normalize_headers};
pub use strategy::{CompanionFile, EngineStrategy, Invocation, Sink};
pub use types::{
    AudioTrack, MediaInfo, MediaKind, OutputParameters, PipeSlot, Purpose, RendererCapabilities,
    ResourceDescriptor, format_seconds,
};
