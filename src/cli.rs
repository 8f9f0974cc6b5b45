use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use transflow::engine::MediaKind;

#[derive(Parser)]
#[command(name = "transflow")]
#[command(about = "Pick a transcoding backend, build its command line and run it", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use this config file instead of the default location
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Audio,
    Video,
    Image,
}

impl From<KindArg> for MediaKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Audio => MediaKind::Audio,
            KindArg::Video => MediaKind::Video,
            KindArg::Image => MediaKind::Image,
        }
    }
}

/// Resource and renderer description shared by the request commands.
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// File path or stream URL
    pub locator: String,

    /// Media kind of the resource
    #[arg(long, value_enum, default_value = "video")]
    pub kind: KindArg,

    /// Source container (e.g. mkv, m2ts)
    #[arg(long)]
    pub container: Option<String>,

    /// Source video codec
    #[arg(long)]
    pub vcodec: Option<String>,

    /// Source audio codec
    #[arg(long)]
    pub acodec: Option<String>,

    /// Renderer declared in the config file
    #[arg(long)]
    pub renderer: Option<String>,

    /// Container the renderer wants (overrides the renderer declaration)
    #[arg(long, value_name = "CONTAINER")]
    pub target: Option<String>,

    /// Probed media info as a JSON file
    #[arg(long, value_name = "FILE")]
    pub media: Option<PathBuf>,

    /// Seek start in seconds
    #[arg(long, default_value_t = 0.0)]
    pub seek: f64,

    /// Seek end in seconds
    #[arg(long, default_value_t = 0.0)]
    pub end: f64,

    /// Audio track to map (0-based)
    #[arg(long)]
    pub audio_track: Option<u32>,

    /// HTTP headers forwarded to web-stream backends
    #[arg(long)]
    pub header: Option<String>,

    /// Force an engine by identifier instead of selecting one
    #[arg(long)]
    pub engine: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered engines in precedence order
    Engines {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve an engine identifier (current or historical)
    Resolve {
        /// Identifier to look up
        id: String,
    },

    /// Show which engine would serve a request
    Select {
        #[command(flatten)]
        request: RequestArgs,

        /// List every compatible engine, not just the first
        #[arg(long)]
        all: bool,
    },

    /// Show the backend command for a request without running it
    DryRun {
        #[command(flatten)]
        request: RequestArgs,

        /// Write to this file instead of a pipe
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Probe every backend executable and report availability
    CheckEngines {
        /// Per-probe timeout in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },

    /// Extract an image (or its embedded thumbnail) through a one-shot engine
    Thumbnail {
        /// Raw image file
        file: PathBuf,

        /// Where to write the extracted image
        #[arg(long)]
        out: PathBuf,

        /// Decode the full image instead of the embedded thumbnail
        #[arg(long)]
        full: bool,
    },

    /// Run a transcode and copy the output stream to a file
    Transcode {
        #[command(flatten)]
        request: RequestArgs,

        /// Destination file for the streamed output
        #[arg(long)]
        out: PathBuf,
    },

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}
