use tracing::debug;

use crate::config::{Config, TranscodeConfig};
use crate::engine::core::options::OptionTable;
use crate::engine::core::strategy::Invocation;
use crate::engine::core::{MediaInfo, OutputParameters, ResourceDescriptor, format_seconds};
use crate::engine::registry::EngineDescriptor;

/// Host facts and configuration a build depends on.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub config: &'a Config,
    /// Logical CPUs available to backends
    pub available_units: u32,
}

impl<'a> BuildContext<'a> {
    pub fn new(config: &'a Config, available_units: u32) -> Self {
        Self {
            config,
            available_units,
        }
    }
}

/// Thread count to pass explicitly, or `None` to leave the flag out.
///
/// A backend allowed to use every CPU picks that on its own, so the flag is
/// only emitted when the configured count differs or multithreading is off.
pub fn thread_count(transcode: &TranscodeConfig, available_units: u32) -> Option<u32> {
    if transcode.multithreading && transcode.thread_count == available_units {
        None
    } else {
        Some(transcode.thread_count)
    }
}

/// ffmpeg-syntax options coming from the renderer declaration and the request.
fn option_table_for(resource: &ResourceDescriptor, params: &OutputParameters) -> OptionTable {
    let mut table = OptionTable::parse(&params.renderer.custom_ffmpeg_options);
    if resource.is_web_stream() {
        if let Some(header) = params.header.as_deref().filter(|h| !h.trim().is_empty()) {
            table.insert("-headers", Some(header));
        }
    }
    table
}

/// Append a user option string verbatim, honouring shell quoting.
pub fn apply_custom_options(args: &mut Vec<String>, options: &str) {
    let trimmed = options.trim();
    if trimmed.is_empty() {
        return;
    }
    match shlex::split(trimmed) {
        Some(tokens) => args.extend(tokens),
        None => args.extend(trimmed.split_whitespace().map(str::to_string)),
    }
}

/// Assemble the full argument vector (executable first) for one request.
///
/// Sections always appear in this order: global options, seek, input,
/// output shaping with renderer options merged in, configured custom
/// options, and finally the sink.
pub fn build_command(
    engine: &EngineDescriptor,
    resource: &ResourceDescriptor,
    media: &MediaInfo,
    params: &OutputParameters,
    ctx: &BuildContext,
) -> Vec<String> {
    let strategy = engine.strategy;
    let inv = Invocation {
        engine,
        resource,
        media,
        params,
        config: ctx.config,
        threads: thread_count(&ctx.config.transcode, ctx.available_units),
    };

    // Generated flags share one table with renderer options so a renderer
    // value replaces the generated one instead of repeating the flag.
    let merged = strategy.uses_option_table();
    let mut table = OptionTable::new();
    if merged {
        table.append_args(strategy.global_args(&inv));
        table.append_args(strategy.output_args(&inv));
        table.merge(option_table_for(resource, params));
    }

    let mut args = vec![engine.executable(ctx.config).to_string_lossy().into_owned()];

    if !merged {
        args.extend(strategy.global_args(&inv));
    }
    table.transfer_globals(&mut args);
    table.transfer_input_options(&mut args);

    if params.seek_start > 0.0 && engine.time_seekable {
        args.extend(strategy.seek_args(&format_seconds(params.seek_start)));
    }

    args.extend(strategy.input_args(&inv));

    if let Some(threads) = inv.threads {
        args.extend(strategy.thread_args(threads));
    }
    if !merged {
        args.extend(strategy.output_args(&inv));
    }

    table.transfer_all(&mut args);
    apply_custom_options(
        &mut args,
        &ctx.config.programs.get(engine.program).custom_options,
    );

    args.extend(strategy.sink_args(&inv, &inv.sink()));

    debug!(engine = engine.name, command = %format_command(&args), "Built command");
    args
}

/// Shell-quoted rendering of a command for logs and dry runs.
pub fn format_command(args: &[String]) -> String {
    shlex::try_join(args.iter().map(String::as_str)).unwrap_or_else(|_| args.join(" "))
}
