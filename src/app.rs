use crate::cli::{Cli, Commands, RequestArgs};
use anyhow::{Context, Result, anyhow, bail};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use transflow::config::Config;
use transflow::engine::availability::{AvailabilityTable, ConfigGate, EngineStatus, check_all};
use transflow::engine::launch::Launcher;
use transflow::engine::matcher::{compatible_engines, select_engine};
use transflow::engine::process::CancelToken;
use transflow::engine::registry::{EngineDescriptor, all_engines, descriptor, resolve};
use transflow::engine::{
    MediaInfo, MediaKind, OutputParameters, RendererCapabilities, ResourceDescriptor,
    format_command, init_logging,
};

pub fn run(cli: Cli) {
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Warning: logging unavailable: {:#}", e);
    }

    let config_path = cli.config;
    let result = match cli.command {
        Commands::Engines { json } => handle_engines(json),
        Commands::Resolve { id } => handle_resolve(&id),
        Commands::Select { request, all } => {
            load_config(config_path.as_deref()).and_then(|c| handle_select(&c, &request, all))
        }
        Commands::DryRun { request, output } => load_config(config_path.as_deref())
            .and_then(|c| handle_dry_run(&c, &request, output)),
        Commands::CheckEngines { timeout_ms } => load_config(config_path.as_deref())
            .and_then(|c| handle_check_engines(&c, Duration::from_millis(timeout_ms))),
        Commands::Thumbnail { file, out, full } => {
            load_config(config_path.as_deref()).and_then(|c| handle_thumbnail(&c, &file, &out, full))
        }
        Commands::Transcode { request, out } => {
            load_config(config_path.as_deref()).and_then(|c| handle_transcode(&c, &request, &out))
        }
        Commands::InitConfig => handle_init_config(config_path.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

// ============================================================================
// Request assembly
// ============================================================================

struct Request {
    resource: ResourceDescriptor,
    media: MediaInfo,
    renderer: RendererCapabilities,
}

fn build_request(config: &Config, args: &RequestArgs) -> Result<Request> {
    let mut resource = ResourceDescriptor::new(&args.locator, args.kind.into())
        .with_codecs(args.vcodec.as_deref(), args.acodec.as_deref());
    if let Some(container) = &args.container {
        resource = resource.with_container(container);
    }

    let media = match &args.media {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read media info: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse media info: {}", path.display()))?
        }
        None => MediaInfo::default(),
    };

    let mut renderer = match &args.renderer {
        Some(name) => config
            .renderer(name)
            .cloned()
            .with_context(|| format!("Renderer '{}' is not declared in the config", name))?,
        None => RendererCapabilities::default(),
    };
    if let Some(target) = &args.target {
        renderer.transcode_container = Some(target.to_ascii_lowercase());
    }

    Ok(Request {
        resource,
        media,
        renderer,
    })
}

fn choose_engine(
    config: &Config,
    args: &RequestArgs,
    request: &Request,
) -> Result<&'static EngineDescriptor> {
    if let Some(text) = &args.engine {
        let id = resolve(text).ok_or_else(|| anyhow!("Unknown engine identifier: {}", text))?;
        return descriptor(id).ok_or_else(|| anyhow!("Engine {} is not registered", id));
    }
    let gate = ConfigGate::new(config);
    select_engine(&request.resource, &request.media, &request.renderer, &gate).ok_or_else(|| {
        anyhow!(
            "No engine can serve {} ({}) for this renderer",
            request.resource.locator,
            request.resource.kind
        )
    })
}

fn output_params(config: &Config, args: &RequestArgs, renderer: RendererCapabilities) -> OutputParameters {
    let mut params = OutputParameters::new(renderer);
    params.seek_start = args.seek;
    params.seek_end = args.end;
    params.audio_track = args.audio_track;
    params.header = args.header.clone();
    params.startup_wait = config.pipes.startup_wait();
    params
}

// ============================================================================
// Handlers
// ============================================================================

fn handle_engines(json: bool) -> Result<()> {
    let engines = all_engines();
    if json {
        let rows: Vec<serde_json::Value> = engines
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id.key(),
                    "name": e.name,
                    "kind": e.kind,
                    "purpose": format!("{:?}", e.purpose),
                    "program": e.program.default_name(),
                    "time_seekable": e.time_seekable,
                    "supported": e.platform.is_current(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for (rank, e) in engines.iter().enumerate() {
        println!(
            "{:>2}. {:<18} {:<26} {:<6} {:<16} {}{}",
            rank + 1,
            e.id.key(),
            e.name,
            e.kind,
            format!("{:?}", e.purpose),
            e.program,
            if e.platform.is_current() { "" } else { " (unsupported here)" }
        );
    }
    Ok(())
}

fn handle_resolve(text: &str) -> Result<()> {
    match resolve(text).and_then(descriptor) {
        Some(engine) => {
            println!("{} -> {} ({})", text, engine.id.key(), engine.name);
            Ok(())
        }
        None => bail!("Unknown engine identifier: {}", text),
    }
}

fn handle_select(config: &Config, args: &RequestArgs, all: bool) -> Result<()> {
    let request = build_request(config, args)?;
    if all {
        let gate = ConfigGate::new(config);
        let engines = compatible_engines(&request.resource, &request.media, &request.renderer, &gate);
        if engines.is_empty() {
            bail!("No engine can serve {}", request.resource.locator);
        }
        for engine in engines {
            println!("{} ({})", engine.id.key(), engine.name);
        }
        return Ok(());
    }
    let engine = choose_engine(config, args, &request)?;
    println!("{} ({})", engine.id.key(), engine.name);
    Ok(())
}

fn handle_dry_run(config: &Config, args: &RequestArgs, output: Option<PathBuf>) -> Result<()> {
    let request = build_request(config, args)?;
    let engine = choose_engine(config, args, &request)?;
    let mut params = output_params(config, args, request.renderer.clone());
    params.output_file = output;

    let launcher = Launcher::new(config);
    let plan = launcher.plan(engine, &request.resource, &request.media, &mut params);

    println!("Engine: {} ({})", engine.id.key(), engine.name);
    println!("{}", format_command(&plan.command));
    for pipe in &plan.pipes {
        println!("Pipe: {}", pipe.path().display());
    }
    for companion in &plan.companions {
        println!("Companion file {}:", companion.path.display());
        print!("{}", companion.contents);
    }
    Ok(())
}

fn handle_check_engines(config: &Config, timeout: Duration) -> Result<()> {
    println!(
        "Backend check at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let table = AvailabilityTable::new();
    let reports = check_all(config, &table, timeout);
    let mut available = 0;
    for report in &reports {
        let status = match &report.status {
            EngineStatus::Available { version } => {
                available += 1;
                format!("ok ({})", version)
            }
            EngineStatus::Unavailable { reason } => format!("unavailable: {}", reason),
            EngineStatus::Disabled => "disabled".to_string(),
            EngineStatus::UnsupportedPlatform => "not supported on this platform".to_string(),
        };
        println!("  {:<18} {}", report.engine.key(), status);
    }
    println!("{} of {} engines available", available, reports.len());
    Ok(())
}

fn handle_thumbnail(config: &Config, file: &Path, out: &Path, full: bool) -> Result<()> {
    let locator = file.to_string_lossy().into_owned();
    let mut resource = ResourceDescriptor::new(&locator, MediaKind::Image);
    if let Some(ext) = file.extension().and_then(|e| e.to_str()) {
        resource = resource.with_container(ext);
    }
    let media = MediaInfo {
        size_bytes: fs::metadata(file).ok().map(|m| m.len()),
        ..Default::default()
    };

    let gate = ConfigGate::new(config);
    let renderer = RendererCapabilities::default();
    let engine = select_engine(&resource, &media, &renderer, &gate)
        .ok_or_else(|| anyhow!("No image engine can read {}", file.display()))?;

    let mut params = OutputParameters::new(renderer);
    params.thumbnail = !full;

    let launcher = Launcher::new(config);
    let bytes = launcher.run_one_shot(engine, &resource, &media, params, &CancelToken::new())?;
    fs::write(out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

fn handle_transcode(config: &Config, args: &RequestArgs, out: &Path) -> Result<()> {
    let request = build_request(config, args)?;
    let engine = choose_engine(config, args, &request)?;
    let params = output_params(config, args, request.renderer.clone());

    let launcher = Launcher::new(config);
    let cancel = CancelToken::new();
    let live = launcher.launch(engine, &request.resource, &request.media, params, &cancel)?;
    println!("Transcoding with {} ({})", engine.id.key(), engine.name);

    let mut reader = live.read_end()?;
    let mut file =
        File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let copied = io::copy(&mut reader, &mut file).context("Failed to copy transcoded stream")?;

    let outcome = live.wait();
    if !outcome.success() {
        bail!(
            "{} ended with {:?}\n{}",
            engine.id,
            outcome.state,
            outcome.lines.join("\n")
        );
    }
    println!("Wrote {} bytes to {}", copied, out.display());
    Ok(())
}

fn handle_init_config(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };
    if path.exists() {
        match Config::load_from(&path) {
            Ok(cfg) => {
                println!("Config loaded successfully from {}", path.display());
                println!("{:#?}", cfg);
            }
            Err(e) => println!("Config at {} is invalid: {:#}", path.display(), e),
        }
        return Ok(());
    }

    println!("Config missing, creating default at {}", path.display());
    Config::default().save_to(&path)
}
