use anyhow::{Context, Result};
use tracing::Level;

/// Install the global tracing subscriber.
///
/// Logs go to stderr. With the `dev-logging` feature they are appended to
/// `transflow.log` in the current directory instead.
pub fn init_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    #[cfg(feature = "dev-logging")]
    {
        use std::fs::OpenOptions;
        use std::sync::Mutex;

        let log_path = std::env::current_dir()?.join("transflow.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;
        builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to install log subscriber")?;
    }

    #[cfg(not(feature = "dev-logging"))]
    {
        builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to install log subscriber")?;
    }

    Ok(())
}
