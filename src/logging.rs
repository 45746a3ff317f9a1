use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Initializes console and file logging. `RUST_LOG` overrides the configured
/// level. The returned guard must stay alive until exit so buffered file
/// output is flushed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    let path = Path::new(&config.output_path);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .context("logging.output_path has no file name")?;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("sales_etl={},warn", config.level))
            .with_context(|| format!("invalid log level {:?}", config.level))?,
    };

    let console_layer = fmt::layer().with_writer(std::io::stderr);

    // Exactly one of the two file layers is active.
    let (json_layer, text_layer) = match config.format {
        LogFormat::Json => (
            Some(fmt::layer().json().with_writer(non_blocking_writer)),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking_writer),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(console_layer)
        .try_init()
        .context("global tracing subscriber already set")?;

    Ok(guard)
}
