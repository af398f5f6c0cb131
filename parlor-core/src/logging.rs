use std::io;
use std::sync::Arc;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Installs the global tracing subscriber.
///
/// The level comes from `RUST_LOG` when set, otherwise from the config.
/// Output is pretty for development or JSON for production, appended to a
/// log file when one is configured and written to stdout otherwise.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = configured_level(config.level.as_str())?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let base = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "json" => base
            .with(fmt::layer().json().with_writer(log_writer(config)?))
            .init(),
        _ => base
            .with(fmt::layer().pretty().with_writer(log_writer(config)?))
            .init(),
    }

    Ok(())
}

fn configured_level(level: &str) -> anyhow::Result<Level> {
    level
        .parse()
        .with_context(|| format!("unrecognized log level {level:?}"))
}

fn log_writer(config: &LoggingConfig) -> anyhow::Result<BoxMakeWriter> {
    let Some(path) = &config.file_path else {
        return Ok(BoxMakeWriter::new(io::stdout));
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {path:?}"))?;
    Ok(BoxMakeWriter::new(Arc::new(file)))
}
