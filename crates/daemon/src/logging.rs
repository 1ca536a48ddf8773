//! Tracing subscriber setup.
//!
//! The level filter sits behind a `reload` layer so configuration reloads
//! can change it. Format and output are fixed for the life of the process.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

use gwg_core::config::{LogFormat, LoggingConfig};

/// Handle used to swap the level filter at runtime.
pub type LevelHandle = reload::Handle<EnvFilter, Registry>;

type Base = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// Parse a level directive, falling back to `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// `level_override` (from the command line) wins over the configured level.
/// The returned guard must be kept alive while logging to a file.
pub fn init(
    settings: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<(LevelHandle, Option<WorkerGuard>)> {
    let level = level_override.unwrap_or(&settings.level);
    let (filter, handle) = reload::Layer::new(build_filter(level));

    let (writer, guard) = make_writer(&settings.output)?;
    let fmt_layer: Box<dyn Layer<Base> + Send + Sync> = match settings.format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok((handle, guard))
}

fn make_writer(output: &str) -> Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    match output {
        "stdout" | "" => Ok((BoxMakeWriter::new(std::io::stdout), None)),
        "stderr" => Ok((BoxMakeWriter::new(std::io::stderr), None)),
        path => {
            let path = Path::new(path);
            let Some(file_name) = path.file_name() else {
                bail!("log output '{}' is not a file path", path.display());
            };
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            Ok((BoxMakeWriter::new(writer), Some(guard)))
        }
    }
}

/// Apply a new level from a reloaded configuration.
pub fn set_level(handle: &LevelHandle, level: &str) {
    match handle.reload(build_filter(level)) {
        Ok(()) => info!(level, "log level updated"),
        Err(e) => warn!(error = %e, "failed to update log level"),
    }
}
