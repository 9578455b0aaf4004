//! Tracing setup: a persistent activity log plus console output on stderr.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the append-only activity log inside the log directory.
pub const ACTIVITY_LOG: &str = "activity.log";

fn default_filter(verbose: bool) -> &'static str {
    if verbose { "srintake=debug" } else { "srintake=info" }
}

/// Installs the global subscriber. Keep the returned guard alive until exit so
/// buffered log lines reach the file.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(log_dir, ACTIVITY_LOG);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // EnvFilter is not Clone; each layer gets its own.
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter()),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_level() {
        assert_eq!(default_filter(false), "srintake=info");
        assert_eq!(default_filter(true), "srintake=debug");
    }
}
