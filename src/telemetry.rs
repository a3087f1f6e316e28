use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "hydrate-tracker.log";

/// Keeps the log writer and Sentry client alive; flushes both on drop.
pub struct TelemetryGuard {
    _log_writer: WorkerGuard,
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Logs go to a daily rolling file since stdout belongs to the screen.
pub fn init(config: &Config, log_dir: &Path) -> anyhow::Result<TelemetryGuard> {
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, log_writer) = tracing_appender::non_blocking(appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("Invalid log_level {:?}", config.log_level))?,
    };

    let sentry_guard = match config.sentry_dsn.as_deref() {
        Some(dsn) => {
            let dsn: sentry::types::Dsn = dsn.parse().context("Invalid sentry_dsn")?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(sentry_guard.is_some().then(sentry::integrations::tracing::layer))
        .try_init()
        .context("Unable to install tracing subscriber")?;

    Ok(TelemetryGuard {
        _log_writer: log_writer,
        _sentry: sentry_guard,
    })
}
