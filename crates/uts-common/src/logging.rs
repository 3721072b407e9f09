//! ---
//! uts_section: "01-core-functionality"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Shared primitives and utilities for the simulator runtime."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "UTS_LOG";

// Keeps the non-blocking file writer flushing for the process lifetime.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Console output format of the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global subscriber: a console layer in the configured format
/// plus a daily-rolling JSON file for post-run inspection.
///
/// Filter precedence: `UTS_LOG`, then `RUST_LOG`, then `debug`. Calling
/// this twice is harmless; the second subscriber simply fails to install.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let file_appender =
        tracing_appender::rolling::daily(&config.directory, log_file_name(service_name, config));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(file_guard);

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed(),
    };
    let file_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

fn env_filter() -> EnvFilter {
    if let Ok(directive) = std::env::var(LOG_ENV) {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring invalid {LOG_ENV} directive: {err}"),
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
}

/// The file stem is the configured prefix when set, otherwise the service
/// name; `tracing-appender` suffixes the rolling date itself.
fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    let stem = config.file_prefix.as_deref().unwrap_or(service_name);
    format!("{stem}.log")
}
