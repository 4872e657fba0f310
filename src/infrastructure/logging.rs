//! Tracing setup: console output plus an optional rolling log file.

use crate::domain::settings::LogSettings;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_SUFFIX: &str = "log";

/// Keep alive for the lifetime of the process; dropping it flushes the file
/// writer.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // RUST_LOG wins over the configured level
    let level_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&level_directives(&settings.level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the sample feed, so console logs go to stderr
    let console_layer = if settings.console_logging_enabled {
        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target)
                .with_ansi(settings.ansi_colors),
        )
    } else {
        None
    };

    let file_layer = if settings.file_logging_enabled {
        let file_appender = RollingFileAppender::builder()
            .rotation(parse_rotation(&settings.rotation))
            .filename_prefix(&settings.file_name_prefix)
            .filename_suffix(LOG_FILE_SUFFIX)
            .build(&settings.log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if settings.file_logging_enabled {
        tracing::info!(
            "Heart rate log: {} ({} rotation)",
            log_file_pattern(settings).display(),
            settings.rotation
        );
    }

    Ok(LoggingGuard { _guards: guards })
}

/// Keep the Bluetooth stack's chatter at warn unless RUST_LOG says otherwise.
fn level_directives(level: &str) -> String {
    format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level)
}

/// Where the rolling appender writes, with the date part as `*`.
fn log_file_pattern(settings: &LogSettings) -> PathBuf {
    let name = if parse_rotation(&settings.rotation) == Rotation::NEVER {
        format!("{}.{}", settings.file_name_prefix, LOG_FILE_SUFFIX)
    } else {
        format!("{}.*.{}", settings.file_name_prefix, LOG_FILE_SUFFIX)
    };
    Path::new(&settings.log_dir).join(name)
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}
