use tracing::{
    level_filters::ParseLevelFilterError,
    subscriber::{SetGlobalDefaultError, set_global_default},
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::format::FmtSpan,
    layer::SubscriberExt,
};

use crate::settings::LoggingSettings;

/// Keeps the log writers flushing until dropped.
pub struct LoggerGuards {
    _stdout: WorkerGuard,
    _file: WorkerGuard,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Invalid log level:\n{0}")]
    Level(#[from] ParseLevelFilterError),

    #[error("Failed to create the log file appender:\n{0}")]
    FileAppender(#[from] InitError),

    #[error("Failed to set the global logger:\n{0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

pub fn setup_logger(settings: &LoggingSettings) -> Result<LoggerGuards, LoggerError> {
    let level = parse_level(&settings.level)?;

    let filter = Targets::new()
        .with_default(level)
        .with_target("vulkan::memory", level.min(LevelFilter::DEBUG));

    // stdout logger
    let (std_writer, std_guard) = tracing_appender::non_blocking(std::io::stdout());
    let std_logger = tracing_subscriber::fmt::layer()
        .with_writer(std_writer)
        .with_ansi(false)
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE);

    // File logger
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("thermesh")
        .filename_suffix("log")
        .build(&settings.directory)?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let file_logger = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false);

    // Register loggers
    let collector = tracing_subscriber::registry()
        .with(std_logger)
        .with(file_logger)
        .with(filter);

    set_global_default(collector)?;

    Ok(LoggerGuards {
        _stdout: std_guard,
        _file: file_guard,
    })
}

/// Parses a level name such as `debug` or `off`, ignoring case.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggerError> {
    Ok(level.trim().parse()?)
}
