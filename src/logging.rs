//! Tracing subscriber setup shared by the binaries and integration tests.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::errors::{DdlError, Result};

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub console: bool,
    pub file: bool,
    /// Log file; its parent directory receives the daily-rotated files.
    pub file_path: PathBuf,
    pub include_thread_ids: bool,
    pub include_file_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            console: true,
            file: false,
            file_path: PathBuf::from("logs/ddl_engine.log"),
            include_thread_ids: false,
            include_file_line: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn with_file(mut self, file: bool) -> Self {
        self.file = file;
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = path;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.include_thread_ids = enabled;
        self
    }

    /// Build from the `[logging]` config section.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut log = LogConfig::new()
            .with_level(parse_level(&config.level))
            .with_console(config.console);
        if let Some(ref file) = config.file {
            log = log.with_file(true).with_file_path(PathBuf::from(file));
        }
        log
    }
}

pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// flushes the file sink on drop and must outlive the logging calls.
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(config.include_thread_ids)
            .with_file(config.include_file_line)
            .with_line_number(config.include_file_line)
    });

    let (file_layer, guard) = if config.file {
        let dir = config
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = config
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ddl_engine.log".to_string());
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_thread_ids(config.include_thread_ids)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| DdlError::Logging(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}

/// Console-only logging at the level named by `DDL_LOG_LEVEL`, default info.
pub fn init_logging_from_env() -> Result<Option<WorkerGuard>> {
    let level = std::env::var("DDL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_logging(LogConfig::new().with_level(parse_level(&level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_from_config_enables_file_sink() {
        let cfg = LoggingConfig {
            level: "debug".into(),
            format: "text".into(),
            file: Some("/tmp/ddl/ddl.log".into()),
            console: false,
        };
        let log = LogConfig::from_config(&cfg);
        assert_eq!(log.level, Level::DEBUG);
        assert!(log.file);
        assert!(!log.console);
        assert_eq!(log.file_path, PathBuf::from("/tmp/ddl/ddl.log"));
    }
}
