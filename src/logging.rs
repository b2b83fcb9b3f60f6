//! Logging setup
//!
//! Diagnostics go through `tracing` and are written to **stderr**, so stdout
//! stays free and the benchmark report line is not interleaved with sample
//! data. `RUST_LOG` overrides the configured level.
//!
//! # Example
//! ```no_run
//! use iio_writedev::logging::{self, LogFormat, LoggingConfig};
//! use tracing::Level;
//!
//! logging::init(LoggingConfig::new(Level::INFO).with_format(LogFormat::Json))?;
//! tracing::info!(device = "cf-ad9361-dds-core-lpc", "Opened device");
//! # Ok::<(), iio_writedev::WriteDevError>(())
//! ```

use std::io;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Result, WriteDevError};
use crate::settings::LoggingSettings;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human friendly
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = WriteDevError;

    fn from_str(s: &str) -> Result<Self> {
        parse_log_format(s)
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Maximum level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// ANSI colors (pretty format only)
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Config at `level` with the default format.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Config from loaded settings.
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self> {
        Ok(Self {
            level: parse_log_level(&settings.level)?,
            format: parse_log_format(&settings.format)?,
            ..Default::default()
        })
    }

    /// Set output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())`.
pub fn init(config: LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let result = match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_writer(io::stderr)
                .with_ansi(config.ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(io::stderr)
                .with_target(false)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    result.or_else(|e| {
        if e.to_string()
            .contains("a global default trace dispatcher has already been set")
        {
            Ok(())
        } else {
            Err(WriteDevError::invalid_config(format!(
                "Failed to initialize logging: {}",
                e
            )))
        }
    })
}

/// Parse a log level name (case-insensitive).
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(WriteDevError::invalid_config(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(format: &str) -> Result<LogFormat> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(LogFormat::Pretty),
        "compact" => Ok(LogFormat::Compact),
        "json" => Ok(LogFormat::Json),
        _ => Err(WriteDevError::invalid_config(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format("Pretty").unwrap(), LogFormat::Pretty);
        assert!(parse_log_format("xml").is_err());
    }

    #[test]
    fn test_config_from_settings() {
        let config = LoggingConfig::from_settings(&LoggingSettings::default()).unwrap();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Compact);

        let bad = LoggingSettings {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(LoggingConfig::from_settings(&bad).is_err());
    }
}
