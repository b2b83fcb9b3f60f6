//! Layered settings using Figment
//!
//! Settings are resolved from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`iio_writedev.toml` in the working directory, or the path
//!    given with `--config`)
//! 3. environment variables prefixed with `IIO_WRITEDEV_`, nested keys split
//!    by `__` (e.g. `IIO_WRITEDEV_STREAM__BUFFER_SIZE=1024`)
//!
//! Command-line arguments are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use iio_writedev::settings::Settings;
//!
//! let settings = Settings::load(None)?;
//! println!("buffer size: {}", settings.stream.buffer_size);
//! # Ok::<(), iio_writedev::WriteDevError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_BUFFER_SIZE, DEFAULT_TRIGGER_FREQUENCY_HZ};
use crate::error::{Result, WriteDevError};
use crate::logging::{parse_log_format, parse_log_level};

/// Settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "iio_writedev.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "IIO_WRITEDEV_";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Streaming loop settings
    pub stream: StreamSettings,
    /// Context connection settings
    pub context: ContextSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Streaming loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Buffer capacity in samples
    pub buffer_size: usize,
    /// Cyclic-mode idle tick in milliseconds
    pub idle_tick_ms: u64,
    /// Rate written to the trigger in Hz
    pub trigger_frequency_hz: i64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_tick_ms: 1000,
            trigger_frequency_hz: DEFAULT_TRIGGER_FREQUENCY_HZ,
        }
    }
}

impl StreamSettings {
    /// Idle tick as a duration.
    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }
}

/// Context connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Context URI (`ip:`, `usb:`, `local:`, `mock:` ...); default context if unset
    pub uri: Option<String>,
    /// Context timeout in milliseconds
    pub timeout_ms: Option<u32>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, a TOML file and the environment.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_SETTINGS_FILE`]
    /// is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(WriteDevError::invalid_config(format!(
                    "Settings file {} not found",
                    path.display()
                )));
            }
            Some(path) => path.to_path_buf(),
            None => Path::new(DEFAULT_SETTINGS_FILE).to_path_buf(),
        };

        let settings: Self = Self::figment(&file).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered provider stack, without validation.
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> Result<()> {
        if self.stream.buffer_size == 0 {
            return Err(WriteDevError::invalid_config(
                "stream.buffer_size must be greater than 0",
            ));
        }

        if self.stream.idle_tick_ms == 0 {
            return Err(WriteDevError::invalid_config(
                "stream.idle_tick_ms must be greater than 0",
            ));
        }

        parse_log_level(&self.logging.level)?;
        parse_log_format(&self.logging.format)?;

        Ok(())
    }
}
