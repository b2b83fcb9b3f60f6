//! Write session configuration.
//!
//! [`StreamConfig`] is the validated, fully resolved description of one run:
//! which device to open, which channels to enable, how large the buffer is
//! and how the streaming loop behaves. It is built from CLI arguments layered
//! over [`crate::settings::Settings`].
//!
//! # Example
//!
//! ```
//! use iio_writedev::StreamConfig;
//!
//! let config = StreamConfig::builder()
//!     .device("cf-ad9361-dds-core-lpc")
//!     .channels(["voltage0", "voltage1"])
//!     .buffer_size(1024)
//!     .samples(4096)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.channels.len(), 2);
//! ```

use std::time::Duration;

use crate::error::{Result, WriteDevError};

/// Default buffer capacity in samples.
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Default trigger rate in Hz.
pub const DEFAULT_TRIGGER_FREQUENCY_HZ: i64 = 100;

/// Default cyclic-mode idle tick.
pub const DEFAULT_IDLE_TICK: Duration = Duration::from_secs(1);

/// Configuration for one write session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Target device name or id
    pub device: String,
    /// Channel names or ids to enable (empty = every output channel)
    pub channels: Vec<String>,
    /// Trigger device to bind, if any
    pub trigger: Option<String>,
    /// Buffer capacity in samples
    pub buffer_size: usize,
    /// Sample budget (0 = unbounded)
    pub samples: u64,
    /// Open the buffer in cyclic mode
    pub cyclic: bool,
    /// Report throughput every few pushes
    pub benchmark: bool,
    /// Cyclic-mode idle tick
    pub idle_tick: Duration,
    /// Rate written to the trigger
    pub trigger_frequency_hz: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            channels: Vec::new(),
            trigger: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            samples: 0,
            cyclic: false,
            benchmark: false,
            idle_tick: DEFAULT_IDLE_TICK,
            trigger_frequency_hz: DEFAULT_TRIGGER_FREQUENCY_HZ,
        }
    }
}

impl StreamConfig {
    /// Create a new builder for a stream configuration.
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(WriteDevError::invalid_config("A device name is required"));
        }

        if self.buffer_size == 0 {
            return Err(WriteDevError::invalid_config(
                "Buffer size must be greater than 0",
            ));
        }

        if self.benchmark && self.cyclic {
            return Err(WriteDevError::invalid_config(
                "Cyclic mode and benchmarking are mutually exclusive",
            ));
        }

        if self.idle_tick.is_zero() {
            return Err(WriteDevError::invalid_config(
                "Idle tick must be greater than 0",
            ));
        }

        if self.trigger.is_some() && self.trigger_frequency_hz <= 0 {
            return Err(WriteDevError::invalid_config(format!(
                "Invalid trigger frequency: {}",
                self.trigger_frequency_hz
            )));
        }

        Ok(())
    }
}

/// Builder for [`StreamConfig`].
#[derive(Debug, Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    /// Set the target device.
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.device = device.into();
        self
    }

    /// Set the channels to enable.
    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the trigger device.
    pub fn trigger(mut self, trigger: Option<String>) -> Self {
        self.config.trigger = trigger;
        self
    }

    /// Set the buffer capacity in samples.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set the sample budget (0 = unbounded).
    pub fn samples(mut self, samples: u64) -> Self {
        self.config.samples = samples;
        self
    }

    /// Enable cyclic mode.
    pub fn cyclic(mut self, enable: bool) -> Self {
        self.config.cyclic = enable;
        self
    }

    /// Enable benchmark mode.
    pub fn benchmark(mut self, enable: bool) -> Self {
        self.config.benchmark = enable;
        self
    }

    /// Set the cyclic-mode idle tick.
    pub fn idle_tick(mut self, tick: Duration) -> Self {
        self.config.idle_tick = tick;
        self
    }

    /// Set the trigger rate in Hz.
    pub fn trigger_frequency_hz(mut self, hz: i64) -> Self {
        self.config.trigger_frequency_hz = hz;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<StreamConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::builder().device("dac").build().unwrap();
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.samples, 0);
        assert!(config.channels.is_empty());
        assert_eq!(config.idle_tick, Duration::from_secs(1));
        assert_eq!(config.trigger_frequency_hz, 100);
    }

    #[test]
    fn test_benchmark_and_cyclic_are_exclusive() {
        let err = StreamConfig::builder()
            .device("dac")
            .cyclic(true)
            .benchmark(true)
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_rejects_zero_buffer() {
        assert!(StreamConfig::builder()
            .device("dac")
            .buffer_size(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_rejects_missing_device() {
        assert!(StreamConfig::builder().build().is_err());
    }

    #[test]
    fn test_trigger_frequency_only_checked_with_trigger() {
        assert!(StreamConfig::builder()
            .device("dac")
            .trigger_frequency_hz(0)
            .build()
            .is_ok());
        assert!(StreamConfig::builder()
            .device("dac")
            .trigger(Some("trig".to_string()))
            .trigger_frequency_hz(0)
            .build()
            .is_err());
    }
}
