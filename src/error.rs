//! Error types for streaming samples into IIO output devices.
//!
//! `WriteDevError` consolidates every failure the tool can report, from
//! configuration mistakes caught before any hardware is touched, to device
//! library failures raised in the middle of a stream.
//!
//! ## Error Classes
//!
//! - **Configuration**: device or trigger not found, invalid trigger, no
//!   output channels, mutually exclusive flags. Detected before the
//!   streaming loop starts; no buffer is ever created.
//! - **Resource**: zero or negative sample size, buffer allocation failure.
//!   Fatal to the process.
//! - **Stream**: push failures, cancelled pushes and input failures. Fatal
//!   to the loop but not to the process; the exit code comes from the run
//!   state.
//!
//! Device library failures arrive as negative errno values and are
//! translated to human-readable strings by the backend at the point where
//! they occur (see [`WriteDevError::Backend`]).

use thiserror::Error;

/// Result type alias for IIO streaming operations.
pub type Result<T> = std::result::Result<T, WriteDevError>;

/// Errors that can occur while setting up or running a write session.
#[derive(Error, Debug)]
pub enum WriteDevError {
    /// No device with the requested name or id exists in the context
    #[error("Device {name} not found")]
    DeviceNotFound { name: String },

    /// No device with the requested trigger name exists in the context
    #[error("Trigger {name} not found")]
    TriggerNotFound { name: String },

    /// The named device exists but is not a trigger
    #[error("Specified device {name} is not a trigger")]
    NotATrigger { name: String },

    /// Channel selection enabled nothing
    #[error("No output channels found")]
    NoOutputChannels,

    /// Device reported a sample size of zero for the enabled channel set
    #[error("Unable to get sample size, returned 0")]
    ZeroSampleSize,

    /// Device failed to report a sample size
    #[error("Unable to get sample size : {message}")]
    SampleSize { message: String },

    /// Hardware buffer could not be allocated
    #[error("Unable to allocate buffer: {message}")]
    BufferAllocation { message: String },

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Writing a device attribute failed
    #[error("Unable to write attribute '{attr}': {message}")]
    Attribute { attr: String, message: String },

    /// Binding the trigger to the device failed
    #[error("set trigger failed : {message}")]
    SetTrigger { message: String },

    /// Pushing the buffer to the device failed
    #[error("Unable to push buffer: {message}")]
    Push { message: String },

    /// The outstanding buffer operation was cancelled
    #[error("Buffer operation cancelled")]
    Cancelled,

    /// The per-sample scan of the buffer failed
    #[error("buffer processing failed : {message}")]
    SampleScan { message: String },

    /// Context could not be created
    #[error("Unable to create IIO context: {message}")]
    Context { message: String },

    /// Low-level device library error
    #[error("IIO error ({errno}): {message}")]
    Backend { errno: i32, message: String },

    /// I/O error from the input source or the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file or environment could not be parsed
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Requested backend was not compiled in
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl WriteDevError {
    /// Build an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Errors detected before any hardware resource is acquired.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::TriggerNotFound { .. }
                | Self::NotATrigger { .. }
                | Self::NoOutputChannels
                | Self::InvalidConfig { .. }
                | Self::Settings(_)
                | Self::FeatureNotEnabled(_)
        )
    }

    /// Errors raised while acquiring the sample size or the buffer.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            Self::ZeroSampleSize | Self::SampleSize { .. } | Self::BufferAllocation { .. }
        )
    }

    /// Whether a buffer operation failed because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<figment::Error> for WriteDevError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WriteDevError::DeviceNotFound {
            name: "cf-ad9361-dds-core-lpc".to_string(),
        };
        assert_eq!(err.to_string(), "Device cf-ad9361-dds-core-lpc not found");

        let err = WriteDevError::Push {
            message: "Broken pipe".to_string(),
        };
        assert!(err.to_string().contains("Broken pipe"));
    }

    #[test]
    fn test_classification() {
        assert!(WriteDevError::NoOutputChannels.is_configuration());
        assert!(WriteDevError::invalid_config("x").is_configuration());
        assert!(WriteDevError::ZeroSampleSize.is_resource());
        assert!(!WriteDevError::ZeroSampleSize.is_configuration());
        assert!(WriteDevError::Cancelled.is_cancelled());
        assert!(!WriteDevError::Push {
            message: String::new()
        }
        .is_cancelled());
    }
}
