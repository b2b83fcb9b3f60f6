//! Hardware backends.
//!
//! Capability traits plus the mock backend (always built) and the libiio
//! backend (feature `iio_hardware`).

pub mod capabilities;
pub mod mock;

#[cfg(feature = "iio_hardware")]
pub mod iio;

pub use capabilities::{
    BufferCancel, ChannelInfo, DeviceContext, HardwareBuffer, OutputDevice, SampleFlow,
    SampleSlot,
};
