//! Hardware Capabilities
//!
//! This module defines the traits a hardware backend implements to be driven
//! by the streaming engine. The split follows the IIO object model:
//!
//! - [`DeviceContext`] - a collection of devices, looked up by name or id
//! - [`OutputDevice`] - a device with channels, attributes and buffers
//!   (triggers are devices too)
//! - [`HardwareBuffer`] - a bounded, device-owned memory region that stages
//!   samples before they are clocked out
//! - [`BufferCancel`] - the one operation on a buffer that may be invoked
//!   from another thread
//!
//! Two implementations exist: [`crate::hardware::mock`] for tests and dry
//! runs, and `crate::hardware::iio` (feature `iio_hardware`) for libiio.
//!
//! # Example
//!
//! ```rust,ignore
//! fn dump_channels<D: OutputDevice>(device: &D) {
//!     for ch in device.channels() {
//!         println!("{} output={}", ch.id, ch.output);
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::error::Result;

/// Identity and direction of one device channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Position in the device channel list
    pub index: usize,
    /// Channel id (e.g. "voltage0")
    pub id: String,
    /// Optional label (e.g. "TX1_I_F1")
    pub name: Option<String>,
    /// Whether this is an output channel
    pub output: bool,
}

impl ChannelInfo {
    /// Whether `requested` names this channel by id or by label.
    pub fn matches(&self, requested: &str) -> bool {
        self.id == requested || self.name.as_deref() == Some(requested)
    }
}

/// Answer from a per-sample visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFlow {
    /// Keep visiting sample slots
    Continue,
    /// End the scan after this slot
    Stop,
}

/// One channel's slot inside one sample of a buffer window.
#[derive(Debug)]
pub struct SampleSlot<'a> {
    /// Index of the channel in the device channel list
    pub channel: usize,
    /// Bytes of this channel within the current sample
    pub data: &'a mut [u8],
    /// Whether this is the last enabled channel of the sample
    pub last_in_sample: bool,
}

/// Capability: Device Lookup
///
/// Owns the connection to the hardware and hands out device handles.
///
/// # Contract
/// - `find_device` matches either the device id or its name
/// - Handles stay valid as long as they are alive, even if the context value
///   itself is dropped first
pub trait DeviceContext {
    /// Device handle type produced by this context
    type Device: OutputDevice;

    /// Short human-readable description (backend, URI)
    fn description(&self) -> String;

    /// Look up a device by name or id.
    fn find_device(&self, name: &str) -> Option<Self::Device>;
}

/// Capability: Sample Output
///
/// A device exposing channels and able to allocate output buffers.
///
/// # Contract
/// - `sample_size` describes the currently enabled channel set; a value of
///   zero is returned as `Ok(0)` and judged by the caller
/// - `write_attr_i64` fails if the attribute does not exist
/// - `create_buffer` allocates `capacity` samples and enables streaming
pub trait OutputDevice {
    /// Buffer type created by this device
    type Buffer: HardwareBuffer;

    /// Device id or name, for diagnostics
    fn name(&self) -> String;

    /// All channels of the device, in device order.
    fn channels(&self) -> Vec<ChannelInfo>;

    /// Enable the channel at `index` for streaming.
    fn enable_channel(&mut self, index: usize) -> Result<()>;

    /// Size in bytes of one sample of the enabled channel set.
    fn sample_size(&self) -> Result<usize>;

    /// Whether this device is a trigger.
    fn is_trigger(&self) -> bool;

    /// Write an integer device attribute.
    fn write_attr_i64(&self, attr: &str, value: i64) -> Result<()>;

    /// Bind `trigger` as this device's trigger.
    fn set_trigger(&mut self, trigger: &Self) -> Result<()>;

    /// Allocate an output buffer of `capacity` samples.
    fn create_buffer(&mut self, capacity: usize, cyclic: bool) -> Result<Self::Buffer>;
}

/// Capability: Buffered Output
///
/// A device-owned staging area. Dropping the buffer destroys it.
///
/// # Contract
/// - `window` is only valid until the next `push`
/// - `step` is the distance in bytes between two consecutive samples of the
///   window; when it equals the sample size no demultiplexing is needed
/// - `push` may block while the device applies backpressure; a cancelled
///   buffer makes it return [`crate::WriteDevError::Cancelled`]
pub trait HardwareBuffer {
    /// Capacity in samples.
    fn capacity(&self) -> usize;

    /// Distance in bytes between consecutive samples of the window.
    fn step(&self) -> usize;

    /// The writable window for the next push.
    fn window(&mut self) -> &mut [u8];

    /// Visit every enabled channel of every sample of the window, in order.
    ///
    /// Returns the number of bytes visited.
    fn foreach_sample(
        &mut self,
        visit: &mut dyn FnMut(SampleSlot<'_>) -> SampleFlow,
    ) -> Result<usize>;

    /// Commit the first `samples` samples of the window to the device.
    fn push(&mut self, samples: usize) -> Result<()>;

    /// Handle that can cancel a blocked push from another thread.
    fn canceller(&self) -> Arc<dyn BufferCancel>;
}

/// Cross-thread cancellation of the outstanding buffer operation.
///
/// This is the only buffer operation a signal watcher may call. It never
/// mutates the window or destroys the buffer.
pub trait BufferCancel: Send + Sync {
    /// Unblock any thread blocked in `push`; later pushes fail.
    fn cancel(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_matches_id_or_name() {
        let ch = ChannelInfo {
            index: 0,
            id: "voltage0".to_string(),
            name: Some("TX1_I_F1".to_string()),
            output: true,
        };
        assert!(ch.matches("voltage0"));
        assert!(ch.matches("TX1_I_F1"));
        assert!(!ch.matches("voltage1"));

        let unnamed = ChannelInfo { name: None, ..ch };
        assert!(!unnamed.matches("TX1_I_F1"));
    }
}
