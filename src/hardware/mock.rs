//! Mock Hardware Implementations
//!
//! Provides a simulated IIO context for testing and dry runs without physical
//! hardware. Selected at runtime with the URI `mock:`.
//!
//! # Available Mocks
//!
//! - `MockContext` - a set of devices looked up by id
//! - `MockDevice` - an output device (or trigger) with programmable faults
//! - `MockBuffer` - an in-memory hardware buffer recording every push
//!
//! # Fault Injection
//!
//! A `MockDevice` can be told to report a zero or negative sample size, fail
//! buffer allocation, fail or block a given push, fail a per-sample scan, or
//! accept only some attribute names. Every buffer created by a device reports
//! into the device's shared [`MockBufferLog`], which outlives the buffer so
//! tests can inspect pushes and destruction after the session is gone.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{Result, WriteDevError};
use crate::hardware::capabilities::{
    BufferCancel, ChannelInfo, DeviceContext, HardwareBuffer, OutputDevice, SampleFlow,
    SampleSlot,
};

/// Context URI prefix selecting the mock backend.
pub const MOCK_URI_PREFIX: &str = "mock:";

// =============================================================================
// MockContext
// =============================================================================

/// Simulated context holding a fixed set of devices.
#[derive(Clone, Default)]
pub struct MockContext {
    devices: Vec<MockDevice>,
}

impl MockContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device to the context.
    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Context used by the `mock:` URI.
    ///
    /// - `mock-dac`: two 16-bit output channels (`voltage0`/`TX1_I`,
    ///   `voltage1`/`TX1_Q`) and one input channel (`voltage2`)
    /// - `mock-trigger`: a trigger accepting `sampling_frequency`
    ///
    /// Pushed data is counted, not retained.
    pub fn demo() -> Self {
        let dac = MockDevice::new("mock-dac")
            .with_output("voltage0", Some("TX1_I"), 2)
            .with_output("voltage1", Some("TX1_Q"), 2)
            .with_input("voltage2", None, 2)
            .retain_pushes(false);
        let trigger = MockDevice::trigger("mock-trigger").with_attribute("sampling_frequency");

        Self::new().with_device(dac).with_device(trigger)
    }

    /// Look up a device without going through the trait.
    pub fn device(&self, name: &str) -> Option<MockDevice> {
        self.find_device(name)
    }
}

impl DeviceContext for MockContext {
    type Device = MockDevice;

    fn description(&self) -> String {
        format!("mock context ({} devices)", self.devices.len())
    }

    fn find_device(&self, name: &str) -> Option<MockDevice> {
        self.devices.iter().find(|d| d.name() == name).cloned()
    }
}

// =============================================================================
// MockDevice
// =============================================================================

#[derive(Debug, Clone)]
struct MockChannel {
    info: ChannelInfo,
    width: usize,
}

struct MockDeviceState {
    id: String,
    channels: Vec<MockChannel>,
    enabled: Vec<bool>,
    is_trigger: bool,
    writable_attrs: Vec<String>,
    attributes: BTreeMap<String, i64>,
    trigger: Option<String>,
    scan_all_channels: bool,
    sample_size_override: Option<i64>,
    fail_buffer_creation: bool,
    fail_set_trigger: bool,
    fail_push_at: Option<usize>,
    block_push_at: Option<usize>,
    fail_scan_at: Option<usize>,
    push_delay: Option<Duration>,
}

/// Simulated IIO device.
///
/// Clones share state, so a test can keep a handle while the session owns
/// another.
///
/// # Example
///
/// ```rust,ignore
/// let dac = MockDevice::new("dac")
///     .with_input("A", None, 2)
///     .with_output("B", None, 2)
///     .with_output("C", None, 2);
/// let log = dac.buffer_log();
/// ```
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockDeviceState>>,
    log: Arc<MockBufferLog>,
}

impl MockDevice {
    /// Create a device without channels.
    pub fn new(id: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockDeviceState {
                id: id.to_string(),
                channels: Vec::new(),
                enabled: Vec::new(),
                is_trigger: false,
                writable_attrs: Vec::new(),
                attributes: BTreeMap::new(),
                trigger: None,
                scan_all_channels: false,
                sample_size_override: None,
                fail_buffer_creation: false,
                fail_set_trigger: false,
                fail_push_at: None,
                block_push_at: None,
                fail_scan_at: None,
                push_delay: None,
            })),
            log: Arc::new(MockBufferLog::new()),
        }
    }

    /// Create a trigger device.
    pub fn trigger(id: &str) -> Self {
        let device = Self::new(id);
        device.state.lock().is_trigger = true;
        device
    }

    fn add_channel(self, id: &str, name: Option<&str>, output: bool, width: usize) -> Self {
        {
            let mut state = self.state.lock();
            let index = state.channels.len();
            state.channels.push(MockChannel {
                info: ChannelInfo {
                    index,
                    id: id.to_string(),
                    name: name.map(str::to_string),
                    output,
                },
                width,
            });
            state.enabled.push(false);
        }
        self
    }

    /// Add an output channel `width` bytes wide.
    pub fn with_output(self, id: &str, name: Option<&str>, width: usize) -> Self {
        self.add_channel(id, name, true, width)
    }

    /// Add an input channel `width` bytes wide.
    pub fn with_input(self, id: &str, name: Option<&str>, width: usize) -> Self {
        self.add_channel(id, name, false, width)
    }

    /// Accept writes to the integer attribute `attr`.
    pub fn with_attribute(self, attr: &str) -> Self {
        self.state.lock().writable_attrs.push(attr.to_string());
        self
    }

    /// Lay out every output channel in the buffer, enabled or not.
    ///
    /// With a partial channel selection this makes the buffer step larger
    /// than the sample size, forcing the per-sample path.
    pub fn scan_all_channels(self) -> Self {
        self.state.lock().scan_all_channels = true;
        self
    }

    /// Report `size` from `sample_size` (negative values are failures).
    pub fn with_sample_size(self, size: i64) -> Self {
        self.state.lock().sample_size_override = Some(size);
        self
    }

    /// Fail every buffer allocation.
    pub fn fail_buffer_creation(self) -> Self {
        self.state.lock().fail_buffer_creation = true;
        self
    }

    /// Fail binding a trigger.
    pub fn fail_set_trigger(self) -> Self {
        self.state.lock().fail_set_trigger = true;
        self
    }

    /// Fail the push with zero-based index `n`.
    pub fn fail_push_at(self, n: usize) -> Self {
        self.state.lock().fail_push_at = Some(n);
        self
    }

    /// Block the push with zero-based index `n` until the buffer is cancelled.
    pub fn block_push_at(self, n: usize) -> Self {
        self.state.lock().block_push_at = Some(n);
        self
    }

    /// Fail the per-sample scan with zero-based index `n`.
    pub fn fail_scan_at(self, n: usize) -> Self {
        self.state.lock().fail_scan_at = Some(n);
        self
    }

    /// Sleep for `delay` inside every push.
    pub fn with_push_delay(self, delay: Duration) -> Self {
        self.state.lock().push_delay = Some(delay);
        self
    }

    /// Whether pushed bytes are kept in the log (default) or only counted.
    pub fn retain_pushes(self, retain: bool) -> Self {
        self.log.state.lock().retain = retain;
        self
    }

    /// Ids of the enabled channels, in device order.
    pub fn enabled_channels(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .channels
            .iter()
            .zip(&state.enabled)
            .filter(|(_, on)| **on)
            .map(|(ch, _)| ch.info.id.clone())
            .collect()
    }

    /// Last value written to `attr`.
    pub fn attribute(&self, attr: &str) -> Option<i64> {
        self.state.lock().attributes.get(attr).copied()
    }

    /// Name of the bound trigger.
    pub fn bound_trigger(&self) -> Option<String> {
        self.state.lock().trigger.clone()
    }

    /// Shared log of every buffer this device creates.
    pub fn buffer_log(&self) -> Arc<MockBufferLog> {
        Arc::clone(&self.log)
    }
}

impl OutputDevice for MockDevice {
    type Buffer = MockBuffer;

    fn name(&self) -> String {
        self.state.lock().id.clone()
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        self.state
            .lock()
            .channels
            .iter()
            .map(|ch| ch.info.clone())
            .collect()
    }

    fn enable_channel(&mut self, index: usize) -> Result<()> {
        let mut state = self.state.lock();
        match state.enabled.get_mut(index) {
            Some(on) => {
                *on = true;
                Ok(())
            }
            None => Err(WriteDevError::invalid_config(format!(
                "channel index {} out of range",
                index
            ))),
        }
    }

    fn sample_size(&self) -> Result<usize> {
        let state = self.state.lock();
        match state.sample_size_override {
            Some(size) if size < 0 => Err(WriteDevError::Backend {
                errno: (-size) as i32,
                message: "Invalid argument".to_string(),
            }),
            Some(size) => Ok(size as usize),
            None => Ok(state
                .channels
                .iter()
                .zip(&state.enabled)
                .filter(|(_, on)| **on)
                .map(|(ch, _)| ch.width)
                .sum()),
        }
    }

    fn is_trigger(&self) -> bool {
        self.state.lock().is_trigger
    }

    fn write_attr_i64(&self, attr: &str, value: i64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.writable_attrs.iter().any(|a| a == attr) {
            return Err(WriteDevError::Attribute {
                attr: attr.to_string(),
                message: "No such file or directory".to_string(),
            });
        }
        state.attributes.insert(attr.to_string(), value);
        Ok(())
    }

    fn set_trigger(&mut self, trigger: &Self) -> Result<()> {
        let trigger_name = trigger.name();
        let mut state = self.state.lock();
        if state.fail_set_trigger {
            return Err(WriteDevError::SetTrigger {
                message: "Operation not permitted".to_string(),
            });
        }
        state.trigger = Some(trigger_name);
        Ok(())
    }

    fn create_buffer(&mut self, capacity: usize, cyclic: bool) -> Result<MockBuffer> {
        let state = self.state.lock();
        if state.fail_buffer_creation {
            return Err(WriteDevError::BufferAllocation {
                message: "Cannot allocate memory".to_string(),
            });
        }

        let mut layout = Vec::new();
        let mut step = 0;
        for (ch, &on) in state.channels.iter().zip(&state.enabled) {
            if on {
                layout.push(SlotLayout {
                    channel: ch.info.index,
                    offset: step,
                    width: ch.width,
                });
                step += ch.width;
            } else if state.scan_all_channels && ch.info.output {
                step += ch.width;
            }
        }

        if layout.is_empty() || capacity == 0 {
            return Err(WriteDevError::BufferAllocation {
                message: "Invalid argument".to_string(),
            });
        }

        self.log.opened(capacity, cyclic);

        debug!(
            device = %state.id,
            capacity = capacity,
            step = step,
            cyclic = cyclic,
            "Created mock buffer"
        );

        Ok(MockBuffer {
            window: vec![0u8; capacity * step],
            capacity,
            step,
            layout,
            log: Arc::clone(&self.log),
            pushes: 0,
            scans: 0,
            fail_push_at: state.fail_push_at,
            block_push_at: state.block_push_at,
            fail_scan_at: state.fail_scan_at,
            push_delay: state.push_delay,
        })
    }
}

// =============================================================================
// MockBufferLog
// =============================================================================

#[derive(Default)]
struct LogState {
    retain: bool,
    created: usize,
    destroyed: usize,
    capacity: usize,
    cyclic: bool,
    cancelled: bool,
    blocked: bool,
    push_count: usize,
    bytes_pushed: usize,
    pushes: Vec<Vec<u8>>,
}

/// Record of every buffer operation performed on a [`MockDevice`].
pub struct MockBufferLog {
    state: Mutex<LogState>,
    changed: Condvar,
}

impl MockBufferLog {
    fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                retain: true,
                ..Default::default()
            }),
            changed: Condvar::new(),
        }
    }

    fn opened(&self, capacity: usize, cyclic: bool) {
        let mut state = self.state.lock();
        state.created += 1;
        state.capacity = capacity;
        state.cyclic = cyclic;
        state.cancelled = false;
    }

    /// Number of buffers created.
    pub fn buffers_created(&self) -> usize {
        self.state.lock().created
    }

    /// Number of buffers destroyed.
    pub fn buffers_destroyed(&self) -> usize {
        self.state.lock().destroyed
    }

    /// Whether the last buffer was opened in cyclic mode.
    pub fn cyclic(&self) -> bool {
        self.state.lock().cyclic
    }

    /// Capacity of the last buffer, in samples.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Whether the current buffer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Number of successful pushes.
    pub fn push_count(&self) -> usize {
        self.state.lock().push_count
    }

    /// Total bytes committed by successful pushes.
    pub fn bytes_pushed(&self) -> usize {
        self.state.lock().bytes_pushed
    }

    /// Bytes of each successful push (empty when pushes are not retained).
    pub fn pushes(&self) -> Vec<Vec<u8>> {
        self.state.lock().pushes.clone()
    }

    /// All retained pushed bytes, concatenated.
    pub fn pushed_bytes(&self) -> Vec<u8> {
        self.state.lock().pushes.concat()
    }

    /// Wait until a push is blocked waiting for cancellation.
    pub fn wait_until_blocked(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.blocked {
            let _ = self
                .changed
                .wait_while_for(&mut state, |s| !s.blocked, timeout);
        }
        state.blocked
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.changed.notify_all();
    }
}

// =============================================================================
// MockBuffer
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct SlotLayout {
    channel: usize,
    offset: usize,
    width: usize,
}

struct MockCancel {
    log: Arc<MockBufferLog>,
}

impl BufferCancel for MockCancel {
    fn cancel(&self) {
        debug!("Cancelling mock buffer");
        self.log.cancel();
    }
}

/// In-memory hardware buffer created by [`MockDevice::create_buffer`].
pub struct MockBuffer {
    window: Vec<u8>,
    capacity: usize,
    step: usize,
    layout: Vec<SlotLayout>,
    log: Arc<MockBufferLog>,
    pushes: usize,
    scans: usize,
    fail_push_at: Option<usize>,
    block_push_at: Option<usize>,
    fail_scan_at: Option<usize>,
    push_delay: Option<Duration>,
}

impl HardwareBuffer for MockBuffer {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn step(&self) -> usize {
        self.step
    }

    fn window(&mut self) -> &mut [u8] {
        &mut self.window
    }

    fn foreach_sample(
        &mut self,
        visit: &mut dyn FnMut(SampleSlot<'_>) -> SampleFlow,
    ) -> Result<usize> {
        let scan = self.scans;
        self.scans += 1;
        if self.fail_scan_at == Some(scan) {
            return Err(WriteDevError::SampleScan {
                message: "Bad address".to_string(),
            });
        }

        let last = self.layout.len() - 1;
        let mut visited = 0;
        for sample in 0..self.capacity {
            let base = sample * self.step;
            for (k, slot) in self.layout.iter().enumerate() {
                let start = base + slot.offset;
                let flow = visit(SampleSlot {
                    channel: slot.channel,
                    data: &mut self.window[start..start + slot.width],
                    last_in_sample: k == last,
                });
                visited += slot.width;
                if flow == SampleFlow::Stop {
                    return Ok(visited);
                }
            }
        }
        Ok(visited)
    }

    fn push(&mut self, samples: usize) -> Result<()> {
        let index = self.pushes;
        self.pushes += 1;

        if let Some(delay) = self.push_delay {
            std::thread::sleep(delay);
        }

        let mut state = self.log.state.lock();
        if state.cancelled {
            return Err(WriteDevError::Cancelled);
        }
        if self.fail_push_at == Some(index) {
            return Err(WriteDevError::Push {
                message: "Broken pipe".to_string(),
            });
        }
        if self.block_push_at == Some(index) {
            state.blocked = true;
            self.log.changed.notify_all();
            self.log.changed.wait_while(&mut state, |s| !s.cancelled);
            state.blocked = false;
            return Err(WriteDevError::Cancelled);
        }

        let bytes = samples.min(self.capacity) * self.step;
        state.push_count += 1;
        state.bytes_pushed += bytes;
        if state.retain {
            state.pushes.push(self.window[..bytes].to_vec());
        }
        Ok(())
    }

    fn canceller(&self) -> Arc<dyn BufferCancel> {
        Arc::new(MockCancel {
            log: Arc::clone(&self.log),
        })
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        debug!(pushes = self.pushes, "Destroying mock buffer");
        self.log.state.lock().destroyed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dac() -> MockDevice {
        MockDevice::new("dac")
            .with_input("A", None, 2)
            .with_output("B", None, 2)
            .with_output("C", Some("charlie"), 4)
    }

    #[test]
    fn test_sample_size_tracks_enabled_channels() {
        let mut dev = dac();
        assert_eq!(dev.sample_size().unwrap(), 0);
        dev.enable_channel(2).unwrap();
        assert_eq!(dev.sample_size().unwrap(), 4);
        dev.enable_channel(1).unwrap();
        assert_eq!(dev.sample_size().unwrap(), 6);
        assert_eq!(dev.enabled_channels(), vec!["B", "C"]);
    }

    #[test]
    fn test_step_matches_sample_size_without_scan_all() {
        let mut dev = dac();
        dev.enable_channel(2).unwrap();
        let buf = dev.create_buffer(8, false).unwrap();
        assert_eq!(buf.step(), 4);
        assert_eq!(buf.window.len(), 32);
    }

    #[test]
    fn test_scan_all_widens_step() {
        let mut dev = dac().scan_all_channels();
        dev.enable_channel(2).unwrap();
        let mut buf = dev.create_buffer(3, false).unwrap();
        assert_eq!(buf.step(), 6);

        let mut slots = Vec::new();
        let visited = buf
            .foreach_sample(&mut |slot| {
                slots.push((slot.channel, slot.data.len(), slot.last_in_sample));
                slot.data.fill(0xAB);
                SampleFlow::Continue
            })
            .unwrap();
        assert_eq!(visited, 12);
        assert_eq!(slots, vec![(2, 4, true); 3]);
        // Disabled channel B keeps its zeroes in the first two bytes
        assert_eq!(&buf.window[0..6], &[0, 0, 0xAB, 0xAB, 0xAB, 0xAB]);
    }

    #[test]
    fn test_push_records_partial_samples() {
        let mut dev = dac();
        dev.enable_channel(1).unwrap();
        let log = dev.buffer_log();
        let mut buf = dev.create_buffer(4, false).unwrap();
        buf.window().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        buf.push(3).unwrap();
        assert_eq!(log.pushes(), vec![vec![1, 2, 3, 4, 5, 6]]);
        drop(buf);
        assert_eq!(log.buffers_destroyed(), 1);
    }

    #[test]
    fn test_cancel_fails_later_pushes() {
        let mut dev = dac();
        dev.enable_channel(1).unwrap();
        let mut buf = dev.create_buffer(1, false).unwrap();
        buf.canceller().cancel();
        assert!(buf.push(1).unwrap_err().is_cancelled());
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let trig = MockDevice::trigger("trig").with_attribute("frequency");
        assert!(trig.write_attr_i64("sampling_frequency", 100).is_err());
        trig.write_attr_i64("frequency", 100).unwrap();
        assert_eq!(trig.attribute("frequency"), Some(100));
    }

    #[test]
    fn test_demo_context() {
        let ctx = MockContext::demo();
        let dac = ctx.find_device("mock-dac").unwrap();
        assert_eq!(dac.channels().len(), 3);
        assert!(ctx.find_device("mock-trigger").unwrap().is_trigger());
        assert!(ctx.find_device("nope").is_none());
    }
}
