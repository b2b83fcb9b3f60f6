//! Write session lifecycle.
//!
//! A [`WriteSession`] performs the setup sequence against a
//! [`DeviceContext`], hands the buffer to the [`StreamEngine`] and tears
//! everything down exactly once afterwards:
//!
//! 1. look up the device
//! 2. look up, validate and configure the trigger (optional)
//! 3. enable the requested output channels
//! 4. query the sample size
//! 5. allocate the hardware buffer
//!
//! Setup failures are returned before any buffer exists. Once the buffer is
//! allocated, [`WriteSession::run`] always ends with the buffer destroyed,
//! then the device handle, then the context.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::engine::{StreamEngine, StreamSummary};
use crate::error::{Result, WriteDevError};
use crate::hardware::{DeviceContext, HardwareBuffer, OutputDevice};
use crate::shutdown::RunControl;

/// Trigger rate attribute, tried first.
pub const RATE_ATTR: &str = "sampling_frequency";

/// Older trigger rate attribute, tried when [`RATE_ATTR`] is rejected.
pub const LEGACY_RATE_ATTR: &str = "frequency";

type BufferOf<C> = <<C as DeviceContext>::Device as OutputDevice>::Buffer;

/// Result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Process exit code derived from the run state
    pub exit_code: i32,
    /// What the streaming loop achieved
    pub summary: StreamSummary,
}

/// An opened device with an allocated buffer, ready to stream.
pub struct WriteSession<C: DeviceContext> {
    // Field order is drop order: buffer, device, context.
    buffer: BufferOf<C>,
    device: C::Device,
    context: C,
    config: StreamConfig,
    sample_size: usize,
    active_channels: usize,
}

impl<C: DeviceContext> WriteSession<C> {
    /// Run the setup sequence against `context`.
    pub fn open(context: C, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        debug!(context = %context.description(), "Opening write session");

        let mut device = context
            .find_device(&config.device)
            .ok_or_else(|| WriteDevError::DeviceNotFound {
                name: config.device.clone(),
            })?;

        if let Some(trigger) = config.trigger.as_deref() {
            configure_trigger(&context, &mut device, trigger, config.trigger_frequency_hz)?;
        }

        let active_channels = select_channels(&mut device, &config.channels)?;
        if active_channels == 0 {
            return Err(WriteDevError::NoOutputChannels);
        }

        let sample_size = match device.sample_size() {
            Ok(0) => return Err(WriteDevError::ZeroSampleSize),
            Ok(size) => size,
            Err(WriteDevError::Backend { message, .. }) => {
                return Err(WriteDevError::SampleSize { message })
            }
            Err(e) => {
                return Err(WriteDevError::SampleSize {
                    message: e.to_string(),
                })
            }
        };

        let buffer = device.create_buffer(config.buffer_size, config.cyclic)?;

        info!(
            device = %device.name(),
            channels = active_channels,
            sample_size = sample_size,
            buffer_size = config.buffer_size,
            cyclic = config.cyclic,
            "Write session opened"
        );

        Ok(Self {
            buffer,
            device,
            context,
            config,
            sample_size,
            active_channels,
        })
    }

    /// Size in bytes of one sample.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Number of enabled channels.
    pub fn active_channels(&self) -> usize {
        self.active_channels
    }

    /// Stream `input` into the device until the run ends, then tear down.
    ///
    /// The buffer's canceller is armed on `control` for the duration of the
    /// loop and disarmed before the buffer is destroyed.
    pub fn run<R, W>(self, input: &mut R, control: &Arc<RunControl>, report: &mut W) -> SessionOutcome
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let Self {
            mut buffer,
            device,
            context,
            config,
            sample_size,
            ..
        } = self;

        control.arm(buffer.canceller());
        let mut engine = StreamEngine::new(&config, sample_size, Arc::clone(control));
        let summary = engine.run(&mut buffer, input, report);
        control.disarm();

        debug!("Destroying buffer");
        drop(buffer);
        debug!(device = %device.name(), "Releasing device");
        drop(device);
        debug!(context = %context.description(), "Destroying context");
        drop(context);

        SessionOutcome {
            exit_code: control.exit_code(),
            summary,
        }
    }
}

/// Enable the output channels named in `requested`, or every output channel
/// when `requested` is empty.
///
/// A channel matches by id or label. Input channels are never enabled.
/// Returns the number of channels enabled.
pub fn select_channels<D: OutputDevice>(device: &mut D, requested: &[String]) -> Result<usize> {
    let mut enabled = 0;
    for channel in device.channels() {
        if !channel.output {
            continue;
        }
        let wanted = requested.is_empty() || requested.iter().any(|name| channel.matches(name));
        if wanted {
            device.enable_channel(channel.index)?;
            debug!(channel = %channel.id, "Enabled channel");
            enabled += 1;
        }
    }

    for name in requested {
        if !device
            .channels()
            .iter()
            .any(|ch| ch.output && ch.matches(name))
        {
            warn!(channel = %name, "No output channel matches");
        }
    }

    Ok(enabled)
}

/// Look up `trigger_name`, set its rate and bind it to `device`.
///
/// A missing or non-trigger device is a configuration error. Failing to set
/// the rate or to bind the trigger is only logged.
pub fn configure_trigger<C: DeviceContext>(
    context: &C,
    device: &mut C::Device,
    trigger_name: &str,
    frequency_hz: i64,
) -> Result<()> {
    let trigger = context
        .find_device(trigger_name)
        .ok_or_else(|| WriteDevError::TriggerNotFound {
            name: trigger_name.to_string(),
        })?;

    if !trigger.is_trigger() {
        return Err(WriteDevError::NotATrigger {
            name: trigger_name.to_string(),
        });
    }

    if let Err(e) = trigger.write_attr_i64(RATE_ATTR, frequency_hz) {
        debug!(error = %e, "Falling back to legacy rate attribute");
        if let Err(e) = trigger.write_attr_i64(LEGACY_RATE_ATTR, frequency_hz) {
            warn!("sample rate not set : {}", e);
        }
    }

    match device.set_trigger(&trigger) {
        Ok(()) => debug!(trigger = %trigger_name, frequency_hz = frequency_hz, "Trigger bound"),
        Err(e) => warn!("{}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockContext, MockDevice};
    use tracing_test::traced_test;

    fn abc() -> MockDevice {
        MockDevice::new("dac")
            .with_input("A", None, 2)
            .with_output("B", None, 2)
            .with_output("C", Some("charlie"), 2)
    }

    #[test]
    fn test_select_named_channel() {
        let mut dev = abc();
        let n = select_channels(&mut dev, &["C".to_string()]).unwrap();
        assert_eq!(n, 1);
        assert_eq!(dev.enabled_channels(), vec!["C"]);
    }

    #[test]
    fn test_select_all_outputs_by_default() {
        let mut dev = abc();
        assert_eq!(select_channels(&mut dev, &[]).unwrap(), 2);
        assert_eq!(dev.enabled_channels(), vec!["B", "C"]);
    }

    #[test]
    fn test_input_channel_never_enabled() {
        let mut dev = abc();
        assert_eq!(select_channels(&mut dev, &["A".to_string()]).unwrap(), 0);
        assert!(dev.enabled_channels().is_empty());
    }

    #[test]
    fn test_channel_counted_once_for_id_and_label() {
        let mut dev = abc();
        let names = vec!["C".to_string(), "charlie".to_string()];
        assert_eq!(select_channels(&mut dev, &names).unwrap(), 1);
    }

    #[test]
    fn test_open_reports_missing_device() {
        let config = StreamConfig::builder().device("nope").build().unwrap();
        let err = WriteSession::open(MockContext::demo(), config).err().unwrap();
        assert!(matches!(err, WriteDevError::DeviceNotFound { .. }));
        assert_eq!(err.to_string(), "Device nope not found");
    }

    #[test]
    fn test_open_demo_device() {
        let config = StreamConfig::builder()
            .device("mock-dac")
            .trigger(Some("mock-trigger".to_string()))
            .build()
            .unwrap();
        let ctx = MockContext::demo();
        let dac = ctx.device("mock-dac").unwrap();
        let trigger = ctx.device("mock-trigger").unwrap();

        let session = WriteSession::open(ctx, config).unwrap();
        assert_eq!(session.sample_size(), 4);
        assert_eq!(session.active_channels(), 2);
        assert_eq!(dac.bound_trigger().as_deref(), Some("mock-trigger"));
        assert_eq!(trigger.attribute(RATE_ATTR), Some(100));
    }

    fn trigger_context(trigger: MockDevice, device: MockDevice) -> MockContext {
        MockContext::new().with_device(device).with_device(trigger)
    }

    #[test]
    #[traced_test]
    fn test_trigger_rate_falls_back_to_legacy_attribute() {
        let trigger = MockDevice::trigger("trig").with_attribute(LEGACY_RATE_ATTR);
        let ctx = trigger_context(trigger.clone(), abc());
        let mut dev = ctx.device("dac").unwrap();

        configure_trigger(&ctx, &mut dev, "trig", 250).unwrap();
        assert_eq!(trigger.attribute(RATE_ATTR), None);
        assert_eq!(trigger.attribute(LEGACY_RATE_ATTR), Some(250));
        assert_eq!(dev.bound_trigger().as_deref(), Some("trig"));
        assert!(!logs_contain("sample rate not set"));
    }

    #[test]
    #[traced_test]
    fn test_trigger_rate_failure_is_logged_not_fatal() {
        let ctx = trigger_context(MockDevice::trigger("trig"), abc());
        let mut dev = ctx.device("dac").unwrap();

        configure_trigger(&ctx, &mut dev, "trig", 100).unwrap();
        assert!(logs_contain("sample rate not set"));
        assert_eq!(dev.bound_trigger().as_deref(), Some("trig"));
    }

    #[test]
    #[traced_test]
    fn test_set_trigger_failure_is_logged_not_fatal() {
        let trigger = MockDevice::trigger("trig").with_attribute(RATE_ATTR);
        let ctx = trigger_context(trigger, abc().fail_set_trigger());
        let mut dev = ctx.device("dac").unwrap();

        configure_trigger(&ctx, &mut dev, "trig", 100).unwrap();
        assert!(logs_contain("set trigger failed"));
        assert_eq!(dev.bound_trigger(), None);
    }
}
