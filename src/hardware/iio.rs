//! libiio backend.
//!
//! Safe wrappers over `iio-sys`. Handles follow the libiio ownership rules:
//! devices and channels belong to their context, buffers belong to their
//! device. Every wrapper keeps the context alive through a shared
//! [`ContextInner`], so the context is destroyed only after the last device
//! and buffer handle is gone.
//!
//! Failures come back from libiio as negative errno values (or a null
//! pointer plus `errno`) and are translated with `iio_strerror` at the call
//! site.

#![allow(unsafe_code)]

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use iio_sys::{iio_buffer, iio_channel, iio_context, iio_device};

use crate::error::{Result, WriteDevError};
use crate::hardware::capabilities::{
    BufferCancel, ChannelInfo, DeviceContext, HardwareBuffer, OutputDevice, SampleFlow,
    SampleSlot,
};

/// Translate an errno value with libiio's own messages.
fn strerror(errno: i32) -> String {
    let mut buf = [0 as c_char; 256];
    // SAFETY: buf is writable for its full length; libiio NUL-terminates
    unsafe {
        iio_sys::iio_strerror(errno, buf.as_mut_ptr(), buf.len());
        CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
    }
}

/// errno left by the last failing libiio call.
fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Error from a negative libiio return value.
fn backend_error(ret: isize) -> WriteDevError {
    let errno = ret.unsigned_abs() as i32;
    WriteDevError::Backend {
        errno,
        message: strerror(errno),
    }
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn owned_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

// =============================================================================
// Context
// =============================================================================

pub(crate) struct ContextInner {
    handle: NonNull<iio_context>,
    uri: Option<String>,
}

// SAFETY: the streaming loop is the only user of the context; the signal
// watcher only reaches a buffer through `IioCancel`.
unsafe impl Send for ContextInner {}
unsafe impl Sync for ContextInner {}

impl Drop for ContextInner {
    fn drop(&mut self) {
        debug!(uri = ?self.uri, "Destroying IIO context");
        // SAFETY: handle is valid and owned
        unsafe { iio_sys::iio_context_destroy(self.handle.as_ptr()) }
    }
}

/// A libiio context.
#[derive(Clone)]
pub struct IioContext {
    inner: Arc<ContextInner>,
}

impl IioContext {
    /// Open the default context, or the context at `uri`.
    ///
    /// `timeout_ms` is applied right after creation.
    pub fn open(uri: Option<&str>, timeout_ms: Option<u32>) -> Result<Self> {
        let raw = match uri {
            Some(uri) => {
                let c_uri = CString::new(uri)
                    .map_err(|_| WriteDevError::invalid_config("URI contains a NUL byte"))?;
                // SAFETY: c_uri is a valid C string for the duration of the call
                unsafe { iio_sys::iio_create_context_from_uri(c_uri.as_ptr()) }
            }
            // SAFETY: no arguments
            None => unsafe { iio_sys::iio_create_default_context() },
        };

        let handle = NonNull::new(raw).ok_or_else(|| WriteDevError::Context {
            message: strerror(last_errno()),
        })?;
        let context = Self {
            inner: Arc::new(ContextInner {
                handle,
                uri: uri.map(str::to_string),
            }),
        };

        if let Some(timeout) = timeout_ms {
            // SAFETY: handle is valid
            let ret = unsafe { iio_sys::iio_context_set_timeout(handle.as_ptr(), timeout) };
            if ret < 0 {
                return Err(WriteDevError::Context {
                    message: format!("Unable to set timeout: {}", strerror(-ret)),
                });
            }
        }

        info!(uri = ?context.inner.uri, "Opened IIO context");
        Ok(context)
    }
}

impl DeviceContext for IioContext {
    type Device = IioDevice;

    fn description(&self) -> String {
        match &self.inner.uri {
            Some(uri) => format!("libiio context {}", uri),
            None => "libiio default context".to_string(),
        }
    }

    fn find_device(&self, name: &str) -> Option<IioDevice> {
        let c_name = CString::new(name).ok()?;
        // SAFETY: context handle and c_name are valid
        let raw = unsafe { iio_sys::iio_context_find_device(self.inner.handle.as_ptr(), c_name.as_ptr()) };
        NonNull::new(raw).map(|handle| IioDevice {
            context: Arc::clone(&self.inner),
            handle,
        })
    }
}

// =============================================================================
// Device
// =============================================================================

/// A device (or trigger) of an [`IioContext`].
pub struct IioDevice {
    context: Arc<ContextInner>,
    handle: NonNull<iio_device>,
}

impl IioDevice {
    fn channel(&self, index: usize) -> Option<NonNull<iio_channel>> {
        let index = u32::try_from(index).ok()?;
        // SAFETY: device handle valid while the context lives
        NonNull::new(unsafe { iio_sys::iio_device_get_channel(self.handle.as_ptr(), index) })
    }

    fn channel_count(&self) -> usize {
        // SAFETY: device handle valid while the context lives
        unsafe { iio_sys::iio_device_get_channels_count(self.handle.as_ptr()) as usize }
    }

    /// Enabled channels in device order.
    fn enabled_channels(&self) -> Vec<(*const iio_channel, usize)> {
        (0..self.channel_count())
            .filter_map(|index| self.channel(index).map(|ch| (ch, index)))
            // SAFETY: channel pointers come from this device
            .filter(|(ch, _)| unsafe { iio_sys::iio_channel_is_enabled(ch.as_ptr()) })
            .map(|(ch, index)| (ch.as_ptr() as *const iio_channel, index))
            .collect()
    }
}

impl OutputDevice for IioDevice {
    type Buffer = IioBuffer;

    fn name(&self) -> String {
        // SAFETY: device handle valid while the context lives
        unsafe {
            owned_str(iio_sys::iio_device_get_name(self.handle.as_ptr()))
                .or_else(|| owned_str(iio_sys::iio_device_get_id(self.handle.as_ptr())))
                .unwrap_or_default()
        }
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        (0..self.channel_count())
            .filter_map(|index| {
                let ch = self.channel(index)?;
                // SAFETY: channel pointer comes from this device
                unsafe {
                    Some(ChannelInfo {
                        index,
                        id: owned_str(iio_sys::iio_channel_get_id(ch.as_ptr()))?,
                        name: owned_str(iio_sys::iio_channel_get_name(ch.as_ptr())),
                        output: iio_sys::iio_channel_is_output(ch.as_ptr()),
                    })
                }
            })
            .collect()
    }

    fn enable_channel(&mut self, index: usize) -> Result<()> {
        let ch = self.channel(index).ok_or_else(|| {
            WriteDevError::invalid_config(format!("channel index {} out of range", index))
        })?;
        // SAFETY: channel pointer comes from this device
        unsafe { iio_sys::iio_channel_enable(ch.as_ptr()) };
        Ok(())
    }

    fn sample_size(&self) -> Result<usize> {
        // SAFETY: device handle valid while the context lives
        let ret = unsafe { iio_sys::iio_device_get_sample_size(self.handle.as_ptr()) };
        if ret < 0 {
            return Err(backend_error(ret));
        }
        Ok(ret as usize)
    }

    fn is_trigger(&self) -> bool {
        // SAFETY: device handle valid while the context lives
        unsafe { iio_sys::iio_device_is_trigger(self.handle.as_ptr()) }
    }

    fn write_attr_i64(&self, attr: &str, value: i64) -> Result<()> {
        let c_attr = CString::new(attr)
            .map_err(|_| WriteDevError::invalid_config("attribute contains a NUL byte"))?;
        // SAFETY: device handle and c_attr are valid
        let ret = unsafe {
            iio_sys::iio_device_attr_write_longlong(self.handle.as_ptr(), c_attr.as_ptr(), value)
        };
        if ret < 0 {
            return Err(WriteDevError::Attribute {
                attr: attr.to_string(),
                message: strerror(-ret),
            });
        }
        Ok(())
    }

    fn set_trigger(&mut self, trigger: &Self) -> Result<()> {
        // SAFETY: both handles belong to live contexts
        let ret =
            unsafe { iio_sys::iio_device_set_trigger(self.handle.as_ptr(), trigger.handle.as_ptr()) };
        if ret < 0 {
            return Err(WriteDevError::SetTrigger {
                message: strerror(-ret),
            });
        }
        Ok(())
    }

    fn create_buffer(&mut self, capacity: usize, cyclic: bool) -> Result<IioBuffer> {
        let enabled = self.enabled_channels();

        // SAFETY: device handle valid while the context lives
        let raw = unsafe { iio_sys::iio_device_create_buffer(self.handle.as_ptr(), capacity, cyclic) };
        let handle = NonNull::new(raw).ok_or_else(|| WriteDevError::BufferAllocation {
            message: strerror(last_errno()),
        })?;

        debug!(
            device = %self.name(),
            capacity = capacity,
            cyclic = cyclic,
            channels = enabled.len(),
            "Created IIO buffer"
        );

        Ok(IioBuffer {
            inner: Arc::new(BufferInner {
                handle,
                cancelled: AtomicBool::new(false),
                _context: Arc::clone(&self.context),
            }),
            capacity,
            enabled,
        })
    }
}

// =============================================================================
// Buffer
// =============================================================================

struct BufferInner {
    handle: NonNull<iio_buffer>,
    cancelled: AtomicBool,
    _context: Arc<ContextInner>,
}

// SAFETY: iio_buffer_cancel is the only call made from another thread, and
// libiio documents it as safe to call while a push is blocked.
unsafe impl Send for BufferInner {}
unsafe impl Sync for BufferInner {}

impl Drop for BufferInner {
    fn drop(&mut self) {
        debug!("Destroying IIO buffer");
        // SAFETY: handle is valid and owned; no other reference remains
        unsafe { iio_sys::iio_buffer_destroy(self.handle.as_ptr()) }
    }
}

struct IioCancel {
    inner: Arc<BufferInner>,
}

impl BufferCancel for IioCancel {
    fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // SAFETY: the buffer is alive as long as this handle holds it
        unsafe { iio_sys::iio_buffer_cancel(self.inner.handle.as_ptr()) }
    }
}

/// An output buffer of an [`IioDevice`].
pub struct IioBuffer {
    inner: Arc<BufferInner>,
    capacity: usize,
    enabled: Vec<(*const iio_channel, usize)>,
}

struct ScanState<'a, 'b> {
    visit: &'a mut dyn FnMut(SampleSlot<'_>) -> SampleFlow,
    enabled: &'b [(*const iio_channel, usize)],
    visited: usize,
    stopped: bool,
}

/// Whether a visit of `chn` closes a sample.
///
/// libiio calls back once per enabled channel per sample. For a channel with
/// `repeat > 1` only the first element is handed over and the rest are
/// skipped, so those channels are only partly written by the per-sample
/// path, but each sample is still counted once.
fn closes_sample(enabled: &[(*const iio_channel, usize)], chn: *const iio_channel) -> bool {
    enabled.last().map(|(ch, _)| *ch) == Some(chn)
}

unsafe extern "C" fn visit_slot(
    chn: *const iio_channel,
    src: *mut c_void,
    bytes: usize,
    data: *mut c_void,
) -> isize {
    let state = &mut *(data as *mut ScanState<'_, '_>);
    let Some(channel) = state.enabled.iter().find(|(ch, _)| *ch == chn).map(|(_, i)| *i) else {
        return bytes as isize;
    };
    let last_in_sample = closes_sample(state.enabled, chn);
    let slot = SampleSlot {
        channel,
        data: std::slice::from_raw_parts_mut(src as *mut u8, bytes),
        last_in_sample,
    };

    let flow = panic::catch_unwind(AssertUnwindSafe(|| (state.visit)(slot)));
    state.visited += bytes;
    match flow {
        Ok(SampleFlow::Continue) => bytes as isize,
        Ok(SampleFlow::Stop) | Err(_) => {
            state.stopped = true;
            -1
        }
    }
}

impl HardwareBuffer for IioBuffer {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn step(&self) -> usize {
        // SAFETY: buffer handle is valid
        let step = unsafe { iio_sys::iio_buffer_step(self.inner.handle.as_ptr()) };
        step.max(0) as usize
    }

    fn window(&mut self) -> &mut [u8] {
        // SAFETY: start..end is the buffer's own memory, valid until the next
        // push; &mut self keeps it exclusive
        unsafe {
            let start = iio_sys::iio_buffer_start(self.inner.handle.as_ptr()) as *mut u8;
            let end = iio_sys::iio_buffer_end(self.inner.handle.as_ptr()) as *mut u8;
            if start.is_null() || end <= start {
                return &mut [];
            }
            std::slice::from_raw_parts_mut(start, end as usize - start as usize)
        }
    }

    fn foreach_sample(
        &mut self,
        visit: &mut dyn FnMut(SampleSlot<'_>) -> SampleFlow,
    ) -> Result<usize> {
        let mut state = ScanState {
            visit,
            enabled: &self.enabled,
            visited: 0,
            stopped: false,
        };
        // SAFETY: state outlives the call; the callback only touches slot
        // memory handed out by libiio
        let ret = unsafe {
            iio_sys::iio_buffer_foreach_sample(
                self.inner.handle.as_ptr(),
                visit_slot,
                &mut state as *mut ScanState<'_, '_> as *mut c_void,
            )
        };
        if ret < 0 && !state.stopped {
            return Err(WriteDevError::SampleScan {
                message: strerror(-(ret as i32)),
            });
        }
        Ok(state.visited)
    }

    fn push(&mut self, samples: usize) -> Result<()> {
        let handle = self.inner.handle.as_ptr();
        // SAFETY: buffer handle is valid
        let ret = unsafe {
            if samples >= self.capacity {
                iio_sys::iio_buffer_push(handle)
            } else {
                iio_sys::iio_buffer_push_partial(handle, samples)
            }
        };
        if ret < 0 {
            if self.inner.cancelled.load(Ordering::SeqCst) {
                return Err(WriteDevError::Cancelled);
            }
            let errno = ret.unsigned_abs() as i32;
            warn!(errno = errno, "Buffer push failed");
            return Err(WriteDevError::Push {
                message: strerror(errno),
            });
        }
        Ok(())
    }

    fn canceller(&self) -> Arc<dyn BufferCancel> {
        Arc::new(IioCancel {
            inner: Arc::clone(&self.inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Needs a libiio context; set IIO_WRITEDEV_HW_URI (e.g. "ip:192.168.2.1")
    /// and IIO_WRITEDEV_HW_DEVICE to run.
    #[test]
    fn test_hardware_open_and_enable() {
        let (Ok(uri), Ok(device)) = (
            std::env::var("IIO_WRITEDEV_HW_URI"),
            std::env::var("IIO_WRITEDEV_HW_DEVICE"),
        ) else {
            eprintln!("IIO_WRITEDEV_HW_URI/IIO_WRITEDEV_HW_DEVICE not set, skipping");
            return;
        };

        let ctx = IioContext::open(Some(&uri), Some(5000)).unwrap();
        let mut dev = ctx.find_device(&device).unwrap();
        let outputs: Vec<_> = dev.channels().into_iter().filter(|c| c.output).collect();
        assert!(!outputs.is_empty());
        for ch in &outputs {
            dev.enable_channel(ch.index).unwrap();
        }
        assert!(dev.sample_size().unwrap() > 0);

        let buf = dev.create_buffer(256, false).unwrap();
        assert_eq!(buf.capacity(), 256);
        assert!(buf.step() > 0);
    }

    #[test]
    fn test_only_last_enabled_channel_closes_sample() {
        let slots = [0u8; 3];
        let chn = |i: usize| &slots[i] as *const u8 as *const iio_channel;
        let enabled = vec![(chn(0), 0), (chn(2), 2)];

        assert!(!closes_sample(&enabled, chn(0)));
        assert!(!closes_sample(&enabled, chn(1)));
        assert!(closes_sample(&enabled, chn(2)));
        assert!(!closes_sample(&[], chn(0)));
    }

    #[test]
    fn test_strerror_is_readable() {
        assert!(!strerror(libc::ENOENT).is_empty());
    }
}
