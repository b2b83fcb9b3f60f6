//! Low-level FFI bindings for libiio, the user-space library for Linux
//! Industrial I/O (IIO) devices.
//!
//! Only the subset needed to stream samples into output buffers is declared:
//! context and device lookup, channel enumeration and enablement, trigger
//! attributes, and the buffer lifecycle (create, window, foreach, push,
//! cancel, destroy).
//!
//! # Safety
//!
//! All functions in this crate are `unsafe` as they are direct FFI bindings.
//! For a safe wrapper, use the `hardware::iio` backend of `iio_writedev`.
//!
//! # Example (unsafe)
//!
//! ```no_run
//! use iio_sys::*;
//! use std::ffi::CString;
//!
//! unsafe {
//!     let ctx = iio_create_default_context();
//!     if !ctx.is_null() {
//!         let name = CString::new("cf-ad9361-dds-core-lpc").unwrap();
//!         let dev = iio_context_find_device(ctx, name.as_ptr());
//!         if !dev.is_null() {
//!             println!("{} channels", iio_device_get_channels_count(dev));
//!         }
//!         iio_context_destroy(ctx);
//!     }
//! }
//! ```

#![allow(non_camel_case_types)]
#![allow(clippy::all)]

use std::os::raw::{c_char, c_int, c_longlong, c_uint, c_void};

/// Opaque libiio context.
#[repr(C)]
pub struct iio_context {
    _private: [u8; 0],
}

/// Opaque libiio device (also used for triggers).
#[repr(C)]
pub struct iio_device {
    _private: [u8; 0],
}

/// Opaque libiio channel.
#[repr(C)]
pub struct iio_channel {
    _private: [u8; 0],
}

/// Opaque libiio buffer.
#[repr(C)]
pub struct iio_buffer {
    _private: [u8; 0],
}

/// Callback invoked by [`iio_buffer_foreach_sample`] once per enabled
/// channel per sample. A negative return aborts the iteration and is
/// returned by `iio_buffer_foreach_sample`.
pub type iio_sample_callback = unsafe extern "C" fn(
    chn: *const iio_channel,
    src: *mut c_void,
    bytes: usize,
    data: *mut c_void,
) -> isize;

extern "C" {
    // Context
    pub fn iio_create_default_context() -> *mut iio_context;
    pub fn iio_create_context_from_uri(uri: *const c_char) -> *mut iio_context;
    pub fn iio_context_destroy(ctx: *mut iio_context);
    pub fn iio_context_set_timeout(ctx: *mut iio_context, timeout_ms: c_uint) -> c_int;
    pub fn iio_context_find_device(ctx: *const iio_context, name: *const c_char)
        -> *mut iio_device;

    // Device
    pub fn iio_device_get_id(dev: *const iio_device) -> *const c_char;
    pub fn iio_device_get_name(dev: *const iio_device) -> *const c_char;
    pub fn iio_device_get_channels_count(dev: *const iio_device) -> c_uint;
    pub fn iio_device_get_channel(dev: *const iio_device, index: c_uint) -> *mut iio_channel;
    pub fn iio_device_get_sample_size(dev: *const iio_device) -> isize;
    pub fn iio_device_is_trigger(dev: *const iio_device) -> bool;
    pub fn iio_device_set_trigger(dev: *const iio_device, trigger: *const iio_device) -> c_int;
    pub fn iio_device_attr_write_longlong(
        dev: *const iio_device,
        attr: *const c_char,
        val: c_longlong,
    ) -> c_int;

    // Channel
    pub fn iio_channel_get_id(chn: *const iio_channel) -> *const c_char;
    pub fn iio_channel_get_name(chn: *const iio_channel) -> *const c_char;
    pub fn iio_channel_is_output(chn: *const iio_channel) -> bool;
    pub fn iio_channel_is_enabled(chn: *const iio_channel) -> bool;
    pub fn iio_channel_enable(chn: *mut iio_channel);

    // Buffer
    pub fn iio_device_create_buffer(
        dev: *const iio_device,
        samples_count: usize,
        cyclic: bool,
    ) -> *mut iio_buffer;
    pub fn iio_buffer_destroy(buf: *mut iio_buffer);
    pub fn iio_buffer_cancel(buf: *mut iio_buffer);
    pub fn iio_buffer_push(buf: *mut iio_buffer) -> isize;
    pub fn iio_buffer_push_partial(buf: *mut iio_buffer, samples_count: usize) -> isize;
    pub fn iio_buffer_start(buf: *const iio_buffer) -> *mut c_void;
    pub fn iio_buffer_end(buf: *const iio_buffer) -> *mut c_void;
    pub fn iio_buffer_step(buf: *const iio_buffer) -> isize;
    pub fn iio_buffer_foreach_sample(
        buf: *mut iio_buffer,
        callback: iio_sample_callback,
        data: *mut c_void,
    ) -> isize;

    // Errors
    pub fn iio_strerror(err: c_int, dst: *mut c_char, len: usize);
}
