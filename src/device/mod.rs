//! Device synchronization
//!
//! A buffer that lives (partly) on an accelerator needs three services from
//! whichever backend produced it: copy device data back to the host, push
//! host data to the device, and release the device allocation. Backends
//! provide them by implementing [`DeviceSync`].
//!
//! ```text
//! Buffer ──copy_to_host()──► DeviceSync::copy_to_host(null, &mut RawBuffer)
//!        ──copy_to_device()► DeviceSync::copy_to_device(null, &mut RawBuffer)
//!        ──drop (last)─────► DeviceSync::free_device_buffer(null, &mut RawBuffer)
//! ```
//!
//! Compiled backends are shared libraries exporting C callbacks; they are
//! loaded with [`DeviceModule`].

mod module;

pub use module::{library_filename, DeviceModule};

use std::ffi::c_void;

use crate::runtime::RawBuffer;

/// C signature of a device callback exported by a compiled backend
pub type DeviceFn = unsafe extern "C" fn(user_context: *mut c_void, buf: *mut RawBuffer);

/// Errors raised while binding a device backend
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to load device module '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("Device module not found: {0}")]
    NotFound(String),

    #[error("Invalid symbol name: {0}")]
    InvalidSymbol(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Host/device transfer services supplied by a backend.
///
/// Every method returns whether the backend actually implements it. The
/// defaults report the callback as absent, which callers treat as a no-op.
/// `user_context` is passed through to the backend untouched; the buffer
/// runtime always passes null.
pub trait DeviceSync {
    /// Copy the device copy of `buf` back into its host memory
    fn copy_to_host(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        let _ = (user_context, buf);
        false
    }

    /// Copy the host memory of `buf` to the device, allocating if needed
    fn copy_to_device(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        let _ = (user_context, buf);
        false
    }

    /// Release the device allocation referenced by `buf`
    fn free_device_buffer(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        let _ = (user_context, buf);
        false
    }
}

/// The three C callbacks of a backend, any of which may be absent
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCallbacks {
    pub copy_to_host: Option<DeviceFn>,
    pub copy_to_device: Option<DeviceFn>,
    pub free_device_buffer: Option<DeviceFn>,
}

impl DeviceCallbacks {
    /// No callbacks bound
    pub const fn none() -> Self {
        Self {
            copy_to_host: None,
            copy_to_device: None,
            free_device_buffer: None,
        }
    }

    /// Number of callbacks that are bound
    pub fn bound_count(&self) -> usize {
        [self.copy_to_host, self.copy_to_device, self.free_device_buffer]
            .iter()
            .filter(|f| f.is_some())
            .count()
    }
}

fn invoke(f: Option<DeviceFn>, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
    match f {
        Some(f) => {
            // SAFETY: buf is a live, exclusively borrowed descriptor for the
            // duration of the call; backends must not retain the pointer.
            unsafe { f(user_context, buf as *mut RawBuffer) };
            true
        }
        None => false,
    }
}

impl DeviceSync for DeviceCallbacks {
    fn copy_to_host(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        invoke(self.copy_to_host, user_context, buf)
    }

    fn copy_to_device(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        invoke(self.copy_to_device, user_context, buf)
    }

    fn free_device_buffer(&self, user_context: *mut c_void, buf: &mut RawBuffer) -> bool {
        invoke(self.free_device_buffer, user_context, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    unsafe extern "C" fn mark_device_dirty(_ctx: *mut c_void, buf: *mut RawBuffer) {
        (*buf).device_dirty = true;
        (*buf).device = 0xD0D0;
    }

    unsafe extern "C" fn clear_device(ctx: *mut c_void, buf: *mut RawBuffer) {
        assert!(ctx.is_null());
        (*buf).device = 0;
    }

    struct Unimplemented;
    impl DeviceSync for Unimplemented {}

    #[test]
    fn test_default_methods_are_absent() {
        let mut raw = RawBuffer::empty();
        let sync = Unimplemented;
        assert!(!sync.copy_to_host(ptr::null_mut(), &mut raw));
        assert!(!sync.copy_to_device(ptr::null_mut(), &mut raw));
        assert!(!sync.free_device_buffer(ptr::null_mut(), &mut raw));
        assert_eq!(raw, RawBuffer::empty());
    }

    #[test]
    fn test_callbacks_dispatch() {
        let callbacks = DeviceCallbacks {
            copy_to_device: Some(mark_device_dirty),
            free_device_buffer: Some(clear_device),
            ..DeviceCallbacks::none()
        };
        assert_eq!(callbacks.bound_count(), 2);

        let mut raw = RawBuffer::empty();
        assert!(!callbacks.copy_to_host(ptr::null_mut(), &mut raw));
        assert!(callbacks.copy_to_device(ptr::null_mut(), &mut raw));
        assert!(raw.device_dirty);
        assert_eq!(raw.device, 0xD0D0);

        assert!(callbacks.free_device_buffer(ptr::null_mut(), &mut raw));
        assert_eq!(raw.device, 0);
    }

    #[test]
    fn test_no_callbacks() {
        let callbacks = DeviceCallbacks::default();
        assert_eq!(callbacks.bound_count(), 0);
        let mut raw = RawBuffer::empty();
        assert!(!callbacks.free_device_buffer(ptr::null_mut(), &mut raw));
    }
}
