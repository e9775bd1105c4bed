//! Shared buffer state
//!
//! One `BufferContents` exists per buffer, no matter how many handles
//! point at it. It owns the descriptor, the host allocation (if the
//! runtime made one) and the binding to the device backend.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::{BufferError, BufferResult, MAX_BUFFER_BYTES};
use crate::device::DeviceSync;
use crate::runtime::arith::{checked_multiply, checked_multiply_assert};
use crate::runtime::{HostAllocation, RawBuffer, HOST_SLACK, MAX_DIMENSIONS};
use crate::types::Type;

static NEXT_NAME: AtomicU64 = AtomicU64::new(0);

/// Generate a process-wide unique name such as `b17`
pub fn unique_name(prefix: char) -> String {
    format!("{}{}", prefix, NEXT_NAME.fetch_add(1, Ordering::Relaxed))
}

fn resolve_name(name: &str) -> String {
    if name.is_empty() {
        unique_name('b')
    } else {
        name.to_string()
    }
}

fn ensure_scalar(ty: Type, name: &str) -> BufferResult<()> {
    if ty.is_scalar() {
        Ok(())
    } else {
        Err(BufferError::VectorType {
            name: name.to_string(),
            ty,
        })
    }
}

/// Column-major strides for `sizes`, whose nonzero product is already
/// known to fit in a u64
fn dense_strides(sizes: &[i32; MAX_DIMENSIONS], name: &str) -> BufferResult<[i32; MAX_DIMENSIONS]> {
    let mut stride = [0i32; MAX_DIMENSIONS];
    let mut running: u64 = 1;
    for (s, &extent) in stride.iter_mut().zip(sizes.iter()) {
        *s = i32::try_from(running).map_err(|_| BufferError::SizeOverflow {
            name: name.to_string(),
        })?;
        running = checked_multiply_assert(running, extent as u64);
    }
    Ok(stride)
}

pub(crate) struct BufferContents {
    /// The descriptor handed to compiled code
    pub(crate) raw: RawBuffer,
    /// Element type; the descriptor only records its size
    pub(crate) ty: Type,
    /// Set only when the runtime allocated the host memory itself
    pub(crate) allocation: Option<HostAllocation>,
    pub(crate) name: String,
    /// Backend that knows how to move this buffer between host and device.
    /// Not owned: the backend module outlives the buffers it produces.
    pub(crate) device: Option<Weak<dyn DeviceSync>>,
}

impl BufferContents {
    /// Build a dense buffer of the given shape.
    ///
    /// Sizes of 0 mark absent dimensions. Without `data` the host memory is
    /// allocated here, zeroed and 32-byte aligned; with `data` the caller's
    /// memory is adopted as-is and never freed by the buffer.
    pub(crate) fn allocate(
        ty: Type,
        sizes: [i32; MAX_DIMENSIONS],
        data: Option<NonNull<u8>>,
        name: &str,
    ) -> BufferResult<Self> {
        let name = resolve_name(name);
        ensure_scalar(ty, &name)?;

        for (dim, &extent) in sizes.iter().enumerate() {
            if extent < 0 {
                return Err(BufferError::NegativeExtent { name, dim, extent });
            }
        }

        let overflow = |name: &str| BufferError::SizeOverflow {
            name: name.to_string(),
        };

        let elem_size = ty.bytes();
        let mut count: u64 = 1;
        for &extent in sizes.iter().filter(|&&e| e != 0) {
            count = checked_multiply(count, extent as u64).ok_or_else(|| overflow(&name))?;
        }

        // Only runtime-owned memory is sized in bytes; caller memory is
        // bounded by the strides alone
        let (host, allocation, stride) = match data {
            Some(data) => (data.as_ptr(), None, dense_strides(&sizes, &name)?),
            None => {
                let bytes = checked_multiply(count, u64::from(elem_size))
                    .ok_or_else(|| overflow(&name))?;
                if bytes >= MAX_BUFFER_BYTES {
                    return Err(BufferError::TooLarge { name, bytes });
                }
                let stride = dense_strides(&sizes, &name)?;
                let allocation = HostAllocation::zeroed(bytes as usize).ok_or_else(|| {
                    BufferError::OutOfMemory {
                        name: name.clone(),
                        bytes: bytes + HOST_SLACK as u64,
                    }
                })?;
                (allocation.host_ptr(), Some(allocation), stride)
            }
        };

        tracing::debug!(
            name = %name,
            ty = %ty,
            extent = ?sizes,
            owned = allocation.is_some(),
            "created buffer"
        );

        Ok(Self {
            raw: RawBuffer {
                host,
                device: 0,
                elem_size,
                host_dirty: false,
                device_dirty: false,
                extent: sizes,
                stride,
                min: [0; MAX_DIMENSIONS],
            },
            ty,
            allocation,
            name,
            device: None,
        })
    }

    /// Adopt an existing descriptor verbatim. Nothing is allocated and
    /// nothing will be freed on the host side.
    pub(crate) fn wrap(ty: Type, raw: &RawBuffer, name: &str) -> BufferResult<Self> {
        let name = resolve_name(name);
        ensure_scalar(ty, &name)?;

        tracing::debug!(name = %name, ty = %ty, extent = ?raw.extent, "wrapped buffer");

        Ok(Self {
            raw: *raw,
            ty,
            allocation: None,
            name,
            device: None,
        })
    }

    pub(crate) fn bind_device(&mut self, provider: &Arc<dyn DeviceSync>) {
        self.device = Some(Arc::downgrade(provider));
    }

    /// The bound backend, if any and still alive
    pub(crate) fn device_interface(&self) -> Option<Arc<dyn DeviceSync>> {
        self.device.as_ref().and_then(Weak::upgrade)
    }
}

impl Drop for BufferContents {
    fn drop(&mut self) {
        if self.raw.device != 0 {
            match self.device_interface() {
                Some(provider) => {
                    tracing::debug!(name = %self.name, device = self.raw.device, "freeing device buffer");
                    provider.free_device_buffer(ptr::null_mut(), &mut self.raw);
                }
                None if self.device.is_some() => {
                    tracing::warn!(
                        name = %self.name,
                        device = self.raw.device,
                        "device backend dropped before buffer; device memory not released"
                    );
                }
                None => {
                    tracing::debug!(name = %self.name, "no device backend bound; skipping device free");
                }
            }
        }

        // Host memory goes only after the device side is released
        if let Some(allocation) = self.allocation.take() {
            tracing::debug!(name = %self.name, "releasing buffer host allocation");
            drop(allocation);
        }
    }
}
