//! Raw Buffer Descriptor
//!
//! The fixed-layout value exchanged with compiled pipelines and device
//! backends. Compiled code addresses these fields by offset, so the field
//! order and widths must never change.

use std::ptr;

use super::arith::checked_multiply;

/// Maximum number of buffer dimensions
pub const MAX_DIMENSIONS: usize = 4;

/// Raw buffer descriptor shared across module boundaries
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuffer {
    /// Host-resident bytes, null if the buffer has no host copy
    pub host: *mut u8,
    /// Opaque device handle, 0 if there is no device allocation
    pub device: u64,
    /// Bytes per element
    pub elem_size: u32,
    /// Host copy holds the most recent write
    pub host_dirty: bool,
    /// Device copy holds the most recent write
    pub device_dirty: bool,
    /// Size of each dimension; the first zero ends the shape
    pub extent: [i32; MAX_DIMENSIONS],
    /// Element stride of each dimension
    pub stride: [i32; MAX_DIMENSIONS],
    /// Coordinate of the first element in each dimension
    pub min: [i32; MAX_DIMENSIONS],
}

impl RawBuffer {
    /// A descriptor with no memory and no shape
    pub const fn empty() -> Self {
        Self {
            host: ptr::null_mut(),
            device: 0,
            elem_size: 0,
            host_dirty: false,
            device_dirty: false,
            extent: [0; MAX_DIMENSIONS],
            stride: [0; MAX_DIMENSIONS],
            min: [0; MAX_DIMENSIONS],
        }
    }

    /// Number of dimensions: the index of the first zero extent
    pub fn dimensions(&self) -> usize {
        self.extent
            .iter()
            .position(|&e| e == 0)
            .unwrap_or(MAX_DIMENSIONS)
    }

    /// Number of elements spanned by the nonzero extents, `None` on overflow
    /// or if an extent is negative
    pub fn element_count(&self) -> Option<u64> {
        self.extent
            .iter()
            .filter(|&&e| e != 0)
            .try_fold(1u64, |acc, &e| {
                let e = u64::try_from(e).ok()?;
                checked_multiply(acc, e)
            })
    }

    /// Bytes spanned by a dense descriptor, `None` on overflow
    pub fn byte_len(&self) -> Option<u64> {
        checked_multiply(self.element_count()?, u64::from(self.elem_size))
    }

    /// Whether a host copy exists
    pub fn has_host(&self) -> bool {
        !self.host.is_null()
    }

    /// Whether a device allocation exists
    pub fn has_device(&self) -> bool {
        self.device != 0
    }
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::empty()
    }
}
