//! Buffers
//!
//! A [`Buffer`] is a cheap, clonable handle to a multi-dimensional array
//! used by a pipeline. Clones share one underlying buffer: a mutation made
//! through any handle is visible through all of them, and the memory is
//! released when the last handle goes away.
//!
//! # Memory
//!
//! Host memory is either allocated by the runtime (zeroed, 32-byte aligned)
//! or supplied by the caller, in which case the buffer never frees it. A
//! buffer produced on an accelerator additionally carries a device handle
//! and a binding to the backend that can move its data around:
//!
//! ```text
//! Buffer ─┬─ host memory  (owned or borrowed)
//!         ├─ device handle (0 = none)
//!         └─ DeviceSync backend (weak) ──► copy_to_host / copy_to_device / free
//! ```
//!
//! Teardown releases device memory first, then host memory.
//!
//! # Threading
//!
//! Handles share state through a non-atomic reference count, so `Buffer`
//! is neither `Send` nor `Sync`. Confine each buffer to one thread.
//!
//! # Example
//!
//! ```rust
//! use imgpipe::{Buffer, Type};
//!
//! let image = Buffer::new(Type::uint(8), [640, 480, 3, 0], None, "input").unwrap();
//! assert_eq!(image.dimensions().unwrap(), 3);
//! assert_eq!(image.stride(2).unwrap(), 640 * 480);
//!
//! let alias = image.clone();
//! alias.set_min(10, 20, 0, 0).unwrap();
//! assert_eq!(image.min(1).unwrap(), 20);
//! assert!(alias.same_as(&image));
//! ```

mod contents;

pub use contents::unique_name;

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;

use crate::argument::Argument;
use crate::device::DeviceSync;
use crate::runtime::{RawBuffer, MAX_DIMENSIONS};
use crate::types::Type;
use contents::BufferContents;

/// Buffers must span strictly fewer bytes than this
pub const MAX_BUFFER_BYTES: u64 = (1 << 31) - 1;

/// Buffer contract violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("Buffer is undefined")]
    Undefined,

    #[error("Buffer is already borrowed; drop the raw descriptor guard first")]
    Borrowed,

    #[error("Buffer {name}: dimension {dim} out of range; only 4-dimensional buffers are supported")]
    DimensionOutOfRange { name: String, dim: usize },

    #[error("Buffer dimensions greater than 4 are not supported (got {0})")]
    TooManyDimensions(usize),

    #[error("Can't create buffer {name} of vector type {ty}")]
    VectorType { name: String, ty: Type },

    #[error("Buffer {name} has negative extent {extent} in dimension {dim}")]
    NegativeExtent {
        name: String,
        dim: usize,
        extent: i32,
    },

    #[error("Size of buffer {name} overflows")]
    SizeOverflow { name: String },

    #[error("Total size of buffer {name} exceeds 2^31 - 1 ({bytes} bytes)")]
    TooLarge { name: String, bytes: u64 },

    #[error("Out of memory allocating buffer {name} of size {bytes}")]
    OutOfMemory { name: String, bytes: u64 },
}

/// Result type for buffer operations
pub type BufferResult<T> = Result<T, BufferError>;

/// Handle to a shared, reference-counted buffer.
///
/// `Buffer::default()` is the undefined handle; every accessor on it
/// returns [`BufferError::Undefined`].
#[derive(Clone, Default)]
pub struct Buffer {
    contents: Option<Rc<RefCell<BufferContents>>>,
}

impl Buffer {
    /// Create a dense buffer with up to four dimensions.
    ///
    /// A size of 0 marks a dimension as absent. Without `data` the runtime
    /// allocates zeroed, 32-byte aligned host memory; with `data` the
    /// buffer uses the caller's memory and never frees it. An empty `name`
    /// gets a generated unique name.
    pub fn new(
        ty: Type,
        sizes: [i32; MAX_DIMENSIONS],
        data: Option<NonNull<u8>>,
        name: &str,
    ) -> BufferResult<Self> {
        let contents = BufferContents::allocate(ty, sizes, data, name)?;
        Ok(Self::from_contents(contents))
    }

    /// Create a dense buffer from a list of at most four sizes
    pub fn with_sizes(
        ty: Type,
        sizes: &[i32],
        data: Option<NonNull<u8>>,
        name: &str,
    ) -> BufferResult<Self> {
        if sizes.len() > MAX_DIMENSIONS {
            return Err(BufferError::TooManyDimensions(sizes.len()));
        }
        let mut padded = [0i32; MAX_DIMENSIONS];
        padded[..sizes.len()].copy_from_slice(sizes);
        Self::new(ty, padded, data, name)
    }

    /// Wrap an existing descriptor. Nothing is allocated, and the host
    /// memory it points to is never freed by the buffer.
    pub fn from_raw(ty: Type, raw: &RawBuffer, name: &str) -> BufferResult<Self> {
        let contents = BufferContents::wrap(ty, raw, name)?;
        Ok(Self::from_contents(contents))
    }

    fn from_contents(contents: BufferContents) -> Self {
        Self {
            contents: Some(Rc::new(RefCell::new(contents))),
        }
    }

    fn contents(&self) -> BufferResult<&Rc<RefCell<BufferContents>>> {
        self.contents.as_ref().ok_or(BufferError::Undefined)
    }

    fn borrow(&self) -> BufferResult<Ref<'_, BufferContents>> {
        self.contents()?
            .try_borrow()
            .map_err(|_| BufferError::Borrowed)
    }

    fn borrow_mut(&self) -> BufferResult<RefMut<'_, BufferContents>> {
        self.contents()?
            .try_borrow_mut()
            .map_err(|_| BufferError::Borrowed)
    }

    fn read<R>(&self, f: impl FnOnce(&BufferContents) -> R) -> BufferResult<R> {
        Ok(f(&*self.borrow()?))
    }

    fn write<R>(&self, f: impl FnOnce(&mut BufferContents) -> R) -> BufferResult<R> {
        Ok(f(&mut *self.borrow_mut()?))
    }

    fn check_dim(&self, dim: usize) -> BufferResult<()> {
        if dim < MAX_DIMENSIONS {
            Ok(())
        } else {
            Err(BufferError::DimensionOutOfRange {
                name: self.name()?,
                dim,
            })
        }
    }

    /// Pointer to the first host element (null if there is no host copy)
    pub fn host_ptr(&self) -> BufferResult<*mut u8> {
        self.read(|c| c.raw.host)
    }

    /// Mutable access to the raw descriptor, for passing to compiled code.
    ///
    /// While the returned guard is alive, every other access to the buffer
    /// through any handle fails with [`BufferError::Borrowed`].
    pub fn raw_buffer(&self) -> BufferResult<RefMut<'_, RawBuffer>> {
        Ok(RefMut::map(self.borrow_mut()?, |c| &mut c.raw))
    }

    /// Opaque device handle, 0 if the buffer has no device allocation
    pub fn device_handle(&self) -> BufferResult<u64> {
        self.read(|c| c.raw.device)
    }

    pub fn host_dirty(&self) -> BufferResult<bool> {
        self.read(|c| c.raw.host_dirty)
    }

    pub fn set_host_dirty(&self, dirty: bool) -> BufferResult<()> {
        self.write(|c| c.raw.host_dirty = dirty)
    }

    pub fn device_dirty(&self) -> BufferResult<bool> {
        self.read(|c| c.raw.device_dirty)
    }

    pub fn set_device_dirty(&self, dirty: bool) -> BufferResult<()> {
        self.write(|c| c.raw.device_dirty = dirty)
    }

    /// Number of dimensions: the index of the first zero extent, at most 4
    pub fn dimensions(&self) -> BufferResult<usize> {
        self.read(|c| c.raw.dimensions())
    }

    pub fn extent(&self, dim: usize) -> BufferResult<i32> {
        self.check_dim(dim)?;
        self.read(|c| c.raw.extent[dim])
    }

    pub fn stride(&self, dim: usize) -> BufferResult<i32> {
        self.check_dim(dim)?;
        self.read(|c| c.raw.stride[dim])
    }

    pub fn min(&self, dim: usize) -> BufferResult<i32> {
        self.check_dim(dim)?;
        self.read(|c| c.raw.min[dim])
    }

    /// Replace the coordinate origin of all four dimensions at once
    pub fn set_min(&self, m0: i32, m1: i32, m2: i32, m3: i32) -> BufferResult<()> {
        self.write(|c| c.raw.min = [m0, m1, m2, m3])
    }

    pub fn ty(&self) -> BufferResult<Type> {
        self.read(|c| c.ty)
    }

    pub fn name(&self) -> BufferResult<String> {
        self.read(|c| c.name.clone())
    }

    /// Whether this handle refers to a buffer
    pub fn defined(&self) -> bool {
        self.contents.is_some()
    }

    /// Whether both handles share the same underlying buffer
    pub fn same_as(&self, other: &Buffer) -> bool {
        match (&self.contents, &other.contents) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Number of handles sharing this buffer (0 if undefined)
    pub fn ref_count(&self) -> usize {
        self.contents.as_ref().map_or(0, Rc::strong_count)
    }

    /// Number of elements spanned by the nonzero extents
    pub fn element_count(&self) -> BufferResult<u64> {
        let name = self.name()?;
        self.read(|c| c.raw.element_count())?
            .ok_or(BufferError::SizeOverflow { name })
    }

    /// Bytes spanned by the nonzero extents
    pub fn size_in_bytes(&self) -> BufferResult<u64> {
        let name = self.name()?;
        self.read(|c| c.raw.byte_len())?
            .ok_or(BufferError::SizeOverflow { name })
    }

    /// Run `f` over the host bytes of a buffer whose memory the runtime
    /// allocated.
    ///
    /// Returns `None` for wrapped or caller-supplied memory, whose extent
    /// the runtime cannot vouch for, and when the descriptor has been
    /// edited to span more bytes than were allocated.
    pub fn with_host_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> BufferResult<Option<R>> {
        let c = self.borrow_mut()?;
        let allocation = match &c.allocation {
            Some(allocation) => allocation,
            None => return Ok(None),
        };
        let len = match c.raw.byte_len() {
            Some(len) if len <= allocation.len() as u64 => len as usize,
            _ => return Ok(None),
        };
        // SAFETY: len is within the usable bytes of the allocation, which
        // stays alive for the call; the RefCell borrow keeps other handles out.
        let bytes = unsafe { std::slice::from_raw_parts_mut(allocation.host_ptr(), len) };
        Ok(Some(f(bytes)))
    }

    /// Describe this buffer as a pipeline argument
    pub fn to_argument(&self) -> BufferResult<Argument> {
        self.read(|c| Argument::buffer(c.name.clone(), c.ty))
    }

    /// Bind the backend that owns this buffer's device side.
    ///
    /// Only a weak reference is kept; the caller keeps the backend alive
    /// for as long as the buffer may need it.
    pub fn set_device_interface(&self, provider: &Arc<dyn DeviceSync>) -> BufferResult<()> {
        self.write(|c| c.bind_device(provider))
    }

    /// The bound backend, `None` if unbound or already dropped
    pub fn device_interface(&self) -> BufferResult<Option<Arc<dyn DeviceSync>>> {
        self.read(|c| c.device_interface())
    }

    /// Bring device data back to the host.
    ///
    /// Returns whether a backend callback ran. Without a bound backend, or
    /// if the backend has no such callback, nothing happens.
    pub fn copy_to_host(&self) -> BufferResult<bool> {
        self.dispatch("copy_to_host", |p, raw| p.copy_to_host(ptr::null_mut(), raw))
    }

    /// Push host data to the device; see [`Buffer::copy_to_host`]
    pub fn copy_to_device(&self) -> BufferResult<bool> {
        self.dispatch("copy_to_device", |p, raw| {
            p.copy_to_device(ptr::null_mut(), raw)
        })
    }

    /// Release the device allocation now; see [`Buffer::copy_to_host`]
    pub fn free_device_buffer(&self) -> BufferResult<bool> {
        self.dispatch("free_device_buffer", |p, raw| {
            p.free_device_buffer(ptr::null_mut(), raw)
        })
    }

    fn dispatch(
        &self,
        op: &'static str,
        call: impl FnOnce(&dyn DeviceSync, &mut RawBuffer) -> bool,
    ) -> BufferResult<bool> {
        let provider = match self.device_interface()? {
            Some(provider) => provider,
            None => {
                tracing::trace!(op, "no device backend bound");
                return Ok(false);
            }
        };
        let mut raw = self.raw_buffer()?;
        let ran = call(provider.as_ref(), &mut raw);
        tracing::trace!(op, ran, device = raw.device, "device callback dispatched");
        Ok(ran)
    }
}

impl TryFrom<&Buffer> for Argument {
    type Error = BufferError;

    fn try_from(buffer: &Buffer) -> Result<Self, Self::Error> {
        buffer.to_argument()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.contents {
            None => write!(f, "Buffer(undefined)"),
            Some(contents) => {
                let Ok(c) = contents.try_borrow() else {
                    return write!(f, "Buffer(borrowed)");
                };
                f.debug_struct("Buffer")
                    .field("name", &c.name)
                    .field("type", &c.ty.to_string())
                    .field("extent", &c.raw.extent)
                    .field("min", &c.raw.min)
                    .field("owned", &c.allocation.is_some())
                    .field("device", &c.raw.device)
                    .finish()
            }
        }
    }
}
