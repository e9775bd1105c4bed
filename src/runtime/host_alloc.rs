//! Aligned host allocations
//!
//! Zero-initialized host memory handed out at a fixed alignment with a
//! trailing slack region. The allocation base (what gets freed) is tracked
//! separately from the aligned pointer exposed through the descriptor.

use std::ptr::NonNull;

/// Alignment of every runtime-owned host pointer
pub const HOST_ALIGNMENT: usize = 32;

/// Extra bytes added to every runtime-owned host allocation
pub const HOST_SLACK: usize = 32;

/// Zeroed, aligned host memory owned by a buffer
#[derive(Debug)]
pub struct HostAllocation {
    /// Pointer returned by the allocator
    base: NonNull<u8>,
    /// First aligned byte inside the allocation
    host: NonNull<u8>,
    /// Usable bytes requested by the caller, starting at `host`
    len: usize,
    /// Total bytes allocated, slack included
    size: usize,
}

impl HostAllocation {
    /// Allocate `bytes` usable bytes plus slack, zero-filled.
    ///
    /// Returns `None` if the allocator fails or the size cannot be
    /// represented.
    pub fn zeroed(bytes: usize) -> Option<Self> {
        let size = bytes.checked_add(HOST_SLACK)?;
        let base = allocate_aligned(size)?;

        let offset = base.as_ptr().align_offset(HOST_ALIGNMENT);
        if offset >= size {
            deallocate_aligned(base, size);
            return None;
        }
        // SAFETY: offset < size, so the aligned pointer stays inside the allocation
        let host = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };

        tracing::debug!(
            bytes,
            size,
            base = ?base.as_ptr(),
            host = ?host.as_ptr(),
            "allocated host memory"
        );

        Some(Self {
            base,
            host,
            len: bytes,
            size,
        })
    }

    /// Aligned pointer for clients
    pub fn host_ptr(&self) -> *mut u8 {
        self.host.as_ptr()
    }

    /// Usable bytes past [`HostAllocation::host_ptr`]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer that will be released on drop
    pub fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Total allocated bytes, slack included
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        tracing::debug!(size = self.size, base = ?self.base.as_ptr(), "releasing host memory");
        deallocate_aligned(self.base, self.size);
    }
}

// Platform-specific aligned allocation

#[cfg(unix)]
fn allocate_aligned(size: usize) -> Option<NonNull<u8>> {
    let mut ptr: *mut libc::c_void = std::ptr::null_mut();
    // SAFETY: HOST_ALIGNMENT is a power of two and a multiple of the pointer size
    let rc = unsafe { libc::posix_memalign(&mut ptr, HOST_ALIGNMENT, size) };
    if rc != 0 {
        return None;
    }
    let ptr = NonNull::new(ptr as *mut u8)?;
    // SAFETY: posix_memalign returned `size` writable bytes
    unsafe {
        std::ptr::write_bytes(ptr.as_ptr(), 0, size);
    }
    Some(ptr)
}

#[cfg(unix)]
fn deallocate_aligned(ptr: NonNull<u8>, _size: usize) {
    // SAFETY: ptr came from posix_memalign and is freed exactly once
    unsafe {
        libc::free(ptr.as_ptr() as *mut libc::c_void);
    }
}

#[cfg(not(unix))]
fn allocate_aligned(size: usize) -> Option<NonNull<u8>> {
    let layout = std::alloc::Layout::from_size_align(size, HOST_ALIGNMENT).ok()?;
    // SAFETY: size includes the slack, so the layout is never zero-sized
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    NonNull::new(ptr)
}

#[cfg(not(unix))]
fn deallocate_aligned(ptr: NonNull<u8>, size: usize) {
    // The layout was valid when the block was allocated
    if let Ok(layout) = std::alloc::Layout::from_size_align(size, HOST_ALIGNMENT) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_and_slack() {
        for bytes in [0usize, 1, 3, 31, 32, 33, 4096, 100_000] {
            let alloc = HostAllocation::zeroed(bytes).unwrap();
            assert_eq!(alloc.host_ptr() as usize % HOST_ALIGNMENT, 0);
            assert_eq!(alloc.size(), bytes + HOST_SLACK);
            assert_eq!(alloc.len(), bytes);
            assert_eq!(alloc.is_empty(), bytes == 0);
            assert!(alloc.host_ptr() >= alloc.base_ptr());
        }
    }

    #[test]
    fn test_zero_filled() {
        let alloc = HostAllocation::zeroed(1024).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(alloc.host_ptr(), 1024) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_writable() {
        let alloc = HostAllocation::zeroed(64).unwrap();
        unsafe {
            std::ptr::write_bytes(alloc.host_ptr(), 0xAB, 64);
            assert_eq!(*alloc.host_ptr().add(63), 0xAB);
        }
    }

    #[test]
    fn test_unrepresentable_size() {
        assert!(HostAllocation::zeroed(usize::MAX).is_none());
    }
}
