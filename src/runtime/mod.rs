//! Runtime module
//!
//! Low-level pieces shared by buffers and compiled pipelines: the raw
//! buffer descriptor, overflow-checked size arithmetic, and aligned host
//! allocation.

pub mod arith;
pub mod host_alloc;
pub mod raw_buffer;

pub use arith::{checked_multiply, checked_multiply_assert};
pub use host_alloc::{HostAllocation, HOST_ALIGNMENT, HOST_SLACK};
pub use raw_buffer::{RawBuffer, MAX_DIMENSIONS};
