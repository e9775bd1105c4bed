//! imgpipe - Runtime core for an image-processing pipeline compiler
//!
//! Compiled pipelines read and write multi-dimensional arrays through a
//! fixed-layout descriptor. This crate owns that memory side of the
//! system: reference-counted buffers, overflow-checked sizing, aligned
//! host allocation, and hooks into device backends that keep host and
//! accelerator copies in sync.
//!
//! # Features
//!
//! - **Shared buffers**: clonable handles with reference-counted teardown
//! - **Stable ABI**: `#[repr(C)]` descriptor passed to compiled code unchanged
//! - **Safe sizing**: every size product is overflow-checked before allocation
//! - **Aligned memory**: zeroed host memory at 32-byte alignment
//! - **Device sync**: backend callbacks loaded from a shared library
//!
//! # Example
//!
//! ```rust
//! use imgpipe::{Argument, Buffer, Type};
//!
//! let buf = Buffer::new(Type::float(32), [256, 256, 0, 0], None, "luma").unwrap();
//! assert_eq!(buf.dimensions().unwrap(), 2);
//! assert_eq!(buf.stride(1).unwrap(), 256);
//!
//! let arg = Argument::try_from(&buf).unwrap();
//! assert_eq!(arg.to_string(), "luma: buffer<float32>");
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │     Buffer      │  handle, clone = share
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │ BufferContents  │─────►│ DeviceSync (weak)│  copy / free callbacks
//! └────────┬────────┘      └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   RawBuffer     │  repr(C), read by compiled code
//! └─────────────────┘
//! ```

#![warn(clippy::all)]

pub mod argument;
pub mod buffer;
pub mod config;
pub mod device;
pub mod pipeline;
pub mod runtime;
pub mod types;

// Re-export commonly used types
pub use argument::{Argument, ArgumentKind};
pub use buffer::{Buffer, BufferError, BufferResult, MAX_BUFFER_BYTES};
pub use config::{ConfigError, DeviceConfig, RuntimeConfig};
pub use device::{DeviceCallbacks, DeviceError, DeviceModule, DeviceSync};
pub use pipeline::{pointwise_copies, CopyPair, Environment, PipelineError, StageDef};
pub use runtime::{RawBuffer, MAX_DIMENSIONS};
pub use types::{Type, TypeCode};
