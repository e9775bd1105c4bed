//! Buffer Lifecycle Tests
//!
//! Exercises buffers through the public API the way a pipeline driver
//! uses them: construction, shape queries, aliasing, and handing the raw
//! descriptor to compiled code.

use std::ptr::NonNull;

use imgpipe::runtime::{HOST_ALIGNMENT, MAX_DIMENSIONS};
use imgpipe::{Argument, Buffer, BufferError, RawBuffer, Type, MAX_BUFFER_BYTES};

/// Stand-in for a compiled pipeline: sums a 2-D uint8 buffer through the
/// descriptor alone
extern "C" fn sum_u8_2d(buf: *const RawBuffer) -> u64 {
    let buf = unsafe { &*buf };
    let mut total = 0u64;
    for y in 0..buf.extent[1] {
        for x in 0..buf.extent[0] {
            let offset = (x * buf.stride[0] + y * buf.stride[1]) as usize;
            total += unsafe { *buf.host.add(offset) } as u64;
        }
    }
    total
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_shapes_and_strides() {
    let types = [Type::uint(8), Type::int(16), Type::float(32), Type::float(64), Type::bool()];
    let shapes: [[i32; 4]; 6] = [
        [0, 0, 0, 0],
        [1, 0, 0, 0],
        [17, 0, 0, 0],
        [7, 5, 0, 0],
        [3, 4, 5, 0],
        [2, 3, 4, 5],
    ];

    for ty in types {
        for sizes in shapes {
            let buf = Buffer::new(ty, sizes, None, "").unwrap();
            let [x, y, z, _] = sizes;

            let rank = sizes.iter().take_while(|&&s| s != 0).count();
            assert_eq!(buf.dimensions().unwrap(), rank, "{:?}", sizes);
            for dim in 0..MAX_DIMENSIONS {
                assert_eq!(buf.extent(dim).unwrap(), sizes[dim]);
                assert_eq!(buf.min(dim).unwrap(), 0);
            }
            assert_eq!(buf.stride(0).unwrap(), 1);
            assert_eq!(buf.stride(1).unwrap(), x);
            assert_eq!(buf.stride(2).unwrap(), x * y);
            assert_eq!(buf.stride(3).unwrap(), x * y * z);

            let host = buf.host_ptr().unwrap();
            assert!(!host.is_null());
            assert_eq!(host as usize % HOST_ALIGNMENT, 0);
            assert_eq!(buf.raw_buffer().unwrap().elem_size, ty.bytes());
        }
    }
}

#[test]
fn test_errors_are_reported_not_allocated() {
    let vector = Buffer::new(Type::uint(8).with_lanes(8), [4, 0, 0, 0], None, "v");
    assert!(matches!(vector, Err(BufferError::VectorType { .. })));

    let five = Buffer::with_sizes(Type::uint(8), &[1, 1, 1, 1, 1], None, "");
    assert_eq!(five.unwrap_err(), BufferError::TooManyDimensions(5));

    let overflow = Buffer::new(Type::float(64), [i32::MAX; 4], None, "o");
    assert!(matches!(overflow, Err(BufferError::SizeOverflow { .. })));

    // float32: 2^29 elements is exactly 2^31 bytes
    let large = Buffer::new(Type::float(32), [1 << 15, 1 << 14, 0, 0], None, "l");
    match large {
        Err(BufferError::TooLarge { bytes, .. }) => assert!(bytes >= MAX_BUFFER_BYTES),
        other => panic!("expected TooLarge, got {:?}", other),
    }
}

#[test]
fn test_error_messages() {
    let err = Buffer::new(Type::float(32).with_lanes(4), [1, 0, 0, 0], None, "vec").unwrap_err();
    assert_eq!(err.to_string(), "Can't create buffer vec of vector type float32x4");

    let buf = Buffer::new(Type::uint(8), [1, 0, 0, 0], None, "img").unwrap();
    let err = buf.extent(4).unwrap_err();
    assert!(err.to_string().contains("only 4-dimensional buffers are supported"));
}

// ============================================================================
// Sharing
// ============================================================================

#[test]
fn test_clones_alias_one_buffer() {
    let a = Buffer::new(Type::int(32), [8, 8, 0, 0], None, "shared").unwrap();
    let b = a.clone();
    let c = b.clone();
    assert_eq!(a.ref_count(), 3);
    assert!(a.same_as(&c));
    assert_eq!(a.host_ptr().unwrap(), c.host_ptr().unwrap());

    c.set_min(-4, -4, 0, 0).unwrap();
    c.set_host_dirty(true).unwrap();
    assert_eq!(a.min(0).unwrap(), -4);
    assert!(a.host_dirty().unwrap());

    drop(b);
    drop(c);
    assert_eq!(a.ref_count(), 1);
    assert_eq!(a.name().unwrap(), "shared");
}

#[test]
fn test_distinct_buffers_differ() {
    let a = Buffer::new(Type::uint(8), [4, 0, 0, 0], None, "").unwrap();
    let b = Buffer::new(Type::uint(8), [4, 0, 0, 0], None, "").unwrap();
    assert!(!a.same_as(&b));
    assert_ne!(a.name().unwrap(), b.name().unwrap());
    assert_ne!(a.host_ptr().unwrap(), b.host_ptr().unwrap());
}

// ============================================================================
// Compiled-code boundary
// ============================================================================

#[test]
fn test_descriptor_reaches_compiled_code() {
    let buf = Buffer::new(Type::uint(8), [4, 3, 0, 0], None, "img").unwrap();
    buf.with_host_bytes(|bytes| {
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
    })
    .unwrap()
    .unwrap();

    let total = {
        let raw = buf.raw_buffer().unwrap();
        sum_u8_2d(&*raw)
    };
    assert_eq!(total, (0..12).sum::<u64>());
}

#[test]
fn test_compiled_code_writes_are_visible() {
    let buf = Buffer::new(Type::uint(8), [16, 0, 0, 0], None, "").unwrap();
    {
        let mut raw = buf.raw_buffer().unwrap();
        raw.host_dirty = true;
        unsafe { *raw.host.add(15) = 0x7F };
    }
    assert!(buf.host_dirty().unwrap());
    let last = buf.with_host_bytes(|bytes| bytes[15]).unwrap();
    assert_eq!(last, Some(0x7F));
}

#[test]
fn test_wrap_caller_memory() {
    let mut pixels: Vec<u8> = (0..20).collect();
    let data = NonNull::new(pixels.as_mut_ptr()).unwrap();

    let buf = Buffer::new(Type::uint(8), [5, 4, 0, 0], Some(data), "caller").unwrap();
    let total = sum_u8_2d(&*buf.raw_buffer().unwrap());
    assert_eq!(total, (0..20).sum::<u64>());

    let mut raw = *buf.raw_buffer().unwrap();
    raw.min = [1, 1, 0, 0];
    let view = Buffer::from_raw(Type::uint(8), &raw, "view").unwrap();
    assert_eq!(view.host_ptr().unwrap(), pixels.as_mut_ptr());
    assert_eq!(view.min(1).unwrap(), 1);

    drop(buf);
    drop(view);
    // Neither buffer freed the caller's memory
    assert_eq!(pixels[19], 19);
}

#[test]
fn test_argument_projection() {
    let buf = Buffer::new(Type::float(32), [3, 0, 0, 0], None, "weights").unwrap();
    let arg: Argument = (&buf).try_into().unwrap();
    assert_eq!(arg.name, "weights");
    assert_eq!(arg.ty, Type::float(32));
    assert!(arg.is_buffer());

    assert_eq!(Argument::try_from(&Buffer::default()).unwrap_err(), BufferError::Undefined);
}
