//! Wire buffers and the value codec
//!
//! [`lower`] turns a value into a native-owned buffer for passing as a single
//! argument; [`lift`] decodes a native buffer and frees it exactly once, even
//! when decoding fails.

pub mod buffer;
pub mod codec;
mod macros;

pub use buffer::{BufferFreeFn, BufferOps, ForeignBytes, FromBytesFn, OwnedWireBuffer, WireBuffer};
pub use codec::{decode_exact, encode, read_len, take, write_len, CodecError, WireCodec};

use crate::fault::Fault;

/// Encode a value into a buffer allocated by the native side
pub fn lower<T: WireCodec>(ops: BufferOps, value: &T) -> OwnedWireBuffer {
    ops.alloc(&encode(value))
}

/// Decode a native buffer into a value; the buffer is freed on every path
///
/// A decode failure, including trailing bytes, is a protocol fault.
pub fn lift<T: WireCodec>(buffer: OwnedWireBuffer) -> T {
    let decoded = decode_exact::<T>(buffer.as_slice());
    drop(buffer);
    decoded.unwrap_or_else(|source| {
        Fault::Decode {
            type_name: std::any::type_name::<T>(),
            source,
        }
        .raise()
    })
}

/// Decode a buffer the native side passed to a host callback
///
/// # Safety
///
/// `raw` must be a live native allocation that the host now owns.
pub unsafe fn lift_raw<T: WireCodec>(ops: BufferOps, raw: WireBuffer) -> T {
    lift(OwnedWireBuffer::new(raw, ops))
}
