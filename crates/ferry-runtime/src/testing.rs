//! Helpers for unit tests: buffer entry points backed by the host allocator

use crate::status::CallStatus;
use crate::wire::{BufferOps, ForeignBytes, WireBuffer};

unsafe extern "C" fn from_bytes(bytes: ForeignBytes<'_>, _status: *mut CallStatus) -> WireBuffer {
    WireBuffer::from_vec(bytes.as_slice().to_vec())
}

unsafe extern "C" fn free(buffer: WireBuffer, _status: *mut CallStatus) {
    drop(buffer.into_vec());
}

pub(crate) fn vec_buffer_ops() -> BufferOps {
    BufferOps { from_bytes, free }
}
