//! Wire buffers exchanged with the native library
//!
//! Two lifetimes exist:
//! - [`WireBuffer`]s allocated by the native side. The host wraps them in an
//!   [`OwnedWireBuffer`], which hands them back to the native free function
//!   exactly once when dropped.
//! - [`ForeignBytes`] built by the host over its own memory. They borrow the
//!   host slice for the duration of a single call and are never freed by the
//!   native side.

use crate::fault::Fault;
use crate::status::{self, CallStatus};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;

/// Native entry point copying host bytes into a native-owned buffer
pub type FromBytesFn =
    for<'a> unsafe extern "C" fn(bytes: ForeignBytes<'a>, status: *mut CallStatus) -> WireBuffer;

/// Native entry point releasing a native-owned buffer
pub type BufferFreeFn = unsafe extern "C" fn(buffer: WireBuffer, status: *mut CallStatus);

/// Growable byte buffer crossing the C ABI
///
/// A zero-length buffer may carry a null `data` pointer.
#[repr(C)]
#[derive(Debug)]
pub struct WireBuffer {
    pub capacity: u64,
    pub len: u64,
    pub data: *mut u8,
}

// Ownership of the allocation moves with the struct.
unsafe impl Send for WireBuffer {}

impl WireBuffer {
    /// An empty buffer with no allocation
    pub const fn empty() -> Self {
        Self {
            capacity: 0,
            len: 0,
            data: ptr::null_mut(),
        }
    }

    /// Take ownership of a `Vec` as a buffer
    ///
    /// Intended for native implementations written in Rust; reclaim the
    /// allocation with [`WireBuffer::into_vec`].
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let mut bytes = std::mem::ManuallyDrop::new(bytes);
        Self {
            capacity: bytes.capacity() as u64,
            len: bytes.len() as u64,
            data: bytes.as_mut_ptr(),
        }
    }

    /// Reclaim a buffer created by [`WireBuffer::from_vec`]
    ///
    /// # Safety
    ///
    /// The buffer must come from `from_vec` in this same allocator and must
    /// not have been reclaimed before.
    pub unsafe fn into_vec(self) -> Vec<u8> {
        if self.data.is_null() {
            return Vec::new();
        }
        Vec::from_raw_parts(self.data, self.len as usize, self.capacity as usize)
    }

    /// View the buffer's bytes
    ///
    /// # Safety
    ///
    /// `data` must point to `len` readable bytes that outlive the borrow.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.data, self.len as usize)
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for WireBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

/// Host bytes lent to the native side for one call
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignBytes<'a> {
    pub len: i32,
    pub data: *const u8,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> ForeignBytes<'a> {
    /// Borrow a host slice; its length must fit an `i32`
    pub fn new(bytes: &'a [u8]) -> Self {
        let len = i32::try_from(bytes.len()).unwrap_or_else(|_| {
            Fault::LengthOverflow {
                what: "foreign byte slice",
                len: bytes.len(),
            }
            .raise()
        });
        Self {
            len,
            data: bytes.as_ptr(),
            _borrow: PhantomData,
        }
    }

    /// The borrowed bytes
    pub fn as_slice(&self) -> &'a [u8] {
        if self.data.is_null() || self.len <= 0 {
            &[]
        } else {
            // SAFETY: built from a live slice of exactly `len` bytes
            unsafe { std::slice::from_raw_parts(self.data, self.len as usize) }
        }
    }
}

/// The native library's buffer allocation entry points
#[derive(Clone, Copy)]
pub struct BufferOps {
    pub from_bytes: FromBytesFn,
    pub free: BufferFreeFn,
}

impl fmt::Debug for BufferOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferOps")
            .field("from_bytes", &(self.from_bytes as usize as *const ()))
            .field("free", &(self.free as usize as *const ()))
            .finish()
    }
}

impl BufferOps {
    /// Copy host bytes into a new native-owned buffer
    pub fn alloc(&self, bytes: &[u8]) -> OwnedWireBuffer {
        let foreign = ForeignBytes::new(bytes);
        let raw = status::call_infallible(*self, |status| unsafe {
            (self.from_bytes)(foreign, status)
        });
        OwnedWireBuffer::new(raw, *self)
    }
}

/// A native-owned buffer that is freed exactly once
#[derive(Debug)]
pub struct OwnedWireBuffer {
    raw: Option<WireBuffer>,
    ops: BufferOps,
}

impl OwnedWireBuffer {
    /// Take responsibility for freeing a buffer the native side allocated
    pub fn new(raw: WireBuffer, ops: BufferOps) -> Self {
        Self { raw: Some(raw), ops }
    }

    /// The buffer's bytes
    pub fn as_slice(&self) -> &[u8] {
        match &self.raw {
            // SAFETY: native-allocated buffers stay valid until freed below
            Some(raw) => unsafe { raw.as_slice() },
            None => &[],
        }
    }

    /// Hand the buffer (and the duty to free it) to the native side
    pub fn into_raw(mut self) -> WireBuffer {
        self.raw.take().unwrap_or_default()
    }
}

impl Drop for OwnedWireBuffer {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        if raw.data.is_null() {
            return;
        }
        let free = self.ops.free;
        status::call_infallible(self.ops, |status| unsafe { free(raw, status) });
    }
}
