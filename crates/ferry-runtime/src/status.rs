//! Call status channel
//!
//! Every native entry point takes a trailing `*mut CallStatus`. Code 0 is
//! success, code 1 carries a serialized domain error, code 2 reports a native
//! panic (with a serialized message, or an empty buffer when even building
//! the message failed). Anything else means the two sides disagree on the
//! protocol.

use crate::fault::Fault;
use crate::wire::{self, BufferOps, OwnedWireBuffer, WireBuffer, WireCodec};

/// Status codes written by native entry points
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatusCode {
    Success = 0,
    Error = 1,
    Panic = 2,
}

impl TryFrom<i8> for CallStatusCode {
    type Error = i8;

    fn try_from(code: i8) -> Result<Self, i8> {
        match code {
            0 => Ok(Self::Success),
            1 => Ok(Self::Error),
            2 => Ok(Self::Panic),
            other => Err(other),
        }
    }
}

/// Out-parameter filled in by every native call
#[repr(C)]
#[derive(Debug, Default)]
pub struct CallStatus {
    pub code: i8,
    pub error_buf: WireBuffer,
}

impl CallStatus {
    /// A fresh status reporting success
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a domain error (native implementations written in Rust)
    pub fn set_error(&mut self, error_buf: WireBuffer) {
        self.code = CallStatusCode::Error as i8;
        self.error_buf = error_buf;
    }

    /// Report a panic, with or without a serialized message
    pub fn set_panic(&mut self, message: Option<WireBuffer>) {
        self.code = CallStatusCode::Panic as i8;
        self.error_buf = message.unwrap_or_default();
    }

    pub fn is_success(&self) -> bool {
        self.code == CallStatusCode::Success as i8
    }
}

/// Run a native call and surface its domain error as `Err(E)`
///
/// Panics and unknown codes raise a [`Fault`].
pub fn call_with_error<T, E, F>(ops: BufferOps, call: F) -> Result<T, E>
where
    E: WireCodec,
    F: FnOnce(&mut CallStatus) -> T,
{
    let mut status = CallStatus::new();
    let value = call(&mut status);
    check_status::<E>(ops, status)?;
    Ok(value)
}

/// Run a native call that has no declared error type
///
/// A domain error from such a call is a protocol fault.
pub fn call_infallible<T, F>(ops: BufferOps, call: F) -> T
where
    F: FnOnce(&mut CallStatus) -> T,
{
    let mut status = CallStatus::new();
    let value = call(&mut status);
    match CallStatusCode::try_from(status.code) {
        Ok(CallStatusCode::Success) => value,
        Ok(CallStatusCode::Error) => {
            drop(OwnedWireBuffer::new(status.error_buf, ops));
            Fault::UnexpectedError.raise()
        }
        Ok(CallStatusCode::Panic) => raise_panic(ops, status.error_buf),
        Err(code) => Fault::UnknownStatus(code).raise(),
    }
}

/// Interpret a status written by the native side
pub fn check_status<E: WireCodec>(ops: BufferOps, status: CallStatus) -> Result<(), E> {
    match CallStatusCode::try_from(status.code) {
        Ok(CallStatusCode::Success) => Ok(()),
        Ok(CallStatusCode::Error) => {
            Err(wire::lift::<E>(OwnedWireBuffer::new(status.error_buf, ops)))
        }
        Ok(CallStatusCode::Panic) => raise_panic(ops, status.error_buf),
        Err(code) => Fault::UnknownStatus(code).raise(),
    }
}

fn raise_panic(ops: BufferOps, error_buf: WireBuffer) -> ! {
    if error_buf.is_empty() {
        drop(OwnedWireBuffer::new(error_buf, ops));
        Fault::DoubleFault.raise()
    }
    let message = wire::lift::<String>(OwnedWireBuffer::new(error_buf, ops));
    Fault::NativePanic(message).raise()
}
