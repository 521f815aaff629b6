//! Unrecoverable bridge faults
//!
//! A fault means the host and the native library no longer agree on the
//! contract between them (or one side broke its own invariants). Continuing
//! would risk memory corruption, so faults are never returned as `Err`:
//! [`Fault::raise`] logs the fault and panics with its message.

use crate::wire::CodecError;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Message raised when the native side panicked while building its panic message
pub const DOUBLE_FAULT_MESSAGE: &str =
    "native panic while building the panic message (double fault)";

/// Fatal conditions detected by the bridge
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Fault {
    /// Native call reported status code 2 with a message
    #[error("native panic: {0}")]
    NativePanic(String),

    /// Native call reported status code 2 without a message
    #[error("{}", DOUBLE_FAULT_MESSAGE)]
    DoubleFault,

    /// Status code outside 0/1/2
    #[error("protocol violation: unknown call status code {0}")]
    UnknownStatus(i8),

    /// Poll result outside Ready/MaybeReady
    #[error("protocol violation: unknown poll result code {0}")]
    UnknownPoll(i8),

    /// A call declared infallible reported a domain error
    #[error("protocol violation: infallible call returned a domain error")]
    UnexpectedError,

    /// Native and host handle tables disagree
    #[error("protocol violation: unknown {kind} handle {handle}")]
    UnknownHandle { kind: &'static str, handle: u64 },

    /// A callback arrived before the host registered its vtable
    #[error("protocol violation: {kind} callback invoked before registration")]
    Unregistered { kind: &'static str },

    /// A lifted value did not decode cleanly
    #[error("protocol violation: failed to decode {type_name}: {source}")]
    Decode {
        type_name: &'static str,
        source: CodecError,
    },

    /// An object was acquired after its wrapper was destroyed and freed
    #[error("usage fault: {type_name} used after it was destroyed")]
    UseAfterDestroy { type_name: &'static str },

    /// Too many concurrent calls on one object
    #[error("usage fault: {type_name} call counter overflow")]
    CounterOverflow { type_name: &'static str },

    /// A string, byte array, sequence or map is too large for its i32 prefix
    #[error("usage fault: {what} of length {len} does not fit an i32 length prefix")]
    LengthOverflow { what: &'static str, len: usize },
}

impl Fault {
    /// Log the fault and abort the current call by panicking
    #[track_caller]
    pub fn raise(self) -> ! {
        tracing::error!(fault = %self, "unrecoverable bridge fault");
        panic!("{}", self)
    }
}

/// Run the body of an `extern "C"` entry point called by the native side
///
/// A fault raised inside `body` must not unwind into native frames. It has
/// already been logged by [`Fault::raise`], so the process aborts here.
pub fn abort_on_fault<R>(entry_point: &'static str, body: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(entry_point, "fault at the native boundary, aborting");
            std::process::abort()
        }
    }
}
