//! Driving native futures from async host code
//!
//! A native async method returns an opaque future handle. The host polls it,
//! passing a continuation that the native side fires (from any thread, at
//! most once per poll) with either `Ready` or `MaybeReady`. On `Ready` the
//! host calls `complete` to take the result, and the handle is freed exactly
//! once however the host future ends.

use crate::fault::{self, Fault};
use crate::handle::HandleTable;
use crate::status::{self, CallStatus};
use crate::wire::{BufferOps, WireCodec};
use tokio::sync::oneshot;

/// Poll result: the future finished, call `complete`
pub const POLL_READY: i8 = 0;
/// Poll result: poll again
pub const POLL_MAYBE_READY: i8 = 1;

/// Continuation the native side fires after a poll
pub type ContinuationFn = extern "C" fn(callback_data: u64, poll_result: i8);

/// Native entry point polling a future
pub type PollFn = unsafe extern "C" fn(handle: u64, callback: ContinuationFn, callback_data: u64);

/// Native entry point extracting a ready future's result
pub type CompleteFn<T> = unsafe extern "C" fn(handle: u64, status: *mut CallStatus) -> T;

/// Native entry point releasing a future
pub type FutureFreeFn = unsafe extern "C" fn(handle: u64);

static CONTINUATIONS: HandleTable<oneshot::Sender<i8>> = HandleTable::new("continuation");

/// A future handle returned by a native async method, with its entry points
pub struct NativeFuture<T> {
    pub handle: u64,
    pub poll: PollFn,
    pub complete: CompleteFn<T>,
    pub free: FutureFreeFn,
}

/// The continuation passed to every native poll
///
/// An unknown `callback_data` is a protocol fault, which aborts the process.
pub extern "C" fn resume_continuation(callback_data: u64, poll_result: i8) {
    fault::abort_on_fault("resume_continuation", || resume(callback_data, poll_result));
}

fn resume(callback_data: u64, poll_result: i8) {
    let sender = CONTINUATIONS.take(callback_data);
    // The host future may have been dropped while suspended.
    let _ = sender.send(poll_result);
}

/// Number of continuations registered and not yet fired
pub fn pending_continuations() -> usize {
    CONTINUATIONS.len()
}

struct FreeOnDrop {
    handle: u64,
    free: FutureFreeFn,
}

impl Drop for FreeOnDrop {
    fn drop(&mut self) {
        tracing::debug!(handle = self.handle, "freeing native future");
        unsafe { (self.free)(self.handle) };
    }
}

/// Drive a native future to completion
///
/// `lift` converts the raw value returned by `complete` into the host type.
/// Domain errors from `complete` come back as `Err(E)`; everything else the
/// status channel reports is a fault.
pub async fn call_async<T, R, E, L>(
    ops: BufferOps,
    future: NativeFuture<T>,
    lift: L,
) -> Result<R, E>
where
    E: WireCodec,
    L: FnOnce(T) -> R,
{
    let NativeFuture {
        handle,
        poll,
        complete,
        free,
    } = future;
    let _free = FreeOnDrop { handle, free };

    let mut polls = 0u32;
    loop {
        let (sender, receiver) = oneshot::channel();
        let continuation = CONTINUATIONS.insert(sender);
        polls += 1;
        unsafe { poll(handle, resume_continuation, continuation) };

        let code = match receiver.await {
            Ok(code) => code,
            Err(_) => CONTINUATIONS.unknown(continuation),
        };
        match code {
            POLL_READY => break,
            POLL_MAYBE_READY => continue,
            other => Fault::UnknownPoll(other).raise(),
        }
    }

    tracing::debug!(handle, polls, "native future ready");
    let value = status::call_with_error::<T, E, _>(ops, |status| unsafe { complete(handle, status) })?;
    Ok(lift(value))
}
