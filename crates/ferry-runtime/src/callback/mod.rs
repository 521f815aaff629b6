//! Reverse calls: the native side invoking host interfaces
//!
//! Host implementations handed to the native side are kept in a
//! [`CallbackRegistry`] and referred to by handle. Each interface exports a
//! C vtable whose entries call [`dispatch`]. A dispatch runs the host method
//! as a tokio task and reports the outcome through the native completion
//! callback, unless the native side frees the returned [`ForeignFuture`]
//! first, which cancels the call.

pub mod store;

pub use store::{
    lower_wallet_store, StoreError, WalletStore, WalletStoreVTable, WALLET_STORES,
    WALLET_STORE_VTABLE,
};

use crate::fault::{self, Fault};
use crate::handle::HandleTable;
use crate::runtime;
use crate::status::CallStatus;
use crate::wire::{self, BufferOps, WireBuffer, WireCodec};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;

/// Native completion callback for a dispatched call
pub type ForeignFutureCompleteFn =
    unsafe extern "C" fn(callback_data: u64, result: ForeignFutureResult);

/// Host entry point the native side calls to drop a dispatched call
pub type ForeignFutureFreeFn = extern "C" fn(handle: u64);

/// A dispatched call, as seen by the native side
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignFuture {
    pub handle: u64,
    pub free: ForeignFutureFreeFn,
}

/// Outcome of a dispatched call, passed to the completion callback
///
/// On success `return_value` holds the encoded result; otherwise it is
/// empty and `call_status` carries the error or panic message.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ForeignFutureResult {
    pub return_value: WireBuffer,
    pub call_status: CallStatus,
}

/// Host implementations of one callback interface
pub struct CallbackRegistry<T: ?Sized> {
    handles: HandleTable<Arc<T>>,
    ops: OnceLock<BufferOps>,
}

impl<T: ?Sized> CallbackRegistry<T> {
    pub const fn new(kind: &'static str) -> Self {
        Self {
            handles: HandleTable::new(kind),
            ops: OnceLock::new(),
        }
    }

    /// Record the buffer entry points of the library using this interface
    ///
    /// Only the first registration takes effect.
    pub fn set_buffer_ops(&self, ops: BufferOps) {
        let _ = self.ops.set(ops);
    }

    /// Buffer entry points for arguments and results
    pub fn buffer_ops(&self) -> BufferOps {
        match self.ops.get() {
            Some(ops) => *ops,
            None => Fault::Unregistered {
                kind: self.handles.kind(),
            }
            .raise(),
        }
    }

    /// Hand an implementation to the native side
    pub fn insert(&self, implementation: Arc<T>) -> u64 {
        let handle = self.handles.insert(implementation);
        tracing::debug!(kind = self.handles.kind(), handle, "lowered callback object");
        handle
    }

    pub fn get(&self, handle: u64) -> Arc<T> {
        self.handles.get(handle)
    }

    /// Drop the native side's reference; an unknown handle is a fault
    pub fn free(&self, handle: u64) {
        tracing::debug!(kind = self.handles.kind(), handle, "freeing callback object");
        drop(self.handles.take(handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

// Pending dispatches, keyed by the handle in their ForeignFuture.
static CANCEL_GUARDS: HandleTable<oneshot::Sender<()>> = HandleTable::new("foreign future");

/// Drop a dispatched call (exported in every [`ForeignFuture`])
///
/// Before completion this cancels the call; afterwards it only releases the
/// handle.
pub extern "C" fn free_foreign_future(handle: u64) {
    fault::abort_on_fault("free_foreign_future", || cancel(handle));
}

fn cancel(handle: u64) {
    let signal = CANCEL_GUARDS.take(handle);
    // Fails once the call has completed, which makes this a no-op.
    let _ = signal.send(());
}

/// Dispatched calls whose `ForeignFuture` has not been freed yet
pub fn pending_dispatches() -> usize {
    CANCEL_GUARDS.len()
}

/// Run a host method for the native side
///
/// Writes the [`ForeignFuture`] to `out` before returning, then runs
/// `method` on the bridge runtime and reports its outcome to `complete`.
/// Freeing the foreign future first suppresses the completion and aborts
/// the method at its next suspension point.
///
/// # Safety
///
/// `out` must be valid for a write of one `ForeignFuture`.
pub unsafe fn dispatch<T, R, E, F, Fut>(
    registry: &'static CallbackRegistry<T>,
    handle: u64,
    complete: ForeignFutureCompleteFn,
    callback_data: u64,
    out: *mut ForeignFuture,
    method: F,
) where
    T: ?Sized + Send + Sync + 'static,
    F: FnOnce(Arc<T>) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: WireCodec + Send + 'static,
    E: WireCodec + Send + 'static,
{
    let implementation = registry.get(handle);
    let ops = registry.buffer_ops();

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let guard = CANCEL_GUARDS.insert(cancel_tx);
    // SAFETY: caller guarantees `out` is writable
    unsafe {
        out.write(ForeignFuture {
            handle: guard,
            free: free_foreign_future,
        });
    }
    tracing::debug!(handle, guard, "dispatching callback");

    let body = runtime::spawn(AssertUnwindSafe(method(implementation)).catch_unwind());
    let abort = body.abort_handle();
    runtime::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel_rx => {
                abort.abort();
                tracing::debug!(guard, "callback cancelled before completion");
            }
            outcome = body => {
                let result = match outcome {
                    Ok(Ok(result)) => encode_result(ops, result),
                    Ok(Err(payload)) => panic_result(ops, panic_message(payload.as_ref())),
                    Err(join_error) => panic_result(ops, join_error.to_string()),
                };
                // SAFETY: the completion callback comes from the native caller
                unsafe { complete(callback_data, result) };
            }
        }
    });
}

fn encode_result<R: WireCodec, E: WireCodec>(ops: BufferOps, result: Result<R, E>) -> ForeignFutureResult {
    match result {
        Ok(value) => ForeignFutureResult {
            return_value: wire::lower(ops, &value).into_raw(),
            call_status: CallStatus::new(),
        },
        Err(error) => {
            let mut call_status = CallStatus::new();
            call_status.set_error(wire::lower(ops, &error).into_raw());
            ForeignFutureResult {
                return_value: WireBuffer::empty(),
                call_status,
            }
        }
    }
}

// Reports a double fault (empty buffer) if even lowering the message fails.
fn panic_result(ops: BufferOps, message: String) -> ForeignFutureResult {
    tracing::warn!(%message, "callback panicked");
    let lowered = panic::catch_unwind(AssertUnwindSafe(|| wire::lower(ops, &message).into_raw()));
    let mut call_status = CallStatus::new();
    call_status.set_panic(lowered.ok());
    ForeignFutureResult {
        return_value: WireBuffer::empty(),
        call_status,
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}
