//! Native object lifetimes
//!
//! Each host wrapper around a native object owns an [`ObjectHandle`]. The
//! handle counts calls in flight; `-1` is the terminal value meaning the
//! native object has been freed. The native `free` runs on whichever of
//! `destroy` or the last in-flight call's release observes the transition
//! to `-1`, and it runs exactly once.

use crate::fault::Fault;
use crate::status::{self, CallStatus};
use crate::wire::BufferOps;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Native entry point returning another reference to an object
pub type CloneFn = unsafe extern "C" fn(ptr: *mut c_void, status: *mut CallStatus) -> *mut c_void;

/// Native entry point dropping a reference to an object
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void, status: *mut CallStatus);

const FREED: i64 = -1;

/// Per-type native reference management
#[derive(Clone, Copy)]
pub struct ObjectVTable {
    pub type_name: &'static str,
    pub clone: CloneFn,
    pub free: FreeFn,
}

impl fmt::Debug for ObjectVTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectVTable")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Host-side ownership of one native object
pub struct ObjectHandle {
    pointer: *mut c_void,
    live_calls: AtomicI64,
    destroyed: AtomicBool,
    vtable: ObjectVTable,
    ops: BufferOps,
}

// The native side promises its objects are thread-safe; the counter
// serializes the free against every call.
unsafe impl Send for ObjectHandle {}
unsafe impl Sync for ObjectHandle {}

impl ObjectHandle {
    /// Take ownership of a pointer returned by a native constructor
    pub fn new(pointer: *mut c_void, vtable: ObjectVTable, ops: BufferOps) -> Self {
        tracing::debug!(type_name = vtable.type_name, ?pointer, "wrapping native object");
        Self {
            pointer,
            live_calls: AtomicI64::new(0),
            destroyed: AtomicBool::new(false),
            vtable,
            ops,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.vtable.type_name
    }

    /// Number of calls currently holding the object, or `-1` once freed
    pub fn live_calls(&self) -> i64 {
        self.live_calls.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Pin the object for one call and get a pointer the call may consume
    ///
    /// Using an object that has been freed is a fault.
    pub fn acquire(&self) -> CallGuard<'_> {
        match self.try_acquire() {
            Some(guard) => guard,
            None => Fault::UseAfterDestroy {
                type_name: self.type_name(),
            }
            .raise(),
        }
    }

    /// Like [`acquire`](Self::acquire), but `None` once the object is freed
    pub fn try_acquire(&self) -> Option<CallGuard<'_>> {
        let mut current = self.live_calls.load(Ordering::Acquire);
        loop {
            if current == FREED {
                return None;
            }
            if current == i64::MAX {
                Fault::CounterOverflow {
                    type_name: self.type_name(),
                }
                .raise()
            }
            match self.live_calls.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // From here on the guard owns the increment, so a faulting clone
        // still releases it while unwinding.
        let mut guard = CallGuard {
            handle: self,
            pointer: std::ptr::null_mut(),
        };
        let clone = self.vtable.clone;
        guard.pointer = status::call_infallible(self.ops, |status| unsafe {
            clone(self.pointer, status)
        });
        Some(guard)
    }

    /// Destroy the wrapper; the native object is freed once no call holds it
    ///
    /// Calling this more than once has no further effect.
    pub fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.release();
        }
    }

    fn release(&self) {
        if self.live_calls.fetch_sub(1, Ordering::AcqRel) == 0 {
            tracing::debug!(type_name = self.type_name(), pointer = ?self.pointer, "freeing native object");
            let free = self.vtable.free;
            let pointer = self.pointer;
            status::call_infallible(self.ops, |status| unsafe { free(pointer, status) });
        }
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("type_name", &self.type_name())
            .field("pointer", &self.pointer)
            .field("live_calls", &self.live_calls())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// An object pinned for the duration of one native call
#[must_use = "dropping the guard ends the call's hold on the object"]
pub struct CallGuard<'a> {
    handle: &'a ObjectHandle,
    pointer: *mut c_void,
}

impl CallGuard<'_> {
    /// The cloned pointer to pass to the native method
    pub fn pointer(&self) -> *mut c_void {
        self.pointer
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.handle.release();
    }
}
