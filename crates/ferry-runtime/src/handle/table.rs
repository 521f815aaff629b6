//! Process-wide handle tables
//!
//! Host values that the native side refers to (callback implementations,
//! pending continuations) live in a table keyed by an opaque `u64`. Handles
//! are never reused within a process and `0` is never issued, so a stale or
//! forged handle shows up as a lookup miss instead of aliasing a live entry.

use crate::fault::Fault;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Map from opaque handles to host values
pub struct HandleTable<T> {
    kind: &'static str,
    next: AtomicU64,
    entries: RwLock<BTreeMap<u64, T>>,
}

impl<T> HandleTable<T> {
    /// An empty table; `kind` names the entries in fault messages
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next: AtomicU64::new(1),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Store a value and return its fresh handle
    pub fn insert(&self, value: T) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.write().insert(handle, value);
        handle
    }

    /// Remove an entry if present
    pub fn remove(&self, handle: u64) -> Option<T> {
        self.write().remove(&handle)
    }

    /// Remove an entry the native side claims exists
    ///
    /// A miss means the two sides disagree about live handles.
    pub fn take(&self, handle: u64) -> T {
        self.remove(handle).unwrap_or_else(|| self.unknown(handle))
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.read().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Raise the fault for a handle this table never issued (or already freed)
    pub fn unknown(&self, handle: u64) -> ! {
        Fault::UnknownHandle {
            kind: self.kind,
            handle,
        }
        .raise()
    }

    // A panic while holding the lock cannot leave the map half-updated, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<u64, T>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, T>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> HandleTable<T> {
    /// Clone out an entry the native side claims exists
    pub fn get(&self, handle: u64) -> T {
        self.read()
            .get(&handle)
            .cloned()
            .unwrap_or_else(|| self.unknown(handle))
    }
}
