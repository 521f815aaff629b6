//! `WalletStore`: host-provided storage for the wallet library
//!
//! The native wallet keeps its proofs and quotes through this interface. A
//! host passes an `Arc<dyn WalletStore>` to [`Wallet::new`](crate::wallet::Wallet::new);
//! the native side calls back through [`WALLET_STORE_VTABLE`].

use super::{dispatch, CallbackRegistry, ForeignFuture, ForeignFutureCompleteFn};
use crate::fault::abort_on_fault;
use crate::impl_wire_enum;
use crate::wire::{self, WireBuffer};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Storage failures reported back to the native wallet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {message}")]
    Backend { message: String },

    #[error("corrupt entry for key '{key}'")]
    Corrupt { key: String },
}

impl_wire_enum!(StoreError {
    1 => Backend { message },
    2 => Corrupt { key },
});

/// Key/value storage implemented by the host
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: String) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace a value
    async fn put(&self, key: String, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete a value, returning whether it existed
    async fn remove(&self, key: String) -> Result<bool, StoreError>;

    /// List keys starting with `prefix`
    async fn keys(&self, prefix: String) -> Result<Vec<String>, StoreError>;
}

/// Store implementations currently referenced by the native side
pub static WALLET_STORES: CallbackRegistry<dyn WalletStore> = CallbackRegistry::new("wallet store");

/// Hand a store to the native side, returning its handle
pub fn lower_wallet_store(store: Arc<dyn WalletStore>) -> u64 {
    WALLET_STORES.insert(store)
}

/// Method table the native side calls into
///
/// Argument buffers are allocated by the native side and owned by the host
/// once passed.
#[repr(C)]
pub struct WalletStoreVTable {
    pub get: extern "C" fn(
        handle: u64,
        key: WireBuffer,
        complete: ForeignFutureCompleteFn,
        callback_data: u64,
        out: *mut ForeignFuture,
    ),
    pub put: extern "C" fn(
        handle: u64,
        key: WireBuffer,
        value: WireBuffer,
        complete: ForeignFutureCompleteFn,
        callback_data: u64,
        out: *mut ForeignFuture,
    ),
    pub remove: extern "C" fn(
        handle: u64,
        key: WireBuffer,
        complete: ForeignFutureCompleteFn,
        callback_data: u64,
        out: *mut ForeignFuture,
    ),
    pub keys: extern "C" fn(
        handle: u64,
        prefix: WireBuffer,
        complete: ForeignFutureCompleteFn,
        callback_data: u64,
        out: *mut ForeignFuture,
    ),
    pub free: extern "C" fn(handle: u64),
}

pub static WALLET_STORE_VTABLE: WalletStoreVTable = WalletStoreVTable {
    get: store_get,
    put: store_put,
    remove: store_remove,
    keys: store_keys,
    free: store_free,
};

extern "C" fn store_get(
    handle: u64,
    key: WireBuffer,
    complete: ForeignFutureCompleteFn,
    callback_data: u64,
    out: *mut ForeignFuture,
) {
    abort_on_fault("store_get", || {
        let ops = WALLET_STORES.buffer_ops();
        let key: String = unsafe { wire::lift_raw(ops, key) };
        // SAFETY: the native caller passes a writable out-parameter
        unsafe {
            dispatch(&WALLET_STORES, handle, complete, callback_data, out, move |store| async move {
                store.get(key).await
            });
        }
    })
}

extern "C" fn store_put(
    handle: u64,
    key: WireBuffer,
    value: WireBuffer,
    complete: ForeignFutureCompleteFn,
    callback_data: u64,
    out: *mut ForeignFuture,
) {
    abort_on_fault("store_put", || {
        let ops = WALLET_STORES.buffer_ops();
        let key: String = unsafe { wire::lift_raw(ops, key) };
        let value: Vec<u8> = unsafe { wire::lift_raw(ops, value) };
        // SAFETY: as in `store_get`
        unsafe {
            dispatch(&WALLET_STORES, handle, complete, callback_data, out, move |store| async move {
                store.put(key, value).await
            });
        }
    })
}

extern "C" fn store_remove(
    handle: u64,
    key: WireBuffer,
    complete: ForeignFutureCompleteFn,
    callback_data: u64,
    out: *mut ForeignFuture,
) {
    abort_on_fault("store_remove", || {
        let ops = WALLET_STORES.buffer_ops();
        let key: String = unsafe { wire::lift_raw(ops, key) };
        // SAFETY: as in `store_get`
        unsafe {
            dispatch(&WALLET_STORES, handle, complete, callback_data, out, move |store| async move {
                store.remove(key).await
            });
        }
    })
}

extern "C" fn store_keys(
    handle: u64,
    prefix: WireBuffer,
    complete: ForeignFutureCompleteFn,
    callback_data: u64,
    out: *mut ForeignFuture,
) {
    abort_on_fault("store_keys", || {
        let ops = WALLET_STORES.buffer_ops();
        let prefix: String = unsafe { wire::lift_raw(ops, prefix) };
        // SAFETY: as in `store_get`
        unsafe {
            dispatch(&WALLET_STORES, handle, complete, callback_data, out, move |store| async move {
                store.keys(prefix).await
            });
        }
    })
}

extern "C" fn store_free(handle: u64) {
    abort_on_fault("store_free", || WALLET_STORES.free(handle));
}
