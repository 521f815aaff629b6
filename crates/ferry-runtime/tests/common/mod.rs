//! A mock native wallet library, written against the C ABI
//!
//! Everything here plays the native side: it allocates wire buffers, owns
//! wallet objects, runs futures on its own threads and calls back into the
//! host through the registered store vtable. Counters and an event log let
//! tests check ownership and ordering.

#![allow(dead_code)]

use ferry_runtime::callback::{ForeignFuture, ForeignFutureResult, StoreError, WalletStoreVTable};
use ferry_runtime::future::{ContinuationFn, NativeFuture, POLL_MAYBE_READY, POLL_READY};
use ferry_runtime::wallet::{MintQuote, QuoteState, WalletError, WALLET_CONTRACT, WALLET_CONTRACT_VERSION};
use ferry_runtime::wire::{decode_exact, encode, BufferOps, ForeignBytes, WireBuffer, WireCodec};
use ferry_runtime::{CallStatus, StaticSymbols};
use std::collections::HashMap;
use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

pub use pretty_assertions::{assert_eq, assert_ne};

/// Symbol prefix of the mock library
pub const NAMESPACE: &str = "mock";

// ---------------------------------------------------------------------------
// Wire buffers

pub static BUFFERS_ALLOCATED: AtomicUsize = AtomicUsize::new(0);
pub static BUFFERS_FREED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn mock_wirebuffer_from_bytes(
    bytes: ForeignBytes<'_>,
    _status: *mut CallStatus,
) -> WireBuffer {
    native_buffer(bytes.as_slice().to_vec())
}

unsafe extern "C" fn mock_wirebuffer_free(buffer: WireBuffer, _status: *mut CallStatus) {
    take_buffer(buffer);
}

/// Allocate a buffer on the "native heap"
pub fn native_buffer(bytes: Vec<u8>) -> WireBuffer {
    BUFFERS_ALLOCATED.fetch_add(1, Ordering::SeqCst);
    WireBuffer::from_vec(bytes)
}

/// Reclaim a buffer allocated by [`native_buffer`]
pub fn take_buffer(buffer: WireBuffer) -> Vec<u8> {
    BUFFERS_FREED.fetch_add(1, Ordering::SeqCst);
    unsafe { buffer.into_vec() }
}

pub fn take_value<T: WireCodec>(buffer: WireBuffer) -> T {
    decode_exact(&take_buffer(buffer)).expect("mock received a malformed buffer")
}

/// Buffers allocated but not yet freed
pub fn outstanding_buffers() -> isize {
    BUFFERS_ALLOCATED.load(Ordering::SeqCst) as isize - BUFFERS_FREED.load(Ordering::SeqCst) as isize
}

pub fn buffer_ops() -> BufferOps {
    BufferOps {
        from_bytes: mock_wirebuffer_from_bytes,
        free: mock_wirebuffer_free,
    }
}

// ---------------------------------------------------------------------------
// Futures

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FutureEvent {
    Poll(u64),
    Complete(u64),
    Free(u64),
}

pub enum MockValue {
    U64(u64),
    Buffer(Vec<u8>),
}

struct MockFuture {
    result: Option<Result<MockValue, WalletError>>,
    extra_polls: u32,
    waiting: Option<(ContinuationFn, u64)>,
}

static FUTURES: OnceLock<Mutex<HashMap<u64, MockFuture>>> = OnceLock::new();
static NEXT_FUTURE: AtomicU64 = AtomicU64::new(1);
static EVENTS: Mutex<Vec<FutureEvent>> = Mutex::new(Vec::new());

/// `MaybeReady` answers the wallet's futures give before `Ready`
pub static EXTRA_POLLS: AtomicU32 = AtomicU32::new(0);

fn futures() -> std::sync::MutexGuard<'static, HashMap<u64, MockFuture>> {
    FUTURES
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

fn record(event: FutureEvent) {
    EVENTS.lock().unwrap_or_else(|e| e.into_inner()).push(event);
}

/// Every poll/complete/free seen for one future, in order
pub fn events_for(handle: u64) -> Vec<FutureEvent> {
    EVENTS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .filter(|event| match event {
            FutureEvent::Poll(h) | FutureEvent::Complete(h) | FutureEvent::Free(h) => *h == handle,
        })
        .cloned()
        .collect()
}

/// Futures the host has not freed yet
pub fn live_futures() -> usize {
    futures().len()
}

/// Start a future; `None` stays pending until [`resolve_future`]
pub fn spawn_future(result: Option<Result<MockValue, WalletError>>, extra_polls: u32) -> u64 {
    let handle = NEXT_FUTURE.fetch_add(1, Ordering::SeqCst);
    futures().insert(
        handle,
        MockFuture {
            result,
            extra_polls,
            waiting: None,
        },
    );
    handle
}

/// Whether a pending future has been polled and is waiting for a wake
pub fn is_waiting(handle: u64) -> bool {
    futures()
        .get(&handle)
        .map_or(false, |future| future.waiting.is_some())
}

pub fn resolve_future(handle: u64, result: Result<MockValue, WalletError>) {
    let waiting = {
        let mut futures = futures();
        let Some(future) = futures.get_mut(&handle) else {
            return;
        };
        future.result = Some(result);
        future.waiting.take()
    };
    if let Some((callback, data)) = waiting {
        fire(callback, data, POLL_MAYBE_READY);
    }
}

// Continuations fire from the mock's own threads, like a native executor.
fn fire(callback: ContinuationFn, data: u64, code: i8) {
    thread::spawn(move || callback(data, code));
}

unsafe extern "C" fn mock_future_poll(handle: u64, callback: ContinuationFn, callback_data: u64) {
    record(FutureEvent::Poll(handle));
    let mut futures = futures();
    let Some(future) = futures.get_mut(&handle) else {
        return;
    };
    if future.result.is_none() {
        future.waiting = Some((callback, callback_data));
    } else if future.extra_polls > 0 {
        future.extra_polls -= 1;
        fire(callback, callback_data, POLL_MAYBE_READY);
    } else {
        fire(callback, callback_data, POLL_READY);
    }
}

/// A poll that answers with a code outside the protocol
pub unsafe extern "C" fn bogus_poll(_handle: u64, callback: ContinuationFn, callback_data: u64) {
    fire(callback, callback_data, 7);
}

fn take_result(handle: u64) -> Option<Result<MockValue, WalletError>> {
    futures().get_mut(&handle).and_then(|future| future.result.take())
}

unsafe fn report(status: *mut CallStatus, error: &WalletError) {
    (*status).set_error(native_buffer(encode(error)));
}

unsafe extern "C" fn mock_future_complete_u64(handle: u64, status: *mut CallStatus) -> u64 {
    record(FutureEvent::Complete(handle));
    match take_result(handle) {
        Some(Ok(MockValue::U64(value))) => value,
        Some(Err(error)) => {
            report(status, &error);
            0
        }
        _ => {
            (*status).set_panic(Some(native_buffer(encode(&"no u64 result".to_string()))));
            0
        }
    }
}

unsafe extern "C" fn mock_future_complete_wire_buffer(handle: u64, status: *mut CallStatus) -> WireBuffer {
    record(FutureEvent::Complete(handle));
    match take_result(handle) {
        Some(Ok(MockValue::Buffer(bytes))) => native_buffer(bytes),
        Some(Err(error)) => {
            report(status, &error);
            WireBuffer::empty()
        }
        _ => {
            (*status).set_panic(Some(native_buffer(encode(&"no buffer result".to_string()))));
            WireBuffer::empty()
        }
    }
}

unsafe extern "C" fn mock_future_free(handle: u64) {
    record(FutureEvent::Free(handle));
    futures().remove(&handle);
}

/// A host view of a mock future resolving to a `u64`
pub fn u64_future(handle: u64) -> NativeFuture<u64> {
    NativeFuture {
        handle,
        poll: mock_future_poll,
        complete: mock_future_complete_u64,
        free: mock_future_free,
    }
}

// ---------------------------------------------------------------------------
// Store callbacks

static STORE_VTABLE: OnceLock<&'static WalletStoreVTable> = OnceLock::new();
static PENDING_CALLS: Mutex<Vec<(u64, mpsc::Sender<ForeignFutureResult>)>> = Mutex::new(Vec::new());
static NEXT_CALL: AtomicU64 = AtomicU64::new(1);

unsafe extern "C" fn mock_init_callback_vtable_walletstore(vtable: *const WalletStoreVTable) {
    let _ = STORE_VTABLE.set(&*vtable);
}

/// Register the vtable directly (tests that bypass `WalletLibrary::open`)
pub fn install_store_vtable(vtable: &'static WalletStoreVTable) {
    let _ = STORE_VTABLE.set(vtable);
}

pub fn store_vtable() -> &'static WalletStoreVTable {
    STORE_VTABLE.get().expect("store vtable was never registered")
}

unsafe extern "C" fn mock_store_complete(callback_data: u64, result: ForeignFutureResult) {
    let sender = {
        let mut pending = PENDING_CALLS.lock().unwrap_or_else(|e| e.into_inner());
        pending
            .iter()
            .position(|(data, _)| *data == callback_data)
            .map(|index| pending.swap_remove(index).1)
    };
    if let Some(sender) = sender {
        let _ = sender.send(result);
    }
}

/// A store call in flight, as the native side sees it
pub struct PendingCall {
    pub foreign: ForeignFuture,
    pub result: mpsc::Receiver<ForeignFutureResult>,
}

impl PendingCall {
    pub fn wait(&self) -> Option<ForeignFutureResult> {
        self.result.recv_timeout(Duration::from_secs(10)).ok()
    }

    /// Release the host's side of the call
    pub fn free(&self) {
        (self.foreign.free)(self.foreign.handle);
    }
}

fn start_call(invoke: impl FnOnce(u64, *mut ForeignFuture)) -> PendingCall {
    let (sender, receiver) = mpsc::channel();
    let data = NEXT_CALL.fetch_add(1, Ordering::SeqCst);
    PENDING_CALLS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((data, sender));
    let mut out = MaybeUninit::<ForeignFuture>::uninit();
    invoke(data, out.as_mut_ptr());
    PendingCall {
        foreign: unsafe { out.assume_init() },
        result: receiver,
    }
}

pub fn start_get(store: u64, key: &str) -> PendingCall {
    start_call(|data, out| {
        (store_vtable().get)(store, native_buffer(encode(&key.to_string())), mock_store_complete, data, out)
    })
}

pub fn start_put(store: u64, key: &str, value: Vec<u8>) -> PendingCall {
    start_call(|data, out| {
        (store_vtable().put)(
            store,
            native_buffer(encode(&key.to_string())),
            native_buffer(encode(&value)),
            mock_store_complete,
            data,
            out,
        )
    })
}

pub fn start_remove(store: u64, key: &str) -> PendingCall {
    start_call(|data, out| {
        (store_vtable().remove)(store, native_buffer(encode(&key.to_string())), mock_store_complete, data, out)
    })
}

pub fn start_keys(store: u64, prefix: &str) -> PendingCall {
    start_call(|data, out| {
        (store_vtable().keys)(store, native_buffer(encode(&prefix.to_string())), mock_store_complete, data, out)
    })
}

/// A completed store call, decoded by the native side
#[derive(Debug, PartialEq)]
pub enum Outcome<R> {
    Ok(R),
    Err(StoreError),
    Panic(Option<String>),
}

pub fn decode_outcome<R: WireCodec>(result: ForeignFutureResult) -> Outcome<R> {
    let ForeignFutureResult {
        return_value,
        call_status,
    } = result;
    match call_status.code {
        0 => Outcome::Ok(take_value(return_value)),
        1 => Outcome::Err(take_value(call_status.error_buf)),
        2 if call_status.error_buf.is_empty() => Outcome::Panic(None),
        2 => Outcome::Panic(Some(take_value(call_status.error_buf))),
        other => panic!("callback reported unknown status {other}"),
    }
}

// ---------------------------------------------------------------------------
// Wallet objects

pub static WALLET_CLONES: AtomicUsize = AtomicUsize::new(0);
pub static WALLET_FREES: AtomicUsize = AtomicUsize::new(0);
pub static WALLETS_DROPPED: AtomicUsize = AtomicUsize::new(0);

pub struct MockWallet {
    mint_url: String,
    store: u64,
    balance: AtomicU64,
}

impl Drop for MockWallet {
    fn drop(&mut self) {
        WALLETS_DROPPED.fetch_add(1, Ordering::SeqCst);
        (store_vtable().free)(self.store);
    }
}

unsafe fn wallet_from(ptr: *mut c_void) -> Arc<MockWallet> {
    Arc::from_raw(ptr as *const MockWallet)
}

unsafe extern "C" fn mock_fn_constructor_wallet_new(
    mint_url: WireBuffer,
    store: u64,
    status: *mut CallStatus,
) -> *mut c_void {
    let mint_url: String = take_value(mint_url);
    if !mint_url.starts_with("https://") {
        (store_vtable().free)(store);
        report(
            status,
            &WalletError::Network {
                message: format!("invalid mint url '{mint_url}'"),
            },
        );
        return std::ptr::null_mut();
    }
    let wallet = Arc::new(MockWallet {
        mint_url,
        store,
        balance: AtomicU64::new(0),
    });
    Arc::into_raw(wallet) as *mut c_void
}

unsafe extern "C" fn mock_fn_clone_wallet(ptr: *mut c_void, _status: *mut CallStatus) -> *mut c_void {
    WALLET_CLONES.fetch_add(1, Ordering::SeqCst);
    Arc::increment_strong_count(ptr as *const MockWallet);
    ptr
}

unsafe extern "C" fn mock_fn_free_wallet(ptr: *mut c_void, _status: *mut CallStatus) {
    WALLET_FREES.fetch_add(1, Ordering::SeqCst);
    drop(wallet_from(ptr));
}

unsafe extern "C" fn mock_fn_method_wallet_mint_url(ptr: *mut c_void, _status: *mut CallStatus) -> WireBuffer {
    let wallet = wallet_from(ptr);
    native_buffer(encode(&wallet.mint_url))
}

unsafe extern "C" fn mock_fn_method_wallet_total_balance(ptr: *mut c_void) -> u64 {
    let wallet = wallet_from(ptr);
    let balance = wallet.balance.load(Ordering::SeqCst);
    spawn_future(Some(Ok(MockValue::U64(balance))), EXTRA_POLLS.load(Ordering::SeqCst))
}

unsafe extern "C" fn mock_fn_method_wallet_mint_quote(
    ptr: *mut c_void,
    amount: u64,
    description: WireBuffer,
) -> u64 {
    let wallet = wallet_from(ptr);
    let description: Option<String> = take_value(description);
    let result = if wallet.mint_url.contains("offline") {
        Err(WalletError::Network {
            message: "mint offline".to_string(),
        })
    } else {
        let quote = MintQuote {
            id: format!("quote-{amount}"),
            amount,
            request: format!("lnbc{amount}n1{}", description.unwrap_or_default()),
            state: QuoteState::Unpaid,
            expiry: Some(1_700_000_000),
        };
        Ok(MockValue::Buffer(encode(&quote)))
    };
    spawn_future(Some(result), EXTRA_POLLS.load(Ordering::SeqCst))
}

unsafe extern "C" fn mock_fn_method_wallet_receive(ptr: *mut c_void, token: WireBuffer) -> u64 {
    let wallet = wallet_from(ptr);
    let token: String = take_value(token);
    let amount = token
        .strip_prefix("cashu:")
        .and_then(|amount| amount.parse::<u64>().ok())
        .filter(|amount| *amount > 0);
    let Some(amount) = amount else {
        let error = WalletError::InvalidToken {
            reason: format!("cannot parse '{token}'"),
        };
        return spawn_future(Some(Err(error)), 0);
    };

    // Persist through the host store before resolving.
    let handle = spawn_future(None, 0);
    thread::spawn(move || {
        let call = start_put(wallet.store, &format!("proofs/{token}"), amount.to_be_bytes().to_vec());
        let outcome = call.wait().map(decode_outcome::<()>);
        call.free();
        let result = match outcome {
            Some(Outcome::Ok(())) => {
                wallet.balance.fetch_add(amount, Ordering::SeqCst);
                Ok(MockValue::U64(amount))
            }
            Some(Outcome::Err(error)) => Err(WalletError::Store {
                message: error.to_string(),
            }),
            Some(Outcome::Panic(message)) => Err(WalletError::Store {
                message: format!("store panicked: {}", message.unwrap_or_default()),
            }),
            None => Err(WalletError::Store {
                message: "store timed out".to_string(),
            }),
        };
        resolve_future(handle, result);
    });
    handle
}

// ---------------------------------------------------------------------------
// Handshake

extern "C" fn mock_contract_version() -> u32 {
    WALLET_CONTRACT_VERSION
}

macro_rules! checksum_fns {
    ($($fn_name:ident => $symbol:literal),* $(,)?) => {
        $(
            extern "C" fn $fn_name() -> u16 {
                WALLET_CONTRACT.checksum_of($symbol).unwrap_or(0)
            }
        )*

        const CHECKSUMS: &[(&str, extern "C" fn() -> u16)] = &[$(($symbol, $fn_name)),*];
    };
}

checksum_fns! {
    checksum_constructor => "fn_constructor_wallet_new",
    checksum_clone => "fn_clone_wallet",
    checksum_free => "fn_free_wallet",
    checksum_mint_url => "fn_method_wallet_mint_url",
    checksum_total_balance => "fn_method_wallet_total_balance",
    checksum_mint_quote => "fn_method_wallet_mint_quote",
    checksum_receive => "fn_method_wallet_receive",
    checksum_init_store => "init_callback_vtable_walletstore",
}

fn name(symbol: &str) -> String {
    format!("{NAMESPACE}_{symbol}")
}

/// The complete, well-behaved mock library
pub fn mock_symbols() -> StaticSymbols {
    let mut symbols = StaticSymbols::new("mock wallet")
        .with(name("contract_version"), mock_contract_version as *const c_void)
        .with(name("wirebuffer_from_bytes"), mock_wirebuffer_from_bytes as *const c_void)
        .with(name("wirebuffer_free"), mock_wirebuffer_free as *const c_void)
        .with(name("fn_constructor_wallet_new"), mock_fn_constructor_wallet_new as *const c_void)
        .with(name("fn_clone_wallet"), mock_fn_clone_wallet as *const c_void)
        .with(name("fn_free_wallet"), mock_fn_free_wallet as *const c_void)
        .with(name("fn_method_wallet_mint_url"), mock_fn_method_wallet_mint_url as *const c_void)
        .with(name("fn_method_wallet_total_balance"), mock_fn_method_wallet_total_balance as *const c_void)
        .with(name("fn_method_wallet_mint_quote"), mock_fn_method_wallet_mint_quote as *const c_void)
        .with(name("fn_method_wallet_receive"), mock_fn_method_wallet_receive as *const c_void)
        .with(
            name("init_callback_vtable_walletstore"),
            mock_init_callback_vtable_walletstore as *const c_void,
        )
        .with(name("future_poll_u64"), mock_future_poll as *const c_void)
        .with(name("future_complete_u64"), mock_future_complete_u64 as *const c_void)
        .with(name("future_free_u64"), mock_future_free as *const c_void)
        .with(name("future_poll_wire_buffer"), mock_future_poll as *const c_void)
        .with(name("future_complete_wire_buffer"), mock_future_complete_wire_buffer as *const c_void)
        .with(name("future_free_wire_buffer"), mock_future_free as *const c_void);
    for (symbol, checksum) in CHECKSUMS {
        symbols.insert(name(&format!("checksum_{symbol}")), *checksum as *const c_void);
    }
    symbols
}

// ---------------------------------------------------------------------------
// Host store

/// An in-memory `WalletStore`
#[derive(Default)]
pub struct MemoryStore {
    pub entries: tokio::sync::Mutex<std::collections::BTreeMap<String, Vec<u8>>>,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl ferry_runtime::WalletStore for MemoryStore {
    async fn get(&self, key: String) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().await.get(&key).cloned())
    }

    async fn put(&self, key: String, value: Vec<u8>) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend {
                message: "disk full".to_string(),
            });
        }
        self.entries.lock().await.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: String) -> Result<bool, StoreError> {
        Ok(self.entries.lock().await.remove(&key).is_some())
    }

    async fn keys(&self, prefix: String) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect())
    }
}
