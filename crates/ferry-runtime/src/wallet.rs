//! Bindings for the native wallet library
//!
//! [`WalletLibrary`] is a wallet library that passed the handshake, with its
//! entry points resolved. [`Wallet`] wraps one native wallet object; its
//! async methods drive native futures through [`call_async`].

use crate::callback::{lower_wallet_store, WalletStore, WalletStoreVTable, WALLET_STORES, WALLET_STORE_VTABLE};
use crate::future::{call_async, CompleteFn, FutureFreeFn, NativeFuture, PollFn};
use crate::handle::{CloneFn, FreeFn, ObjectHandle, ObjectVTable};
use crate::library::{Contract, ContractSymbol, DynamicLibrary, LoadError, NativeLibrary, SymbolSource};
use crate::status::{self, CallStatus};
use crate::wire::{self, BufferOps, OwnedWireBuffer, WireBuffer};
use crate::{impl_wire_enum, impl_wire_record, runtime};
use ferry_config::Config;
use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Contract version the host was built against
pub const WALLET_CONTRACT_VERSION: u32 = 1;

static WALLET_SYMBOLS: [ContractSymbol; 8] = [
    ContractSymbol::new(
        "fn_constructor_wallet_new",
        "fn_constructor_wallet_new(mint_url: string, store: callback WalletStore) -> object Wallet throws WalletError",
    ),
    ContractSymbol::new("fn_clone_wallet", "fn_clone_wallet(object Wallet) -> object Wallet"),
    ContractSymbol::new("fn_free_wallet", "fn_free_wallet(object Wallet)"),
    ContractSymbol::new(
        "fn_method_wallet_mint_url",
        "fn_method_wallet_mint_url(self) -> string",
    ),
    ContractSymbol::new(
        "fn_method_wallet_total_balance",
        "fn_method_wallet_total_balance(self) -> async u64 throws WalletError",
    ),
    ContractSymbol::new(
        "fn_method_wallet_mint_quote",
        "fn_method_wallet_mint_quote(self, amount: u64, description: optional string) -> async record MintQuote throws WalletError",
    ),
    ContractSymbol::new(
        "fn_method_wallet_receive",
        "fn_method_wallet_receive(self, token: string) -> async u64 throws WalletError",
    ),
    ContractSymbol::new(
        "init_callback_vtable_walletstore",
        "init_callback_vtable_walletstore(get, put, remove, keys, free)",
    ),
];

/// What a wallet library must export
pub static WALLET_CONTRACT: Contract = Contract {
    version: WALLET_CONTRACT_VERSION,
    symbols: &WALLET_SYMBOLS,
};

/// Errors reported by the native wallet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("store error: {message}")]
    Store { message: String },
}

impl_wire_enum!(WalletError {
    1 => Network { message },
    2 => InsufficientFunds { needed, available },
    3 => InvalidToken { reason },
    4 => Store { message },
});

/// Payment state of a mint quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteState {
    Unpaid,
    Paid,
    Issued,
}

impl_wire_enum!(QuoteState {
    1 => Unpaid,
    2 => Paid,
    3 => Issued,
});

/// A request to mint `amount` once `request` is paid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintQuote {
    pub id: String,
    pub amount: u64,
    pub request: String,
    pub state: QuoteState,
    /// Unix seconds after which the quote lapses
    pub expiry: Option<u64>,
}

impl_wire_record!(MintQuote {
    id,
    amount,
    request,
    state,
    expiry
});

type ConstructorFn =
    unsafe extern "C" fn(mint_url: WireBuffer, store: u64, status: *mut CallStatus) -> *mut c_void;
type MintUrlFn = unsafe extern "C" fn(ptr: *mut c_void, status: *mut CallStatus) -> WireBuffer;
type TotalBalanceFn = unsafe extern "C" fn(ptr: *mut c_void) -> u64;
type MintQuoteFn = unsafe extern "C" fn(ptr: *mut c_void, amount: u64, description: WireBuffer) -> u64;
type ReceiveFn = unsafe extern "C" fn(ptr: *mut c_void, token: WireBuffer) -> u64;
type InitStoreVTableFn = unsafe extern "C" fn(vtable: *const WalletStoreVTable);

struct FutureFns<T> {
    poll: PollFn,
    complete: CompleteFn<T>,
    free: FutureFreeFn,
}

impl<T> FutureFns<T> {
    unsafe fn resolve(native: &NativeLibrary, suffix: &str) -> Result<Self, LoadError> {
        Ok(Self {
            poll: native.function(&format!("future_poll_{suffix}"))?,
            complete: native.function(&format!("future_complete_{suffix}"))?,
            free: native.function(&format!("future_free_{suffix}"))?,
        })
    }

    fn future(&self, handle: u64) -> NativeFuture<T> {
        NativeFuture {
            handle,
            poll: self.poll,
            complete: self.complete,
            free: self.free,
        }
    }
}

struct WalletFns {
    constructor_new: ConstructorFn,
    clone: CloneFn,
    free: FreeFn,
    mint_url: MintUrlFn,
    total_balance: TotalBalanceFn,
    mint_quote: MintQuoteFn,
    receive: ReceiveFn,
    future_u64: FutureFns<u64>,
    future_buffer: FutureFns<WireBuffer>,
}

impl WalletFns {
    // SAFETY (callers): the handshake vouched for these signatures.
    unsafe fn resolve(native: &NativeLibrary) -> Result<Self, LoadError> {
        Ok(Self {
            constructor_new: native.function("fn_constructor_wallet_new")?,
            clone: native.function("fn_clone_wallet")?,
            free: native.function("fn_free_wallet")?,
            mint_url: native.function("fn_method_wallet_mint_url")?,
            total_balance: native.function("fn_method_wallet_total_balance")?,
            mint_quote: native.function("fn_method_wallet_mint_quote")?,
            receive: native.function("fn_method_wallet_receive")?,
            future_u64: FutureFns::resolve(native, "u64")?,
            future_buffer: FutureFns::resolve(native, "wire_buffer")?,
        })
    }
}

// Address of the registration entry point of the library that owns the
// store vtable.
static STORE_VTABLE_OWNER: OnceLock<usize> = OnceLock::new();

/// A wallet library that passed the handshake
pub struct WalletLibrary {
    native: NativeLibrary,
    fns: WalletFns,
}

impl WalletLibrary {
    /// Verify the library, resolve the wallet API and register the store vtable
    ///
    /// Opening the same library again is fine; a different wallet library
    /// in the same process is rejected with [`LoadError::AlreadyRegistered`].
    pub fn open<S>(source: S, namespace: &str) -> Result<Arc<Self>, LoadError>
    where
        S: SymbolSource + 'static,
    {
        let native = NativeLibrary::open(source, namespace, &WALLET_CONTRACT)?;
        // SAFETY: the handshake checked every symbol's signature checksum
        let (fns, init_store_vtable) = unsafe {
            (
                WalletFns::resolve(&native)?,
                native.function::<InitStoreVTableFn>("init_callback_vtable_walletstore")?,
            )
        };

        // Store callbacks allocate with one library's buffer ops, so only
        // one wallet library may be registered per process.
        let library_id = init_store_vtable as usize;
        let registered = *STORE_VTABLE_OWNER.get_or_init(|| {
            tracing::debug!(library = %native.describe(), "registering wallet store vtable");
            WALLET_STORES.set_buffer_ops(native.buffer_ops());
            unsafe { init_store_vtable(&WALLET_STORE_VTABLE) };
            library_id
        });
        if registered != library_id {
            return Err(LoadError::AlreadyRegistered {
                library: native.describe(),
            });
        }

        Ok(Arc::new(Self { native, fns }))
    }

    /// Load the configured shared library and open it
    ///
    /// Also builds the bridge runtime from the configured settings if it is
    /// not running yet.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initialization code; the configured
    /// library must be trusted.
    pub unsafe fn from_config(config: &Config) -> Result<Arc<Self>, LoadError> {
        let source = DynamicLibrary::from_config(config)?;
        if let Err(error) = runtime::init_runtime(&config.runtime()) {
            tracing::debug!(%error, "keeping existing runtime");
        }
        Self::open(source, config.namespace())
    }

    pub fn native(&self) -> &NativeLibrary {
        &self.native
    }

    pub fn buffer_ops(&self) -> BufferOps {
        self.native.buffer_ops()
    }

    fn object_vtable(&self) -> ObjectVTable {
        ObjectVTable {
            type_name: "Wallet",
            clone: self.fns.clone,
            free: self.fns.free,
        }
    }
}

impl fmt::Debug for WalletLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletLibrary")
            .field("native", &self.native)
            .finish_non_exhaustive()
    }
}

/// A native wallet
#[derive(Debug)]
pub struct Wallet {
    // Fields drop in declaration order: the native free must run while the
    // library (possibly the last reference to it) is still loaded.
    handle: ObjectHandle,
    library: Arc<WalletLibrary>,
}

impl Wallet {
    /// Create a wallet for a mint, persisting through `store`
    ///
    /// The store is handed to the native side, which releases it when the
    /// wallet is freed.
    pub fn new(
        library: &Arc<WalletLibrary>,
        mint_url: &str,
        store: Arc<dyn WalletStore>,
    ) -> Result<Self, WalletError> {
        let ops = library.buffer_ops();
        let mint_url = wire::lower(ops, &mint_url.to_string()).into_raw();
        let store = lower_wallet_store(store);
        let constructor = library.fns.constructor_new;
        let pointer = status::call_with_error::<_, WalletError, _>(ops, |status| unsafe {
            constructor(mint_url, store, status)
        })?;
        Ok(Self {
            handle: ObjectHandle::new(pointer, library.object_vtable(), ops),
            library: Arc::clone(library),
        })
    }

    fn ops(&self) -> BufferOps {
        self.library.buffer_ops()
    }

    /// The mint this wallet talks to
    pub fn mint_url(&self) -> String {
        let ops = self.ops();
        let mint_url = self.library.fns.mint_url;
        let buffer = {
            let guard = self.handle.acquire();
            status::call_infallible(ops, |status| unsafe { mint_url(guard.pointer(), status) })
        };
        wire::lift(OwnedWireBuffer::new(buffer, ops))
    }

    /// Sum of all unspent proofs
    pub async fn total_balance(&self) -> Result<u64, WalletError> {
        let future = {
            let guard = self.handle.acquire();
            unsafe { (self.library.fns.total_balance)(guard.pointer()) }
        };
        call_async(self.ops(), self.library.fns.future_u64.future(future), |amount| amount).await
    }

    /// Ask the mint for a quote to mint `amount`
    pub async fn mint_quote(
        &self,
        amount: u64,
        description: Option<String>,
    ) -> Result<MintQuote, WalletError> {
        let ops = self.ops();
        let future = {
            let guard = self.handle.acquire();
            let description = wire::lower(ops, &description).into_raw();
            unsafe { (self.library.fns.mint_quote)(guard.pointer(), amount, description) }
        };
        call_async(ops, self.library.fns.future_buffer.future(future), |buffer| {
            wire::lift::<MintQuote>(OwnedWireBuffer::new(buffer, ops))
        })
        .await
    }

    /// Redeem a token, returning the amount received
    pub async fn receive(&self, token: &str) -> Result<u64, WalletError> {
        let ops = self.ops();
        let future = {
            let guard = self.handle.acquire();
            let token = wire::lower(ops, &token.to_string()).into_raw();
            unsafe { (self.library.fns.receive)(guard.pointer(), token) }
        };
        call_async(ops, self.library.fns.future_u64.future(future), |amount| amount).await
    }

    /// Release the native wallet once in-flight calls finish
    ///
    /// Idempotent; dropping the wallet does the same.
    pub fn destroy(&self) {
        self.handle.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_destroyed()
    }
}
