//! Ferry Runtime - host side of a C ABI bridge
//!
//! Lets a host call into a native library that exposes only C entry points,
//! and lets that library call back into host-implemented interfaces:
//! - Wire buffers and a canonical value codec
//! - Native object lifetimes with per-call pinning
//! - The call-status channel (domain errors vs. faults)
//! - An async bridge for native futures
//! - A dispatcher for native-to-host async callbacks, with cancellation
//! - Library loading and a version handshake
//! - Bindings for the native wallet library
//!
//! Protocol violations are never returned as errors: they raise a
//! [`Fault`], which logs and panics.

/// Ferry runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod callback;
pub mod fault;
pub mod future;
pub mod handle;
pub mod library;
pub mod runtime;
pub mod status;
pub mod wallet;
pub mod wire;

#[cfg(test)]
mod testing;

pub use callback::{StoreError, WalletStore};
pub use fault::Fault;
pub use future::{call_async, NativeFuture};
pub use handle::{HandleTable, ObjectHandle};
pub use library::{DynamicLibrary, LoadError, NativeLibrary, StaticSymbols, SymbolSource};
pub use runtime::block_on;
pub use status::{call_with_error, CallStatus};
pub use wallet::{MintQuote, QuoteState, Wallet, WalletError, WalletLibrary};
pub use wire::{lift, lower, CodecError, WireBuffer, WireCodec};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
