//! Loading native libraries
//!
//! - [`loader`] - symbol sources (shared libraries, static tables)
//! - [`contract`] - the version handshake performed on open

pub mod contract;
pub mod loader;

pub use contract::{checksum, Contract, ContractSymbol, NativeLibrary};
pub use loader::{DynamicLibrary, StaticSymbols, SymbolSource};

use std::path::PathBuf;
use thiserror::Error;

/// Library loading and handshake errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("library not found: {0}")]
    LibraryNotFound(String),

    #[error("no native library configured (set library.path or library.name)")]
    NotConfigured,

    #[error("failed to load library {}: {message}", path.display())]
    LoadFailed { path: PathBuf, message: String },

    #[error("symbol '{symbol}' not found in {library}")]
    SymbolNotFound { library: String, symbol: String },

    #[error("contract version mismatch: host expects {expected}, library has {found}")]
    ContractVersionMismatch { expected: u32, found: u32 },

    #[error("{library} cannot be registered: another wallet library owns the callback vtable")]
    AlreadyRegistered { library: String },

    #[error("checksum mismatch for '{symbol}': host expects {expected:#06x}, library has {found:#06x}")]
    ChecksumMismatch {
        symbol: String,
        expected: u16,
        found: u16,
    },
}
