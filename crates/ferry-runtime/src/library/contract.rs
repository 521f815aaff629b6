//! Version handshake with the native library
//!
//! A library exports `{ns}_contract_version() -> u32` and, for every API
//! symbol, `{ns}_checksum_{symbol}() -> u16`. Both are compared against
//! values compiled into the host before any API call can be made, so a
//! stale or mismatched library fails at load time rather than corrupting
//! memory later.

use super::loader::SymbolSource;
use super::LoadError;
use crate::wire::{BufferFreeFn, BufferOps, FromBytesFn};
use std::ffi::c_void;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Checksum of a symbol's signature text
///
/// 64-bit FNV-1a, folded to 16 bits by xoring its four 16-bit words.
pub const fn checksum(signature: &str) -> u16 {
    let bytes = signature.as_bytes();
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    (hash ^ (hash >> 16) ^ (hash >> 32) ^ (hash >> 48)) as u16
}

/// One API symbol and the checksum of its signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractSymbol {
    pub name: &'static str,
    pub checksum: u16,
}

impl ContractSymbol {
    pub const fn new(name: &'static str, signature: &'static str) -> Self {
        Self {
            name,
            checksum: checksum(signature),
        }
    }
}

/// What the host expects a library to export
#[derive(Debug, Clone, Copy)]
pub struct Contract {
    pub version: u32,
    pub symbols: &'static [ContractSymbol],
}

impl Contract {
    /// Expected checksum for a symbol, if it is part of the contract
    pub fn checksum_of(&self, name: &str) -> Option<u16> {
        self.symbols
            .iter()
            .find(|symbol| symbol.name == name)
            .map(|symbol| symbol.checksum)
    }
}

type VersionFn = unsafe extern "C" fn() -> u32;
type ChecksumFn = unsafe extern "C" fn() -> u16;

/// A native library that passed the handshake
pub struct NativeLibrary {
    source: Box<dyn SymbolSource>,
    namespace: String,
    buffers: BufferOps,
}

impl NativeLibrary {
    /// Verify `source` against `contract` and resolve its buffer entry points
    pub fn open<S>(source: S, namespace: &str, contract: &Contract) -> Result<Self, LoadError>
    where
        S: SymbolSource + 'static,
    {
        let source: Box<dyn SymbolSource> = Box::new(source);
        handshake(source.as_ref(), namespace, contract)?;

        // SAFETY: signatures of the buffer entry points are fixed by the ABI
        let buffers = unsafe {
            BufferOps {
                from_bytes: resolve::<FromBytesFn>(source.as_ref(), namespace, "wirebuffer_from_bytes")?,
                free: resolve::<BufferFreeFn>(source.as_ref(), namespace, "wirebuffer_free")?,
            }
        };
        tracing::debug!(
            library = %source.describe(),
            namespace,
            version = contract.version,
            "native library passed handshake"
        );
        Ok(Self {
            source,
            namespace: namespace.to_string(),
            buffers,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn buffer_ops(&self) -> BufferOps {
        self.buffers
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Exported name of an API symbol
    pub fn symbol_name(&self, symbol: &str) -> String {
        symbol_name(&self.namespace, symbol)
    }

    /// Resolve a namespaced symbol as a function pointer of type `F`
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the symbol's real
    /// signature.
    pub unsafe fn function<F: Copy>(&self, symbol: &str) -> Result<F, LoadError> {
        resolve(self.source.as_ref(), &self.namespace, symbol)
    }
}

fn symbol_name(namespace: &str, symbol: &str) -> String {
    format!("{namespace}_{symbol}")
}

fn address(source: &dyn SymbolSource, namespace: &str, symbol: &str) -> Result<*const c_void, LoadError> {
    let name = symbol_name(namespace, symbol);
    source
        .symbol(&name)
        .filter(|address| !address.is_null())
        .ok_or_else(|| LoadError::SymbolNotFound {
            library: source.describe(),
            symbol: name,
        })
}

unsafe fn resolve<F: Copy>(source: &dyn SymbolSource, namespace: &str, symbol: &str) -> Result<F, LoadError> {
    debug_assert_eq!(
        std::mem::size_of::<F>(),
        std::mem::size_of::<*const c_void>()
    );
    let address = address(source, namespace, symbol)?;
    Ok(std::mem::transmute_copy::<*const c_void, F>(&address))
}

fn handshake(source: &dyn SymbolSource, namespace: &str, contract: &Contract) -> Result<(), LoadError> {
    // SAFETY: handshake symbols take no arguments and return plain integers
    let version = unsafe { resolve::<VersionFn>(source, namespace, "contract_version")?() };
    if version != contract.version {
        return Err(LoadError::ContractVersionMismatch {
            expected: contract.version,
            found: version,
        });
    }

    for symbol in contract.symbols {
        let checksum_name = format!("checksum_{}", symbol.name);
        let found = unsafe { resolve::<ChecksumFn>(source, namespace, &checksum_name)?() };
        if found != symbol.checksum {
            return Err(LoadError::ChecksumMismatch {
                symbol: symbol_name(namespace, symbol.name),
                expected: symbol.checksum,
                found,
            });
        }
        address(source, namespace, symbol.name)?;
    }
    Ok(())
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("source", &self.source.describe())
            .field("namespace", &self.namespace)
            .finish()
    }
}
