//! Where native symbols come from
//!
//! [`DynamicLibrary`] loads a shared library with `libloading`, resolving
//! short names with platform naming conventions and search paths.
//! [`StaticSymbols`] is a plain address table for libraries linked into the
//! process (and for tests).

use super::LoadError;
use ferry_config::Config;
use libloading::Library;
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

/// A provider of native symbol addresses
pub trait SymbolSource: Send + Sync {
    /// Address of an exported symbol, or `None` if it is not exported
    fn symbol(&self, name: &str) -> Option<*const c_void>;

    /// Human-readable origin, for errors and logs
    fn describe(&self) -> String;
}

/// A shared library loaded from disk
///
/// Symbols resolved from it stay valid for as long as this value lives.
#[derive(Debug)]
pub struct DynamicLibrary {
    path: PathBuf,
    library: Library,
}

impl DynamicLibrary {
    /// Load a library from an explicit path
    ///
    /// # Safety
    ///
    /// Loading runs the library's initialization code; the library must be
    /// trusted.
    pub unsafe fn open(path: &Path) -> Result<Self, LoadError> {
        tracing::debug!(path = %path.display(), "loading native library");
        let library = Library::new(path).map_err(|e| LoadError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            library,
        })
    }

    /// Find a library by short name (`wallet_ffi` -> `libwallet_ffi.so`)
    ///
    /// `search_paths` are tried before the platform defaults.
    ///
    /// # Safety
    ///
    /// As for [`DynamicLibrary::open`].
    pub unsafe fn find(name: &str, search_paths: &[PathBuf]) -> Result<Self, LoadError> {
        let mut paths = search_paths.to_vec();
        paths.extend(default_search_paths());
        let path = resolve_library_path(name, &paths)
            .ok_or_else(|| LoadError::LibraryNotFound(name.to_string()))?;
        Self::open(&path)
    }

    /// Load the library named by configuration
    ///
    /// An explicit `path` wins over `name`.
    ///
    /// # Safety
    ///
    /// As for [`DynamicLibrary::open`].
    pub unsafe fn from_config(config: &Config) -> Result<Self, LoadError> {
        if let Some(path) = config.library_path() {
            return Self::open(&path);
        }
        match config.library_name() {
            Some(name) => Self::find(name, &config.search_paths()),
            None => Err(LoadError::NotConfigured),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for DynamicLibrary {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        // SAFETY: the address is only reinterpreted by typed lookups that
        // the contract checksums vouch for.
        unsafe {
            self.library
                .get::<*const c_void>(name.as_bytes())
                .ok()
                .map(|symbol| *symbol)
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Platform library search paths, current directory first
///
/// - Linux: /usr/lib, /usr/local/lib, /lib (+ lib64 variants)
/// - macOS: /usr/lib, /usr/local/lib, /opt/homebrew/lib
/// - Windows: System32
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/lib"));
        if cfg!(target_pointer_width = "64") {
            paths.push(PathBuf::from("/usr/lib64"));
            paths.push(PathBuf::from("/lib64"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(system_root) = std::env::var("SystemRoot") {
            paths.push(PathBuf::from(format!("{}\\System32", system_root)));
        }
        paths.push(PathBuf::from("C:\\Windows\\System32"));
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.insert(0, cwd);
    }
    paths
}

/// Platform file names for a short library name, in priority order
pub fn library_file_names(name: &str) -> Vec<String> {
    let extensions: &[&str] = if cfg!(target_os = "windows") {
        &["dll"]
    } else if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else {
        &["so"]
    };
    let prefixes: &[&str] = if cfg!(target_os = "windows") {
        &["", "lib"]
    } else {
        &["lib", ""]
    };

    let mut names = Vec::new();
    for prefix in prefixes {
        for ext in extensions {
            names.push(format!("{prefix}{name}.{ext}"));
        }
    }
    names
}

/// First existing file for `name` across `search_paths`
pub fn resolve_library_path(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    let file_names = library_file_names(name);
    search_paths.iter().find_map(|dir| {
        file_names
            .iter()
            .map(|file| dir.join(file))
            .find(|candidate| candidate.exists())
    })
}

/// An in-process symbol table
#[derive(Debug, Clone, Default)]
pub struct StaticSymbols {
    name: String,
    addresses: HashMap<String, usize>,
}

impl StaticSymbols {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: HashMap::new(),
        }
    }

    /// Add (or replace) a symbol
    pub fn with(mut self, symbol: impl Into<String>, address: *const c_void) -> Self {
        self.insert(symbol, address);
        self
    }

    pub fn insert(&mut self, symbol: impl Into<String>, address: *const c_void) {
        self.addresses.insert(symbol.into(), address as usize);
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        self.addresses.remove(symbol).is_some()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl SymbolSource for StaticSymbols {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        self.addresses
            .get(name)
            .map(|&address| address as *const c_void)
    }

    fn describe(&self) -> String {
        format!("static symbols '{}'", self.name)
    }
}
