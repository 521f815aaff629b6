//! Project Configuration (ferry.toml)
//!
//! Handles project-level configuration stored in `ferry.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Namespace used for native symbols when none is configured
pub const DEFAULT_NAMESPACE: &str = "wallet";

/// Project configuration from ferry.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Native library location and symbol namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryConfig>,

    /// Async runtime settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,
}

/// Native library configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Short library name, resolved with platform prefixes/extensions (e.g. "wallet_ffi")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Explicit path to the library file; takes precedence over `name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Prefix of every exported symbol (e.g. "wallet" for `wallet_contract_version`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Extra directories searched before the platform defaults
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

/// Async runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Worker threads for callback tasks (default: tokio's choice)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,

    /// Name given to runtime worker threads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(library) = &self.library {
            library.validate()?;
        }
        if let Some(runtime) = &self.runtime {
            runtime.validate()?;
        }
        Ok(())
    }

    /// Get the configured symbol namespace, if present
    pub fn namespace(&self) -> Option<&str> {
        self.library.as_ref().and_then(|l| l.namespace.as_deref())
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if other.library.is_some() {
            self.library = other.library.clone();
        }
        if other.runtime.is_some() {
            self.runtime = other.runtime.clone();
        }
    }
}

impl LibraryConfig {
    /// Validate library settings
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "library.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }

        if let Some(namespace) = &self.namespace {
            if !is_valid_namespace(namespace) {
                return Err(ConfigError::InvalidValue {
                    field: "library.namespace".to_string(),
                    reason: format!(
                        "'{}' is not a C identifier prefix (letters, digits, '_')",
                        namespace
                    ),
                });
            }
        }

        Ok(())
    }
}

impl RuntimeConfig {
    /// Validate runtime settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "runtime.worker_threads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// A namespace is glued in front of symbol names, so it must itself be a C identifier
pub(crate) fn is_valid_namespace(namespace: &str) -> bool {
    let mut chars = namespace.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
