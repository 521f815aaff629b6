//! Global Configuration (~/.ferry/config.toml)
//!
//! Handles user-level defaults stored in `~/.ferry/config.toml`.

use crate::project::{LibraryConfig, RuntimeConfig};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.ferry/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Library defaults (search paths, namespace)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryConfig>,

    /// Runtime defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeConfig>,
}

impl GlobalConfig {
    /// Load global configuration from a file
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

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(library) = &self.library {
            library.validate()?;
        }
        if let Some(runtime) = &self.runtime {
            runtime.validate()?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.ferry/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ferry").join("config.toml"))
    }

    /// Search paths every project inherits
    pub fn search_paths(&self) -> &[PathBuf] {
        self.library
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or(&[])
    }
}
