//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{ProjectConfig, RuntimeConfig, DEFAULT_NAMESPACE};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project config file name
pub const CONFIG_FILE_NAME: &str = "ferry.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.ferry/config.toml) - lowest priority
/// 2. Project config (./ferry.toml) - overrides global
/// 3. Environment variables (FERRY_*) - overrides project
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where ferry.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use a specific global config file instead of ~/.ferry/config.toml
    pub fn with_global_config_path(path: PathBuf) -> Self {
        Self {
            global_config_path: Some(path),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find ferry.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config) or error if the file is invalid
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file (or home dir) yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        if self.global_config_path.is_none() {
            match GlobalConfig::global_config_path() {
                Ok(path) => self.global_config_path = Some(path),
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            }
        }

        match &self.global_config_path {
            Some(path) if path.exists() => GlobalConfig::load_from_file(path),
            _ => Ok(GlobalConfig::default()),
        }
    }

    /// Apply environment variable overrides to project config
    ///
    /// - FERRY_LIBRARY: path to the native library
    /// - FERRY_NAMESPACE: exported symbol prefix
    /// - FERRY_WORKER_THREADS: callback runtime worker count
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(path) = env::var("FERRY_LIBRARY") {
            config.library.get_or_insert_with(Default::default).path = Some(PathBuf::from(path));
        }

        if let Ok(namespace) = env::var("FERRY_NAMESPACE") {
            config.library.get_or_insert_with(Default::default).namespace = Some(namespace);
        }

        if let Ok(threads) = env::var("FERRY_WORKER_THREADS") {
            let threads = threads
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "FERRY_WORKER_THREADS".to_string(),
                    reason: e.to_string(),
                })?;
            config.runtime.get_or_insert_with(Default::default).worker_threads = Some(threads);
        }

        config.validate()?;
        Ok(config)
    }

    /// Get the global configuration directory (~/.ferry)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ferry"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Effective symbol namespace (project > global > default)
    pub fn namespace(&self) -> &str {
        self.project
            .namespace()
            .or_else(|| {
                self.global
                    .library
                    .as_ref()
                    .and_then(|l| l.namespace.as_deref())
            })
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Explicit library path, resolved against the project root when relative
    pub fn library_path(&self) -> Option<PathBuf> {
        let path = self.project.library.as_ref()?.path.as_ref()?;
        Some(self.resolve(path))
    }

    /// Short library name used for search-path resolution
    pub fn library_name(&self) -> Option<&str> {
        self.project
            .library
            .as_ref()
            .and_then(|l| l.name.as_deref())
    }

    /// Project search paths (resolved) followed by global ones
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let project = self
            .project
            .library
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or(&[]);

        project
            .iter()
            .map(|p| self.resolve(p))
            .chain(self.global.search_paths().iter().cloned())
            .collect()
    }

    /// Effective runtime settings (project > global > default)
    pub fn runtime(&self) -> RuntimeConfig {
        self.project
            .runtime
            .clone()
            .or_else(|| self.global.runtime.clone())
            .unwrap_or_default()
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has ferry.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}
