//! Configuration for the data model
//!
//! This module provides the [`ModelConfig`] settings struct that supports:
//! - Type-safe settings via serde
//! - TOML file format
//! - Auto-generation of a default config file
//! - Manual reload capability
//!
//! # Example
//!
//! ```ignore
//! use datatree_core::{DataGraph, ModelConfig};
//!
//! let config = ModelConfig::load().unwrap_or_default();
//! let graph = DataGraph::with_config(config);
//! ```

mod loader;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use loader::{config_path, CONFIG_ENV, DEFAULT_FILE_NAME};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Data model settings.
///
/// Loaded from the path returned by [`config_path`]. Missing keys take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// Deepest ownership chain walked when bubbling, invalidating or
    /// (de)serializing
    pub max_depth: usize,

    /// Include linked property values in exported documents
    pub export_linked: bool,

    /// Log unknown keys met on import at warn instead of debug
    pub warn_unknown_keys: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            max_depth: 256,
            export_linked: false,
            warn_unknown_keys: false,
        }
    }
}

impl ModelConfig {
    /// Load config from the default path, creating a default file if missing.
    pub fn load() -> ConfigResult<Self> {
        let path = config_path()?;

        if path.exists() {
            let config = Self::load_from(&path)?;
            tracing::debug!("Loaded model config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(&path)?;
            tracing::info!("Created default model config at {:?}", path);
            Ok(default)
        }
    }

    /// Load config from a specific file.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved model config to {:?}", path);
        Ok(())
    }

    /// Reload config from the default path.
    ///
    /// Updates self with the current file contents.
    pub fn reload(&mut self) -> ConfigResult<()> {
        let path = config_path()?;
        *self = Self::load_from(&path)?;
        tracing::debug!("Reloaded model config from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_default() {
        let config = ModelConfig::default();
        assert_eq!(config.version, 1);
        assert!(!config.debug);
        assert_eq!(config.max_depth, 256);
        assert!(!config.export_linked);
        assert!(!config.warn_unknown_keys);
    }

    #[test]
    fn test_model_config_serialize() {
        let config = ModelConfig {
            version: 2,
            debug: true,
            ..Default::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("version = 2"));
        assert!(toml_str.contains("debug = true"));
        assert!(toml_str.contains("max_depth = 256"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ModelConfig::from_toml_str("export_linked = true\nmax_depth = 8\n").unwrap();
        assert!(config.export_linked);
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.version, 1);
    }

    #[test]
    fn test_invalid_toml() {
        let err = ModelConfig::from_toml_str("max_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("datatree-config-{}", std::process::id()));
        let path = dir.join("model.toml");

        let config = ModelConfig {
            warn_unknown_keys: true,
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        let loaded = ModelConfig::load_from(&path).unwrap();
        let _ = std::fs::remove_dir_all(&dir);

        assert_eq!(config, loaded);
    }
}
