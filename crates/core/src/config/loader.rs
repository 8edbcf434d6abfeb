//! Config path resolution
//!
//! The config file is taken from `DATATREE_CONFIG` when set, otherwise
//! `datatree.toml` in the working directory.

use std::path::PathBuf;

use super::ConfigResult;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "DATATREE_CONFIG";

/// File name used when no override is set
pub const DEFAULT_FILE_NAME: &str = "datatree.toml";

/// Returns the path of the model config file.
///
/// Path: `$DATATREE_CONFIG`, or `./datatree.toml`
pub fn config_path() -> ConfigResult<PathBuf> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(std::env::current_dir()?.join(DEFAULT_FILE_NAME)),
    }
}
