//! Configuration module
//!
//! Gateway settings loaded from a TOML file, with platform-default
//! directories when paths are left unset.

mod settings;

pub use settings::{GatewayConfig, Gt06Config, LogConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the gateway configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "avlgate", "Avlgate")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the gateway data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "avlgate", "Avlgate")
        .map(|dirs| dirs.data_dir().to_path_buf())
}
