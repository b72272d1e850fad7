//! Configuration file resolution for pgfga
//!
//! # Environment Variables
//!
//! - `PGFGACONFIG` - Path of the configuration file (same as `--config`)
//! - `XDG_CONFIG_HOME` - Base directory for the default location
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` on the command line (clap also reads `PGFGACONFIG` into it)
//! 2. `PGFGACONFIG` environment variable
//! 3. `XDG_CONFIG_HOME/pgfga/config.yaml` (if set)
//! 4. `~/.config/pgfga/config.yaml`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the config file override
pub const ENV_CONFIG: &str = "PGFGACONFIG";

/// File name looked up in the config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Get the pgfga config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        let path = PathBuf::from(xdg_config).join("pgfga");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("pgfga"))
}

/// Get the configuration file path
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand(&path.to_string_lossy()));
    }

    if let Ok(file) = std::env::var(ENV_CONFIG)
        && !file.is_empty()
    {
        let path = expand(&file);
        log::debug!("Using config file from {}: {}", ENV_CONFIG, path.display());
        return Ok(path);
    }

    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand `~` and environment variables in a path
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path).into_owned());
    PathBuf::from(expanded)
}

/// Expand a path and make it absolute against the working directory
pub fn absolute(path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        return expanded;
    }
    std::path::absolute(&expanded).unwrap_or(expanded)
}

// ============================================================================
// Tests
// ============================================================================
