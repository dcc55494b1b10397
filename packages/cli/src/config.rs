//! CLI Configuration
//!
//! Locates the deployer configuration stored in ~/.corehost/config.toml and
//! applies command-line overrides on top of it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use corehost_deployer::Config;

/// Values given on the command line or through the environment
#[derive(Debug, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub records_dir: Option<PathBuf>,
    pub log_format: Option<String>,
}

/// Get the default config file path (~/.corehost/config.toml)
pub fn path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".corehost").join("config.toml"))
}

/// Load config from disk and apply overrides.
///
/// An explicit path must exist; the default path falls back to defaults.
pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => Config::load(path)?,
        None => {
            let path = path()?;
            Config::load_or_default(&path)
                .with_context(|| format!("Failed to load config at {}", path.display()))?
        }
    };

    if let Some(url) = overrides.api_url {
        config.control_plane.url = url;
    }
    if let Some(key) = overrides.api_key {
        config.control_plane.api_key = Some(key);
    }
    if let Some(dir) = overrides.records_dir {
        config.deploy.records_dir = dir;
    }
    if let Some(format) = overrides.log_format {
        config.logging.format = format;
    }

    Ok(config)
}
