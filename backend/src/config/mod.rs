//! Configuration management for Macan Downloader

mod settings;

pub use settings::*;

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("macan-downloader")
}

/// Get the configuration file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default location of the persisted download list
pub fn default_state_file() -> PathBuf {
    config_dir().join("downloads.json")
}

/// Load configuration from the default location or create it
pub fn load_or_create_default() -> Result<Settings> {
    load_from(&config_path())
}

/// Load configuration from `path`, writing defaults there if it is missing
pub fn load_from(path: &Path) -> Result<Settings> {
    if path.exists() {
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    } else {
        let settings = Settings::default();
        save_to(path, &settings)?;
        Ok(settings)
    }
}

/// Save configuration to the default location
pub fn save(settings: &Settings) -> Result<()> {
    save_to(&config_path(), settings)
}

/// Save configuration to `path`
pub fn save_to(path: &Path, settings: &Settings) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(settings)?;
    fs::write(path, content)?;

    Ok(())
}

/// Resolve where the download list lives for these settings
pub fn state_file(settings: &Settings) -> PathBuf {
    settings
        .state_file
        .clone()
        .unwrap_or_else(default_state_file)
}
