//! Configuration loading and storage root resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents (`~/.config/chanvault/config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Storage root folder (blobs + database live beneath it)
    pub root_folder: Option<String>,
    /// Log filter (e.g. "info", "chanvault_ingest=debug")
    pub log_filter: Option<String>,
}

/// Storage root resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `CHANVAULT_ROOT` environment variable
/// 3. TOML config file `root_folder` key
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("CHANVAULT_ROOT") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_toml_config() {
        if let Some(root) = config.root_folder {
            return PathBuf::from(root);
        }
    }

    // Priority 4: OS-dependent default
    default_root_folder()
}

/// Ensure the storage root and its blobs/ subdirectory exist
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root.join("blobs"))?;
    Ok(())
}

/// Database path beneath the storage root
pub fn database_path(root: &Path) -> PathBuf {
    root.join("chanvault.db")
}

/// Default configuration file path for the platform
pub fn config_file_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("chanvault").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load the TOML config file, if present
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = config_file_path()?;
    if !path.exists() {
        return Err(Error::Config(format!("Config file not found: {}", path.display())));
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write the TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// OS-dependent default storage root
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("chanvault"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/chanvault"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("chanvault"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/chanvault"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("chanvault"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\chanvault"))
    } else {
        PathBuf::from("./chanvault_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_takes_priority() {
        let root = resolve_root_folder(Some("/tmp/cv-test-root"));
        assert_eq!(root, PathBuf::from("/tmp/cv-test-root"));
    }

    #[test]
    fn toml_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = TomlConfig {
            root_folder: Some("/data/chanvault".to_string()),
            log_filter: Some("debug".to_string()),
        };
        write_toml_config(&config, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: TomlConfig = toml::from_str(&content).unwrap();
        assert_eq!(loaded.root_folder.as_deref(), Some("/data/chanvault"));
        assert_eq!(loaded.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn ensure_root_creates_blobs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("vault");
        ensure_root_folder(&root).unwrap();
        assert!(root.join("blobs").is_dir());
    }
}
