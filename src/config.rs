//! Runtime Configuration
//!
//! Handles parsing and management of imgpipe.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file searched for by [`RuntimeConfig::find_and_load`]
pub const CONFIG_FILE_NAME: &str = "imgpipe.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching imgpipe.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Device backend binding
    #[serde(default)]
    pub device: DeviceConfig,
}

impl RuntimeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    ///
    /// Falls back to defaults when no file is found before the filesystem root.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Which backend library provides device callbacks, and under which names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Library name or path of the compiled backend
    #[serde(default)]
    pub library: Option<String>,

    /// Directories searched when `library` is a bare name
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Exported symbol for copying device data to the host
    #[serde(default = "default_copy_to_host_symbol")]
    pub copy_to_host_symbol: String,

    /// Exported symbol for copying host data to the device
    #[serde(default = "default_copy_to_device_symbol")]
    pub copy_to_device_symbol: String,

    /// Exported symbol for releasing a device allocation
    #[serde(default = "default_free_device_symbol")]
    pub free_device_symbol: String,
}

fn default_copy_to_host_symbol() -> String {
    "copy_to_host".to_string()
}

fn default_copy_to_device_symbol() -> String {
    "copy_to_dev".to_string()
}

fn default_free_device_symbol() -> String {
    "free_dev_buffer".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            library: None,
            search_paths: Vec::new(),
            copy_to_host_symbol: default_copy_to_host_symbol(),
            copy_to_device_symbol: default_copy_to_device_symbol(),
            free_device_symbol: default_free_device_symbol(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.device.library.is_none());
        assert_eq!(config.device.copy_to_host_symbol, "copy_to_host");
        assert_eq!(config.device.copy_to_device_symbol, "copy_to_dev");
        assert_eq!(config.device.free_device_symbol, "free_dev_buffer");
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[device]
library = "cuda_backend"
search_paths = ["/opt/backends"]
free_device_symbol = "backend_device_free"
"#;
        let config: RuntimeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.library.as_deref(), Some("cuda_backend"));
        assert_eq!(config.device.search_paths, vec![PathBuf::from("/opt/backends")]);
        assert_eq!(config.device.free_device_symbol, "backend_device_free");
        // Unset symbols keep their defaults
        assert_eq!(config.device.copy_to_host_symbol, "copy_to_host");
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_load_missing() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/imgpipe.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_and_find() {
        let root = std::env::temp_dir().join(format!("imgpipe_config_{}", std::process::id()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = RuntimeConfig::default();
        config.device.library = Some("opencl_backend".to_string());
        config.save(&root.join(CONFIG_FILE_NAME)).unwrap();

        let found = RuntimeConfig::find_and_load(&nested).unwrap();
        assert_eq!(found, config);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
