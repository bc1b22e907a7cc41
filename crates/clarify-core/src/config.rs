use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StoreError};

/// SQLite `synchronous` levels accepted by [`StorageConfig::synchronous`].
pub const SYNCHRONOUS_LEVELS: &[&str] = &["off", "normal", "full", "extra"];

/// Top-level configuration for a clarification store host.
///
/// Loaded from a TOML file. Each section corresponds to one concern; every
/// section defaults independently so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClarifyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ClarifyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClarifyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Entry store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store location. The suffix selects the backend.
    pub path: PathBuf,
    /// How long the relational engine waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Relational page cache size in KiB.
    pub cache_size_kib: u32,
    /// SQLite `synchronous` level: off, normal, full or extra.
    pub synchronous: String,
    /// Entries not seen for this many days are considered stale.
    pub stale_after_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("clarifications.yaml"),
            busy_timeout_ms: 5000,
            cache_size_kib: 16 * 1024,
            synchronous: "normal".to_string(),
            stale_after_days: 90,
        }
    }
}

impl StorageConfig {
    /// Default settings pointed at `path`.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Config("storage.path must not be empty".into()));
        }
        let level = self.synchronous.to_lowercase();
        if !SYNCHRONOUS_LEVELS.contains(&level.as_str()) {
            return Err(StoreError::Config(format!(
                "storage.synchronous must be one of {}, got '{}'",
                SYNCHRONOUS_LEVELS.join(", "),
                self.synchronous
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ClarifyConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.path, PathBuf::from("clarifications.yaml"));
        assert_eq!(config.storage.busy_timeout_ms, 5000);
        assert_eq!(config.storage.cache_size_kib, 16384);
        assert_eq!(config.storage.synchronous, "normal");
        assert_eq!(config.storage.stale_after_days, 90);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[storage]
path = "/var/lib/clarify/entries.db"
busy_timeout_ms = 250
cache_size_kib = 2048
synchronous = "full"
stale_after_days = 30
"#;
        let file = create_temp_config(content);
        let config = ClarifyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(
            config.storage.path,
            PathBuf::from("/var/lib/clarify/entries.db")
        );
        assert_eq!(config.storage.busy_timeout_ms, 250);
        assert_eq!(config.storage.cache_size_kib, 2048);
        assert_eq!(config.storage.synchronous, "full");
        assert_eq!(config.storage.stale_after_days, 30);
        config.storage.validate().unwrap();
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[storage]
path = "team.yml"
"#;
        let file = create_temp_config(content);
        let config = ClarifyConfig::load(file.path()).unwrap();
        assert_eq!(config.storage.path, PathBuf::from("team.yml"));
        assert_eq!(config.storage.busy_timeout_ms, 5000);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_config_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = ClarifyConfig::load(file.path()).unwrap();
        assert_eq!(config.storage.stale_after_days, 90);
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = ClarifyConfig::load(file.path());
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ClarifyConfig::load_or_default(Path::new("/nonexistent/clarify.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("clarify.toml");

        let mut config = ClarifyConfig::default();
        config.storage = StorageConfig::for_path("entries.sqlite");
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = ClarifyConfig::load(&path).unwrap();
        assert_eq!(reloaded.storage.path, PathBuf::from("entries.sqlite"));
        assert_eq!(reloaded.general.log_level, "info");
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let config = StorageConfig::for_path("");
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_synchronous_level() {
        let mut config = StorageConfig::for_path("a.db");
        config.synchronous = "sometimes".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sometimes"));

        config.synchronous = "FULL".to_string();
        assert!(config.validate().is_ok());
    }
}
