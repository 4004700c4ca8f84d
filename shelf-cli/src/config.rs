use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use shelf_index::GroupAllowList;
use shelf_sync::SyncConfig;

/// Connection details of a Plex server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlexConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_root: PathBuf,
    pub page_size: usize,
    pub media_workers: usize,
    pub allowed_groups: GroupAllowList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plex: Option<PlexConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            data_root: default_data_root().unwrap_or(sync.data_root),
            page_size: sync.page_size,
            media_workers: sync.media_workers,
            allowed_groups: sync.allowed_groups,
            plex: None,
        }
    }
}

impl Config {
    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Load configuration from `path`
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Config> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            data_root: self.data_root.clone(),
            page_size: self.page_size,
            media_workers: self.media_workers,
            allowed_groups: self.allowed_groups.clone(),
            ..Default::default()
        }
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".shelfsync").join("config.toml"))
}

/// Get the default data root
pub fn default_data_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".shelfsync").join("data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = Config {
            data_root: PathBuf::from("/srv/shelf"),
            page_size: 50,
            media_workers: 8,
            allowed_groups: GroupAllowList::new(["games", "platforms"]),
            plex: Some(PlexConfig {
                url: "http://plex.local:32400".to_string(),
                token: "secret".to_string(),
            }),
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("page_size = 50"));
        assert!(toml_str.contains("[plex]"));

        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        assert_eq!(Config::load_or_default(&path).unwrap().plex, None);

        let config = Config {
            data_root: temp_dir.path().join("data"),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.sync_config().media_root(), temp_dir.path().join("data").join("media"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("page_size = 25\n").unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.media_workers, 4);
        assert!(config.allowed_groups.contains("games"));
    }
}
