//! Application settings and file locations.
//!
//! Settings are stored as TOML in `<config_dir>/config.toml`:
//!
//! ```toml
//! enable_cloud_source = true
//! cloud_servers_path = "~/.hostbook/cloud-servers.yaml"
//! ```
//!
//! `config_dir` is `$HOSTBOOK_HOME` when set, otherwise `~/.hostbook`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsutil::{expand_tilde, write_atomic};

/// Environment variable that relocates the settings directory.
pub const HOME_ENV: &str = "HOSTBOOK_HOME";

pub const SETTINGS_FILE: &str = "config.toml";
pub const METADATA_FILE: &str = "metadata.json";
pub const CLOUD_DESCRIPTOR_FILE: &str = "cloud-servers.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read settings {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write settings {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("malformed settings {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot determine home directory")]
    NoHomeDir,
}

/// Where every store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub config_dir: PathBuf,
    /// Primary ssh client config.
    pub ssh_config: PathBuf,
    pub metadata: PathBuf,
}

impl Paths {
    /// Default locations for the current user.
    pub fn resolve() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        let config_dir = std::env::var_os(HOME_ENV)
            .filter(|v| !v.is_empty())
            .map(|v| expand_tilde(&v.to_string_lossy()))
            .unwrap_or_else(|| home.join(".hostbook"));
        Ok(Self::in_dir(config_dir, home.join(".ssh").join("config")))
    }

    /// Locations rooted at `config_dir` with an explicit ssh config.
    pub fn in_dir(config_dir: impl Into<PathBuf>, ssh_config: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            metadata: config_dir.join(METADATA_FILE),
            ssh_config: ssh_config.into(),
            config_dir,
        }
    }

    pub fn with_ssh_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_config = path.into();
        self
    }

    pub fn with_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata = path.into();
        self
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    pub fn default_cloud_descriptor(&self) -> PathBuf {
        self.config_dir.join(CLOUD_DESCRIPTOR_FILE)
    }
}

/// Persisted user preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Include cloud descriptor records in listings.
    pub enable_cloud_source: bool,
    /// Descriptor location; `None` means `<config_dir>/cloud-servers.yaml`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_servers_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_cloud_source: true,
            cloud_servers_path: None,
        }
    }
}

impl Settings {
    /// Read settings. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read settings, falling back to the defaults when the file is unusable.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "using default settings");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolved descriptor path.
    pub fn cloud_descriptor_path(&self, paths: &Paths) -> PathBuf {
        match self.cloud_servers_path.as_deref() {
            Some(p) if !p.trim().is_empty() => expand_tilde(p.trim()),
            _ => paths.default_cloud_descriptor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_settings_are_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::load(&tmp.path().join(SETTINGS_FILE)).unwrap();
        assert!(settings.enable_cloud_source);
        assert!(settings.cloud_servers_path.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join(SETTINGS_FILE);
        let settings = Settings {
            enable_cloud_source: false,
            cloud_servers_path: Some("/srv/cloud.yaml".into()),
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        fs::write(&path, "cloud_servers_path = \"x.yaml\"\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert!(settings.enable_cloud_source);
        assert_eq!(settings.cloud_servers_path.as_deref(), Some("x.yaml"));
    }

    #[test]
    fn test_malformed_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        fs::write(&path, "enable_cloud_source = \"maybe\"\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn test_paths_in_dir() {
        let paths = Paths::in_dir("/tmp/hb", "/tmp/ssh/config");
        assert_eq!(paths.metadata, Path::new("/tmp/hb/metadata.json"));
        assert_eq!(paths.settings_file(), Path::new("/tmp/hb/config.toml"));

        let settings = Settings::default();
        assert_eq!(
            settings.cloud_descriptor_path(&paths),
            Path::new("/tmp/hb/cloud-servers.yaml")
        );

        let paths = paths.with_metadata("/elsewhere/meta.json");
        assert_eq!(paths.metadata, Path::new("/elsewhere/meta.json"));
    }
}
