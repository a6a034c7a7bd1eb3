//! Host configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! gives a working setup: native libraries from `./Plugins`, rayon's global
//! pool and 200x200 blank images.

use std::env::consts::DLL_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for plugin libraries.
    pub plugin_dir: PathBuf,
    /// File extension of plugin libraries, without the dot.
    pub library_extension: String,
    /// Compute threads. 0 uses rayon's global pool.
    pub threads: usize,
    /// Size of images created with "new".
    pub blank_width: usize,
    pub blank_height: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("Plugins"),
            library_extension: DLL_EXTENSION.to_string(),
            threads: 0,
            blank_width: 200,
            blank_height: 200,
        }
    }
}

impl HostConfig {
    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.plugin_dir, PathBuf::from("Plugins"));
        assert_eq!(config.library_extension, DLL_EXTENSION);
        assert_eq!(config.threads, 0);
        assert_eq!((config.blank_width, config.blank_height), (200, 200));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = HostConfig::from_json(r#"{ "plugin_dir": "/opt/filters", "threads": 4 }"#).unwrap();
        assert_eq!(config.plugin_dir, PathBuf::from("/opt/filters"));
        assert_eq!(config.threads, 4);
        assert_eq!(config.library_extension, DLL_EXTENSION);
        assert_eq!(config.blank_width, 200);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            HostConfig::from_json(r#"{ "threads": "many" }"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("imageedit-no-such-config.json");
        assert!(matches!(HostConfig::load(&path), Err(Error::Io { .. })));
    }

    #[test]
    fn test_load_round_trips_saved_config() {
        let path = std::env::temp_dir().join(format!("imageedit-config-{}.json", std::process::id()));
        let config = HostConfig {
            library_extension: "plugin".to_string(),
            blank_width: 640,
            ..HostConfig::default()
        };
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = HostConfig::load(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(loaded.unwrap(), config);
    }
}
