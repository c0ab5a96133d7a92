//! On-disk layout for a server base folder: a YAML
//! config file plus a log directory, with the base folder owning
//! everything the process needs to find on disk.

use std::path::{Path, PathBuf};

use qcbroker_core::settings::ServerConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "qcbroker.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerFileConfig {
    #[serde(flatten)]
    pub server: ServerConfig,
    pub log_directory: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            log_directory: "logs".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("base folder {0} does not contain {CONFIG_FILE_NAME}; run `qcbroker-server init` first")]
    Missing(PathBuf),
    #[error("failed to read config at {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config at {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
    #[error("failed to write config at {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

pub fn config_path(base_folder: &Path) -> PathBuf {
    base_folder.join(CONFIG_FILE_NAME)
}

pub fn init(base_folder: &Path) -> Result<ServerFileConfig, ConfigError> {
    std::fs::create_dir_all(base_folder).map_err(|source| ConfigError::Write {
        path: base_folder.to_path_buf(),
        source,
    })?;
    let config = ServerFileConfig::default();
    std::fs::create_dir_all(base_folder.join(&config.log_directory)).map_err(|source| ConfigError::Write {
        path: base_folder.to_path_buf(),
        source,
    })?;
    write(base_folder, &config)?;
    Ok(config)
}

pub fn load(base_folder: &Path) -> Result<ServerFileConfig, ConfigError> {
    let path = config_path(base_folder);
    if !path.exists() {
        return Err(ConfigError::Missing(base_folder.to_path_buf()));
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
}

pub fn write(base_folder: &Path, config: &ServerFileConfig) -> Result<(), ConfigError> {
    let path = config_path(base_folder);
    let raw = serde_yaml::to_string(config).expect("ServerFileConfig always serializes");
    std::fs::write(&path, raw).map_err(|source| ConfigError::Write { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_load_round_trips() {
        let dir = tempfile_dir();
        let config = init(&dir).unwrap();
        let loaded = load(&dir).unwrap();
        assert_eq!(config.server.bind_address, loaded.server.bind_address);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_without_init_reports_missing() {
        let dir = std::env::temp_dir().join(format!("qcbroker-missing-{}", uuid::Uuid::new_v4()));
        assert!(matches!(load(&dir), Err(ConfigError::Missing(_))));
    }

    fn tempfile_dir() -> PathBuf {
        std::env::temp_dir().join(format!("qcbroker-test-{}", uuid::Uuid::new_v4()))
    }
}
