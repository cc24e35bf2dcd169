use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Which engine adaptor backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Mem,
    #[default]
    Sled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory of the engine, side storage and snapshot scratch space
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub engine: EngineKind,

    /// Byte bound of the store-wide log entry cache
    #[serde(default = "default_entry_cache_max_bytes")]
    pub entry_cache_max_bytes: u64,

    /// Directory (below `data_dir`) holding sideloaded payloads
    #[serde(default = "default_sideloaded_dir_name")]
    pub sideloaded_dir_name: String,

    /// Page cache capacity of the sled adaptor
    #[serde(default = "default_sled_cache_capacity")]
    pub sled_cache_capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            engine: EngineKind::default(),
            entry_cache_max_bytes: default_entry_cache_max_bytes(),
            sideloaded_dir_name: default_sideloaded_dir_name(),
            sled_cache_capacity: default_sled_cache_capacity(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.entry_cache_max_bytes == 0 {
            return Err(Error::Config(ConfigError::Message(
                "entry_cache_max_bytes must be greater than 0".into(),
            )));
        }

        if self.sideloaded_dir_name.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "sideloaded_dir_name cannot be empty".into(),
            )));
        }

        if self.engine == EngineKind::Sled && self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "data_dir is required by the sled engine".into(),
            )));
        }

        Ok(())
    }

    pub fn sideloaded_dir(&self) -> PathBuf {
        self.data_dir.join(&self.sideloaded_dir_name)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./db")
}
fn default_entry_cache_max_bytes() -> u64 {
    16 * 1024 * 1024
}
fn default_sideloaded_dir_name() -> String {
    "sideloading".to_string()
}
fn default_sled_cache_capacity() -> u64 {
    64 * 1024 * 1024
}
