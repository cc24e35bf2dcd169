use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::CLEAR_RANGE_THRESHOLD_POINT_KEYS;
use crate::CLEAR_RANGE_THRESHOLD_RANGE_KEYS;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Directory (below `data_dir`) holding per-snapshot staged files
    #[serde(default = "default_scratch_dir_name")]
    pub scratch_dir_name: String,

    /// Point keys in a span at which clearing uses one range deletion
    #[serde(default = "default_clear_range_threshold_point_keys")]
    pub clear_range_threshold_point_keys: usize,

    /// Range keys in a span at which clearing uses one range deletion
    #[serde(default = "default_clear_range_threshold_range_keys")]
    pub clear_range_threshold_range_keys: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            scratch_dir_name: default_scratch_dir_name(),
            clear_range_threshold_point_keys: default_clear_range_threshold_point_keys(),
            clear_range_threshold_range_keys: default_clear_range_threshold_range_keys(),
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scratch_dir_name.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "scratch_dir_name cannot be empty".into(),
            )));
        }

        if self.clear_range_threshold_point_keys == 0 || self.clear_range_threshold_range_keys == 0 {
            return Err(Error::Config(ConfigError::Message(
                "clear range thresholds must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_scratch_dir_name() -> String {
    "snapshot-scratch".to_string()
}
fn default_clear_range_threshold_point_keys() -> usize {
    CLEAR_RANGE_THRESHOLD_POINT_KEYS
}
fn default_clear_range_threshold_range_keys() -> usize {
    CLEAR_RANGE_THRESHOLD_RANGE_KEYS
}
