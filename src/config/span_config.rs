use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Size and replication settings applying to a key span.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SpanConfig {
    #[serde(default = "default_range_min_bytes")]
    pub range_min_bytes: u64,

    /// Ranges above this size are split
    #[serde(default = "default_range_max_bytes")]
    pub range_max_bytes: u64,

    #[serde(default = "default_num_replicas")]
    pub num_replicas: u32,

    #[serde(default = "default_gc_ttl_seconds")]
    pub gc_ttl_seconds: u64,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            range_min_bytes: default_range_min_bytes(),
            range_max_bytes: default_range_max_bytes(),
            num_replicas: default_num_replicas(),
            gc_ttl_seconds: default_gc_ttl_seconds(),
        }
    }
}

impl SpanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.range_min_bytes >= self.range_max_bytes {
            return Err(Error::Config(ConfigError::Message(format!(
                "range_min_bytes {} must be less than range_max_bytes {}",
                self.range_min_bytes, self.range_max_bytes
            ))));
        }

        if self.num_replicas == 0 {
            return Err(Error::Config(ConfigError::Message(
                "num_replicas must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_range_min_bytes() -> u64 {
    128 << 20
}
fn default_range_max_bytes() -> u64 {
    512 << 20
}
fn default_num_replicas() -> u32 {
    3
}
fn default_gc_ttl_seconds() -> u64 {
    4 * 60 * 60
}
