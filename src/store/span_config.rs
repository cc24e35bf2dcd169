#[cfg(test)]
use mockall::automock;

use crate::SpanConfig;
use crate::SpanConfigError;

/// Source of per-span configuration (size thresholds, replication factor).
#[cfg_attr(test, automock)]
pub trait SpanConfigReader: Send + Sync {
    /// Config that applies to the range starting at `key`. Fails with
    /// `SpanConfigError::Unavailable` until configuration data arrived.
    fn get_span_config_for_key(
        &self,
        key: &[u8],
    ) -> std::result::Result<SpanConfig, SpanConfigError>;
}

/// Serves the same config for every key.
#[derive(Debug, Clone)]
pub struct StaticSpanConfigReader {
    config: SpanConfig,
}

impl StaticSpanConfigReader {
    pub fn new(config: SpanConfig) -> Self {
        Self { config }
    }
}

impl SpanConfigReader for StaticSpanConfigReader {
    fn get_span_config_for_key(
        &self,
        _key: &[u8],
    ) -> std::result::Result<SpanConfig, SpanConfigError> {
        Ok(self.config.clone())
    }
}
