mod mem;
mod sled;

pub use mem::*;
pub use sled::*;

use std::sync::Arc;

use tracing::info;

use crate::Engine;
use crate::EngineKind;
use crate::Result;
use crate::StorageConfig;

/// Opens the engine selected by `config`.
pub fn open_engine(config: &StorageConfig) -> Result<Arc<dyn Engine>> {
    info!(engine = ?config.engine, data_dir = ?config.data_dir, "opening storage engine");
    match config.engine {
        EngineKind::Mem => Ok(Arc::new(MemEngine::new())),
        EngineKind::Sled => Ok(Arc::new(SledEngine::open(
            &config.data_dir,
            config.sled_cache_capacity,
        )?)),
    }
}
