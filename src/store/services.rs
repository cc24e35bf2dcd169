use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::DiskSideloadStorage;
use crate::Engine;
use crate::EntryCache;
use crate::InMemSideloadStorage;
use crate::NodeId;
use crate::RangeId;
use crate::Result;
use crate::Settings;
use crate::SideloadStorage;
use crate::SpanConfigReader;
use crate::SstSnapshotStorage;
use crate::StoreId;
use crate::StoreMetrics;
use crate::StoreTestingKnobs;
use crate::TimestampCache;

/// Store-wide handles shared by every replica of a store.
pub struct StoreServices {
    store_id: StoreId,
    node_id: NodeId,
    engine: Arc<dyn Engine>,
    entry_cache: EntryCache,
    metrics: StoreMetrics,
    ts_cache: TimestampCache,
    span_config_reader: RwLock<Option<Arc<dyn SpanConfigReader>>>,
    knobs: StoreTestingKnobs,
    settings: Settings,
    sst_snapshot_storage: SstSnapshotStorage,
    /// `None` keeps sideloaded payloads in memory
    sideloaded_dir: Option<PathBuf>,
}

impl std::fmt::Debug for StoreServices {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreServices")
            .field("store_id", &self.store_id)
            .field("node_id", &self.node_id)
            .field("engine", &self.engine)
            .field("sideloaded_dir", &self.sideloaded_dir)
            .finish()
    }
}

impl StoreServices {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store_id: StoreId,
        node_id: NodeId,
        engine: Arc<dyn Engine>,
        metrics: StoreMetrics,
        knobs: StoreTestingKnobs,
        settings: Settings,
        span_config_reader: Option<Arc<dyn SpanConfigReader>>,
        sideloaded_dir: Option<PathBuf>,
    ) -> Self {
        let entry_cache = EntryCache::new(settings.storage.entry_cache_max_bytes, metrics.clone());
        let sst_snapshot_storage =
            SstSnapshotStorage::new(settings.storage.data_dir.join(&settings.snapshot.scratch_dir_name));
        Self {
            store_id,
            node_id,
            engine,
            entry_cache,
            metrics,
            ts_cache: TimestampCache::new(),
            span_config_reader: RwLock::new(span_config_reader),
            knobs,
            settings,
            sst_snapshot_storage,
            sideloaded_dir,
        }
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn entry_cache(&self) -> &EntryCache {
        &self.entry_cache
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    pub fn ts_cache(&self) -> &TimestampCache {
        &self.ts_cache
    }

    pub fn knobs(&self) -> &StoreTestingKnobs {
        &self.knobs
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sst_snapshot_storage(&self) -> &SstSnapshotStorage {
        &self.sst_snapshot_storage
    }

    pub fn span_config_reader(&self) -> Option<Arc<dyn SpanConfigReader>> {
        self.span_config_reader.read().clone()
    }

    /// Attaches the reader once span configuration becomes available.
    pub fn set_span_config_reader(
        &self,
        reader: Arc<dyn SpanConfigReader>,
    ) {
        *self.span_config_reader.write() = Some(reader);
    }

    pub(crate) fn new_sideload_storage(
        &self,
        range_id: RangeId,
    ) -> Result<Arc<dyn SideloadStorage>> {
        match &self.sideloaded_dir {
            Some(dir) => Ok(Arc::new(DiskSideloadStorage::new(dir, range_id)?)),
            None => Ok(Arc::new(InMemSideloadStorage::new())),
        }
    }
}
