use std::sync::Arc;

use prometheus::Registry;
use tracing::info;

use crate::open_engine;
use crate::Engine;
use crate::EngineKind;
use crate::NodeId;
use crate::Result;
use crate::Settings;
use crate::SpanConfigReader;
use crate::Store;
use crate::StoreId;
use crate::StoreMetrics;
use crate::StoreServices;
use crate::StoreTestingKnobs;

/// Assembles a [`Store`] from settings plus optional overrides of its
/// collaborators.
pub struct StoreBuilder {
    store_id: StoreId,
    node_id: NodeId,
    settings: Settings,
    engine: Option<Arc<dyn Engine>>,
    registry: Option<Registry>,
    knobs: StoreTestingKnobs,
    span_config_reader: Option<Arc<dyn SpanConfigReader>>,
}

impl StoreBuilder {
    pub fn new(
        store_id: StoreId,
        node_id: NodeId,
        settings: Settings,
    ) -> Self {
        Self {
            store_id,
            node_id,
            settings,
            engine: None,
            registry: None,
            knobs: StoreTestingKnobs::default(),
            span_config_reader: None,
        }
    }

    /// Uses `engine` instead of opening the configured one.
    pub fn engine(
        mut self,
        engine: Arc<dyn Engine>,
    ) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn registry(
        mut self,
        registry: Registry,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn knobs(
        mut self,
        knobs: StoreTestingKnobs,
    ) -> Self {
        self.knobs = knobs;
        self
    }

    pub fn span_config_reader(
        mut self,
        reader: Arc<dyn SpanConfigReader>,
    ) -> Self {
        self.span_config_reader = Some(reader);
        self
    }

    pub fn build(self) -> Result<Store> {
        let settings = self.settings.validate()?;
        let engine = match self.engine {
            Some(engine) => engine,
            None => open_engine(&settings.storage)?,
        };
        let metrics = StoreMetrics::new(self.registry.unwrap_or_default())?;
        let sideloaded_dir = match settings.storage.engine {
            EngineKind::Sled => Some(settings.storage.sideloaded_dir()),
            EngineKind::Mem => None,
        };
        info!(
            store_id = self.store_id,
            node_id = self.node_id,
            ?sideloaded_dir,
            "building store"
        );

        let services = StoreServices::new(
            self.store_id,
            self.node_id,
            engine,
            metrics,
            self.knobs,
            settings,
            self.span_config_reader,
            sideloaded_dir,
        );
        Store::new(Arc::new(services))
    }
}
