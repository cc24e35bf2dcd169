use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::IncomingSnapshot;
use crate::Result;

/// Runs right before the staged files of a snapshot are ingested. An error
/// aborts the application; nothing durable has happened yet.
pub type BeforeSnapshotSstIngestion = Arc<dyn Fn(&IncomingSnapshot, &[PathBuf]) -> Result<()> + Send + Sync>;

/// Runs right after ingestion. An error is fatal.
pub type AfterSnapshotSstIngestion = Arc<dyn Fn(&IncomingSnapshot) -> Result<()> + Send + Sync>;

/// Hooks for tests.
#[derive(Clone, Default)]
pub struct StoreTestingKnobs {
    pub before_snapshot_sst_ingestion: Option<BeforeSnapshotSstIngestion>,
    pub after_snapshot_sst_ingestion: Option<AfterSnapshotSstIngestion>,
}

impl fmt::Debug for StoreTestingKnobs {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StoreTestingKnobs")
            .field(
                "before_snapshot_sst_ingestion",
                &self.before_snapshot_sst_ingestion.is_some(),
            )
            .field("after_snapshot_sst_ingestion", &self.after_snapshot_sst_ingestion.is_some())
            .finish()
    }
}
