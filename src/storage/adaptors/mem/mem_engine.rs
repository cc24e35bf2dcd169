use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::Engine;
use crate::IngestStats;
use crate::MemTables;
use crate::RangeKey;
use crate::Reader;
use crate::Result;
use crate::ScanVisitor;
use crate::SstFile;
use crate::WriteBatch;

/// In-memory engine.
///
/// Tables are copy-on-write: a snapshot is a clone of the current `Arc`,
/// and writers copy the tables only while a snapshot still shares them.
#[derive(Debug, Default)]
pub struct MemEngine {
    tables: RwLock<Arc<MemTables>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn current(&self) -> Arc<MemTables> {
        self.tables.read().clone()
    }
}

impl Reader for MemEngine {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.current().get(key)
    }

    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        visitor: &mut ScanVisitor<'_>,
    ) -> Result<()> {
        self.current().scan(start, end, visitor)
    }

    fn last_key_in_span(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.current().last_key_in_span(start, end)
    }

    fn range_keys(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<RangeKey>> {
        self.current().range_keys(start, end)
    }
}

/// Frozen view of a [`MemEngine`].
#[derive(Debug)]
pub struct MemSnapshot {
    tables: Arc<MemTables>,
}

impl Reader for MemSnapshot {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.tables.get(key)
    }

    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        visitor: &mut ScanVisitor<'_>,
    ) -> Result<()> {
        self.tables.scan(start, end, visitor)
    }

    fn last_key_in_span(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.tables.last_key_in_span(start, end)
    }

    fn range_keys(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<RangeKey>> {
        self.tables.range_keys(start, end)
    }
}

impl Engine for MemEngine {
    fn new_snapshot(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(MemSnapshot {
            tables: self.current(),
        }))
    }

    fn commit(
        &self,
        batch: WriteBatch,
    ) -> Result<()> {
        trace!(ops = batch.len(), "MemEngine::commit");
        let mut guard = self.tables.write();
        let tables = Arc::make_mut(&mut guard);
        for op in batch.ops() {
            tables.apply(op);
        }
        Ok(())
    }

    fn ingest_external_files(
        &self,
        paths: &[PathBuf],
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file = SstFile::read(path)?;
            stats.files += 1;
            stats.bytes += std::fs::metadata(path)?.len();
            stats.point_keys += file.points.len();
            stats.range_deletions += file.range_deletions.len();
            files.push(file);
        }

        let mut guard = self.tables.write();
        let tables = Arc::make_mut(&mut guard);
        for file in files {
            for op in file.into_ops() {
                tables.apply(&op);
            }
        }
        trace!(?stats, "MemEngine::ingest_external_files");
        Ok(stats)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
