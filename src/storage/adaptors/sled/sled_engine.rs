use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;

use parking_lot::RwLock;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionError;
use sled::transaction::Transactional;
use sled::Batch;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use crate::convert::decode;
use crate::convert::encode;
use crate::storage::engine::clear_range_keys_in;
use crate::storage::engine::RangeKeyMap;
use crate::Engine;
use crate::Error;
use crate::IngestStats;
use crate::MemTables;
use crate::RangeKey;
use crate::Reader;
use crate::Result;
use crate::ScanVisitor;
use crate::SstFile;
use crate::StorageError;
use crate::WriteBatch;
use crate::WriteOp;
use crate::POINT_KEYS_TREE;
use crate::RANGE_KEYS_TREE;

/// Engine backed by sled.
///
/// Point keys and range key fragments live in two trees. Writes are
/// resolved against the current content under the engine's write lock and
/// committed as one transaction across both trees. Snapshots are
/// materialized under the read lock.
pub struct SledEngine {
    db: sled::Db,
    points: sled::Tree,
    range_keys: sled::Tree,
    lock: RwLock<()>,
}

impl Debug for SledEngine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledEngine")
            .field("points_len", &self.points.len())
            .field("range_keys_len", &self.range_keys.len())
            .finish()
    }
}

impl SledEngine {
    pub fn open(
        sled_db_root_path: impl AsRef<Path> + Debug,
        cache_capacity: u64,
    ) -> Result<Self> {
        tracing::debug!("SledEngine::open from path: {:?}", &sled_db_root_path);

        let path = sled_db_root_path.as_ref().join("storage_engine");
        let db = sled::Config::default()
            .path(&path)
            .cache_capacity(cache_capacity)
            .use_compression(true)
            .compression_factor(1)
            .open()
            .map_err(|e| {
                warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
                Error::from(e)
            })?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        let points = db.open_tree(POINT_KEYS_TREE)?;
        let range_keys = db.open_tree(RANGE_KEYS_TREE)?;
        Ok(Self {
            db,
            points,
            range_keys,
            lock: RwLock::new(()),
        })
    }

    fn load_range_keys(&self) -> Result<RangeKeyMap> {
        let mut map = BTreeMap::new();
        for item in self.range_keys.iter() {
            let (start, value) = item?;
            let (end, v): (Vec<u8>, Vec<u8>) = decode(&value)?;
            map.insert(start.to_vec(), (end, v));
        }
        Ok(map)
    }

    /// Resolves `ops` against the current content and commits the result
    /// atomically. Caller must hold the write lock.
    fn apply_ops_locked(
        &self,
        ops: Vec<WriteOp>,
    ) -> Result<()> {
        let touches_range_keys = ops
            .iter()
            .any(|op| matches!(op, WriteOp::PutRangeKey(_) | WriteOp::ClearRangeKeys { .. }));
        let before = if touches_range_keys {
            self.load_range_keys()?
        } else {
            RangeKeyMap::new()
        };
        let mut after = before.clone();
        let mut overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();

        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    overlay.insert(key, Some(value));
                }
                WriteOp::Clear { key } => {
                    overlay.insert(key, None);
                }
                WriteOp::ClearRange { start, end } => {
                    if start >= end {
                        continue;
                    }
                    for item in self.points.range(start.as_slice()..end.as_slice()) {
                        let (k, _) = item?;
                        overlay.insert(k.to_vec(), None);
                    }
                    for v in overlay.range_mut(start..end).map(|(_, v)| v) {
                        *v = None;
                    }
                }
                WriteOp::PutRangeKey(rk) => {
                    clear_range_keys_in(&mut after, &rk.start, &rk.end);
                    after.insert(rk.start, (rk.end, rk.value));
                }
                WriteOp::ClearRangeKeys { start, end } => {
                    clear_range_keys_in(&mut after, &start, &end);
                }
            }
        }

        let mut point_batch = Batch::default();
        for (k, v) in overlay {
            match v {
                Some(v) => point_batch.insert(k, v),
                None => point_batch.remove(k),
            }
        }

        let mut range_key_batch = Batch::default();
        for start in before.keys() {
            if !after.contains_key(start) {
                range_key_batch.remove(start.as_slice());
            }
        }
        for (start, frag) in &after {
            if before.get(start) != Some(frag) {
                range_key_batch.insert(start.as_slice(), encode(frag)?);
            }
        }

        (&self.points, &self.range_keys)
            .transaction(|(points, range_keys)| {
                points.apply_batch(&point_batch)?;
                range_keys.apply_batch(&range_key_batch)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => StorageError::DbError("transaction aborted".to_string()).into(),
                TransactionError::Storage(e) => Error::from(e),
            })
    }
}

impl Reader for SledEngine {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.points.get(key)?.map(|v| v.to_vec()))
    }

    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        visitor: &mut ScanVisitor<'_>,
    ) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        for item in self.points.range(start..end) {
            let (k, v) = item?;
            if visitor(k.as_ref(), v.as_ref())?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn last_key_in_span(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        if start >= end {
            return Ok(None);
        }
        match self.points.range(start..end).next_back() {
            Some(item) => Ok(Some(item?.0.to_vec())),
            None => Ok(None),
        }
    }

    fn range_keys(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<RangeKey>> {
        let mut out = Vec::new();
        for item in self.range_keys.range(..end) {
            let (s, value) = item?;
            let (e, v): (Vec<u8>, Vec<u8>) = decode(&value)?;
            if e.as_slice() > start {
                out.push(RangeKey {
                    start: s.to_vec(),
                    end: e,
                    value: v,
                });
            }
        }
        Ok(out)
    }
}

impl Engine for SledEngine {
    #[instrument(skip(self))]
    fn new_snapshot(&self) -> Result<Box<dyn Reader>> {
        let _guard = self.lock.read();
        let mut tables = MemTables::default();
        for item in self.points.iter() {
            let (k, v) = item?;
            tables.points.insert(k.to_vec(), v.to_vec());
        }
        tables.range_keys = self.load_range_keys()?;
        Ok(Box::new(tables))
    }

    fn commit(
        &self,
        batch: WriteBatch,
    ) -> Result<()> {
        trace!(ops = batch.len(), "SledEngine::commit");
        let _guard = self.lock.write();
        self.apply_ops_locked(batch.into_ops())
    }

    fn ingest_external_files(
        &self,
        paths: &[PathBuf],
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        let mut ops = Vec::new();
        for path in paths {
            let file = SstFile::read(path)?;
            stats.files += 1;
            stats.bytes += std::fs::metadata(path)?.len();
            stats.point_keys += file.points.len();
            stats.range_deletions += file.range_deletions.len();
            ops.extend(file.into_ops());
        }

        let _guard = self.lock.write();
        self.apply_ops_locked(ops)?;
        trace!(?stats, "SledEngine::ingest_external_files");
        Ok(stats)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
