//! Engine contract consumed by the replica storage layer.
//!
//! The engine stores two kinds of data in one ordered key space:
//! - point keys: plain `key → value` pairs
//! - range keys: span-valued keys (`[start, end) → value`), stored as
//!   non-overlapping fragments. Clearing part of a range key fragments it.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Bound;
use std::ops::ControlFlow;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::convert::decode;
use crate::convert::encode;
use crate::Result;

/// Visitor for ordered scans. Return `ControlFlow::Break(())` to stop early.
pub type ScanVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>> + 'a;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeKey {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub value: Vec<u8>,
}

pub trait Reader: Send + Sync {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    /// Visits point keys in `[start, end)` in ascending order.
    fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        visitor: &mut ScanVisitor<'_>,
    ) -> Result<()>;

    /// Largest point key in `[start, end)`.
    fn last_key_in_span(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    /// Range key fragments overlapping `[start, end)`, unclipped.
    fn range_keys(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<RangeKey>>;
}

pub trait Writer {
    fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
    ) -> Result<()>;

    fn clear(
        &mut self,
        key: &[u8],
    ) -> Result<()>;

    /// Removes everything in `[start, end)`: point keys, range keys, or both.
    fn clear_raw_range(
        &mut self,
        start: &[u8],
        end: &[u8],
        point_keys: bool,
        range_keys: bool,
    ) -> Result<()>;

    fn put_range_key(
        &mut self,
        start: &[u8],
        end: &[u8],
        value: &[u8],
    ) -> Result<()>;

    /// Removes the `[start, end)` portion of every overlapping range key.
    fn clear_range_key(
        &mut self,
        start: &[u8],
        end: &[u8],
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files: usize,
    pub bytes: u64,
    pub point_keys: usize,
    pub range_deletions: usize,
}

pub trait Engine: Reader + Debug + Send + Sync + 'static {
    /// Point-in-time read view. Later writes are invisible to it.
    fn new_snapshot(&self) -> Result<Box<dyn Reader>>;

    /// Applies every operation of `batch` atomically.
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> Result<()>;

    /// Ingests bulk-load files atomically. Files apply in order; within a
    /// file, range deletions apply before point writes.
    fn ingest_external_files(
        &self,
        paths: &[PathBuf],
    ) -> Result<IngestStats>;

    fn flush(&self) -> Result<()>;
}

// -
// Write batches

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Clear { key: Vec<u8> },
    ClearRange { start: Vec<u8>, end: Vec<u8> },
    PutRangeKey(RangeKey),
    ClearRangeKeys { start: Vec<u8>, end: Vec<u8> },
}

/// Buffered writes, applied atomically by [`Engine::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn from_ops(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }
}

impl Writer for WriteBatch {
    fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.ops.push(WriteOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    fn clear(
        &mut self,
        key: &[u8],
    ) -> Result<()> {
        self.ops.push(WriteOp::Clear { key: key.to_vec() });
        Ok(())
    }

    fn clear_raw_range(
        &mut self,
        start: &[u8],
        end: &[u8],
        point_keys: bool,
        range_keys: bool,
    ) -> Result<()> {
        if point_keys {
            self.ops.push(WriteOp::ClearRange {
                start: start.to_vec(),
                end: end.to_vec(),
            });
        }
        if range_keys {
            self.clear_range_key(start, end)?;
        }
        Ok(())
    }

    fn put_range_key(
        &mut self,
        start: &[u8],
        end: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.ops.push(WriteOp::PutRangeKey(RangeKey {
            start: start.to_vec(),
            end: end.to_vec(),
            value: value.to_vec(),
        }));
        Ok(())
    }

    fn clear_range_key(
        &mut self,
        start: &[u8],
        end: &[u8],
    ) -> Result<()> {
        self.ops.push(WriteOp::ClearRangeKeys {
            start: start.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }
}

// -
// Typed helpers

pub fn get_decoded<T: DeserializeOwned>(
    reader: &dyn Reader,
    key: &[u8],
) -> Result<Option<T>> {
    match reader.get(key)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn put_encoded<T: Serialize>(
    writer: &mut dyn Writer,
    key: &[u8],
    value: &T,
) -> Result<()> {
    writer.put(key, &encode(value)?)
}

/// Number of point keys in `[start, end)`, counting stops at `limit`.
pub fn count_point_keys(
    reader: &dyn Reader,
    start: &[u8],
    end: &[u8],
    limit: usize,
) -> Result<usize> {
    let mut count = 0;
    reader.scan(start, end, &mut |_, _| {
        count += 1;
        Ok(if count >= limit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        })
    })?;
    Ok(count)
}

// -
// In-memory tables

/// start → (end, value); fragments never overlap.
pub(crate) type RangeKeyMap = BTreeMap<Vec<u8>, (Vec<u8>, Vec<u8>)>;

pub(crate) fn overlapping_range_keys(
    map: &RangeKeyMap,
    start: &[u8],
    end: &[u8],
) -> Vec<RangeKey> {
    map.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(end)))
        .filter(|(_, (frag_end, _))| frag_end.as_slice() > start)
        .map(|(s, (e, v))| RangeKey {
            start: s.clone(),
            end: e.clone(),
            value: v.clone(),
        })
        .collect()
}

pub(crate) fn clear_range_keys_in(
    map: &mut RangeKeyMap,
    start: &[u8],
    end: &[u8],
) {
    for frag in overlapping_range_keys(map, start, end) {
        map.remove(&frag.start);
        if frag.start.as_slice() < start {
            map.insert(frag.start.clone(), (start.to_vec(), frag.value.clone()));
        }
        if frag.end.as_slice() > end {
            map.insert(end.to_vec(), (frag.end.clone(), frag.value.clone()));
        }
    }
}

/// Ordered point and range key tables. Backs the in-memory engine and the
/// materialized snapshots of the sled engine.
#[derive(Debug, Clone, Default)]
pub struct MemTables {
    pub(crate) points: BTreeMap<Vec<u8>, Vec<u8>>,
    pub(crate) range_keys: RangeKeyMap,
}

impl MemTables {
    pub(crate) fn apply(
        &mut self,
        op: &WriteOp,
    ) {
        match op {
            WriteOp::Put { key, value } => {
                self.points.insert(key.clone(), value.clone());
            }
            WriteOp::Clear { key } => {
                self.points.remove(key);
            }
            WriteOp::ClearRange { start, end } => {
                if start >= end {
                    return;
                }
                let doomed: Vec<Vec<u8>> = self
                    .points
                    .range::<[u8], _>((
                        Bound::Included(start.as_slice()),
                        Bound::Excluded(end.as_slice()),
                    ))
                    .map(|(k, _)| k.clone())
                    .collect();
                for k in doomed {
                    self.points.remove(&k);
                }
            }
            WriteOp::PutRangeKey(rk) => {
                clear_range_keys_in(&mut self.range_keys, &rk.start, &rk.end);
                self.range_keys.insert(rk.start.clone(), (rk.end.clone(), rk.value.clone()));
            }
            WriteOp::ClearRangeKeys { start, end } => {
                clear_range_keys_in(&mut self.range_keys, start, end);
            }
        }
    }
}

impl Reader for MemTables {
    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.points.get(key).cloned())
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
        let bounds = (
            Bound::Included(start),
            Bound::Excluded(end),
        );
        for (k, v) in self.points.range::<[u8], _>(bounds) {
            if visitor(k.as_slice(), v.as_slice())?.is_break() {
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
        let bounds = (
            Bound::Included(start),
            Bound::Excluded(end),
        );
        Ok(self.points.range::<[u8], _>(bounds).next_back().map(|(k, _)| k.clone()))
    }

    fn range_keys(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<RangeKey>> {
        Ok(overlapping_range_keys(&self.range_keys, start, end))
    }
}
