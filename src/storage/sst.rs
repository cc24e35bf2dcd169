//! Bulk-load files and the per-snapshot scratch space holding them.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::RangeKey;
use super::WriteOp;
use super::Writer;
use crate::convert::decode;
use crate::convert::encode;
use crate::file_io::read_file;
use crate::file_io::remove_dir_all_if_exists;
use crate::file_io::write_file;
use crate::keys::pretty;
use crate::RangeId;
use crate::Result;
use crate::StorageError;
use crate::SNAPSHOT_SCRATCH_DIR_PREFIX;
use crate::SST_FILE_EXTENSION;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SstPoint {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Decoded content of a bulk-load file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SstFile {
    pub range_deletions: Vec<(Vec<u8>, Vec<u8>)>,
    pub range_key_deletions: Vec<(Vec<u8>, Vec<u8>)>,
    pub range_keys: Vec<RangeKey>,
    pub points: Vec<SstPoint>,
}

impl SstFile {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes).map_err(|e| StorageError::Sst(format!("malformed file: {e}")).into())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::decode(&read_file(path)?)
    }

    /// Operations in application order: deletions first, then writes.
    pub fn into_ops(self) -> Vec<WriteOp> {
        let mut ops = Vec::with_capacity(
            self.range_deletions.len() + self.range_key_deletions.len() + self.range_keys.len() + self.points.len(),
        );
        ops.extend(
            self.range_deletions
                .into_iter()
                .map(|(start, end)| WriteOp::ClearRange { start, end }),
        );
        ops.extend(
            self.range_key_deletions
                .into_iter()
                .map(|(start, end)| WriteOp::ClearRangeKeys { start, end }),
        );
        ops.extend(self.range_keys.into_iter().map(WriteOp::PutRangeKey));
        ops.extend(self.points.into_iter().map(|p| match p {
            SstPoint::Put { key, value } => WriteOp::Put { key, value },
            SstPoint::Delete { key } => WriteOp::Clear { key },
        }));
        ops
    }
}

#[derive(Debug, Clone)]
pub struct FinishedSst {
    pub data: Vec<u8>,
    /// Bytes of keys and values written, zero for a file with no content
    pub data_size: u64,
}

/// Builds one bulk-load file in memory.
///
/// Point keys must be added in strictly increasing order. Range deletions
/// must be added in non-decreasing order of their start key, and so must
/// range keys.
#[derive(Debug, Default)]
pub struct SstWriter {
    file: SstFile,
    last_point: Option<Vec<u8>>,
    last_range_deletion: Option<Vec<u8>>,
    last_range_key: Option<Vec<u8>>,
    data_size: u64,
}

impl SstWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    fn check_point_order(
        &mut self,
        key: &[u8],
    ) -> Result<()> {
        if let Some(last) = &self.last_point {
            if key <= last.as_slice() {
                return Err(StorageError::Sst(format!(
                    "keys must be added in strictly increasing order: {} after {}",
                    pretty(key),
                    pretty(last)
                ))
                .into());
            }
        }
        self.last_point = Some(key.to_vec());
        Ok(())
    }

    fn check_span_order(
        last: &mut Option<Vec<u8>>,
        start: &[u8],
        end: &[u8],
    ) -> Result<()> {
        if start >= end {
            return Err(StorageError::Sst(format!("empty span [{}, {})", pretty(start), pretty(end))).into());
        }
        if let Some(prev) = last {
            if start < prev.as_slice() {
                return Err(StorageError::Sst(format!(
                    "spans must be added in increasing order: {} after {}",
                    pretty(start),
                    pretty(prev)
                ))
                .into());
            }
        }
        *last = Some(start.to_vec());
        Ok(())
    }

    pub fn finish(self) -> Result<FinishedSst> {
        Ok(FinishedSst {
            data: encode(&self.file)?,
            data_size: self.data_size,
        })
    }
}

impl Writer for SstWriter {
    fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.check_point_order(key)?;
        self.data_size += (key.len() + value.len()) as u64;
        self.file.points.push(SstPoint::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    fn clear(
        &mut self,
        key: &[u8],
    ) -> Result<()> {
        self.check_point_order(key)?;
        self.data_size += key.len() as u64;
        self.file.points.push(SstPoint::Delete { key: key.to_vec() });
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
            Self::check_span_order(&mut self.last_range_deletion, start, end)?;
            self.data_size += (start.len() + end.len()) as u64;
            self.file.range_deletions.push((start.to_vec(), end.to_vec()));
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
        Self::check_span_order(&mut self.last_range_key, start, end)?;
        self.data_size += (start.len() + end.len() + value.len()) as u64;
        self.file.range_keys.push(RangeKey {
            start: start.to_vec(),
            end: end.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    fn clear_range_key(
        &mut self,
        start: &[u8],
        end: &[u8],
    ) -> Result<()> {
        if start >= end {
            return Err(StorageError::Sst(format!("empty span [{}, {})", pretty(start), pretty(end))).into());
        }
        self.data_size += (start.len() + end.len()) as u64;
        self.file.range_key_deletions.push((start.to_vec(), end.to_vec()));
        Ok(())
    }
}

/// Root directory of all snapshot scratch spaces of a store.
#[derive(Debug, Clone)]
pub struct SstSnapshotStorage {
    dir: PathBuf,
}

impl SstSnapshotStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn new_scratch(
        &self,
        range_id: RangeId,
        snap_id: Uuid,
    ) -> SstSnapshotStorageScratch {
        let dir = self
            .dir
            .join(format!("r{range_id}"))
            .join(format!("{SNAPSHOT_SCRATCH_DIR_PREFIX}{snap_id}"));
        SstSnapshotStorageScratch { dir, ssts: vec![] }
    }

    /// Removes leftovers of every scratch space, e.g. after a restart.
    pub fn clear(&self) -> Result<()> {
        remove_dir_all_if_exists(&self.dir)
    }
}

/// Staged files of one in-flight snapshot.
#[derive(Debug)]
pub struct SstSnapshotStorageScratch {
    dir: PathBuf,
    ssts: Vec<PathBuf>,
}

impl SstSnapshotStorageScratch {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `data` as the next staged file.
    pub fn write_sst(
        &mut self,
        data: &[u8],
    ) -> Result<()> {
        let path = self.dir.join(format!("{}.{SST_FILE_EXTENSION}", self.ssts.len()));
        write_file(&path, data)?;
        debug!(?path, bytes = data.len(), "staged snapshot file");
        self.ssts.push(path);
        Ok(())
    }

    /// Staged files in write order.
    pub fn ssts(&self) -> &[PathBuf] {
        &self.ssts
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ssts.clear();
        remove_dir_all_if_exists(&self.dir)
    }
}
