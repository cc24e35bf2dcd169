//! Side storage for large log entry payloads.
//!
//! Sideloaded entries are written to the log "thin" (payload removed); the
//! payload lives in side storage addressed by `(index, term)` and is
//! inlined again when the entry is read.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use crate::file_io::create_dir_if_not_exist;
use crate::file_io::remove_dir_all_if_exists;
use crate::file_io::write_file;
use crate::Entry;
use crate::EntryCache;
use crate::RangeId;
use crate::Result;
use crate::StorageError;

#[cfg_attr(test, automock)]
pub trait SideloadStorage: Send + Sync {
    /// Directory holding the payloads, if any.
    fn dir(&self) -> PathBuf;

    fn put(
        &self,
        index: u64,
        term: u64,
        contents: &[u8],
    ) -> Result<()>;

    /// Fails with `SideloadedFileNotFound` if the payload is missing.
    fn get(
        &self,
        index: u64,
        term: u64,
    ) -> Result<Bytes>;

    /// Removes one payload. Returns the bytes freed.
    fn purge(
        &self,
        index: u64,
        term: u64,
    ) -> Result<u64>;

    /// Removes every payload with an index below `index`. Returns the bytes
    /// freed.
    fn truncate_to(
        &self,
        index: u64,
    ) -> Result<u64>;

    fn clear(&self) -> Result<()>;
}

/// Payloads as files named `i{index}.t{term}` in a per-range directory.
#[derive(Debug)]
pub struct DiskSideloadStorage {
    dir: PathBuf,
}

impl DiskSideloadStorage {
    pub fn new(
        base_dir: &Path,
        range_id: RangeId,
    ) -> Result<Self> {
        let dir = base_dir.join(format!("r{range_id}"));
        create_dir_if_not_exist(&dir)?;
        Ok(Self { dir })
    }

    fn filename(
        &self,
        index: u64,
        term: u64,
    ) -> PathBuf {
        self.dir.join(format!("i{index}.t{term}"))
    }

    fn parse_filename(name: &str) -> Option<(u64, u64)> {
        let rest = name.strip_prefix('i')?;
        let (index, term) = rest.split_once(".t")?;
        Some((index.parse().ok()?, term.parse().ok()?))
    }
}

impl SideloadStorage for DiskSideloadStorage {
    fn dir(&self) -> PathBuf {
        self.dir.clone()
    }

    fn put(
        &self,
        index: u64,
        term: u64,
        contents: &[u8],
    ) -> Result<()> {
        trace!(index, term, bytes = contents.len(), "sideloading payload");
        write_file(&self.filename(index, term), contents)
    }

    fn get(
        &self,
        index: u64,
        term: u64,
    ) -> Result<Bytes> {
        match std::fs::read(self.filename(index, term)) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::SideloadedFileNotFound { index, term }.into())
            }
            Err(e) => Err(StorageError::PathError {
                path: self.filename(index, term),
                source: e,
            }
            .into()),
        }
    }

    fn purge(
        &self,
        index: u64,
        term: u64,
    ) -> Result<u64> {
        let path = self.filename(index, term);
        let size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::SideloadedFileNotFound { index, term }.into())
            }
            Err(e) => return Err(StorageError::PathError { path, source: e }.into()),
        };
        std::fs::remove_file(&path)?;
        Ok(size)
    }

    fn truncate_to(
        &self,
        index: u64,
    ) -> Result<u64> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StorageError::PathError {
                    path: self.dir.clone(),
                    source: e,
                }
                .into())
            }
        };
        let mut freed = 0;
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name();
            let Some((i, _)) = name.to_str().and_then(Self::parse_filename) else {
                continue;
            };
            if i < index {
                freed += entry.metadata()?.len();
                std::fs::remove_file(entry.path())?;
            }
        }
        debug!(dir = ?self.dir, index, freed, "truncated sideloaded storage");
        Ok(freed)
    }

    fn clear(&self) -> Result<()> {
        remove_dir_all_if_exists(&self.dir)
    }
}

/// Side storage kept in memory.
#[derive(Debug, Default)]
pub struct InMemSideloadStorage {
    payloads: Mutex<BTreeMap<(u64, u64), Bytes>>,
}

impl InMemSideloadStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SideloadStorage for InMemSideloadStorage {
    fn dir(&self) -> PathBuf {
        PathBuf::new()
    }

    fn put(
        &self,
        index: u64,
        term: u64,
        contents: &[u8],
    ) -> Result<()> {
        self.payloads
            .lock()
            .insert((index, term), Bytes::copy_from_slice(contents));
        Ok(())
    }

    fn get(
        &self,
        index: u64,
        term: u64,
    ) -> Result<Bytes> {
        self.payloads
            .lock()
            .get(&(index, term))
            .cloned()
            .ok_or_else(|| StorageError::SideloadedFileNotFound { index, term }.into())
    }

    fn purge(
        &self,
        index: u64,
        term: u64,
    ) -> Result<u64> {
        match self.payloads.lock().remove(&(index, term)) {
            Some(b) => Ok(b.len() as u64),
            None => Err(StorageError::SideloadedFileNotFound { index, term }.into()),
        }
    }

    fn truncate_to(
        &self,
        index: u64,
    ) -> Result<u64> {
        let mut payloads = self.payloads.lock();
        let keep = payloads.split_off(&(index, 0));
        let freed = payloads.values().map(|b| b.len() as u64).sum();
        *payloads = keep;
        Ok(freed)
    }

    fn clear(&self) -> Result<()> {
        self.payloads.lock().clear();
        Ok(())
    }
}

/// Returns the entry with its payload inlined, or `None` if `entry` needs
/// no inlining. An inlined copy in the entry cache is preferred over a read
/// from side storage.
pub fn maybe_inline_sideloaded_entry(
    range_id: RangeId,
    entry: &Entry,
    storage: &dyn SideloadStorage,
    entry_cache: &EntryCache,
) -> Result<Option<Entry>> {
    if !entry.is_thin() {
        return Ok(None);
    }

    if let Some(cached) = entry_cache.get(range_id, entry.index) {
        if cached.term == entry.term && !cached.is_thin() {
            return Ok(Some(cached));
        }
    }

    let data = storage.get(entry.index, entry.term)?;
    Ok(Some(Entry {
        index: entry.index,
        term: entry.term,
        data,
        sideloaded: true,
    }))
}

/// Moves the payloads of sideloaded entries to side storage. Returns the
/// entries as they must be written to the log, and the number of payload
/// bytes sideloaded.
pub fn maybe_sideload_entries(
    entries: &[Entry],
    storage: &dyn SideloadStorage,
) -> Result<(Vec<Entry>, u64)> {
    let mut out = Vec::with_capacity(entries.len());
    let mut sideloaded_bytes = 0;
    for e in entries {
        if e.sideloaded && !e.data.is_empty() {
            storage.put(e.index, e.term, &e.data)?;
            sideloaded_bytes += e.data.len() as u64;
            out.push(e.to_thin());
        } else {
            out.push(e.clone());
        }
    }
    Ok((out, sideloaded_bytes))
}
