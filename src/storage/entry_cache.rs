//! Store-wide cache of log entries, partitioned by range.
//!
//! The cache is bounded by a byte budget shared by all ranges. When the
//! budget is exceeded, whole partitions are evicted, least recently used
//! first.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::trace;

use crate::Entry;
use crate::RangeId;
use crate::StoreMetrics;

#[derive(Debug, Default)]
struct Partition {
    entries: BTreeMap<u64, Entry>,
    bytes: u64,
    last_used: u64,
}

impl Partition {
    fn remove_where(
        &mut self,
        keep: impl Fn(u64) -> bool,
    ) -> (u64, usize) {
        let before_bytes = self.bytes;
        let before_len = self.entries.len();
        self.entries.retain(|idx, _| keep(*idx));
        self.bytes = self.entries.values().map(Entry::size).sum();
        (before_bytes - self.bytes, before_len - self.entries.len())
    }
}

/// Result of [`EntryCache::scan`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheScan {
    /// Contiguous entries starting at `lo`
    pub entries: Vec<Entry>,
    /// Accounted size of `entries`
    pub bytes: u64,
    /// First index not returned
    pub next_index: u64,
    /// The scan stopped at the byte budget
    pub exceeded_max_bytes: bool,
}

#[derive(Debug)]
pub struct EntryCache {
    partitions: DashMap<RangeId, Partition>,
    max_bytes: u64,
    bytes: AtomicU64,
    entries: AtomicU64,
    clock: AtomicU64,
    metrics: StoreMetrics,
}

impl EntryCache {
    pub fn new(
        max_bytes: u64,
        metrics: StoreMetrics,
    ) -> Self {
        Self {
            partitions: DashMap::new(),
            max_bytes,
            bytes: AtomicU64::new(0),
            entries: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Accounted size of all cached entries.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn len(&self) -> u64 {
        self.entries.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn account(
        &self,
        added_bytes: u64,
        added_entries: u64,
        removed_bytes: u64,
        removed_entries: u64,
    ) {
        self.bytes.fetch_add(added_bytes, Ordering::AcqRel);
        self.bytes.fetch_sub(removed_bytes, Ordering::AcqRel);
        self.entries.fetch_add(added_entries, Ordering::AcqRel);
        self.entries.fetch_sub(removed_entries, Ordering::AcqRel);
        self.metrics.raft_entry_cache_bytes.set(self.bytes() as i64);
        self.metrics.raft_entry_cache_size.set(self.len() as i64);
    }

    /// Adds `ents` to the range's partition. With `truncate`, every cached
    /// entry from the first added index on is removed first, since a new
    /// suffix of the log replaces the old one. Entries too large for the
    /// budget are skipped, so their indexes are left uncached.
    pub fn add(
        &self,
        range_id: RangeId,
        ents: &[Entry],
        truncate: bool,
    ) {
        let (Some(first), Some(last)) = (ents.first(), ents.last()) else {
            return;
        };
        let (first_index, last_index) = (first.index, last.index);
        let now = self.tick();

        let added_entries = {
            let mut p = self.partitions.entry(range_id).or_default();
            p.last_used = now;
            let (mut removed_bytes, mut removed_entries) = if truncate {
                let (b, n) = p.remove_where(|idx| idx < first_index);
                (b, n as u64)
            } else {
                (0, 0)
            };
            let mut added_bytes = 0;
            let mut added_entries = 0;
            for e in ents {
                // An entry larger than the whole budget would evict everything.
                if e.size() > self.max_bytes {
                    continue;
                }
                if let Some(old) = p.entries.insert(e.index, e.clone()) {
                    removed_bytes += old.size();
                    removed_entries += 1;
                    p.bytes -= old.size();
                }
                p.bytes += e.size();
                added_bytes += e.size();
                added_entries += 1;
            }
            // Must be accounted before the guard is released; `drop`
            // subtracts whatever the partition holds.
            self.account(added_bytes, added_entries, removed_bytes, removed_entries);
            added_entries
        };
        trace!(range_id, first_index, last_index, truncate, added_entries, "EntryCache::add");
        self.evict();
    }

    pub fn get(
        &self,
        range_id: RangeId,
        index: u64,
    ) -> Option<Entry> {
        self.metrics.raft_entry_cache_accesses.inc();
        let now = self.tick();
        let mut p = self.partitions.get_mut(&range_id)?;
        let e = p.entries.get(&index).cloned()?;
        p.last_used = now;
        self.metrics.raft_entry_cache_hits.inc();
        Some(e)
    }

    /// Returns the cached prefix of `[lo, hi)`.
    ///
    /// Stops at the first missing index or at the byte budget. The entry
    /// crossing `max_bytes` is included only when it is the first one.
    pub fn scan(
        &self,
        range_id: RangeId,
        lo: u64,
        hi: u64,
        max_bytes: u64,
    ) -> CacheScan {
        self.metrics.raft_entry_cache_accesses.inc();
        let mut scan = CacheScan {
            next_index: lo,
            ..Default::default()
        };
        if lo >= hi {
            return scan;
        }
        let now = self.tick();
        let Some(mut p) = self.partitions.get_mut(&range_id) else {
            return scan;
        };
        p.last_used = now;
        for (idx, e) in p.entries.range(lo..hi) {
            if *idx != scan.next_index {
                break;
            }
            let size = e.size();
            if scan.bytes + size > max_bytes {
                scan.exceeded_max_bytes = true;
                if !scan.entries.is_empty() {
                    break;
                }
            }
            scan.bytes += size;
            scan.entries.push(e.clone());
            scan.next_index += 1;
            if scan.exceeded_max_bytes {
                break;
            }
        }
        if !scan.entries.is_empty() {
            self.metrics.raft_entry_cache_hits.inc();
        }
        scan
    }

    /// Removes the range's partition entirely.
    pub fn drop(
        &self,
        range_id: RangeId,
    ) {
        if let Some((_, p)) = self.partitions.remove(&range_id) {
            self.account(0, 0, p.bytes, p.entries.len() as u64);
            trace!(range_id, bytes = p.bytes, "EntryCache::drop");
        }
    }

    /// Removes the range's entries with an index below `hi`.
    pub fn clear_to(
        &self,
        range_id: RangeId,
        hi: u64,
    ) {
        if let Some(mut p) = self.partitions.get_mut(&range_id) {
            let (bytes, n) = p.remove_where(|idx| idx >= hi);
            self.account(0, 0, bytes, n as u64);
        }
    }

    fn evict(&self) {
        while self.bytes() > self.max_bytes {
            let victim = self
                .partitions
                .iter()
                .min_by_key(|p| p.value().last_used)
                .map(|p| *p.key());
            match victim {
                Some(range_id) => {
                    trace!(range_id, "EntryCache evicting partition");
                    self.drop(range_id);
                }
                None => return,
            }
        }
    }
}
