//! Timestamp cache: the highest read timestamp per key span.
//!
//! Stored as non-overlapping fragments `start → (end, ts)` above a
//! store-wide low-water mark. Adding a span ratchets the overlapping
//! fragments and splits them at the span bounds.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::Mutex;
use tracing::trace;

use crate::keys;
use crate::RangeDescriptor;
use crate::ReadSummary;
use crate::Timestamp;

#[derive(Debug, Default)]
struct TsCacheInner {
    low_water: Timestamp,
    fragments: BTreeMap<Vec<u8>, (Vec<u8>, Timestamp)>,
}

#[derive(Debug, Default)]
pub struct TimestampCache {
    inner: Mutex<TsCacheInner>,
}

impl TimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read of `[start, end)` at `ts`.
    pub fn add(
        &self,
        start: &[u8],
        end: &[u8],
        ts: Timestamp,
    ) {
        if start >= end {
            return;
        }
        let mut inner = self.inner.lock();
        if ts <= inner.low_water {
            return;
        }

        let overlapping: Vec<(Vec<u8>, Vec<u8>, Timestamp)> = inner
            .fragments
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(end)))
            .filter(|(_, (e, _))| e.as_slice() > start)
            .map(|(s, (e, t))| (s.clone(), e.clone(), *t))
            .collect();
        for (s, _, _) in &overlapping {
            inner.fragments.remove(s);
        }

        let mut cursor = start.to_vec();
        for (s, e, t) in overlapping {
            if s.as_slice() < start {
                inner.fragments.insert(s.clone(), (start.to_vec(), t));
            }
            if e.as_slice() > end {
                inner.fragments.insert(end.to_vec(), (e.clone(), t));
            }
            let inner_start = s.as_slice().max(start).to_vec();
            let inner_end = e.as_slice().min(end).to_vec();
            if cursor < inner_start {
                inner.fragments.insert(cursor, (inner_start.clone(), ts));
            }
            inner.fragments.insert(inner_start, (inner_end.clone(), t.max(ts)));
            cursor = inner_end;
        }
        if cursor.as_slice() < end {
            inner.fragments.insert(cursor, (end.to_vec(), ts));
        }
        trace!(start = %keys::pretty(start), end = %keys::pretty(end), ?ts, "tscache add");
    }

    /// Highest read timestamp recorded for `key`.
    pub fn get_max(
        &self,
        key: &[u8],
    ) -> Timestamp {
        let inner = self.inner.lock();
        let covering = inner
            .fragments
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .filter(|(_, (e, _))| e.as_slice() > key)
            .map(|(_, (_, t))| *t)
            .unwrap_or_default();
        covering.max(inner.low_water)
    }

    /// Raises the floor for every key. Fragments at or below it are dropped.
    pub fn set_low_water(
        &self,
        ts: Timestamp,
    ) {
        let mut inner = self.inner.lock();
        if inner.low_water.forward(ts) {
            let low_water = inner.low_water;
            inner.fragments.retain(|_, (_, t)| *t > low_water);
        }
    }

    pub fn low_water(&self) -> Timestamp {
        self.inner.lock().low_water
    }

    /// Bumps the cache over the range with the reads served by its previous
    /// leaseholders: `local` over the range-local keys, `global` over the
    /// user keys.
    pub fn apply_read_summary(
        &self,
        desc: &RangeDescriptor,
        summary: &ReadSummary,
    ) {
        let local = keys::range_local_span(desc);
        self.add(&local.key, &local.end_key, summary.local);
        let global = keys::user_key_span(desc);
        self.add(&global.key, &global.end_key, summary.global);
    }
}
