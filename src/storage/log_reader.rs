//! Reads of the consensus log: the entry cache first, durable storage for
//! the rest.

use std::ops::ControlFlow;

use autometrics::autometrics;
use tracing::debug;
use tracing::trace;

use crate::convert::decode;
use crate::keys;
use crate::maybe_inline_sideloaded_entry;
use crate::Entry;
use crate::EntryCache;
use crate::RaftStorageError;
use crate::Reader;
use crate::Result;
use crate::SideloadStorage;
use crate::StateLoader;
use crate::API_SLO;

/// Returns the entries in `[lo, hi)`, limited to `max_bytes` (the first
/// entry is always returned if it exists, even when larger than the
/// budget). A result shorter than `hi - lo` without hitting the budget is
/// an error:
/// - `Compacted` when `lo` has been truncated away
/// - `Unavailable` when the log ends before `hi`
/// - `LogGap` when an index is missing in the middle of the log
///
/// Sideloaded entries are inlined through `sideloaded`; without side
/// storage they are returned thin and not cached.
#[autometrics(objective = API_SLO)]
pub fn entries(
    reader: &dyn Reader,
    loader: &StateLoader,
    entry_cache: &EntryCache,
    sideloaded: Option<&dyn SideloadStorage>,
    lo: u64,
    hi: u64,
    max_bytes: u64,
) -> Result<Vec<Entry>> {
    if lo > hi {
        return Err(RaftStorageError::InvalidRange { lo, hi }.into());
    }
    let range_id = loader.range_id();
    let n = hi - lo;

    let cached = entry_cache.scan(range_id, lo, hi, max_bytes);
    let mut ents = cached.entries;
    let mut size = cached.bytes;
    let mut exceeded_max_bytes = cached.exceeded_max_bytes;
    if ents.len() as u64 == n || exceeded_max_bytes {
        trace!(range_id, lo, hi, "entries served from cache");
        return Ok(ents);
    }

    let mut expected_index = cached.next_index;
    let mut can_cache = true;
    {
        let start = keys::raft_log_key(range_id, expected_index);
        let end = keys::raft_log_key(range_id, hi);
        let mut visit = |_k: &[u8], v: &[u8]| -> Result<ControlFlow<()>> {
            let mut ent: Entry = decode(v)?;
            if ent.index != expected_index {
                return Ok(ControlFlow::Break(()));
            }

            if ent.is_thin() {
                can_cache = can_cache && sideloaded.is_some();
                if let Some(storage) = sideloaded {
                    if let Some(inlined) = maybe_inline_sideloaded_entry(range_id, &ent, storage, entry_cache)? {
                        ent = inlined;
                    }
                }
            }

            size += ent.size();
            if size > max_bytes {
                exceeded_max_bytes = true;
                if !ents.is_empty() {
                    return Ok(ControlFlow::Break(()));
                }
            }
            expected_index += 1;
            ents.push(ent);
            if exceeded_max_bytes {
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        };
        reader.scan(&start, &end, &mut visit)?;
    }

    if can_cache {
        entry_cache.add(range_id, &ents, false);
    }

    if ents.len() as u64 == n || exceeded_max_bytes {
        return Ok(ents);
    }

    if !ents.is_empty() {
        let last_index = loader.load_last_index(reader)?;
        if last_index <= expected_index {
            return Err(RaftStorageError::Unavailable.into());
        }
        debug!(range_id, lo, hi, expected_index, last_index, "gap in raft log");
        return Err(RaftStorageError::LogGap {
            lo,
            hi,
            index: expected_index,
        }
        .into());
    }

    let ts = loader.load_truncated_state(reader)?;
    if ts.index >= lo {
        return Err(RaftStorageError::Compacted.into());
    }
    Err(RaftStorageError::Unavailable.into())
}

/// Term of the entry at index `i`. The truncated index itself answers from
/// the truncated state.
#[autometrics(objective = API_SLO)]
pub fn term(
    reader: &dyn Reader,
    loader: &StateLoader,
    entry_cache: &EntryCache,
    i: u64,
) -> Result<u64> {
    match entries(reader, loader, entry_cache, None, i, i.saturating_add(1), u64::MAX) {
        Ok(ents) => Ok(ents.first().map(|e| e.term).unwrap_or(0)),
        Err(e) if e.is_compacted() => {
            let ts = loader.load_truncated_state(reader)?;
            if i == ts.index {
                return Ok(ts.term);
            }
            Err(e)
        }
        Err(e) => Err(e),
    }
}
