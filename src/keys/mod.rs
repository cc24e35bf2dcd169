//! Key layout of the replica's data in the engine.
//!
//! ```text
//! \x01i <range id BE8> r <suffix>            range-id local, replicated
//! \x01i <range id BE8> u <suffix>            range-id local, unreplicated
//! \x01k <start key> rdsc                     range-local descriptor
//! \x01z <key>                                lock table
//! >= \x02                                    user keys
//! ```


use std::fmt;

use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::ConvertError;
use crate::RangeDescriptor;
use crate::RangeId;
use crate::Result;

pub const LOCAL_PREFIX: &[u8] = b"\x01";
pub const LOCAL_RANGE_ID_PREFIX: &[u8] = b"\x01i";
pub const LOCAL_RANGE_PREFIX: &[u8] = b"\x01k";
pub const LOCK_TABLE_PREFIX: &[u8] = b"\x01z";
/// Upper bound of the local key space; first possible user key.
pub const LOCAL_MAX: &[u8] = b"\x02";
pub const KEY_MAX: &[u8] = b"\xff\xff";

const REPLICATED_INFIX: u8 = b'r';
const UNREPLICATED_INFIX: u8 = b'u';

// replicated suffixes
const RANGE_APPLIED_STATE_SUFFIX: &[u8] = b"rask";
const RANGE_LEASE_SUFFIX: &[u8] = b"rll-";
const RANGE_PRIOR_READ_SUMMARY_SUFFIX: &[u8] = b"rprs";

// unreplicated suffixes
const RAFT_HARD_STATE_SUFFIX: &[u8] = b"rfth";
const RAFT_LOG_SUFFIX: &[u8] = b"rftl";
const RAFT_REPLICA_ID_SUFFIX: &[u8] = b"rftr";
const RAFT_TRUNCATED_STATE_SUFFIX: &[u8] = b"rftt";
const RANGE_TOMBSTONE_SUFFIX: &[u8] = b"rftb";

const RANGE_DESCRIPTOR_SUFFIX: &[u8] = b"rdsc";

/// Half-open key span `[key, end_key)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl Span {
    pub fn new(
        key: impl Into<Vec<u8>>,
        end_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            key: key.into(),
            end_key: end_key.into(),
        }
    }

    pub fn contains_key(
        &self,
        key: &[u8],
    ) -> bool {
        self.key.as_slice() <= key && key < self.end_key.as_slice()
    }

    pub fn overlaps(
        &self,
        other: &Span,
    ) -> bool {
        self.key < other.end_key && other.key < self.end_key
    }

    pub fn is_empty(&self) -> bool {
        self.key >= self.end_key
    }
}

impl fmt::Display for Span {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "[{}, {})", pretty(&self.key), pretty(&self.end_key))
    }
}

/// Printable rendering of a raw key.
pub fn pretty(key: &[u8]) -> String {
    key.iter()
        .map(|b| {
            if b.is_ascii_graphic() {
                (*b as char).to_string()
            } else {
                format!("\\x{b:02x}")
            }
        })
        .collect()
}

/// Smallest key greater than every key with this prefix.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    KEY_MAX.to_vec()
}

/// Immediate successor of `key`.
pub fn key_next(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

// -
// Range-id local keys

pub fn range_id_prefix(range_id: RangeId) -> Vec<u8> {
    concat(&[LOCAL_RANGE_ID_PREFIX, &safe_kv(range_id)])
}

pub fn range_id_replicated_prefix(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_prefix(range_id), &[REPLICATED_INFIX]])
}

pub fn range_id_unreplicated_prefix(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_prefix(range_id), &[UNREPLICATED_INFIX]])
}

pub fn range_applied_state_key(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_replicated_prefix(range_id), RANGE_APPLIED_STATE_SUFFIX])
}

pub fn range_lease_key(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_replicated_prefix(range_id), RANGE_LEASE_SUFFIX])
}

pub fn range_prior_read_summary_key(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_replicated_prefix(range_id), RANGE_PRIOR_READ_SUMMARY_SUFFIX])
}

pub fn raft_hard_state_key(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_unreplicated_prefix(range_id), RAFT_HARD_STATE_SUFFIX])
}

pub fn raft_log_prefix(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_unreplicated_prefix(range_id), RAFT_LOG_SUFFIX])
}

pub fn raft_log_key(
    range_id: RangeId,
    index: u64,
) -> Vec<u8> {
    concat(&[&raft_log_prefix(range_id), &safe_kv(index)])
}

/// Extracts the log index from a key produced by [`raft_log_key`].
pub fn decode_raft_log_key(
    range_id: RangeId,
    key: &[u8],
) -> Result<u64> {
    let prefix = raft_log_prefix(range_id);
    match key.strip_prefix(prefix.as_slice()) {
        Some(suffix) => safe_vk(suffix),
        None => Err(ConvertError::InvalidKey(pretty(key)).into()),
    }
}

pub fn raft_replica_id_key(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_unreplicated_prefix(range_id), RAFT_REPLICA_ID_SUFFIX])
}

pub fn raft_truncated_state_key(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_unreplicated_prefix(range_id), RAFT_TRUNCATED_STATE_SUFFIX])
}

pub fn range_tombstone_key(range_id: RangeId) -> Vec<u8> {
    concat(&[&range_id_unreplicated_prefix(range_id), RANGE_TOMBSTONE_SUFFIX])
}

// -
// Range-local and lock table keys

pub fn range_descriptor_key(start_key: &[u8]) -> Vec<u8> {
    concat(&[LOCAL_RANGE_PREFIX, start_key, RANGE_DESCRIPTOR_SUFFIX])
}

pub fn lock_table_key(key: &[u8]) -> Vec<u8> {
    concat(&[LOCK_TABLE_PREFIX, key])
}

// -
// Spans

pub fn range_id_local_span(range_id: RangeId) -> Span {
    let prefix = range_id_prefix(range_id);
    Span::new(prefix.clone(), prefix_end(&prefix))
}

pub fn range_id_replicated_span(range_id: RangeId) -> Span {
    let prefix = range_id_replicated_prefix(range_id);
    Span::new(prefix.clone(), prefix_end(&prefix))
}

pub fn range_id_unreplicated_span(range_id: RangeId) -> Span {
    let prefix = range_id_unreplicated_prefix(range_id);
    Span::new(prefix.clone(), prefix_end(&prefix))
}

pub fn raft_log_span(range_id: RangeId) -> Span {
    let prefix = raft_log_prefix(range_id);
    Span::new(prefix.clone(), prefix_end(&prefix))
}

pub fn range_local_span(desc: &RangeDescriptor) -> Span {
    Span::new(
        concat(&[LOCAL_RANGE_PREFIX, &desc.start_key]),
        concat(&[LOCAL_RANGE_PREFIX, &desc.end_key]),
    )
}

pub fn lock_table_span(desc: &RangeDescriptor) -> Span {
    Span::new(lock_table_key(&desc.start_key), lock_table_key(&desc.end_key))
}

/// User keys of the range. The first range starts at the empty key, whose
/// user portion begins at [`LOCAL_MAX`].
pub fn user_key_span(desc: &RangeDescriptor) -> Span {
    let start = if desc.start_key.as_slice() < LOCAL_MAX {
        LOCAL_MAX.to_vec()
    } else {
        desc.start_key.clone()
    };
    Span::new(start, desc.end_key.clone())
}

/// Replicated spans keyed by the range's key bounds. Position `i` of the
/// result always names the same key space, so results for different
/// descriptors can be merged element-wise.
pub fn replicated_spans_except_range_id(desc: &RangeDescriptor) -> Vec<Span> {
    vec![range_local_span(desc), lock_table_span(desc), user_key_span(desc)]
}

/// Every span owned by the replica, replicated or not.
pub fn all_key_spans(desc: &RangeDescriptor) -> Vec<Span> {
    let mut spans = vec![range_id_local_span(desc.range_id)];
    spans.extend(replicated_spans_except_range_id(desc));
    spans
}

/// Spans shipped in a snapshot: all replicated data.
pub fn snapshot_key_spans(desc: &RangeDescriptor) -> Vec<Span> {
    let mut spans = vec![range_id_replicated_span(desc.range_id)];
    spans.extend(replicated_spans_except_range_id(desc));
    spans
}
