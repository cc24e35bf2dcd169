use std::sync::Arc;

use prometheus::Registry;

use crate::keys;
use crate::put_encoded;
use crate::Engine;
use crate::Entry;
use crate::EntryCache;
use crate::RangeDescriptor;
use crate::RangeId;
use crate::ReplicaDescriptor;
use crate::ReplicaId;
use crate::ReplicaType;
use crate::StateLoader;
use crate::StoreId;
use crate::StoreMetrics;
use crate::TruncatedState;
use crate::WriteBatch;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

pub fn test_metrics() -> StoreMetrics {
    StoreMetrics::new(Registry::new()).expect("register store metrics")
}

pub fn test_entry_cache(max_bytes: u64) -> EntryCache {
    EntryCache::new(max_bytes, test_metrics())
}

/// Descriptor of `r{range_id}` spanning `[start, end)` with one full voter
/// per `(store_id, replica_id)`.
pub fn test_desc(
    range_id: RangeId,
    start: &[u8],
    end: &[u8],
    replicas: &[(StoreId, ReplicaId)],
) -> RangeDescriptor {
    RangeDescriptor {
        range_id,
        start_key: start.to_vec(),
        end_key: end.to_vec(),
        internal_replicas: replicas
            .iter()
            .map(|(store_id, replica_id)| ReplicaDescriptor {
                node_id: *store_id,
                store_id: *store_id,
                replica_id: *replica_id,
                replica_type: ReplicaType::VoterFull,
            })
            .collect(),
        next_replica_id: replicas.iter().map(|(_, r)| *r).max().unwrap_or(0) + 1,
        generation: 1,
    }
}

/// Writes `entries` to the durable log of `range_id`.
pub fn write_log_entries(
    engine: &Arc<dyn Engine>,
    range_id: RangeId,
    entries: &[Entry],
) {
    let mut batch = WriteBatch::new();
    for e in entries {
        put_encoded(&mut batch, &keys::raft_log_key(range_id, e.index), e).expect("encode entry");
    }
    engine.commit(batch).expect("commit entries");
}

pub fn write_truncated_state(
    engine: &Arc<dyn Engine>,
    range_id: RangeId,
    index: u64,
    term: u64,
) {
    let mut batch = WriteBatch::new();
    StateLoader::new(range_id)
        .set_truncated_state(&mut batch, &TruncatedState { index, term })
        .expect("encode truncated state");
    engine.commit(batch).expect("commit truncated state");
}
