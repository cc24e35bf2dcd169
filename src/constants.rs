// -
// Log bookkeeping

/// Sentinel for an unknown last log term. Forces recomputation through the
/// log reader on the next `term()` call.
pub const INVALID_LAST_TERM: u64 = 0;

/// Replica id recorded in the tombstone of a range subsumed by a merge. No
/// future replica of that range may be created on this store.
pub const MERGED_TOMBSTONE_REPLICA_ID: crate::ReplicaId = crate::ReplicaId::MAX;

// -
// Clearing heuristics

/// Number of point keys at which clearing switches to a range deletion.
pub const CLEAR_RANGE_THRESHOLD_POINT_KEYS: usize = 64;
/// Number of range keys at which clearing switches to a range deletion.
pub const CLEAR_RANGE_THRESHOLD_RANGE_KEYS: usize = 8;

// -
// Sled tree namespaces

pub(crate) const POINT_KEYS_TREE: &str = "_point_keys";
pub(crate) const RANGE_KEYS_TREE: &str = "_range_keys";

// -
// Files and dirs

/// Per-snapshot staging dir prefix
pub(crate) const SNAPSHOT_SCRATCH_DIR_PREFIX: &str = "snapshot-";
pub(crate) const SST_FILE_EXTENSION: &str = "sst";

// -
// Bootstrap

/// Applied and truncated index of a freshly bootstrapped range.
pub const RAFT_INITIAL_LOG_INDEX: u64 = 10;
/// Term matching [`RAFT_INITIAL_LOG_INDEX`].
pub const RAFT_INITIAL_LOG_TERM: u64 = 5;
