use serde::Deserialize;
use serde::Serialize;

use super::RangeDescriptor;
use super::ReplicaDescriptor;

/// Hybrid logical clock timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub wall_time: u64,
    pub logical: u32,
}

impl Timestamp {
    pub const fn new(
        wall_time: u64,
        logical: u32,
    ) -> Self {
        Self { wall_time, logical }
    }

    pub fn is_empty(&self) -> bool {
        *self == Timestamp::default()
    }

    pub fn forward(
        &mut self,
        other: Timestamp,
    ) -> bool {
        if other > *self {
            *self = other;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub replica: ReplicaDescriptor,
    pub start: Timestamp,
    pub expiration: Option<Timestamp>,
    pub sequence: u64,
}

impl Lease {
    pub fn owned_by(
        &self,
        replica_id: crate::ReplicaId,
    ) -> bool {
        self.replica.replica_id == replica_id
    }
}

/// Marks a range removed from this store. Replicas with an id below
/// `next_replica_id` may never be recreated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeTombstone {
    pub next_replica_id: crate::ReplicaId,
}

/// Timestamps served by the previous leaseholder. `local` covers range-local
/// keys, `global` covers user keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSummary {
    pub local: Timestamp,
    pub global: Timestamp,
}

/// MVCC statistics of one range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccStats {
    pub contains_estimates: i64,
    pub last_update_nanos: i64,
    pub live_bytes: i64,
    pub live_count: i64,
    pub key_bytes: i64,
    pub key_count: i64,
    pub val_bytes: i64,
    pub val_count: i64,
    pub sys_bytes: i64,
    pub sys_count: i64,
}

impl MvccStats {
    pub fn add(
        &mut self,
        other: &MvccStats,
    ) {
        self.contains_estimates += other.contains_estimates;
        self.live_bytes += other.live_bytes;
        self.live_count += other.live_count;
        self.key_bytes += other.key_bytes;
        self.key_count += other.key_count;
        self.val_bytes += other.val_bytes;
        self.val_count += other.val_count;
        self.sys_bytes += other.sys_bytes;
        self.sys_count += other.sys_count;
        self.last_update_nanos = self.last_update_nanos.max(other.last_update_nanos);
    }

    pub fn subtract(
        &mut self,
        other: &MvccStats,
    ) {
        self.contains_estimates -= other.contains_estimates;
        self.live_bytes -= other.live_bytes;
        self.live_count -= other.live_count;
        self.key_bytes -= other.key_bytes;
        self.key_count -= other.key_count;
        self.val_bytes -= other.val_bytes;
        self.val_count -= other.val_count;
        self.sys_bytes -= other.sys_bytes;
        self.sys_count -= other.sys_count;
    }

    /// `after - before`, the adjustment to apply to store-wide aggregates
    /// when a range's stats change from `before` to `after`.
    pub fn delta(
        before: &MvccStats,
        after: &MvccStats,
    ) -> MvccStats {
        let mut d = *after;
        d.subtract(before);
        d
    }

    pub fn total_bytes(&self) -> i64 {
        self.key_bytes + self.val_bytes
    }
}

/// Persisted as a single replicated key and updated on every command
/// application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeAppliedState {
    pub raft_applied_index: u64,
    pub raft_applied_index_term: u64,
    pub lease_applied_index: u64,
    pub range_stats: MvccStats,
}

/// Complete replicated state of a replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaState {
    pub desc: RangeDescriptor,
    pub raft_applied_index: u64,
    pub raft_applied_index_term: u64,
    pub lease_applied_index: u64,
    pub lease: Lease,
    pub stats: MvccStats,
}
