//! Per-range subsystems notified by the replica lifecycle.

use std::collections::BTreeMap;
use std::fmt;

#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Concurrency control of one range.
#[cfg_attr(test, automock)]
pub trait ConcurrencyManager: Send + Sync {
    /// The range's state was replaced wholesale. Any in-memory lock state
    /// is stale.
    fn on_replica_snapshot_applied(&self);
}

/// Unreplicated locks held by transactions, keyed by user key.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<BTreeMap<Vec<u8>, Uuid>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `txn` as holder of `key`. Returns false if another
    /// transaction holds it.
    pub fn acquire(
        &self,
        key: &[u8],
        txn: Uuid,
    ) -> bool {
        let mut locks = self.locks.lock();
        match locks.get(key) {
            Some(holder) if *holder != txn => false,
            _ => {
                locks.insert(key.to_vec(), txn);
                true
            }
        }
    }

    pub fn holder(
        &self,
        key: &[u8],
    ) -> Option<Uuid> {
        self.locks.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConcurrencyManager for LockTable {
    fn on_replica_snapshot_applied(&self) {
        let mut locks = self.locks.lock();
        debug!(dropped = locks.len(), "clearing lock table after snapshot");
        locks.clear();
    }
}

/// Why a change feed was cut off. Subscribers reconnect and restart from a
/// fresh catch-up scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangefeedRetryReason {
    RaftSnapshot,
    ReplicaRemoved,
    RangeSplit,
    RangeMerged,
}

impl fmt::Display for RangefeedRetryReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            RangefeedRetryReason::RaftSnapshot => "raft snapshot",
            RangefeedRetryReason::ReplicaRemoved => "replica removed",
            RangefeedRetryReason::RangeSplit => "range split",
            RangefeedRetryReason::RangeMerged => "range merged",
        };
        f.write_str(s)
    }
}

/// Live change feed of one range.
#[cfg_attr(test, automock)]
pub trait RangefeedProcessor: Send + Sync {
    fn disconnect(
        &self,
        reason: RangefeedRetryReason,
    );
}
