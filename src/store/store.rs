//! In-memory replica directory of one store.
//!
//! Replicas are indexed twice: by range id, and (once initialized) by the
//! start key of the span they own. Placeholders reserve a span for a
//! replica that is being initialized from a snapshot, and share the keyed
//! index with initialized replicas so conflicting reservations are
//! rejected.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::MutexGuard;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ConcurrencyManager;
use crate::DestroyReason;
use crate::FatalError;
use crate::HardState;
use crate::IncomingSnapshot;
use crate::Lease;
use crate::LockRank;
use crate::LockTable;
use crate::MvccStats;
use crate::RaftMuGuard;
use crate::RaftSnapshot;
use crate::RangeDescriptor;
use crate::RangeId;
use crate::RangefeedRetryReason;
use crate::RankedGuard;
use crate::Replica;
use crate::ReplicaError;
use crate::ReplicaId;
use crate::Result;
use crate::SnapshotError;
use crate::Span;
use crate::StateLoader;
use crate::StoreServices;
use crate::Timestamp;
use crate::WriteBatch;
use crate::keys;

pub type StoreMuGuard<'a> = RankedGuard<MutexGuard<'a, StoreDirectory>>;

/// Reservation of a key span for a replica being initialized by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPlaceholder {
    desc: RangeDescriptor,
}

impl ReplicaPlaceholder {
    pub fn range_id(&self) -> RangeId {
        self.desc.range_id
    }

    pub fn desc(&self) -> &RangeDescriptor {
        &self.desc
    }
}

/// Why a placeholder leaves the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderRemoval {
    /// Replaced by the initialized replica
    Filled,
    /// The snapshot attempt was abandoned
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyedItem {
    range_id: RangeId,
    end_key: Vec<u8>,
    placeholder: bool,
}

/// A span owned by an initialized replica or reserved by a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedSpan {
    pub range_id: RangeId,
    pub span: Span,
    pub placeholder: bool,
}

#[derive(Default)]
pub struct StoreDirectory {
    replicas: HashMap<RangeId, Arc<Replica>>,
    by_key: BTreeMap<Vec<u8>, KeyedItem>,
    placeholders: HashMap<RangeId, ReplicaPlaceholder>,
}

impl StoreDirectory {
    pub fn replica(
        &self,
        range_id: RangeId,
    ) -> Option<&Arc<Replica>> {
        self.replicas.get(&range_id)
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Keyed items intersecting `[start, end)`, by start key.
    fn overlapping(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Vec<(Vec<u8>, KeyedItem)> {
        let mut out = Vec::new();
        if start >= end {
            return out;
        }
        // The item starting at or before `start` may reach into the span.
        if let Some((k, item)) = self.by_key.range(..=start.to_vec()).next_back() {
            if item.end_key.as_slice() > start {
                out.push((k.clone(), item.clone()));
            }
        }
        for (k, item) in self.by_key.range(start.to_vec()..end.to_vec()) {
            if k.as_slice() == start {
                continue;
            }
            out.push((k.clone(), item.clone()));
        }
        out
    }

    fn check_no_overlap(
        &self,
        desc: &RangeDescriptor,
    ) -> Result<()> {
        if let Some((start, item)) = self
            .overlapping(&desc.start_key, &desc.end_key)
            .into_iter()
            .find(|(_, item)| item.range_id != desc.range_id)
        {
            let kind = if item.placeholder { "placeholder" } else { "replica" };
            return Err(ReplicaError::Overlap {
                range_id: desc.range_id,
                start: desc.start_key.clone(),
                end: desc.end_key.clone(),
                existing: format!(
                    "{kind} r{}:[{}, {})",
                    item.range_id,
                    String::from_utf8_lossy(&start),
                    String::from_utf8_lossy(&item.end_key)
                ),
            }
            .into());
        }
        Ok(())
    }

    fn remove_keyed(
        &mut self,
        range_id: RangeId,
        placeholder: bool,
    ) {
        self.by_key
            .retain(|_, item| !(item.range_id == range_id && item.placeholder == placeholder));
    }

    fn insert_placeholder(
        &mut self,
        placeholder: ReplicaPlaceholder,
    ) {
        self.by_key.insert(
            placeholder.desc.start_key.clone(),
            KeyedItem {
                range_id: placeholder.range_id(),
                end_key: placeholder.desc.end_key.clone(),
                placeholder: true,
            },
        );
        self.placeholders.insert(placeholder.range_id(), placeholder);
    }
}

/// A replica whose log lock is held by the caller.
pub struct LockedReplica<'a> {
    pub replica: &'a Arc<Replica>,
    pub raft_mu: RaftMuGuard<'a>,
}

pub struct Store {
    services: Arc<StoreServices>,
    mu: Mutex<StoreDirectory>,
}

impl std::fmt::Debug for Store {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Store").field("services", &self.services).finish()
    }
}

impl Store {
    /// Starts with an empty directory. Leftover snapshot scratch files of a
    /// previous run are removed.
    pub fn new(services: Arc<StoreServices>) -> Result<Self> {
        services.sst_snapshot_storage().clear()?;
        Ok(Self {
            services,
            mu: Mutex::new(StoreDirectory::default()),
        })
    }

    pub fn services(&self) -> &Arc<StoreServices> {
        &self.services
    }

    pub fn lock_mu(&self) -> StoreMuGuard<'_> {
        RankedGuard::new(LockRank::StoreMu, || self.mu.lock())
    }

    pub fn get_replica(
        &self,
        range_id: RangeId,
    ) -> Option<Arc<Replica>> {
        self.lock_mu().replica(range_id).cloned()
    }

    pub fn replica_count(&self) -> usize {
        self.lock_mu().replica_count()
    }

    /// Every keyed span, by start key.
    pub fn keyed_spans(&self) -> Vec<KeyedSpan> {
        self.lock_mu()
            .by_key
            .iter()
            .map(|(start, item)| KeyedSpan {
                range_id: item.range_id,
                span: Span::new(start.clone(), item.end_key.clone()),
                placeholder: item.placeholder,
            })
            .collect()
    }

    fn new_concurrency_manager(&self) -> Arc<dyn ConcurrencyManager> {
        Arc::new(LockTable::new())
    }

    /// Writes the initial state of a new range owned by `replica_id` (which
    /// also holds the first lease) and installs its replica.
    pub fn bootstrap_range(
        &self,
        desc: &RangeDescriptor,
        replica_id: ReplicaId,
        stats: MvccStats,
    ) -> Result<Arc<Replica>> {
        let repl_desc = *desc
            .get_replica_descriptor_by_id(replica_id)
            .ok_or(ReplicaError::ReplicaDescriptorNotFound {
                range_id: desc.range_id,
                replica_id,
            })?;

        let mut dir = self.lock_mu();
        if dir.replicas.contains_key(&desc.range_id) {
            return Err(ReplicaError::RangeExists(desc.range_id).into());
        }
        dir.check_no_overlap(desc)?;

        let lease = Lease {
            replica: repl_desc,
            start: Timestamp::default(),
            expiration: None,
            sequence: 1,
        };
        let mut batch = WriteBatch::new();
        StateLoader::new(desc.range_id).write_initial_state(&mut batch, desc, replica_id, &lease, stats)?;
        self.services.engine().commit(batch)?;

        let repl = Arc::new(Replica::new(
            self.services.clone(),
            desc,
            replica_id,
            self.new_concurrency_manager(),
        )?);
        dir.by_key.insert(
            desc.start_key.clone(),
            KeyedItem {
                range_id: desc.range_id,
                end_key: desc.end_key.clone(),
                placeholder: false,
            },
        );
        dir.replicas.insert(desc.range_id, repl.clone());
        self.services.metrics().replica_count.inc();
        self.services.metrics().add_mvcc_stats(&stats);
        info!(%desc, replica_id, "bootstrapped range");
        Ok(repl)
    }

    /// Creates the handle of a replica that will be initialized by a
    /// snapshot. Returns the existing replica if it already has this id.
    pub fn create_uninitialized_replica(
        &self,
        range_id: RangeId,
        replica_id: ReplicaId,
    ) -> Result<Arc<Replica>> {
        let mut dir = self.lock_mu();
        if let Some(existing) = dir.replicas.get(&range_id) {
            if existing.replica_id() == replica_id {
                return Ok(existing.clone());
            }
            return Err(ReplicaError::RangeExists(range_id).into());
        }

        let engine = self.services.engine();
        let loader = StateLoader::new(range_id);
        if let Some(tombstone) = loader.load_range_tombstone(engine.as_ref())? {
            if replica_id < tombstone.next_replica_id {
                return Err(ReplicaError::Destroyed {
                    range_id,
                    reason: format!(
                        "replica id {replica_id} is below tombstone {}",
                        tombstone.next_replica_id
                    ),
                }
                .into());
            }
        }
        let mut batch = WriteBatch::new();
        loader.set_raft_replica_id(&mut batch, replica_id)?;
        engine.commit(batch)?;

        let desc = RangeDescriptor {
            range_id,
            ..Default::default()
        };
        let repl = Arc::new(Replica::new(
            self.services.clone(),
            &desc,
            replica_id,
            self.new_concurrency_manager(),
        )?);
        dir.replicas.insert(range_id, repl.clone());
        self.services.metrics().replica_count.inc();
        debug!(range_id, replica_id, "created uninitialized replica");
        Ok(repl)
    }

    /// Reserves the span of `desc` for an uninitialized replica about to
    /// receive a snapshot.
    pub fn reserve_snapshot(
        &self,
        desc: &RangeDescriptor,
    ) -> Result<ReplicaPlaceholder> {
        let mut dir = self.lock_mu();
        if let Some(repl) = dir.replicas.get(&desc.range_id) {
            if repl.is_initialized() {
                return Err(SnapshotError::Rejected(format!("r{} is already initialized", desc.range_id)).into());
            }
        }
        if dir.placeholders.contains_key(&desc.range_id) {
            return Err(SnapshotError::Rejected(format!("r{} already has a placeholder", desc.range_id)).into());
        }
        dir.check_no_overlap(desc)?;

        let placeholder = ReplicaPlaceholder { desc: desc.clone() };
        dir.insert_placeholder(placeholder.clone());
        self.services.metrics().placeholder_count.inc();
        debug!(%desc, "added placeholder");
        Ok(placeholder)
    }

    /// Releases a reservation whose snapshot will not be applied.
    pub fn cancel_snapshot_reservation(
        &self,
        placeholder: &ReplicaPlaceholder,
    ) -> Result<()> {
        let mut dir = self.lock_mu();
        self.remove_placeholder_locked(&mut dir, placeholder.range_id(), PlaceholderRemoval::Dropped)
    }

    pub fn remove_placeholder_locked(
        &self,
        dir: &mut StoreDirectory,
        range_id: RangeId,
        reason: PlaceholderRemoval,
    ) -> Result<()> {
        if dir.placeholders.remove(&range_id).is_none() {
            return Err(ReplicaError::PlaceholderNotFound(range_id).into());
        }
        dir.remove_keyed(range_id, true);
        self.services.metrics().placeholder_count.dec();
        debug!(range_id, ?reason, "removed placeholder");
        Ok(())
    }

    /// Initialized replicas other than `desc`'s own overlapping its span,
    /// by start key.
    pub fn subsumed_replicas(
        &self,
        desc: &RangeDescriptor,
    ) -> Vec<Arc<Replica>> {
        let dir = self.lock_mu();
        dir.overlapping(&desc.start_key, &desc.end_key)
            .into_iter()
            .filter(|(_, item)| !item.placeholder && item.range_id != desc.range_id)
            .filter_map(|(_, item)| dir.replicas.get(&item.range_id).cloned())
            .collect()
    }

    /// Acquires the log locks of `replicas` in ascending range id order.
    pub fn lock_raft_mus(replicas: &[Arc<Replica>]) -> Vec<LockedReplica<'_>> {
        let mut sorted: Vec<&Arc<Replica>> = replicas.iter().collect();
        sorted.sort_by_key(|r| r.range_id());
        sorted
            .into_iter()
            .map(|replica| LockedReplica {
                replica,
                raft_mu: replica.lock_raft_mu(),
            })
            .collect()
    }

    /// Drops a destroyed replica from the directory. With
    /// `insert_placeholder`, its span stays reserved until the caller
    /// removes the returned placeholder.
    pub fn remove_initialized_replica(
        &self,
        repl: &Replica,
        insert_placeholder: bool,
    ) -> Result<Option<ReplicaPlaceholder>> {
        let range_id = repl.range_id();
        let placeholder = {
            let mut dir = self.lock_mu();
            let desc = {
                let mu = repl.read_mu();
                if mu.destroy_status() != DestroyReason::Removed {
                    return Err(ReplicaError::Destroyed {
                        range_id,
                        reason: "replica must be marked destroyed before removal".into(),
                    }
                    .into());
                }
                mu.desc().clone()
            };
            match dir.replicas.get(&range_id) {
                Some(existing) if std::ptr::eq(existing.as_ref(), repl) => {}
                _ => return Err(ReplicaError::RangeNotFound(range_id).into()),
            }
            dir.replicas.remove(&range_id);
            dir.remove_keyed(range_id, false);
            self.services.metrics().replica_count.dec();

            if insert_placeholder {
                let placeholder = ReplicaPlaceholder { desc };
                dir.insert_placeholder(placeholder.clone());
                self.services.metrics().placeholder_count.inc();
                Some(placeholder)
            } else {
                None
            }
        };
        repl.disconnect_rangefeed_with_reason(RangefeedRetryReason::ReplicaRemoved);
        debug!(range_id, "removed initialized replica");
        Ok(placeholder)
    }

    /// Fails if part of `[from, to)` is owned by neither a replica nor a
    /// placeholder. An empty span always passes.
    pub fn assert_no_hole(
        &self,
        from: &[u8],
        to: &[u8],
    ) -> Result<()> {
        if from >= to {
            return Ok(());
        }
        let dir = self.lock_mu();
        let mut covered = from.to_vec();
        for (start, item) in dir.overlapping(from, to) {
            if start > covered {
                break;
            }
            if item.end_key > covered {
                covered = item.end_key;
            }
            if covered.as_slice() >= to {
                return Ok(());
            }
        }
        Err(FatalError::KeyspaceHole {
            from: keys::pretty(from),
            to: keys::pretty(to),
            at: keys::pretty(&covered),
        }
        .into())
    }

    /// Keys `repl` at the span of `desc`. The caller holds the replica's
    /// state lock.
    pub fn mark_replica_initialized_locked(
        &self,
        dir: &mut StoreDirectory,
        repl: &Replica,
        desc: &RangeDescriptor,
    ) -> Result<()> {
        dir.remove_keyed(repl.range_id(), false);
        dir.check_no_overlap(desc)?;
        dir.by_key.insert(
            desc.start_key.clone(),
            KeyedItem {
                range_id: desc.range_id,
                end_key: desc.end_key.clone(),
                placeholder: false,
            },
        );
        Ok(())
    }

    /// Applies a staged snapshot to its replica, subsuming every
    /// initialized replica overlapping the snapshot's span. Takes the log
    /// lock of the target, then of the subsumed replicas. The staged files
    /// are removed afterwards, whatever the outcome.
    pub fn apply_incoming_snapshot(
        &self,
        in_snap: &mut IncomingSnapshot,
        snap: &RaftSnapshot,
        hs: HardState,
    ) -> Result<()> {
        let range_id = in_snap.desc.range_id;
        let repl = self.get_replica(range_id).ok_or(ReplicaError::RangeNotFound(range_id))?;
        let mut raft_mu = repl.lock_raft_mu();
        let subsumed = if repl.is_initialized() {
            self.subsumed_replicas(&in_snap.desc)
        } else {
            Vec::new()
        };
        if !subsumed.is_empty() {
            debug!(range_id, subsumed = subsumed.len(), "snapshot subsumes replicas");
        }
        let mut locked = Store::lock_raft_mus(&subsumed);
        let res = repl.apply_snapshot(self, &mut raft_mu, in_snap, snap, hs, &mut locked);
        if let Err(e) = in_snap.scratch.clear() {
            warn!(range_id, error = %e, "failed to remove snapshot scratch files");
        }
        res
    }
}
