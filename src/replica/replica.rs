//! In-memory handle of one replica.
//!
//! Three locks guard a replica, ranked as described in
//! [`crate::lock_order`]:
//! - `raft_mu`: serializes log mutation and snapshot application
//! - `read_only_cmd_mu`: held exclusively while the replica is destroyed
//! - `mu`: the replicated state plus cached log bookkeeping

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use parking_lot::RwLockWriteGuard;
use tracing::debug;
use tracing::trace;
use uuid::Uuid;

use crate::clear_range_data;
use crate::load_range_descriptor;
use crate::ClearRangeThresholds;
use crate::ConcurrencyManager;
use crate::FatalError;
use crate::LockRank;
use crate::MvccStats;
use crate::RangeDescriptor;
use crate::RangeId;
use crate::RangefeedProcessor;
use crate::RangefeedRetryReason;
use crate::RankedGuard;
use crate::Reader;
use crate::ReplicaDescriptor;
use crate::ReplicaError;
use crate::ReplicaId;
use crate::ReplicaState;
use crate::Result;
use crate::SideloadStorage;
use crate::SpanConfig;
use crate::SpanConfigError;
use crate::StateLoader;
use crate::StoreServices;
use crate::TruncatedState;
use crate::Writer;
use crate::INVALID_LAST_TERM;

pub type RaftMuGuard<'a> = RankedGuard<MutexGuard<'a, RaftMuState>>;
pub type ReadOnlyCmdGuard<'a> = RankedGuard<RwLockWriteGuard<'a, ()>>;
pub type ReplicaReadGuard<'a> = RankedGuard<RwLockReadGuard<'a, ReplicaMu>>;
pub type ReplicaWriteGuard<'a> = RankedGuard<RwLockWriteGuard<'a, ReplicaMu>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Alive,
    /// Removed from the store, e.g. subsumed by a merge
    Removed,
}

/// State guarded by the log lock.
pub struct RaftMuState {
    pub(crate) state_loader: StateLoader,
    /// `None` once the replica has been destroyed
    pub(crate) sideloaded: Option<Arc<dyn SideloadStorage>>,
}

impl RaftMuState {
    pub fn state_loader(&self) -> &StateLoader {
        &self.state_loader
    }

    pub fn sideloaded(&self) -> Option<&Arc<dyn SideloadStorage>> {
        self.sideloaded.as_ref()
    }
}

/// State guarded by the replica lock.
#[derive(Debug)]
pub struct ReplicaMu {
    pub(crate) state: ReplicaState,
    pub(crate) truncated_state: TruncatedState,
    pub(crate) last_index: u64,
    /// [`INVALID_LAST_TERM`] when unknown
    pub(crate) last_term: u64,
    pub(crate) raft_log_size: u64,
    pub(crate) raft_log_size_trusted: bool,
    pub(crate) destroy_status: DestroyReason,
    /// In-flight outgoing snapshots by id, with the index they pin
    pub(crate) snapshot_log_truncation_constraints: HashMap<Uuid, u64>,
}

impl ReplicaMu {
    pub fn state(&self) -> &ReplicaState {
        &self.state
    }

    pub fn desc(&self) -> &RangeDescriptor {
        &self.state.desc
    }

    pub fn truncated_state(&self) -> TruncatedState {
        self.truncated_state
    }

    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    pub fn last_term(&self) -> u64 {
        self.last_term
    }

    pub fn raft_log_size(&self) -> u64 {
        self.raft_log_size
    }

    pub fn raft_log_size_trusted(&self) -> bool {
        self.raft_log_size_trusted
    }

    pub fn destroy_status(&self) -> DestroyReason {
        self.destroy_status
    }

    pub fn is_initialized(&self) -> bool {
        self.state.desc.is_initialized()
    }

    /// Lowest index pinned by an in-flight outgoing snapshot.
    pub fn min_snapshot_log_truncation_constraint(&self) -> Option<u64> {
        self.snapshot_log_truncation_constraints.values().copied().min()
    }
}

pub struct Replica {
    range_id: RangeId,
    replica_id: ReplicaId,
    services: Arc<StoreServices>,

    raft_mu: Mutex<RaftMuState>,
    read_only_cmd_mu: RwLock<()>,
    mu: RwLock<ReplicaMu>,

    conc_mgr: Arc<dyn ConcurrencyManager>,
    rangefeed: Mutex<Option<Arc<dyn RangefeedProcessor>>>,
    span_config: ArcSwap<SpanConfig>,
}

impl std::fmt::Debug for Replica {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("range_id", &self.range_id)
            .field("replica_id", &self.replica_id)
            .finish()
    }
}

impl Replica {
    /// Loads the replica of `desc.range_id` from the engine. An
    /// uninitialized `desc` yields an empty state.
    pub(crate) fn new(
        services: Arc<StoreServices>,
        desc: &RangeDescriptor,
        replica_id: ReplicaId,
        conc_mgr: Arc<dyn ConcurrencyManager>,
    ) -> Result<Self> {
        let range_id = desc.range_id;
        let reader: &dyn Reader = services.engine().as_ref();
        let state_loader = StateLoader::new(range_id);
        let state = if desc.is_initialized() {
            state_loader.load(reader, desc)?
        } else {
            ReplicaState {
                desc: desc.clone(),
                ..Default::default()
            }
        };
        let truncated_state = state_loader.load_truncated_state(reader)?;
        let last_index = state_loader.load_last_index(reader)?;
        let sideloaded = services.new_sideload_storage(range_id)?;
        let span_config = ArcSwap::from_pointee(services.settings().span_config.clone());
        trace!(range_id, replica_id, last_index, "loaded replica");

        Ok(Self {
            range_id,
            replica_id,
            raft_mu: Mutex::new(RaftMuState {
                state_loader,
                sideloaded: Some(sideloaded),
            }),
            read_only_cmd_mu: RwLock::new(()),
            mu: RwLock::new(ReplicaMu {
                state,
                truncated_state,
                last_index,
                last_term: INVALID_LAST_TERM,
                raft_log_size: 0,
                raft_log_size_trusted: false,
                destroy_status: DestroyReason::Alive,
                snapshot_log_truncation_constraints: HashMap::new(),
            }),
            conc_mgr,
            rangefeed: Mutex::new(None),
            span_config,
            services,
        })
    }

    pub fn range_id(&self) -> RangeId {
        self.range_id
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    pub fn services(&self) -> &Arc<StoreServices> {
        &self.services
    }

    // -
    // Locks

    pub fn lock_raft_mu(&self) -> RaftMuGuard<'_> {
        RankedGuard::new(LockRank::RaftMu, || self.raft_mu.lock())
    }

    pub fn lock_read_only_cmd_mu(&self) -> ReadOnlyCmdGuard<'_> {
        RankedGuard::new(LockRank::ReadOnlyCmdMu, || self.read_only_cmd_mu.write())
    }

    pub fn read_mu(&self) -> ReplicaReadGuard<'_> {
        RankedGuard::new(LockRank::ReplicaMu, || self.mu.read())
    }

    pub fn write_mu(&self) -> ReplicaWriteGuard<'_> {
        RankedGuard::new(LockRank::ReplicaMu, || self.mu.write())
    }

    // -
    // State accessors

    pub fn desc(&self) -> RangeDescriptor {
        self.read_mu().desc().clone()
    }

    pub fn state(&self) -> ReplicaState {
        self.read_mu().state().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.read_mu().is_initialized()
    }

    pub fn check_alive(&self) -> Result<()> {
        match self.read_mu().destroy_status() {
            DestroyReason::Alive => Ok(()),
            DestroyReason::Removed => Err(ReplicaError::Destroyed {
                range_id: self.range_id,
                reason: "replica removed".into(),
            }
            .into()),
        }
    }

    /// This replica's entry in its range descriptor.
    pub fn get_replica_descriptor(&self) -> Result<ReplicaDescriptor> {
        self.read_mu()
            .desc()
            .get_replica_descriptor_by_id(self.replica_id)
            .copied()
            .ok_or_else(|| {
                ReplicaError::ReplicaDescriptorNotFound {
                    range_id: self.range_id,
                    replica_id: self.replica_id,
                }
                .into()
            })
    }

    pub fn span_config(&self) -> Arc<SpanConfig> {
        self.span_config.load_full()
    }

    pub fn concurrency_manager(&self) -> &Arc<dyn ConcurrencyManager> {
        &self.conc_mgr
    }

    // -
    // Change feed

    pub fn set_rangefeed_processor(
        &self,
        processor: Arc<dyn RangefeedProcessor>,
    ) {
        *self.rangefeed.lock() = Some(processor);
    }

    pub fn has_rangefeed(&self) -> bool {
        self.rangefeed.lock().is_some()
    }

    /// Cuts off the change feed, if any. Subscribers must reconnect.
    pub fn disconnect_rangefeed_with_reason(
        &self,
        reason: RangefeedRetryReason,
    ) {
        if let Some(processor) = self.rangefeed.lock().take() {
            debug!(range_id = self.range_id, %reason, "disconnecting rangefeed");
            processor.disconnect(reason);
        }
    }

    /// Refreshes the cached span config for `desc`.
    pub fn update_range_info(
        &self,
        desc: &RangeDescriptor,
    ) -> std::result::Result<(), SpanConfigError> {
        let reader = self.services.span_config_reader().ok_or(SpanConfigError::Unavailable)?;
        let conf = reader.get_span_config_for_key(&desc.start_key)?;
        self.span_config.store(Arc::new(conf));
        Ok(())
    }

    /// Compares the in-memory state with what the engine holds.
    pub fn assert_state_locked(
        &self,
        reader: &dyn Reader,
        mu: &ReplicaMu,
    ) -> Result<()> {
        let desc = mu.desc();
        let disk_desc = load_range_descriptor(reader, &desc.start_key)?;
        if disk_desc.as_ref() != Some(desc) {
            return Err(FatalError::StateDivergence(format!(
                "descriptor on-disk: {disk_desc:?}, in-memory: {desc:?}"
            ))
            .into());
        }
        let disk_state = StateLoader::new(self.range_id).load(reader, desc)?;
        if &disk_state != mu.state() {
            return Err(FatalError::StateDivergence(format!(
                "on-disk: {disk_state:?}, in-memory: {:?}",
                mu.state()
            ))
            .into());
        }
        Ok(())
    }

    // -
    // Destruction

    /// Blocks new read-only commands and flags the replica removed.
    pub fn mark_destroyed(&self) {
        let _read_only = self.lock_read_only_cmd_mu();
        let mut mu = self.write_mu();
        mu.destroy_status = DestroyReason::Removed;
    }

    /// Writes the deletion of the replica's data plus its tombstone into
    /// `writer`. The caller holds the log lock.
    pub fn pre_destroy_raft_mu_locked(
        &self,
        raft_mu: &RaftMuState,
        reader: &dyn Reader,
        writer: &mut dyn Writer,
        next_replica_id: ReplicaId,
        range_id_local_only: bool,
        must_use_clear_range: bool,
    ) -> Result<()> {
        let desc = self.desc();
        let thresholds = ClearRangeThresholds::from_config(&self.services.settings().snapshot);
        clear_range_data(
            &desc,
            reader,
            writer,
            range_id_local_only,
            must_use_clear_range,
            thresholds,
        )?;
        raft_mu.state_loader.set_range_tombstone(writer, next_replica_id)
    }

    /// In-memory cleanup once the replica's data is gone: store
    /// aggregates, cached entries, change feed, side storage.
    pub fn post_destroy_raft_mu_locked(
        &self,
        raft_mu: &mut RaftMuState,
        stats: &MvccStats,
    ) -> Result<()> {
        self.services.metrics().subtract_mvcc_stats(stats);
        self.services.entry_cache().drop(self.range_id);
        self.disconnect_rangefeed_with_reason(RangefeedRetryReason::ReplicaRemoved);
        if let Some(sideloaded) = raft_mu.sideloaded.take() {
            sideloaded.clear()?;
        }
        debug!(range_id = self.range_id, "destroyed replica");
        Ok(())
    }
}
