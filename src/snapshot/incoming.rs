//! Application of a received snapshot to a replica.

use std::fmt;
use std::time::Instant;

use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::keys;
use crate::release_store_mu_first;
use crate::Error;
use crate::FatalError;
use crate::HardState;
use crate::LockedReplica;
use crate::PlaceholderRemoval;
use crate::RaftMuState;
use crate::RaftSnapshot;
use crate::RangeDescriptor;
use crate::RangefeedRetryReason;
use crate::Reader;
use crate::Replica;
use crate::ReplicaDescriptor;
use crate::ReplicaPlaceholder;
use crate::ReplicaType;
use crate::Result;
use crate::SnapshotApplyStage;
use crate::SnapshotError;
use crate::SnapshotKind;
use crate::SpanConfigError;
use crate::SstSnapshotStorageScratch;
use crate::SstWriter;
use crate::Store;
use crate::TruncatedState;
use crate::Writer;
use crate::INVALID_LAST_TERM;

/// A snapshot received from another store, staged as bulk-load files.
#[derive(Debug)]
pub struct IncomingSnapshot {
    pub snap_id: Uuid,
    pub desc: RangeDescriptor,
    /// Bytes of range data received
    pub data_size: u64,
    pub scratch: SstSnapshotStorageScratch,
    pub from_replica: ReplicaDescriptor,
    /// Reservation of the span; required when the receiving replica is
    /// uninitialized
    pub placeholder: Option<ReplicaPlaceholder>,
    pub kind: SnapshotKind,
}

impl fmt::Display for IncomingSnapshot {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{:?} snapshot {} from {} for {}",
            self.kind,
            &self.snap_id.to_string()[..8],
            self.from_replica,
            self.desc
        )
    }
}

/// Passes non-fatal results through. A fatal error is logged and the
/// process brought down.
pub fn crash_on_fatal<T>(res: Result<T>) -> Result<T> {
    match res {
        Err(e) if e.is_fatal() => {
            error!(error = %e, "fatal error");
            panic!("{e}");
        }
        res => res,
    }
}

#[derive(Debug, Default)]
struct ApplyTimings {
    subsumed_count: usize,
    subsumed_ms: u128,
    ingested_files: usize,
    ingestion_ms: u128,
}

impl Replica {
    /// Replaces the replica's data and in-memory state with `in_snap`.
    ///
    /// The caller holds the log lock of this replica and of every replica
    /// in `subsumed`. An error returned from here left the engine
    /// untouched; once the staged files are ingested any failure takes the
    /// process down.
    pub fn apply_snapshot(
        &self,
        store: &Store,
        raft_mu: &mut RaftMuState,
        in_snap: &mut IncomingSnapshot,
        snap: &RaftSnapshot,
        hs: HardState,
        subsumed: &mut [LockedReplica<'_>],
    ) -> Result<()> {
        crash_on_fatal(self.apply_snapshot_raft_mu_locked(store, raft_mu, in_snap, snap, hs, subsumed))
    }

    fn apply_snapshot_raft_mu_locked(
        &self,
        store: &Store,
        raft_mu: &mut RaftMuState,
        in_snap: &mut IncomingSnapshot,
        snap: &RaftSnapshot,
        hs: HardState,
        subsumed: &mut [LockedReplica<'_>],
    ) -> Result<()> {
        let start = Instant::now();
        let desc = in_snap.desc.clone();
        if desc.range_id != self.range_id() {
            return Err(FatalError::RangeIdMismatch {
                expected: self.range_id(),
                got: desc.range_id,
            }
            .into());
        }
        if hs.is_empty() {
            return Err(FatalError::EmptyHardState {
                index: snap.metadata.index,
                term: snap.metadata.term,
            }
            .into());
        }
        let is_initial_snap = !self.is_initialized();
        match &in_snap.placeholder {
            None if is_initial_snap => {
                return Err(SnapshotError::Rejected(format!(
                    "r{} is uninitialized and holds no placeholder",
                    desc.range_id
                ))
                .into());
            }
            Some(ph) if ph.range_id() != desc.range_id => {
                return Err(SnapshotError::RangeMismatch {
                    expected: desc.range_id,
                    got: ph.range_id(),
                }
                .into());
            }
            _ => {}
        }

        let mut stage = SnapshotApplyStage::Received;
        let mut timings = ApplyTimings {
            subsumed_count: subsumed.len(),
            ..Default::default()
        };

        // Unreplicated state: the old log and hard state go, the new
        // hard state and a truncated state at the snapshot position come in.
        let truncated = TruncatedState {
            index: snap.metadata.index,
            term: snap.metadata.term,
        };
        let mut unrepl = SstWriter::new();
        let unrepl_span = keys::range_id_unreplicated_span(self.range_id());
        unrepl.clear_raw_range(&unrepl_span.key, &unrepl_span.end_key, true, false)?;
        raft_mu.state_loader.set_hard_state(&mut unrepl, &hs)?;
        raft_mu.state_loader.set_raft_replica_id(&mut unrepl, self.replica_id())?;
        // Must not serve old entries once the new truncated state exists.
        self.services().entry_cache().drop(self.range_id());
        raft_mu.state_loader.set_truncated_state(&mut unrepl, &truncated)?;
        let finished = unrepl.finish()?;
        if finished.data_size > 0 {
            in_snap.scratch.write_sst(&finished.data)?;
        }
        stage.advance(SnapshotApplyStage::UnreplicatedStateStaged);

        let subsumed_start = Instant::now();
        self.clear_subsumed_replica_disk_data(&mut in_snap.scratch, &desc, subsumed)?;
        timings.subsumed_ms = subsumed_start.elapsed().as_millis();
        stage.advance(SnapshotApplyStage::SubsumedDiskCleared);

        if let Some(knob) = &self.services().knobs().before_snapshot_sst_ingestion {
            knob(in_snap, in_snap.scratch.ssts())?;
        }
        let ingest_start = Instant::now();
        let ingest_stats = self.services().engine().ingest_external_files(in_snap.scratch.ssts())?;
        timings.ingestion_ms = ingest_start.elapsed().as_millis();
        timings.ingested_files = ingest_stats.files;
        self.services()
            .metrics()
            .range_snapshots_ingested_bytes
            .inc_by(ingest_stats.bytes);
        stage.advance(SnapshotApplyStage::Ingested);

        let res = self.finish_applied_snapshot(
            store,
            raft_mu,
            in_snap,
            snap,
            &desc,
            truncated,
            is_initial_snap,
            subsumed,
            &mut stage,
            &mut timings,
        );
        if let Err(e) = res {
            return Err(match e {
                Error::Fatal(_) => e,
                e => FatalError::AfterIngestion {
                    stage: stage.as_str(),
                    source: Box::new(e),
                }
                .into(),
            });
        }

        let total_ms = start.elapsed().as_millis();
        self.services()
            .metrics()
            .snapshot_apply_duration_ms
            .observe(total_ms as f64);
        info!(
            range_id = self.range_id(),
            snap_id = %in_snap.snap_id,
            applied_index = snap.metadata.index,
            "applied {} ({}ms total; data size {}; subsumed {} replicas in {}ms; ingested {} files in {}ms)",
            in_snap.kind_str(),
            total_ms,
            in_snap.data_size,
            timings.subsumed_count,
            timings.subsumed_ms,
            timings.ingested_files,
            timings.ingestion_ms,
        );
        Ok(())
    }

    /// Everything after ingestion. Every error returned here is fatal.
    #[allow(clippy::too_many_arguments)]
    fn finish_applied_snapshot(
        &self,
        store: &Store,
        raft_mu: &mut RaftMuState,
        in_snap: &mut IncomingSnapshot,
        snap: &RaftSnapshot,
        desc: &RangeDescriptor,
        truncated: TruncatedState,
        is_initial_snap: bool,
        subsumed: &mut [LockedReplica<'_>],
        stage: &mut SnapshotApplyStage,
        timings: &mut ApplyTimings,
    ) -> Result<()> {
        if let Some(knob) = &self.services().knobs().after_snapshot_sst_ingestion {
            knob(in_snap)?;
        }

        let engine = self.services().engine().clone();
        let reader: &dyn Reader = engine.as_ref();
        let state = raft_mu.state_loader.load(reader, desc)?;
        if state.raft_applied_index != snap.metadata.index {
            return Err(FatalError::AppliedIndexMismatch {
                state: state.raft_applied_index,
                metadata: snap.metadata.index,
            }
            .into());
        }
        if state.raft_applied_index_term != snap.metadata.term {
            return Err(FatalError::AppliedTermMismatch {
                state: state.raft_applied_index_term,
                metadata: snap.metadata.term,
            }
            .into());
        }

        let subsumed_start = Instant::now();
        let placeholders = self.clear_subsumed_replica_in_memory_data(store, subsumed)?;
        timings.subsumed_ms += subsumed_start.elapsed().as_millis();

        let prior_read_sum = raft_mu.state_loader.load_prior_read_summary(reader)?;

        // One critical section over the directory and the replica state:
        // nobody sees the span unowned or the replica half updated.
        let own_placeholder = in_snap.placeholder.take();
        let (hole_from, hole_to) = match &own_placeholder {
            Some(ph) if is_initial_snap => (ph.desc().start_key.clone(), ph.desc().end_key.clone()),
            _ => (self.desc().end_key, desc.end_key.clone()),
        };
        if cfg!(debug_assertions) {
            store.assert_no_hole(&hole_from, &hole_to)?;
        }
        let mut dir = store.lock_mu();
        for ph in placeholders.iter().chain(own_placeholder.as_ref()) {
            store.remove_placeholder_locked(&mut dir, ph.range_id(), PlaceholderRemoval::Filled)?;
        }
        let mu = self.write_mu();
        store.mark_replica_initialized_locked(&mut dir, self, desc)?;
        let mut mu = release_store_mu_first(dir, mu);

        // Entries up to the applied index may come in again from the leader.
        mu.last_index = state.raft_applied_index;
        mu.last_term = INVALID_LAST_TERM;
        mu.raft_log_size = 0;
        mu.raft_log_size_trusted = false;
        mu.truncated_state = truncated;
        self.services().metrics().apply_stats_delta(&mu.state.stats, &state.stats);
        let prev = std::mem::replace(&mut mu.state, state);

        self.lease_post_apply(desc, &prev.lease, &mu.state.lease, prior_read_sum.as_ref(), true)?;
        if !subsumed.is_empty() && mu.state.lease.owned_by(self.replica_id()) {
            if let Some(sum) = &prior_read_sum {
                self.services().ts_cache().apply_read_summary(desc, sum);
            }
        }
        self.concurrency_manager().on_replica_snapshot_applied();
        drop(mu);
        if cfg!(debug_assertions) {
            store.assert_no_hole(&hole_from, &hole_to)?;
        }
        stage.advance(SnapshotApplyStage::InMemoryUpdated);

        {
            let mu = self.read_mu();
            self.assert_state_locked(reader, &mu)?;
        }
        stage.advance(SnapshotApplyStage::Asserted);

        self.disconnect_rangefeed_with_reason(RangefeedRetryReason::RaftSnapshot);
        match self.update_range_info(desc) {
            Ok(()) => {}
            Err(SpanConfigError::Unavailable) => {
                warn!(range_id = self.range_id(), "span config unavailable; keeping cached thresholds");
            }
            Err(e) => return Err(e.into()),
        }

        self.record_applied_snapshot(is_initial_snap)?;
        stage.advance(SnapshotApplyStage::Done);
        Ok(())
    }

    fn record_applied_snapshot(
        &self,
        is_initial_snap: bool,
    ) -> Result<()> {
        let metrics = self.services().metrics();
        let repl_desc = self.get_replica_descriptor()?;
        if is_initial_snap {
            metrics.range_snapshots_applied_for_initial_upreplication.inc();
            return Ok(());
        }
        match repl_desc.replica_type {
            // A learner only receives a non-initial snapshot right before
            // promotion.
            ReplicaType::VoterFull
            | ReplicaType::VoterIncoming
            | ReplicaType::VoterOutgoing
            | ReplicaType::VoterDemotingLearner
            | ReplicaType::VoterDemotingNonVoter
            | ReplicaType::Learner => metrics.range_snapshots_applied_by_voters.inc(),
            ReplicaType::NonVoter => metrics.range_snapshots_applied_by_non_voters.inc(),
        }
        Ok(())
    }
}

impl IncomingSnapshot {
    fn kind_str(&self) -> &'static str {
        match self.kind {
            SnapshotKind::Raft => "raft snapshot",
            SnapshotKind::Initial => "initial snapshot",
        }
    }
}
