//! Point-in-time snapshots of a replica for sending to another store.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::load_range_descriptor;
use crate::RaftSnapshot;
use crate::Reader;
use crate::Replica;
use crate::ReplicaState;
use crate::Result;
use crate::SnapshotError;
use crate::SnapshotKind;
use crate::SnapshotMetadata;
use crate::StateLoader;

/// A consistent view of a replica's data, pinned until released.
///
/// While it lives the source log cannot be truncated past the snapshot's
/// applied index. [`OutgoingSnapshot::close`] releases both the engine view
/// and that constraint; dropping the handle does the same.
pub struct OutgoingSnapshot {
    pub snap_uuid: Uuid,
    /// Metadata handed to the consensus library; `data` holds the id
    pub raft_snap: RaftSnapshot,
    pub engine_snap: Box<dyn Reader>,
    /// Replicated state as of the engine view
    pub state: ReplicaState,
    pub kind: SnapshotKind,
    replica: Arc<Replica>,
    released: bool,
}

impl fmt::Debug for OutgoingSnapshot {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("OutgoingSnapshot")
            .field("snap_uuid", &self.snap_uuid)
            .field("kind", &self.kind)
            .field("range_id", &self.replica.range_id())
            .field("applied_index", &self.state.raft_applied_index)
            .finish()
    }
}

impl fmt::Display for OutgoingSnapshot {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{:?} snapshot {} at applied index {}",
            self.kind,
            &self.snap_uuid.to_string()[..8],
            self.state.raft_applied_index
        )
    }
}

impl OutgoingSnapshot {
    pub fn range_id(&self) -> crate::RangeId {
        self.replica.range_id()
    }

    /// Releases the engine view and the log truncation constraint.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.replica.complete_snapshot_log_truncation_constraint(self.snap_uuid);
        debug!(snap_id = %self.snap_uuid, range_id = self.replica.range_id(), "released outgoing snapshot");
    }
}

impl Drop for OutgoingSnapshot {
    fn drop(&mut self) {
        self.release();
    }
}

impl Replica {
    /// Captures the replica's data for sending to another store.
    ///
    /// The engine view is taken and the log pinned under the log lock, so
    /// no truncation can slip in between. Descriptor and state are then
    /// read from the view only.
    pub fn get_snapshot(
        self: &Arc<Self>,
        kind: SnapshotKind,
    ) -> Result<OutgoingSnapshot> {
        let snap_uuid = Uuid::new_v4();
        let (engine_snap, start_key) = {
            let _raft_mu = self.lock_raft_mu();
            let engine_snap = self.services().engine().new_snapshot()?;
            let mut mu = self.write_mu();
            let applied_index = mu.state.raft_applied_index;
            mu.snapshot_log_truncation_constraints.insert(snap_uuid, applied_index);
            (engine_snap, mu.desc().start_key.clone())
        };

        let mut snap = OutgoingSnapshot {
            snap_uuid,
            raft_snap: RaftSnapshot::default(),
            engine_snap,
            state: ReplicaState::default(),
            kind,
            replica: self.clone(),
            released: false,
        };
        // Any error below drops `snap`, releasing the constraint.
        let desc = load_range_descriptor(snap.engine_snap.as_ref(), &start_key)?
            .ok_or(SnapshotError::DescriptorNotFound(self.range_id()))?;
        let state = StateLoader::new(self.range_id()).load(snap.engine_snap.as_ref(), &desc)?;
        snap.raft_snap = RaftSnapshot {
            data: Bytes::copy_from_slice(snap_uuid.as_bytes()),
            metadata: SnapshotMetadata {
                index: state.raft_applied_index,
                term: state.raft_applied_index_term,
                conf_state: desc.conf_state(),
            },
        };
        snap.state = state;

        self.services().metrics().range_snapshots_generated.inc();
        info!(range_id = self.range_id(), %snap, "generated outgoing snapshot");
        Ok(snap)
    }

    /// Drops the log truncation constraint registered for `snap_uuid`.
    pub(crate) fn complete_snapshot_log_truncation_constraint(
        &self,
        snap_uuid: Uuid,
    ) {
        self.write_mu().snapshot_log_truncation_constraints.remove(&snap_uuid);
    }
}
