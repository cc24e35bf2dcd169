//! Storage facade handed to the consensus library.
//!
//! Reads go through the log reader and the cached fields of the replica
//! lock. The facade never takes locks itself: it is built from guards the
//! caller already holds.

use bytes::Bytes;
use tracing::instrument;

use crate::storage::log_reader;
use crate::Entry;
use crate::RaftMuState;
use crate::RaftSnapshot;
use crate::RaftState;
use crate::RaftStorageError;
use crate::Replica;
use crate::ReplicaMu;
use crate::Result;
use crate::SnapshotMetadata;
use crate::INVALID_LAST_TERM;

/// Read interface consumed by the consensus library. Errors are
/// `Compacted` or `Unavailable` whenever the library is expected to react.
pub trait RaftStorage {
    /// Durable hard state plus the membership of the current descriptor.
    /// Empty for an uninitialized replica.
    fn initial_state(&self) -> Result<RaftState>;

    fn entries(
        &self,
        lo: u64,
        hi: u64,
        max_bytes: u64,
    ) -> Result<Vec<Entry>>;

    fn term(
        &self,
        index: u64,
    ) -> Result<u64>;

    fn last_index(&self) -> Result<u64>;

    /// First index still retrievable from the log.
    fn first_index(&self) -> Result<u64>;

    /// Metadata of the applied state only. Range data is streamed out of
    /// band by the snapshot sender.
    fn snapshot(&self) -> Result<RaftSnapshot>;
}

pub struct ReplicaRaftStorage<'a> {
    replica: &'a Replica,
    raft_mu: &'a RaftMuState,
    mu: &'a ReplicaMu,
}

impl Replica {
    /// Storage view over state whose log lock and replica lock are held by
    /// the caller.
    pub fn raft_storage<'a>(
        &'a self,
        raft_mu: &'a RaftMuState,
        mu: &'a ReplicaMu,
    ) -> ReplicaRaftStorage<'a> {
        ReplicaRaftStorage {
            replica: self,
            raft_mu,
            mu,
        }
    }
}

impl RaftStorage for ReplicaRaftStorage<'_> {
    fn initial_state(&self) -> Result<RaftState> {
        let engine = self.replica.services().engine();
        let hard_state = self.raft_mu.state_loader.load_hard_state(engine.as_ref())?;
        if hard_state.is_empty() {
            return Ok(RaftState::default());
        }
        Ok(RaftState {
            hard_state,
            conf_state: self.mu.desc().conf_state(),
        })
    }

    #[instrument(skip(self), fields(range_id = self.replica.range_id()))]
    fn entries(
        &self,
        lo: u64,
        hi: u64,
        max_bytes: u64,
    ) -> Result<Vec<Entry>> {
        let sideloaded = self
            .raft_mu
            .sideloaded
            .as_deref()
            .ok_or(RaftStorageError::SideloadedStorageUninitialized)?;
        let services = self.replica.services();
        log_reader::entries(
            services.engine().as_ref(),
            &self.raft_mu.state_loader,
            services.entry_cache(),
            Some(sideloaded),
            lo,
            hi,
            max_bytes,
        )
    }

    fn term(
        &self,
        index: u64,
    ) -> Result<u64> {
        if index == self.mu.last_index && self.mu.last_term != INVALID_LAST_TERM {
            return Ok(self.mu.last_term);
        }
        let services = self.replica.services();
        if let Some(entry) = services.entry_cache().get(self.replica.range_id(), index) {
            return Ok(entry.term);
        }
        log_reader::term(
            services.engine().as_ref(),
            &self.raft_mu.state_loader,
            services.entry_cache(),
            index,
        )
    }

    fn last_index(&self) -> Result<u64> {
        Ok(self.mu.last_index)
    }

    fn first_index(&self) -> Result<u64> {
        Ok(self.mu.truncated_state.index + 1)
    }

    fn snapshot(&self) -> Result<RaftSnapshot> {
        let state = self.mu.state();
        Ok(RaftSnapshot {
            data: Bytes::new(),
            metadata: SnapshotMetadata {
                index: state.raft_applied_index,
                term: state.raft_applied_index_term,
                conf_state: Default::default(),
            },
        })
    }
}
