use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use super::ConfState;
use crate::NodeId;
use crate::RangeId;
use crate::ReplicaId;
use crate::StoreId;

/// Role of a replica within its range's replica set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReplicaType {
    #[default]
    VoterFull,
    VoterIncoming,
    VoterOutgoing,
    VoterDemotingLearner,
    VoterDemotingNonVoter,
    Learner,
    NonVoter,
}

impl ReplicaType {
    pub fn is_voter_new_config(&self) -> bool {
        matches!(self, ReplicaType::VoterFull | ReplicaType::VoterIncoming)
    }

    fn is_joint(&self) -> bool {
        matches!(
            self,
            ReplicaType::VoterIncoming
                | ReplicaType::VoterOutgoing
                | ReplicaType::VoterDemotingLearner
                | ReplicaType::VoterDemotingNonVoter
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub node_id: NodeId,
    pub store_id: StoreId,
    pub replica_id: ReplicaId,
    pub replica_type: ReplicaType,
}

impl fmt::Display for ReplicaDescriptor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "(n{},s{}):{}", self.node_id, self.store_id, self.replica_id)
    }
}

/// Key range plus replica set of a range.
///
/// `end_key` is exclusive. An uninitialized range has empty bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    pub range_id: RangeId,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub internal_replicas: Vec<ReplicaDescriptor>,
    pub next_replica_id: ReplicaId,
    pub generation: u64,
}

impl RangeDescriptor {
    pub fn is_initialized(&self) -> bool {
        !self.end_key.is_empty()
    }

    pub fn replicas(&self) -> &[ReplicaDescriptor] {
        &self.internal_replicas
    }

    pub fn get_replica_descriptor_by_id(
        &self,
        replica_id: ReplicaId,
    ) -> Option<&ReplicaDescriptor> {
        self.internal_replicas.iter().find(|r| r.replica_id == replica_id)
    }

    pub fn get_replica_descriptor(
        &self,
        store_id: StoreId,
    ) -> Option<&ReplicaDescriptor> {
        self.internal_replicas.iter().find(|r| r.store_id == store_id)
    }

    pub fn contains_key(
        &self,
        key: &[u8],
    ) -> bool {
        self.start_key.as_slice() <= key && key < self.end_key.as_slice()
    }

    /// True if `[start, end)` intersects this range.
    pub fn overlaps(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> bool {
        self.start_key.as_slice() < end && start < self.end_key.as_slice()
    }

    /// Consensus membership derived from the replica set.
    ///
    /// Outgoing voters are only reported while a joint configuration is in
    /// progress.
    pub fn conf_state(&self) -> ConfState {
        let mut cs = ConfState::default();
        let mut joint = false;
        for r in &self.internal_replicas {
            joint |= r.replica_type.is_joint();
            let id = r.replica_id;
            match r.replica_type {
                ReplicaType::VoterFull => {
                    cs.voters.push(id);
                    cs.voters_outgoing.push(id);
                }
                ReplicaType::VoterIncoming => cs.voters.push(id),
                ReplicaType::VoterOutgoing => cs.voters_outgoing.push(id),
                ReplicaType::VoterDemotingLearner | ReplicaType::VoterDemotingNonVoter => {
                    cs.voters_outgoing.push(id);
                    cs.learners_next.push(id);
                }
                ReplicaType::Learner | ReplicaType::NonVoter => cs.learners.push(id),
            }
        }
        if !joint {
            cs.voters_outgoing.clear();
        }
        cs
    }
}

impl fmt::Display for RangeDescriptor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "r{}:[{}, {}) gen={}",
            self.range_id,
            String::from_utf8_lossy(&self.start_key),
            String::from_utf8_lossy(&self.end_key),
            self.generation
        )
    }
}
