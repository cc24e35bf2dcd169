//! Typed access to the range-id local keys of one range.

use crate::convert::safe_vk;
use crate::get_decoded;
use crate::keys;
use crate::put_encoded;
use crate::HardState;
use crate::Lease;
use crate::MvccStats;
use crate::RangeAppliedState;
use crate::RangeDescriptor;
use crate::RangeId;
use crate::RangeTombstone;
use crate::ReadSummary;
use crate::Reader;
use crate::ReplicaId;
use crate::ReplicaState;
use crate::Result;
use crate::StorageError;
use crate::TruncatedState;
use crate::Writer;
use crate::RAFT_INITIAL_LOG_INDEX;
use crate::RAFT_INITIAL_LOG_TERM;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLoader {
    range_id: RangeId,
}

impl StateLoader {
    pub fn new(range_id: RangeId) -> Self {
        Self { range_id }
    }

    pub fn range_id(&self) -> RangeId {
        self.range_id
    }

    /// Missing hard state loads as empty.
    pub fn load_hard_state(
        &self,
        reader: &dyn Reader,
    ) -> Result<HardState> {
        Ok(get_decoded(reader, &keys::raft_hard_state_key(self.range_id))?.unwrap_or_default())
    }

    pub fn set_hard_state(
        &self,
        writer: &mut dyn Writer,
        hs: &HardState,
    ) -> Result<()> {
        put_encoded(writer, &keys::raft_hard_state_key(self.range_id), hs)
    }

    pub fn load_truncated_state(
        &self,
        reader: &dyn Reader,
    ) -> Result<TruncatedState> {
        Ok(get_decoded(reader, &keys::raft_truncated_state_key(self.range_id))?.unwrap_or_default())
    }

    pub fn set_truncated_state(
        &self,
        writer: &mut dyn Writer,
        ts: &TruncatedState,
    ) -> Result<()> {
        put_encoded(writer, &keys::raft_truncated_state_key(self.range_id), ts)
    }

    pub fn load_raft_replica_id(
        &self,
        reader: &dyn Reader,
    ) -> Result<Option<ReplicaId>> {
        match reader.get(&keys::raft_replica_id_key(self.range_id))? {
            Some(bytes) => Ok(Some(safe_vk(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_raft_replica_id(
        &self,
        writer: &mut dyn Writer,
        replica_id: ReplicaId,
    ) -> Result<()> {
        writer.put(&keys::raft_replica_id_key(self.range_id), &replica_id.to_be_bytes())
    }

    /// Index of the last log entry, or the truncated index when the log is
    /// empty.
    pub fn load_last_index(
        &self,
        reader: &dyn Reader,
    ) -> Result<u64> {
        let span = keys::raft_log_span(self.range_id);
        match reader.last_key_in_span(&span.key, &span.end_key)? {
            Some(key) => keys::decode_raft_log_key(self.range_id, &key),
            None => Ok(self.load_truncated_state(reader)?.index),
        }
    }

    pub fn load_range_applied_state(
        &self,
        reader: &dyn Reader,
    ) -> Result<Option<RangeAppliedState>> {
        get_decoded(reader, &keys::range_applied_state_key(self.range_id))
    }

    pub fn set_range_applied_state(
        &self,
        writer: &mut dyn Writer,
        state: &RangeAppliedState,
    ) -> Result<()> {
        put_encoded(writer, &keys::range_applied_state_key(self.range_id), state)
    }

    pub fn load_lease(
        &self,
        reader: &dyn Reader,
    ) -> Result<Lease> {
        Ok(get_decoded(reader, &keys::range_lease_key(self.range_id))?.unwrap_or_default())
    }

    pub fn set_lease(
        &self,
        writer: &mut dyn Writer,
        lease: &Lease,
    ) -> Result<()> {
        put_encoded(writer, &keys::range_lease_key(self.range_id), lease)
    }

    pub fn load_prior_read_summary(
        &self,
        reader: &dyn Reader,
    ) -> Result<Option<ReadSummary>> {
        get_decoded(reader, &keys::range_prior_read_summary_key(self.range_id))
    }

    pub fn set_prior_read_summary(
        &self,
        writer: &mut dyn Writer,
        summary: &ReadSummary,
    ) -> Result<()> {
        put_encoded(writer, &keys::range_prior_read_summary_key(self.range_id), summary)
    }

    pub fn load_range_tombstone(
        &self,
        reader: &dyn Reader,
    ) -> Result<Option<RangeTombstone>> {
        get_decoded(reader, &keys::range_tombstone_key(self.range_id))
    }

    pub fn set_range_tombstone(
        &self,
        writer: &mut dyn Writer,
        next_replica_id: ReplicaId,
    ) -> Result<()> {
        put_encoded(
            writer,
            &keys::range_tombstone_key(self.range_id),
            &RangeTombstone { next_replica_id },
        )
    }

    /// Full replicated state of the range as seen by `reader`.
    pub fn load(
        &self,
        reader: &dyn Reader,
        desc: &RangeDescriptor,
    ) -> Result<ReplicaState> {
        let applied = self.load_range_applied_state(reader)?.ok_or_else(|| StorageError::DataCorruption {
            location: format!("r{}: missing range applied state", self.range_id),
        })?;
        Ok(ReplicaState {
            desc: desc.clone(),
            raft_applied_index: applied.raft_applied_index,
            raft_applied_index_term: applied.raft_applied_index_term,
            lease_applied_index: applied.lease_applied_index,
            lease: self.load_lease(reader)?,
            stats: applied.range_stats,
        })
    }

    /// Writes the state of a freshly bootstrapped range: descriptor,
    /// applied and truncated state at the initial log position, matching
    /// hard state, lease and replica id.
    pub fn write_initial_state(
        &self,
        writer: &mut dyn Writer,
        desc: &RangeDescriptor,
        replica_id: ReplicaId,
        lease: &Lease,
        stats: MvccStats,
    ) -> Result<()> {
        self.set_range_applied_state(
            writer,
            &RangeAppliedState {
                raft_applied_index: RAFT_INITIAL_LOG_INDEX,
                raft_applied_index_term: RAFT_INITIAL_LOG_TERM,
                lease_applied_index: 0,
                range_stats: stats,
            },
        )?;
        self.set_lease(writer, lease)?;
        self.set_hard_state(
            writer,
            &HardState {
                term: RAFT_INITIAL_LOG_TERM,
                vote: 0,
                commit: RAFT_INITIAL_LOG_INDEX,
            },
        )?;
        self.set_raft_replica_id(writer, replica_id)?;
        self.set_truncated_state(
            writer,
            &TruncatedState {
                index: RAFT_INITIAL_LOG_INDEX,
                term: RAFT_INITIAL_LOG_TERM,
            },
        )?;
        set_range_descriptor(writer, desc)
    }
}

pub fn load_range_descriptor(
    reader: &dyn Reader,
    start_key: &[u8],
) -> Result<Option<RangeDescriptor>> {
    get_decoded(reader, &keys::range_descriptor_key(start_key))
}

pub fn set_range_descriptor(
    writer: &mut dyn Writer,
    desc: &RangeDescriptor,
) -> Result<()> {
    put_encoded(writer, &keys::range_descriptor_key(&desc.start_key), desc)
}
