//! Write side of the consensus log: appends, hard state and truncation.

use std::collections::HashSet;
use std::ops::ControlFlow;

use tracing::debug;
use tracing::trace;

use crate::convert::decode;
use crate::keys;
use crate::maybe_sideload_entries;
use crate::put_encoded;
use crate::storage::log_reader;
use crate::Entry;
use crate::HardState;
use crate::RaftMuState;
use crate::RaftStorageError;
use crate::Reader;
use crate::Replica;
use crate::Result;
use crate::TruncatedState;
use crate::WriteBatch;
use crate::Writer;

impl Replica {
    /// Appends `entries` to the log. Entries at or above the first index
    /// replace what was there; a longer old suffix is removed.
    pub fn append(
        &self,
        raft_mu: &RaftMuState,
        entries: &[Entry],
    ) -> Result<()> {
        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return Ok(());
        };
        let sideloaded = raft_mu
            .sideloaded
            .as_deref()
            .ok_or(RaftStorageError::SideloadedStorageUninitialized)?;
        let engine = self.services().engine();
        let prev_last_index = self.read_mu().last_index;

        // Thin entries about to be replaced own sideloaded payloads.
        let mut replaced = Vec::new();
        if first.index <= prev_last_index {
            let start = keys::raft_log_key(self.range_id(), first.index);
            let end = keys::raft_log_key(self.range_id(), prev_last_index + 1);
            engine.scan(&start, &end, &mut |_k, v| {
                let old: Entry = decode(v)?;
                if old.is_thin() {
                    replaced.push((old.index, old.term));
                }
                Ok(ControlFlow::Continue(()))
            })?;
        }

        let (thin, sideloaded_bytes) = maybe_sideload_entries(entries, sideloaded)?;
        let mut batch = WriteBatch::new();
        let mut appended_bytes = sideloaded_bytes;
        for e in &thin {
            put_encoded(&mut batch, &keys::raft_log_key(self.range_id(), e.index), e)?;
            appended_bytes += e.size();
        }
        for i in last.index + 1..=prev_last_index {
            batch.clear(&keys::raft_log_key(self.range_id(), i))?;
        }
        engine.commit(batch)?;

        let kept: HashSet<(u64, u64)> = entries.iter().map(|e| (e.index, e.term)).collect();
        for (index, term) in replaced {
            if !kept.contains(&(index, term)) {
                sideloaded.purge(index, term)?;
            }
        }

        self.services().entry_cache().add(self.range_id(), entries, true);

        let mut mu = self.write_mu();
        mu.last_index = last.index;
        mu.last_term = last.term;
        mu.raft_log_size += appended_bytes;
        trace!(
            range_id = self.range_id(),
            first = first.index,
            last = last.index,
            appended_bytes,
            "appended entries"
        );
        Ok(())
    }

    pub fn set_hard_state(
        &self,
        raft_mu: &RaftMuState,
        hs: &HardState,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        raft_mu.state_loader.set_hard_state(&mut batch, hs)?;
        self.services().engine().commit(batch)
    }

    /// Removes log entries up to and including `index`. The index is
    /// lowered so that every in-flight outgoing snapshot can still be
    /// caught up from the log, and never passes the last index. Returns the
    /// resulting truncated index.
    pub fn truncate_log(
        &self,
        raft_mu: &RaftMuState,
        index: u64,
    ) -> Result<u64> {
        let (prev, last_index, constraint) = {
            let mu = self.read_mu();
            (
                mu.truncated_state,
                mu.last_index,
                mu.min_snapshot_log_truncation_constraint(),
            )
        };
        let mut index = index.min(last_index);
        if let Some(pinned) = constraint {
            index = index.min(pinned.saturating_sub(1));
        }
        if index <= prev.index {
            debug!(
                range_id = self.range_id(),
                requested = index,
                truncated = prev.index,
                "nothing to truncate"
            );
            return Ok(prev.index);
        }

        let services = self.services();
        let engine = services.engine();
        let term = log_reader::term(
            engine.as_ref(),
            &raft_mu.state_loader,
            services.entry_cache(),
            index,
        )?;

        let start = keys::raft_log_key(self.range_id(), prev.index + 1);
        let end = keys::raft_log_key(self.range_id(), index + 1);
        let mut removed_bytes = 0u64;
        engine.scan(&start, &end, &mut |_k, v| {
            removed_bytes += decode::<Entry>(v)?.size();
            Ok(ControlFlow::Continue(()))
        })?;

        let truncated = TruncatedState { index, term };
        let mut batch = WriteBatch::new();
        batch.clear_raw_range(&start, &end, true, false)?;
        raft_mu.state_loader.set_truncated_state(&mut batch, &truncated)?;
        engine.commit(batch)?;

        services.entry_cache().clear_to(self.range_id(), index + 1);
        if let Some(sideloaded) = raft_mu.sideloaded.as_deref() {
            removed_bytes += sideloaded.truncate_to(index + 1)?;
        }

        let mut mu = self.write_mu();
        mu.truncated_state = truncated;
        mu.raft_log_size = mu.raft_log_size.saturating_sub(removed_bytes);
        debug!(
            range_id = self.range_id(),
            index,
            term,
            removed_bytes,
            "truncated raft log"
        );
        Ok(index)
    }
}
