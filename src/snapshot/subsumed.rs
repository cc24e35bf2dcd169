//! Removal of replicas whose span an incoming snapshot absorbs.

use tracing::debug;

use crate::clear_range_with_heuristic;
use crate::keys;
use crate::ClearRangeThresholds;
use crate::FatalError;
use crate::LockedReplica;
use crate::RangeDescriptor;
use crate::Reader;
use crate::Replica;
use crate::ReplicaPlaceholder;
use crate::Result;
use crate::Span;
use crate::SstSnapshotStorageScratch;
use crate::SstWriter;
use crate::Store;
use crate::MERGED_TOMBSTONE_REPLICA_ID;

impl Replica {
    /// Stages files deleting the data of `subsumed` into `scratch`.
    ///
    /// Every subsumed replica is marked destroyed and gets a file clearing
    /// its range-id local keys plus a merge tombstone. Parts of the
    /// subsumed spans reaching past `desc` get clearing files of their own;
    /// a subsumed span reaching left of `desc` is fatal.
    pub(crate) fn clear_subsumed_replica_disk_data(
        &self,
        scratch: &mut SstSnapshotStorageScratch,
        desc: &RangeDescriptor,
        subsumed: &[LockedReplica<'_>],
    ) -> Result<()> {
        let engine = self.services().engine();
        let reader: &dyn Reader = engine.as_ref();
        let settings = self.services().settings();
        let thresholds = ClearRangeThresholds::from_config(&settings.snapshot);
        let key_spans = keys::replicated_spans_except_range_id(desc);
        let mut total_key_spans: Option<Vec<Span>> = None;

        for sr in subsumed {
            sr.replica.mark_destroyed();

            let mut sst = SstWriter::new();
            sr.replica.pre_destroy_raft_mu_locked(
                &sr.raft_mu,
                reader,
                &mut sst,
                MERGED_TOMBSTONE_REPLICA_ID,
                true,
                true,
            )?;
            let finished = sst.finish()?;
            if finished.data_size > 0 {
                scratch.write_sst(&finished.data)?;
            }

            let sr_key_spans = keys::replicated_spans_except_range_id(&sr.replica.desc());
            total_key_spans = Some(match total_key_spans {
                None => sr_key_spans,
                Some(total) => total
                    .into_iter()
                    .zip(sr_key_spans)
                    .map(|(t, s)| Span::new(t.key.min(s.key), t.end_key.max(s.end_key)))
                    .collect(),
            });
            debug!(
                range_id = self.range_id(),
                subsumed = sr.replica.range_id(),
                "staged deletion of subsumed replica"
            );
        }

        let Some(total_key_spans) = total_key_spans else {
            return Ok(());
        };
        for (span, total) in key_spans.iter().zip(&total_key_spans) {
            if total.end_key > span.end_key {
                let mut sst = SstWriter::new();
                clear_range_with_heuristic(
                    reader,
                    &mut sst,
                    &span.end_key,
                    &total.end_key,
                    thresholds.point_keys,
                    thresholds.range_keys,
                )?;
                let finished = sst.finish()?;
                if finished.data_size > 0 {
                    scratch.write_sst(&finished.data)?;
                }
            }
            if total.key < span.key {
                return Err(FatalError::SubsumedToLeft {
                    span: span.to_string(),
                    total: total.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Retires the in-memory handles of `subsumed`, whose data is already
    /// gone from the engine. Each leaves a placeholder over its span, which
    /// the caller removes once this replica owns the span.
    pub(crate) fn clear_subsumed_replica_in_memory_data(
        &self,
        store: &Store,
        subsumed: &mut [LockedReplica<'_>],
    ) -> Result<Vec<ReplicaPlaceholder>> {
        let mut placeholders = Vec::with_capacity(subsumed.len());
        for sr in subsumed.iter_mut() {
            let stats = sr.replica.state().stats;
            if let Some(ph) = store.remove_initialized_replica(sr.replica, true)? {
                placeholders.push(ph);
            }
            sr.replica.post_destroy_raft_mu_locked(&mut sr.raft_mu, &stats)?;
        }
        Ok(placeholders)
    }
}
