use tracing::debug;
use tracing::error;

use crate::keys;
use crate::FatalError;
use crate::Lease;
use crate::RangeDescriptor;
use crate::ReadSummary;
use crate::Replica;
use crate::Result;

impl Replica {
    /// Reacts to `new` replacing `prev` as the range's lease.
    ///
    /// Lease sequences never go backwards. They advance one at a time
    /// unless `allow_jump` is set, as when a snapshot carries several lease
    /// changes at once. A replica that becomes leaseholder forwards the
    /// timestamp cache over its spans to the lease start and to the reads
    /// of `prior_read_summary`.
    pub fn lease_post_apply(
        &self,
        desc: &RangeDescriptor,
        prev: &Lease,
        new: &Lease,
        prior_read_summary: Option<&ReadSummary>,
        allow_jump: bool,
    ) -> Result<()> {
        let (s1, s2) = (prev.sequence, new.sequence);
        if s1 != 0 && (s2 < s1 || (s2 > s1 + 1 && !allow_jump)) {
            error!(range_id = self.range_id(), ?prev, ?new, "unexpected lease sequence");
            return Err(FatalError::LeaseSequenceJump { prev: s1, new: s2 }.into());
        }

        let changing_hands = prev.replica.store_id != new.replica.store_id || s1 != s2;
        if !new.owned_by(self.replica_id()) || !changing_hands {
            return Ok(());
        }

        let ts_cache = self.services().ts_cache();
        for span in keys::replicated_spans_except_range_id(desc) {
            ts_cache.add(&span.key, &span.end_key, new.start);
        }
        if let Some(summary) = prior_read_summary {
            ts_cache.apply_read_summary(desc, summary);
        }
        debug!(
            range_id = self.range_id(),
            sequence = s2,
            start = ?new.start,
            "acquired lease"
        );
        Ok(())
    }
}
