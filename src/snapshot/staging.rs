//! Turns an outgoing snapshot into bulk-load files on the receiving
//! side's disk.

use std::ops::ControlFlow;

use tracing::debug;

use crate::keys;
use crate::OutgoingSnapshot;
use crate::Result;
use crate::SstSnapshotStorageScratch;
use crate::SstWriter;
use crate::Writer;

/// Writes one file per replicated span of the snapshot into `scratch`.
/// Each file clears its span and then holds every key of the span as seen
/// by the snapshot's engine view. Returns the bytes of range data staged.
pub fn stage_outgoing_snapshot(
    outgoing: &OutgoingSnapshot,
    scratch: &mut SstSnapshotStorageScratch,
) -> Result<u64> {
    let reader = outgoing.engine_snap.as_ref();
    let mut data_size = 0;
    for span in keys::snapshot_key_spans(&outgoing.state.desc) {
        let mut sst = SstWriter::new();
        sst.clear_raw_range(&span.key, &span.end_key, true, true)?;
        for rk in reader.range_keys(&span.key, &span.end_key)? {
            let start = rk.start.max(span.key.clone());
            let end = rk.end.min(span.end_key.clone());
            sst.put_range_key(&start, &end, &rk.value)?;
        }
        reader.scan(&span.key, &span.end_key, &mut |k, v| {
            sst.put(k, v)?;
            Ok(ControlFlow::Continue(()))
        })?;
        let finished = sst.finish()?;
        data_size += finished.data_size;
        scratch.write_sst(&finished.data)?;
        debug!(%span, bytes = finished.data_size, "staged snapshot span");
    }
    Ok(data_size)
}
