use std::ops::ControlFlow;

use tracing::trace;

use crate::keys::all_key_spans;
use crate::keys::pretty;
use crate::keys::range_id_local_span;
use crate::RangeDescriptor;
use crate::Reader;
use crate::Result;
use crate::SnapshotConfig;
use crate::Writer;
use crate::CLEAR_RANGE_THRESHOLD_POINT_KEYS;
use crate::CLEAR_RANGE_THRESHOLD_RANGE_KEYS;

/// Key counts at which clearing a span switches from one deletion per key
/// to a single range deletion. Every range deletion is loaded whenever the
/// file holding it is read, so small spans are cleared key by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearRangeThresholds {
    pub point_keys: usize,
    pub range_keys: usize,
}

impl Default for ClearRangeThresholds {
    fn default() -> Self {
        Self {
            point_keys: CLEAR_RANGE_THRESHOLD_POINT_KEYS,
            range_keys: CLEAR_RANGE_THRESHOLD_RANGE_KEYS,
        }
    }
}

impl ClearRangeThresholds {
    /// Always use range deletions (unless the span is empty). Needed when
    /// more keys are written after the clear, since a bulk-load file takes
    /// point keys in increasing order only.
    pub const MUST_USE_CLEAR_RANGE: Self = Self {
        point_keys: 1,
        range_keys: 1,
    };

    pub fn from_config(config: &SnapshotConfig) -> Self {
        Self {
            point_keys: config.clear_range_threshold_point_keys,
            range_keys: config.clear_range_threshold_range_keys,
        }
    }
}

/// Clears `[start, end)` in `writer` based on what `reader` holds, picking
/// point or range deletions per key kind.
pub fn clear_range_with_heuristic(
    reader: &dyn Reader,
    writer: &mut dyn Writer,
    start: &[u8],
    end: &[u8],
    point_key_threshold: usize,
    range_key_threshold: usize,
) -> Result<()> {
    if start >= end {
        return Ok(());
    }

    // Point keys
    let mut keys = Vec::new();
    let mut use_range = false;
    reader.scan(start, end, &mut |k, _| {
        keys.push(k.to_vec());
        if keys.len() >= point_key_threshold {
            use_range = true;
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    })?;
    if use_range {
        trace!(start = %pretty(start), end = %pretty(end), "clearing point keys with range deletion");
        writer.clear_raw_range(start, end, true, false)?;
    } else {
        for k in &keys {
            writer.clear(k)?;
        }
    }

    // Range keys
    let fragments = reader.range_keys(start, end)?;
    if fragments.is_empty() {
        return Ok(());
    }
    if fragments.len() >= range_key_threshold {
        writer.clear_raw_range(start, end, false, true)?;
    } else {
        for frag in fragments {
            let s = frag.start.as_slice().max(start);
            let e = frag.end.as_slice().min(end);
            writer.clear_range_key(s, e)?;
        }
    }
    Ok(())
}

/// Clears the data of a replica: only its range-id local keys, or every
/// span it owns.
pub fn clear_range_data(
    desc: &RangeDescriptor,
    reader: &dyn Reader,
    writer: &mut dyn Writer,
    range_id_local_only: bool,
    must_use_clear_range: bool,
    thresholds: ClearRangeThresholds,
) -> Result<()> {
    let spans = if range_id_local_only {
        vec![range_id_local_span(desc.range_id)]
    } else {
        all_key_spans(desc)
    };

    let thresholds = if must_use_clear_range {
        ClearRangeThresholds::MUST_USE_CLEAR_RANGE
    } else {
        thresholds
    };

    for span in spans {
        clear_range_with_heuristic(
            reader,
            writer,
            &span.key,
            &span.end_key,
            thresholds.point_keys,
            thresholds.range_keys,
        )?;
    }
    Ok(())
}
