//! Store-level metrics.
//!
//! All collectors hang off an explicitly injected [`StoreMetrics`] handle
//! registered against a caller-provided `Registry`, so several stores can
//! live in one process (and one test binary) without clobbering each other.

#[cfg(test)]
mod metrics_test;

use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::IntCounter;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use crate::MvccStats;
use crate::Result;
use crate::SystemError;

#[derive(Debug, Clone)]
pub struct StoreMetrics {
    registry: Registry,

    // Aggregated range statistics
    pub live_bytes: IntGauge,
    pub live_count: IntGauge,
    pub key_bytes: IntGauge,
    pub key_count: IntGauge,
    pub val_bytes: IntGauge,
    pub val_count: IntGauge,
    pub sys_bytes: IntGauge,
    pub sys_count: IntGauge,

    // Replica directory
    pub replica_count: IntGauge,
    pub placeholder_count: IntGauge,

    // Snapshots
    pub range_snapshots_applied_by_voters: IntCounter,
    pub range_snapshots_applied_for_initial_upreplication: IntCounter,
    pub range_snapshots_applied_by_non_voters: IntCounter,
    pub range_snapshots_ingested_bytes: IntCounter,
    pub range_snapshots_generated: IntCounter,
    pub snapshot_apply_duration_ms: Histogram,

    // Entry cache
    pub raft_entry_cache_bytes: IntGauge,
    pub raft_entry_cache_size: IntGauge,
    pub raft_entry_cache_accesses: IntCounter,
    pub raft_entry_cache_hits: IntCounter,
}

fn gauge(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl StoreMetrics {
    pub fn new(registry: Registry) -> Result<Self> {
        let r = &registry;
        let snapshot_apply_duration_ms = Histogram::with_opts(
            HistogramOpts::new(
                "range_snapshot_apply_duration_ms",
                "Histogram of snapshot application duration in ms",
            )
            .buckets(exponential_buckets(1.0, 2.0, 16)?),
        )?;
        r.register(Box::new(snapshot_apply_duration_ms.clone()))?;

        Ok(Self {
            live_bytes: gauge(r, "livebytes", "Number of bytes of live data")?,
            live_count: gauge(r, "livecount", "Count of live keys")?,
            key_bytes: gauge(r, "keybytes", "Number of bytes taken up by keys")?,
            key_count: gauge(r, "keycount", "Count of all keys")?,
            val_bytes: gauge(r, "valbytes", "Number of bytes taken up by values")?,
            val_count: gauge(r, "valcount", "Count of all values")?,
            sys_bytes: gauge(r, "sysbytes", "Number of bytes in system keys")?,
            sys_count: gauge(r, "syscount", "Count of system keys")?,
            replica_count: gauge(r, "replicas", "Number of replicas")?,
            placeholder_count: gauge(r, "replicas_placeholders", "Number of replica placeholders")?,
            range_snapshots_applied_by_voters: counter(
                r,
                "range_snapshots_applied_voter",
                "Number of snapshots applied by voter replicas",
            )?,
            range_snapshots_applied_for_initial_upreplication: counter(
                r,
                "range_snapshots_applied_initial",
                "Number of snapshots applied for initial upreplication",
            )?,
            range_snapshots_applied_by_non_voters: counter(
                r,
                "range_snapshots_applied_non_voter",
                "Number of snapshots applied by non-voter replicas",
            )?,
            range_snapshots_ingested_bytes: counter(
                r,
                "range_snapshots_ingested_bytes",
                "Number of snapshot bytes ingested",
            )?,
            range_snapshots_generated: counter(r, "range_snapshots_generated", "Number of generated snapshots")?,
            snapshot_apply_duration_ms,
            raft_entry_cache_bytes: gauge(r, "raft_entrycache_bytes", "Aggregate size of all raft entries in the cache")?,
            raft_entry_cache_size: gauge(r, "raft_entrycache_size", "Number of raft entries in the cache")?,
            raft_entry_cache_accesses: counter(r, "raft_entrycache_accesses", "Number of cache lookups")?,
            raft_entry_cache_hits: counter(r, "raft_entrycache_hits", "Number of successful cache lookups")?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn add_mvcc_stats(
        &self,
        stats: &MvccStats,
    ) {
        self.live_bytes.add(stats.live_bytes);
        self.live_count.add(stats.live_count);
        self.key_bytes.add(stats.key_bytes);
        self.key_count.add(stats.key_count);
        self.val_bytes.add(stats.val_bytes);
        self.val_count.add(stats.val_count);
        self.sys_bytes.add(stats.sys_bytes);
        self.sys_count.add(stats.sys_count);
    }

    pub fn subtract_mvcc_stats(
        &self,
        stats: &MvccStats,
    ) {
        self.live_bytes.sub(stats.live_bytes);
        self.live_count.sub(stats.live_count);
        self.key_bytes.sub(stats.key_bytes);
        self.key_count.sub(stats.key_count);
        self.val_bytes.sub(stats.val_bytes);
        self.val_count.sub(stats.val_count);
        self.sys_bytes.sub(stats.sys_bytes);
        self.sys_count.sub(stats.sys_count);
    }

    /// Moves the aggregates from a range's `before` stats to its `after`
    /// stats.
    pub fn apply_stats_delta(
        &self,
        before: &MvccStats,
        after: &MvccStats,
    ) {
        self.add_mvcc_stats(&MvccStats::delta(before, after));
    }

    /// Text exposition of everything in the registry.
    pub fn encode_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| SystemError::Metrics(e.to_string()).into())
    }
}
