use prometheus::Registry;

use super::*;

fn create_test_metrics() -> StoreMetrics {
    let registry = Registry::new_custom(Some("replica".to_string()), None).unwrap();
    StoreMetrics::new(registry).unwrap()
}

#[test]
fn test_custom_registry() {
    let metrics = create_test_metrics();
    metrics.raft_entry_cache_hits.inc();

    let families = metrics.registry().gather();
    let names: Vec<_> = families.iter().map(|m| m.get_name()).collect();
    assert!(
        names.contains(&"replica_raft_entrycache_hits"),
        "Missing replica_raft_entrycache_hits"
    );
}

#[test]
fn test_two_stores_do_not_collide() {
    let a = create_test_metrics();
    let b = create_test_metrics();
    a.replica_count.inc();
    assert_eq!(a.replica_count.get(), 1);
    assert_eq!(b.replica_count.get(), 0);
}

#[test]
fn test_stats_delta_moves_aggregates() {
    let metrics = create_test_metrics();
    let before = MvccStats {
        live_bytes: 100,
        key_bytes: 40,
        ..Default::default()
    };
    let after = MvccStats {
        live_bytes: 30,
        key_bytes: 50,
        ..Default::default()
    };
    metrics.add_mvcc_stats(&before);
    metrics.apply_stats_delta(&before, &after);
    assert_eq!(metrics.live_bytes.get(), 30);
    assert_eq!(metrics.key_bytes.get(), 50);

    metrics.subtract_mvcc_stats(&after);
    assert_eq!(metrics.live_bytes.get(), 0);
}

#[test]
fn test_encode_text() {
    let metrics = create_test_metrics();
    metrics.range_snapshots_ingested_bytes.inc_by(42);
    let text = metrics.encode_text().unwrap();
    assert!(text.contains("replica_range_snapshots_ingested_bytes 42"));
}
