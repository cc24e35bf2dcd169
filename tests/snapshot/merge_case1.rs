use std::sync::Arc;

use d_engine_replica::MvccStats;
use d_engine_replica::Reader;
use d_engine_replica::SnapshotKind;
use d_engine_replica::SpanConfig;
use d_engine_replica::StateLoader;
use d_engine_replica::StaticSpanConfigReader;
use d_engine_replica::MERGED_TOMBSTONE_REPLICA_ID;

use crate::common::desc;
use crate::common::hard_state;
use crate::common::start_store;
use crate::common::transfer;
use crate::common::write_keys;
use crate::enable_logger;

fn kv(
    k: &str,
    v: &str,
) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}

#[test]
fn test_snapshot_after_missed_merge() {
    enable_logger();
    let replicas = [(1, 1), (2, 2)];

    let dst = start_store(2);
    for (range_id, start, end) in [(1, b"a", b"c"), (2, b"c", b"e"), (3, b"e", b"g")] {
        dst.store
            .bootstrap_range(&desc(range_id, start, end, &replicas), 2, MvccStats::default())
            .unwrap();
    }
    write_keys(&dst.store, &[kv("b", "stale"), kv("d", "stale"), kv("f", "kept")]);
    let conf = SpanConfig {
        num_replicas: 5,
        ..Default::default()
    };
    dst.store
        .services()
        .set_span_config_reader(Arc::new(StaticSpanConfigReader::new(conf.clone())));

    // r1 absorbed r2 while the receiver was away.
    let merged = desc(1, b"a", b"e", &replicas);
    let src = start_store(1);
    let sender = src.store.bootstrap_range(&merged, 1, MvccStats::default()).unwrap();
    write_keys(&src.store, &[kv("b", "fresh"), kv("d", "fresh")]);

    let outgoing = sender.get_snapshot(SnapshotKind::Raft).unwrap();
    let mut in_snap = transfer(&outgoing, 1, &dst.store, None);
    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, hard_state(&outgoing))
        .unwrap();

    let engine = dst.store.services().engine();
    assert_eq!(engine.get(b"b").unwrap(), Some(b"fresh".to_vec()));
    assert_eq!(engine.get(b"d").unwrap(), Some(b"fresh".to_vec()));
    assert_eq!(engine.get(b"f").unwrap(), Some(b"kept".to_vec()));

    assert!(dst.store.get_replica(2).is_none());
    let tombstone = StateLoader::new(2).load_range_tombstone(engine.as_ref()).unwrap();
    assert_eq!(tombstone.map(|t| t.next_replica_id), Some(MERGED_TOMBSTONE_REPLICA_ID));
    assert!(dst.store.create_uninitialized_replica(2, 3).is_err());

    let r1 = dst.store.get_replica(1).unwrap();
    assert_eq!(r1.desc(), merged);
    assert_eq!(*r1.span_config(), conf);
    let spans: Vec<u64> = dst.store.keyed_spans().iter().map(|s| s.range_id).collect();
    assert_eq!(spans, vec![1, 3]);

    let text = dst.store.services().metrics().encode_text().unwrap();
    assert!(text.contains("range_snapshots_applied_voter 1"));
    assert!(text.contains("replicas 2"));
}
