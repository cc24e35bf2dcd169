use std::path::PathBuf;
use std::sync::Arc;

use mockall::predicate::eq;

use crate::test_utils::enable_logger;
use crate::test_utils::put_keys;
use crate::test_utils::receive_snapshot;
use crate::test_utils::snapshot_hard_state;
use crate::test_utils::test_desc;
use crate::test_utils::test_store;
use crate::test_utils::test_store_with_knobs;
use crate::test_utils::EntryBuilder;
use crate::test_utils::TestStore;
use crate::DestroyReason;
use crate::Error;
use crate::HardState;
use crate::IncomingSnapshot;
use crate::MockRangefeedProcessor;
use crate::MvccStats;
use crate::OutgoingSnapshot;
use crate::RaftStorage;
use crate::RangeDescriptor;
use crate::RangefeedRetryReason;
use crate::ReadSummary;
use crate::ReplicaType;
use crate::Result;
use crate::SnapshotError;
use crate::SnapshotKind;
use crate::StateLoader;
use crate::StoreTestingKnobs;
use crate::Timestamp;
use crate::WriteBatch;
use crate::INVALID_LAST_TERM;
use crate::MERGED_TOMBSTONE_REPLICA_ID;
use crate::RAFT_INITIAL_LOG_INDEX;
use crate::RAFT_INITIAL_LOG_TERM;

fn stats(live_bytes: i64) -> MvccStats {
    MvccStats {
        live_bytes,
        ..Default::default()
    }
}

/// Store 1 holding `desc` as replica `replica_id`, with `kvs` written.
fn sender(
    desc: &RangeDescriptor,
    replica_id: u64,
    kvs: &[(&[u8], &[u8])],
) -> TestStore {
    let ts = test_store(1);
    ts.store.bootstrap_range(desc, replica_id, stats(7)).unwrap();
    put_keys(&ts.store, kvs);
    ts
}

fn snapshot_of(
    ts: &TestStore,
    range_id: u64,
    kind: SnapshotKind,
) -> OutgoingSnapshot {
    ts.store.get_replica(range_id).unwrap().get_snapshot(kind).unwrap()
}

fn expect_disconnect(reason: RangefeedRetryReason) -> Arc<MockRangefeedProcessor> {
    let mut processor = MockRangefeedProcessor::new();
    processor
        .expect_disconnect()
        .with(eq(reason))
        .times(1)
        .return_const(());
    Arc::new(processor)
}

#[test]
fn test_initial_snapshot_round_trip() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[(b"b", b"1"), (b"c", b"2")]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Initial);

    let dst = test_store(2);
    let repl = dst.store.create_uninitialized_replica(1, 2).unwrap();
    repl.set_rangefeed_processor(expect_disconnect(RangefeedRetryReason::RaftSnapshot));
    let placeholder = dst.store.reserve_snapshot(&desc).unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, Some(placeholder));
    let scratch_dir = in_snap.scratch.dir().to_path_buf();
    let hs = snapshot_hard_state(&outgoing);

    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, hs)
        .unwrap();

    assert!(repl.is_initialized());
    assert_eq!(repl.state(), outgoing.state);
    assert!(in_snap.placeholder.is_none());
    assert!(!scratch_dir.exists());
    assert!(!repl.has_rangefeed());

    let engine = dst.store.services().engine();
    assert_eq!(engine.get(b"b").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"c").unwrap(), Some(b"2".to_vec()));
    let loader = StateLoader::new(1);
    assert_eq!(loader.load_hard_state(engine.as_ref()).unwrap(), hs);
    assert_eq!(loader.load_raft_replica_id(engine.as_ref()).unwrap(), Some(2));

    let spans = dst.store.keyed_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].range_id, 1);
    assert!(!spans[0].placeholder);

    let metrics = dst.store.services().metrics();
    assert_eq!(metrics.placeholder_count.get(), 0);
    assert_eq!(metrics.range_snapshots_applied_for_initial_upreplication.get(), 1);
    assert_eq!(metrics.range_snapshots_applied_by_voters.get(), 0);
    assert!(metrics.range_snapshots_ingested_bytes.get() > 0);
    assert_eq!(metrics.live_bytes.get(), 7);
}

#[test]
fn test_applied_snapshot_resets_log_bookkeeping() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Initial);

    let dst = test_store(2);
    let repl = dst.store.create_uninitialized_replica(1, 2).unwrap();
    let placeholder = dst.store.reserve_snapshot(&desc).unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, Some(placeholder));
    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap();

    let raft_mu = repl.lock_raft_mu();
    {
        let mu = repl.read_mu();
        assert_eq!(mu.last_index(), RAFT_INITIAL_LOG_INDEX);
        assert_eq!(mu.last_term(), INVALID_LAST_TERM);
        assert_eq!(mu.raft_log_size(), 0);
        assert!(!mu.raft_log_size_trusted());

        let storage = repl.raft_storage(&raft_mu, &mu);
        assert_eq!(storage.first_index().unwrap(), RAFT_INITIAL_LOG_INDEX + 1);
        assert_eq!(storage.term(RAFT_INITIAL_LOG_INDEX).unwrap(), RAFT_INITIAL_LOG_TERM);
        assert!(storage.entries(RAFT_INITIAL_LOG_INDEX, 11, u64::MAX).unwrap_err().is_compacted());
    }

    // The log continues right after the snapshot.
    repl.append(&raft_mu, &EntryBuilder::batch(11, 13, 6, 4)).unwrap();
    let mu = repl.read_mu();
    assert_eq!(repl.raft_storage(&raft_mu, &mu).entries(11, 13, u64::MAX).unwrap().len(), 2);
}

#[test]
fn test_snapshot_subsumes_replicas() {
    enable_logger();
    let dst = test_store(2);
    let replicas = [(1, 1), (2, 2)];
    dst.store
        .bootstrap_range(&test_desc(1, b"a", b"b", &replicas), 2, stats(10))
        .unwrap();
    let r2 = dst
        .store
        .bootstrap_range(&test_desc(2, b"b", b"c", &replicas), 2, stats(10))
        .unwrap();
    let r3 = dst
        .store
        .bootstrap_range(&test_desc(3, b"c", b"d", &replicas), 2, stats(10))
        .unwrap();
    dst.store
        .bootstrap_range(&test_desc(4, b"d", b"e", &replicas), 2, stats(10))
        .unwrap();
    put_keys(&dst.store, &[(b"b1", b"x"), (b"c1", b"x"), (b"d1", b"kept")]);
    r2.set_rangefeed_processor(expect_disconnect(RangefeedRetryReason::ReplicaRemoved));

    let merged = test_desc(1, b"a", b"d", &replicas);
    let src = sender(&merged, 1, &[(b"a1", b"new"), (b"c2", b"new")]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Raft);
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap();

    let engine = dst.store.services().engine();
    assert_eq!(engine.get(b"a1").unwrap(), Some(b"new".to_vec()));
    assert_eq!(engine.get(b"c2").unwrap(), Some(b"new".to_vec()));
    assert!(engine.get(b"b1").unwrap().is_none());
    assert!(engine.get(b"c1").unwrap().is_none());
    assert_eq!(engine.get(b"d1").unwrap(), Some(b"kept".to_vec()));

    for (range_id, repl) in [(2, &r2), (3, &r3)] {
        assert!(dst.store.get_replica(range_id).is_none());
        assert_eq!(repl.read_mu().destroy_status(), DestroyReason::Removed);
        let loader = StateLoader::new(range_id);
        assert!(loader.load_range_applied_state(engine.as_ref()).unwrap().is_none());
        let tombstone = loader.load_range_tombstone(engine.as_ref()).unwrap();
        assert_eq!(tombstone.map(|t| t.next_replica_id), Some(MERGED_TOMBSTONE_REPLICA_ID));
    }
    assert!(!r2.has_rangefeed());

    let spans: Vec<(u64, bool)> = dst
        .store
        .keyed_spans()
        .iter()
        .map(|s| (s.range_id, s.placeholder))
        .collect();
    assert_eq!(spans, vec![(1, false), (4, false)]);
    assert_eq!(dst.store.get_replica(1).unwrap().desc(), merged);

    let metrics = dst.store.services().metrics();
    assert_eq!(metrics.replica_count.get(), 2);
    assert_eq!(metrics.placeholder_count.get(), 0);
    assert_eq!(metrics.range_snapshots_applied_by_voters.get(), 1);
    // r4 plus the snapshot's stats.
    assert_eq!(metrics.live_bytes.get(), 17);
}

#[test]
fn test_subsumed_span_past_the_end_is_cleared() {
    enable_logger();
    let dst = test_store(2);
    let replicas = [(1, 1), (2, 2)];
    dst.store
        .bootstrap_range(&test_desc(1, b"a", b"b", &replicas), 2, stats(0))
        .unwrap();
    dst.store
        .bootstrap_range(&test_desc(2, b"b", b"f", &replicas), 2, stats(0))
        .unwrap();
    put_keys(&dst.store, &[(b"c", b"x"), (b"e", b"x"), (b"g", b"kept")]);

    let src = sender(&test_desc(1, b"a", b"d", &replicas), 1, &[]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Raft);
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap();

    let engine = dst.store.services().engine();
    assert!(engine.get(b"c").unwrap().is_none());
    assert!(engine.get(b"e").unwrap().is_none());
    assert_eq!(engine.get(b"g").unwrap(), Some(b"kept".to_vec()));
    assert_eq!(dst.store.keyed_spans().len(), 1);
}

#[test]
fn test_subsuming_snapshot_applies_prior_read_summary() {
    enable_logger();
    let replicas = [(1, 1), (2, 2)];
    let dst = test_store(2);
    dst.store
        .bootstrap_range(&test_desc(1, b"a", b"b", &replicas), 2, stats(0))
        .unwrap();
    dst.store
        .bootstrap_range(&test_desc(2, b"b", b"c", &replicas), 2, stats(0))
        .unwrap();

    // The lease in the snapshot is held by the receiving replica.
    let merged = test_desc(1, b"a", b"c", &replicas);
    let src = sender(&merged, 2, &[]);
    let summary = ReadSummary {
        local: Timestamp::new(30, 0),
        global: Timestamp::new(40, 0),
    };
    let mut batch = WriteBatch::new();
    StateLoader::new(1).set_prior_read_summary(&mut batch, &summary).unwrap();
    src.store.services().engine().commit(batch).unwrap();

    let outgoing = snapshot_of(&src, 1, SnapshotKind::Raft);
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap();

    let ts_cache = dst.store.services().ts_cache();
    assert_eq!(ts_cache.get_max(b"a"), Timestamp::new(40, 0));
    assert_eq!(ts_cache.get_max(b"b5"), Timestamp::new(40, 0));
    assert_eq!(ts_cache.get_max(b"c"), Timestamp::default());
}

#[test]
fn test_snapshot_to_non_voter() {
    enable_logger();
    let mut desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    desc.internal_replicas[1].replica_type = ReplicaType::NonVoter;
    let dst = test_store(2);
    dst.store.bootstrap_range(&desc, 2, stats(0)).unwrap();

    let src = sender(&desc, 1, &[(b"k", b"v")]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Raft);
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap();

    let metrics = dst.store.services().metrics();
    assert_eq!(metrics.range_snapshots_applied_by_non_voters.get(), 1);
    assert_eq!(metrics.range_snapshots_applied_by_voters.get(), 0);
    assert_eq!(dst.store.services().engine().get(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_uninitialized_replica_requires_placeholder() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[(b"b", b"1")]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Initial);

    let dst = test_store(2);
    let repl = dst.store.create_uninitialized_replica(1, 2).unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    let err = dst
        .store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap_err();
    assert!(matches!(err, Error::Snapshot(SnapshotError::Rejected(_))));
    assert!(!repl.is_initialized());
    assert!(dst.store.services().engine().get(b"b").unwrap().is_none());
}

#[test]
fn test_placeholder_of_another_range_is_rejected() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Initial);

    let dst = test_store(2);
    dst.store.create_uninitialized_replica(1, 2).unwrap();
    let other = dst
        .store
        .reserve_snapshot(&test_desc(9, b"x", b"z", &[(2, 2)]))
        .unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, Some(other));
    let err = dst
        .store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Snapshot(SnapshotError::RangeMismatch { expected: 1, got: 9 })
    ));
}

#[test]
fn test_failure_before_ingestion_is_recoverable() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[(b"b", b"1")]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Initial);

    let knobs = StoreTestingKnobs {
        before_snapshot_sst_ingestion: Some(Arc::new(|in_snap: &IncomingSnapshot, ssts: &[PathBuf]| -> Result<()> {
            assert!(!ssts.is_empty());
            Err(SnapshotError::Rejected(format!("injected for r{}", in_snap.desc.range_id)).into())
        })),
        ..Default::default()
    };
    let dst = test_store_with_knobs(2, knobs);
    let repl = dst.store.create_uninitialized_replica(1, 2).unwrap();
    let placeholder = dst.store.reserve_snapshot(&desc).unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, Some(placeholder));

    let err = dst
        .store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing))
        .unwrap_err();
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("injected for r1"));
    assert!(!repl.is_initialized());
    assert!(dst.store.services().engine().get(b"b").unwrap().is_none());

    // The reservation survives and can be released.
    let placeholder = in_snap.placeholder.take().unwrap();
    dst.store.cancel_snapshot_reservation(&placeholder).unwrap();
    assert_eq!(dst.store.services().metrics().placeholder_count.get(), 0);
}

#[test]
#[should_panic(expected = "ingested: snapshot rejected: injected")]
fn test_failure_after_ingestion_is_fatal() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Initial);

    let knobs = StoreTestingKnobs {
        after_snapshot_sst_ingestion: Some(Arc::new(|_: &IncomingSnapshot| -> Result<()> {
            Err(SnapshotError::Rejected("injected".into()).into())
        })),
        ..Default::default()
    };
    let dst = test_store_with_knobs(2, knobs);
    dst.store.create_uninitialized_replica(1, 2).unwrap();
    let placeholder = dst.store.reserve_snapshot(&desc).unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, Some(placeholder));
    let _ = dst
        .store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing));
}

#[test]
#[should_panic(expected = "found empty HardState")]
fn test_empty_hard_state_is_fatal() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Raft);

    let dst = test_store(2);
    dst.store.bootstrap_range(&desc, 2, stats(0)).unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    let _ = dst
        .store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, HardState::default());
}

#[test]
#[should_panic(expected = "unexpected range ID 1 while applying snapshot to r2")]
fn test_range_id_mismatch_is_fatal() {
    enable_logger();
    let desc = test_desc(1, b"a", b"m", &[(1, 1), (2, 2)]);
    let src = sender(&desc, 1, &[]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Raft);

    let dst = test_store(2);
    let r2 = dst
        .store
        .bootstrap_range(&test_desc(2, b"x", b"z", &[(2, 2)]), 2, stats(0))
        .unwrap();
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    let mut raft_mu = r2.lock_raft_mu();
    let _ = r2.apply_snapshot(
        &dst.store,
        &mut raft_mu,
        &mut in_snap,
        &outgoing.raft_snap,
        snapshot_hard_state(&outgoing),
        &mut [],
    );
}

#[test]
#[should_panic(expected = "subsuming replica to our left")]
fn test_subsuming_to_the_left_is_fatal() {
    enable_logger();
    let replicas = [(1, 1), (2, 2)];
    let dst = test_store(2);
    dst.store
        .bootstrap_range(&test_desc(1, b"c", b"d", &replicas), 2, stats(0))
        .unwrap();
    dst.store
        .bootstrap_range(&test_desc(5, b"a", b"c", &replicas), 2, stats(0))
        .unwrap();

    let src = sender(&test_desc(1, b"b", b"d", &replicas), 1, &[]);
    let outgoing = snapshot_of(&src, 1, SnapshotKind::Raft);
    let mut in_snap = receive_snapshot(&outgoing, 1, &dst.store, None);
    let _ = dst
        .store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, snapshot_hard_state(&outgoing));
}
