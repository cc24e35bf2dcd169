use d_engine_replica::Entry;
use d_engine_replica::MvccStats;
use d_engine_replica::RaftStorage;
use d_engine_replica::Reader;
use d_engine_replica::SnapshotKind;

use crate::common::desc;
use crate::common::hard_state;
use crate::common::start_store;
use crate::common::transfer;
use crate::common::write_keys;
use crate::enable_logger;

#[test]
fn test_initial_snapshot_over_sled() {
    enable_logger();
    let src = start_store(1);
    let d = desc(1, b"a", b"z", &[(1, 1), (2, 2)]);
    let sender = src.store.bootstrap_range(&d, 1, MvccStats::default()).unwrap();
    let kvs: Vec<(Vec<u8>, Vec<u8>)> = (0..100u32)
        .map(|i| (format!("k{i:03}").into_bytes(), vec![i as u8; 16]))
        .collect();
    write_keys(&src.store, &kvs);
    {
        let raft_mu = sender.lock_raft_mu();
        let entries: Vec<Entry> = (11..31).map(|i| Entry::new(i, 6, vec![1u8; 32])).collect();
        sender.append(&raft_mu, &entries).unwrap();
    }

    let outgoing = sender.get_snapshot(SnapshotKind::Initial).unwrap();
    {
        // The open snapshot pins the log at its applied index.
        let raft_mu = sender.lock_raft_mu();
        assert_eq!(sender.truncate_log(&raft_mu, 20).unwrap(), 10);
    }

    let dst = start_store(2);
    let receiver = dst.store.create_uninitialized_replica(1, 2).unwrap();
    let placeholder = dst.store.reserve_snapshot(&d).unwrap();
    let mut in_snap = transfer(&outgoing, 1, &dst.store, Some(placeholder));
    assert!(in_snap.data_size > 0);
    let hs = hard_state(&outgoing);
    dst.store
        .apply_incoming_snapshot(&mut in_snap, &outgoing.raft_snap, hs)
        .unwrap();

    assert_eq!(receiver.state(), outgoing.state);
    let engine = dst.store.services().engine();
    for (k, v) in &kvs {
        assert_eq!(engine.get(k).unwrap().as_ref(), Some(v));
    }

    outgoing.close();
    {
        let raft_mu = sender.lock_raft_mu();
        assert_eq!(sender.truncate_log(&raft_mu, 20).unwrap(), 20);
    }

    let raft_mu = receiver.lock_raft_mu();
    receiver
        .append(&raft_mu, &[Entry::new(11, 6, b"next".to_vec())])
        .unwrap();
    let mu = receiver.read_mu();
    let storage = receiver.raft_storage(&raft_mu, &mu);
    assert_eq!(storage.first_index().unwrap(), 11);
    assert_eq!(storage.last_index().unwrap(), 11);
    assert_eq!(storage.initial_state().unwrap().hard_state, hs);
    assert_eq!(storage.entries(11, 12, u64::MAX).unwrap()[0].data.as_ref(), b"next");
}

#[test]
fn test_sideloaded_log_over_sled() {
    enable_logger();
    let ts = start_store(1);
    let d = desc(1, b"a", b"z", &[(1, 1)]);
    let repl = ts.store.bootstrap_range(&d, 1, MvccStats::default()).unwrap();
    let payload = vec![7u8; 4096];

    let raft_mu = repl.lock_raft_mu();
    repl.append(
        &raft_mu,
        &[
            Entry::new(11, 6, b"small".to_vec()),
            Entry::new_sideloaded(12, 6, payload.clone()),
        ],
    )
    .unwrap();
    ts.store.services().entry_cache().drop(1);

    {
        let mu = repl.read_mu();
        let ents = repl.raft_storage(&raft_mu, &mu).entries(11, 13, u64::MAX).unwrap();
        assert_eq!(ents.len(), 2);
        assert_eq!(ents[1].data.as_ref(), payload.as_slice());
    }

    let sideloaded_dir = raft_mu.sideloaded().unwrap().dir();
    assert!(sideloaded_dir.join("i12.t6").is_file());
    repl.truncate_log(&raft_mu, 12).unwrap();
    assert!(!sideloaded_dir.join("i12.t6").exists());
}
