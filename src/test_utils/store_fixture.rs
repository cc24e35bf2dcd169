use std::path::Path;

use tempfile::TempDir;
use uuid::Uuid;

use crate::stage_outgoing_snapshot;
use crate::EngineKind;
use crate::HardState;
use crate::IncomingSnapshot;
use crate::OutgoingSnapshot;
use crate::ReplicaPlaceholder;
use crate::Settings;
use crate::Store;
use crate::StoreBuilder;
use crate::StoreId;
use crate::StoreTestingKnobs;
use crate::WriteBatch;
use crate::Writer;

/// A store over a `MemEngine` whose scratch space lives in a temp dir.
pub struct TestStore {
    pub store: Store,
    pub dir: TempDir,
}

pub fn test_settings(data_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.data_dir = data_dir.to_path_buf();
    settings.storage.engine = EngineKind::Mem;
    settings
}

pub fn test_store(store_id: StoreId) -> TestStore {
    test_store_with_knobs(store_id, StoreTestingKnobs::default())
}

pub fn test_store_with_knobs(
    store_id: StoreId,
    knobs: StoreTestingKnobs,
) -> TestStore {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = StoreBuilder::new(store_id, store_id, test_settings(dir.path()))
        .knobs(knobs)
        .build()
        .expect("build store");
    TestStore { store, dir }
}

/// Writes user key/value pairs straight into the engine.
pub fn put_keys(
    store: &Store,
    kvs: &[(&[u8], &[u8])],
) {
    let mut batch = WriteBatch::new();
    for (k, v) in kvs {
        batch.put(k, v).expect("put");
    }
    store.services().engine().commit(batch).expect("commit");
}

/// Stages `outgoing` into a scratch space of `receiver`, the way the
/// snapshot receiver would.
pub fn receive_snapshot(
    outgoing: &OutgoingSnapshot,
    sender: StoreId,
    receiver: &Store,
    placeholder: Option<ReplicaPlaceholder>,
) -> IncomingSnapshot {
    let snap_id = Uuid::new_v4();
    let desc = outgoing.state.desc.clone();
    let mut scratch = receiver
        .services()
        .sst_snapshot_storage()
        .new_scratch(desc.range_id, snap_id);
    let data_size = stage_outgoing_snapshot(outgoing, &mut scratch).expect("stage snapshot");
    let from_replica = *desc
        .get_replica_descriptor(sender)
        .expect("sender in descriptor");
    IncomingSnapshot {
        snap_id,
        desc,
        data_size,
        scratch,
        from_replica,
        placeholder,
        kind: outgoing.kind,
    }
}

/// Hard state a follower would hold when receiving `outgoing`.
pub fn snapshot_hard_state(outgoing: &OutgoingSnapshot) -> HardState {
    HardState {
        term: outgoing.raft_snap.metadata.term,
        vote: 0,
        commit: outgoing.raft_snap.metadata.index,
    }
}
