use std::path::Path;

use d_engine_replica::stage_outgoing_snapshot;
use d_engine_replica::Engine;
use d_engine_replica::EngineKind;
use d_engine_replica::HardState;
use d_engine_replica::IncomingSnapshot;
use d_engine_replica::OutgoingSnapshot;
use d_engine_replica::RangeDescriptor;
use d_engine_replica::ReplicaDescriptor;
use d_engine_replica::ReplicaPlaceholder;
use d_engine_replica::ReplicaType;
use d_engine_replica::Settings;
use d_engine_replica::Store;
use d_engine_replica::StoreBuilder;
use d_engine_replica::StoreId;
use d_engine_replica::WriteBatch;
use d_engine_replica::Writer;
use tempfile::TempDir;
use uuid::Uuid;

/// A sled-backed store living in its own temp dir.
pub struct TestStore {
    pub store: Store,
    pub dir: TempDir,
}

pub fn sled_settings(data_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.data_dir = data_dir.to_path_buf();
    settings.storage.engine = EngineKind::Sled;
    settings.storage.sled_cache_capacity = 1024 * 1024;
    settings
}

pub fn start_store(store_id: StoreId) -> TestStore {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = StoreBuilder::new(store_id, store_id, sled_settings(dir.path()))
        .build()
        .expect("build store");
    TestStore { store, dir }
}

/// Full voters, one per `(store_id, replica_id)`.
pub fn desc(
    range_id: u64,
    start: &[u8],
    end: &[u8],
    replicas: &[(StoreId, u64)],
) -> RangeDescriptor {
    RangeDescriptor {
        range_id,
        start_key: start.to_vec(),
        end_key: end.to_vec(),
        internal_replicas: replicas
            .iter()
            .map(|(store_id, replica_id)| ReplicaDescriptor {
                node_id: *store_id,
                store_id: *store_id,
                replica_id: *replica_id,
                replica_type: ReplicaType::VoterFull,
            })
            .collect(),
        next_replica_id: replicas.iter().map(|(_, r)| *r).max().unwrap_or(0) + 1,
        generation: 1,
    }
}

pub fn write_keys(
    store: &Store,
    kvs: &[(Vec<u8>, Vec<u8>)],
) {
    let mut batch = WriteBatch::new();
    for (k, v) in kvs {
        batch.put(k, v).expect("put");
    }
    store.services().engine().commit(batch).expect("commit");
}

/// Stages `outgoing` on `receiver`'s disk as the snapshot receiver would.
pub fn transfer(
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
    let from_replica = *desc.get_replica_descriptor(sender).expect("sender in descriptor");
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

pub fn hard_state(outgoing: &OutgoingSnapshot) -> HardState {
    HardState {
        term: outgoing.raft_snap.metadata.term,
        vote: 0,
        commit: outgoing.raft_snap.metadata.index,
    }
}
