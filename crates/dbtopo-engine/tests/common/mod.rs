//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use dbtopo_core::{ClusterId, InstanceAddr, SwitchParams};
use dbtopo_engine::{CreateClusterRequest, EntryClassifier, ReplicaPair, TopologyEngine};
use dbtopo_store::{
    Instance, InstanceKey, InstanceKind, InstanceRole, InstanceStatus, Machine, MachineType,
    StateStore, TopologyRead, epoch_secs,
};

pub const M1: &str = "10.0.0.1:30000";
pub const S1: &str = "10.0.0.2:30000";
pub const M2: &str = "10.0.0.3:30000";
pub const S2: &str = "10.0.0.4:30000";
pub const SPARE: &str = "10.0.0.5:30000";

pub fn addr(s: &str) -> InstanceAddr {
    let (ip, port) = s.split_once(':').unwrap();
    InstanceAddr::new(ip, port.parse().unwrap())
}

pub fn key(s: &str) -> InstanceKey {
    InstanceKey::new(0, &addr(s))
}

pub fn params(ejector: &str, receiver: &str) -> SwitchParams {
    SwitchParams {
        ejector: addr(ejector),
        receiver: addr(receiver),
    }
}

pub fn provision_storage(store: &StateStore, s: &str, role: InstanceRole) {
    let key = key(s);
    let machine = Machine {
        ip: key.ip.clone(),
        cloud_id: key.cloud_id,
        machine_type: MachineType::Storage,
        created_at: epoch_secs(),
    };
    store
        .write(|txn| {
            txn.put_machine(&machine)?;
            txn.put_instance(&Instance::provisioned(key, InstanceKind::Storage, role))
        })
        .unwrap();
}

pub fn set_status(store: &StateStore, s: &str, status: InstanceStatus) {
    store
        .write(|txn| {
            let mut instance = txn.get_instance(&key(s))?.unwrap();
            instance.status = status;
            txn.put_instance(&instance)
        })
        .unwrap();
}

pub struct Fixture {
    pub store: StateStore,
    pub engine: TopologyEngine,
    pub cluster_id: ClusterId,
}

/// Cluster `s` with M1 -> S1, created from the JSON an orchestrator would send.
pub fn single_pair() -> Fixture {
    let store = StateStore::open_in_memory().unwrap();
    provision_storage(&store, M1, InstanceRole::Master);
    provision_storage(&store, S1, InstanceRole::Slave);
    let engine = TopologyEngine::new(store.clone(), EntryClassifier::standard().unwrap());

    let req: CreateClusterRequest = serde_json::from_value(serde_json::json!({
        "bk_biz_id": 100,
        "name": "s",
        "immute_domain": "db.s.com",
        "cluster_type": "tendis_cache",
        "storages": [
            {"ip": "10.0.0.1", "port": 30000},
            {"ip": "10.0.0.2", "port": 30000}
        ],
        "pairs": [{
            "master": {"ip": "10.0.0.1", "port": 30000},
            "slave": {"ip": "10.0.0.2", "port": 30000}
        }],
        "entries": [
            {"name": "db.s.com"},
            {"name": "db-slave.s.com"}
        ]
    }))
    .unwrap();
    let cluster_id = engine.create_cluster(&req).unwrap();
    Fixture {
        store,
        engine,
        cluster_id,
    }
}

pub fn stage_pair(fx: &Fixture, master: &str, slave: &str) {
    provision_storage(&fx.store, master, InstanceRole::Master);
    provision_storage(&fx.store, slave, InstanceRole::Slave);
    fx.engine
        .attach_storages(
            fx.cluster_id,
            &[addr(master), addr(slave)],
            &[ReplicaPair {
                master: addr(master),
                slave: addr(slave),
            }],
        )
        .unwrap();
}

pub fn stage_spare(fx: &Fixture) {
    provision_storage(&fx.store, SPARE, InstanceRole::Slave);
    fx.engine
        .attach_storages(fx.cluster_id, &[addr(SPARE)], &[])
        .unwrap();
}
