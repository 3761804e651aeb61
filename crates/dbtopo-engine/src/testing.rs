//! Shared fixtures for the unit tests.

use dbtopo_core::{ClusterId, InstanceAddr, SwitchParams};
use dbtopo_store::{
    Instance, InstanceKey, InstanceKind, InstanceRole, InstanceStatus, Machine, StateStore,
    TopologyRead, epoch_secs,
};

use crate::classify::EntryClassifier;
use crate::engine::TopologyEngine;
use crate::lifecycle::{CreateClusterRequest, EntrySpec, ReplicaPair};

pub(crate) const M1: &str = "10.0.0.1:30000";
pub(crate) const S1: &str = "10.0.0.2:30000";
pub(crate) const M2: &str = "10.0.0.3:30000";
pub(crate) const S2: &str = "10.0.0.4:30000";
pub(crate) const SPARE: &str = "10.0.0.5:30000";
pub(crate) const P1: &str = "10.0.1.1:50000";

pub(crate) fn addr(s: &str) -> InstanceAddr {
    let (ip, port) = s.split_once(':').unwrap();
    InstanceAddr::new(ip, port.parse().unwrap())
}

pub(crate) fn key(s: &str) -> InstanceKey {
    InstanceKey::new(0, &addr(s))
}

pub(crate) fn params(ejector: &str, receiver: &str) -> SwitchParams {
    SwitchParams {
        ejector: addr(ejector),
        receiver: addr(receiver),
    }
}

fn provision(store: &StateStore, s: &str, kind: InstanceKind, role: InstanceRole) {
    let key = key(s);
    let machine = Machine {
        ip: key.ip.clone(),
        cloud_id: key.cloud_id,
        machine_type: kind.machine_type(),
        created_at: epoch_secs(),
    };
    store
        .write(|txn| {
            txn.put_machine(&machine)?;
            txn.put_instance(&Instance::provisioned(key, kind, role))
        })
        .unwrap();
}

pub(crate) fn provision_storage(store: &StateStore, s: &str, role: InstanceRole) {
    provision(store, s, InstanceKind::Storage, role);
}

pub(crate) fn provision_proxy(store: &StateStore, s: &str) {
    provision(store, s, InstanceKind::Proxy, InstanceRole::Proxy);
}

/// Rewrite an instance row directly, bypassing the engine.
fn patch(store: &StateStore, s: &str, f: impl FnOnce(&mut Instance)) {
    store
        .write(|txn| {
            let mut instance = txn.get_instance(&key(s))?.unwrap();
            f(&mut instance);
            txn.put_instance(&instance)
        })
        .unwrap();
}

pub(crate) fn set_status(store: &StateStore, s: &str, status: InstanceStatus) {
    patch(store, s, |i| i.status = status);
}

pub(crate) fn set_inner_master(store: &StateStore, s: &str) {
    patch(store, s, |i| {
        i.role = InstanceRole::Master;
        i.inner_role = Some(dbtopo_store::InnerRole::Master);
    });
}

pub(crate) fn engine(store: &StateStore) -> TopologyEngine {
    TopologyEngine::new(store.clone(), EntryClassifier::standard().unwrap())
}

pub(crate) fn request(
    name: &str,
    storages: &[&str],
    pairs: &[(&str, &str)],
    entries: &[&str],
) -> CreateClusterRequest {
    CreateClusterRequest {
        bk_biz_id: 100,
        name: name.to_string(),
        immute_domain: format!("{name}.db.com"),
        cluster_type: "tendis_cache".to_string(),
        cloud_id: 0,
        storages: storages.iter().map(|s| addr(s)).collect(),
        proxies: Vec::new(),
        pairs: pairs
            .iter()
            .map(|(m, s)| ReplicaPair {
                master: addr(m),
                slave: addr(s),
            })
            .collect(),
        entries: entries
            .iter()
            .map(|name| EntrySpec {
                name: name.to_string(),
                entry_type: Default::default(),
                role: None,
                bind: None,
            })
            .collect(),
    }
}

pub(crate) struct Fixture {
    pub store: StateStore,
    pub engine: TopologyEngine,
    pub cluster_id: ClusterId,
}

/// Cluster `s`: M1 replicating to S1, `db.s.com` on M1, `db-slave.s.com` on S1.
pub(crate) fn single_pair() -> Fixture {
    let store = StateStore::open_in_memory().unwrap();
    provision_storage(&store, M1, InstanceRole::Master);
    provision_storage(&store, S1, InstanceRole::Slave);
    let engine = engine(&store);
    let cluster_id = engine
        .create_cluster(&request(
            "s",
            &[M1, S1],
            &[(M1, S1)],
            &["db.s.com", "db-slave.s.com"],
        ))
        .unwrap();
    Fixture {
        store,
        engine,
        cluster_id,
    }
}

/// A second, unrelated cluster `t` built from M2/S2.
pub(crate) fn second_cluster(fx: &Fixture) -> ClusterId {
    provision_storage(&fx.store, M2, InstanceRole::Master);
    provision_storage(&fx.store, S2, InstanceRole::Slave);
    fx.engine
        .create_cluster(&request("t", &[M2, S2], &[(M2, S2)], &["db.t.com"]))
        .unwrap()
}

/// Provision `master`/`slave` and attach them to the fixture cluster as a
/// replicating pair.
pub(crate) fn stage_pair(fx: &Fixture, master: &str, slave: &str) {
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

/// Provision SPARE and attach it to the fixture cluster with no tuple.
pub(crate) fn stage_spare(fx: &Fixture) {
    provision_storage(&fx.store, SPARE, InstanceRole::Slave);
    fx.engine
        .attach_storages(fx.cluster_id, &[addr(SPARE)], &[])
        .unwrap();
}
