use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use dbtopo_core::{CloudId, InstanceAddr};
use dbtopo_store::{
    Instance, InstanceKey, InstanceKind, InstanceRole, Machine, StateStore,
    StoreResult, TopologyRead, epoch_secs,
};

use super::emit;

/// One instance handed over by the provisioning collaborator.
#[derive(Debug, Deserialize)]
struct ProvisionedInstance {
    ip: String,
    port: u16,
    #[serde(default)]
    cloud_id: CloudId,
    kind: InstanceKind,
    role: InstanceRole,
}

#[derive(Debug, Deserialize)]
struct ProvisionSpec {
    instances: Vec<ProvisionedInstance>,
}

/// Write machine and instance rows. Existing instance rows are left alone.
fn register(store: &StateStore, spec: &ProvisionSpec) -> StoreResult<usize> {
    store.write(|txn| {
        let mut created = 0;
        for item in &spec.instances {
            if txn.get_machine(item.cloud_id, &item.ip)?.is_none() {
                txn.put_machine(&Machine {
                    ip: item.ip.clone(),
                    cloud_id: item.cloud_id,
                    machine_type: item.kind.machine_type(),
                    created_at: epoch_secs(),
                })?;
            }
            let key = InstanceKey::new(item.cloud_id, &InstanceAddr::new(item.ip.clone(), item.port));
            if txn.get_instance(&key)?.is_none() {
                txn.put_instance(&Instance::provisioned(key, item.kind, item.role))?;
                created += 1;
            }
        }
        Ok(created)
    })
}

pub fn provision(store: &StateStore, spec: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(spec)
        .with_context(|| format!("failed to read {}", spec.display()))?;
    let spec: ProvisionSpec = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in {}", spec.display()))?;
    let created = register(store, &spec)?;
    info!(created, total = spec.instances.len(), "instances provisioned");
    emit(&serde_json::json!({ "created": created, "total": spec.instances.len() }))
}

pub fn dump(store: &StateStore) -> anyhow::Result<()> {
    let mut out: BTreeMap<String, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
    for (table, rows) in store.dump()? {
        let mut decoded = BTreeMap::new();
        for (key, bytes) in rows {
            let value: serde_json::Value = serde_json::from_slice(&bytes)
                .with_context(|| format!("{table}/{key} is not JSON"))?;
            decoded.insert(key, value);
        }
        out.insert(table, decoded);
    }
    emit(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ProvisionSpec {
        serde_json::from_str(
            r#"{"instances": [
                {"ip": "10.0.0.1", "port": 30000, "kind": "storage", "role": "master"},
                {"ip": "10.0.0.1", "port": 30001, "kind": "storage", "role": "slave"},
                {"ip": "10.0.1.1", "port": 50000, "kind": "proxy", "role": "proxy"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn register_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(register(&store, &spec()).unwrap(), 3);
        assert_eq!(register(&store, &spec()).unwrap(), 0);

        let dump = store.dump().unwrap();
        assert_eq!(dump["machines"].len(), 2);
        assert_eq!(dump["instances"].len(), 3);
    }

    #[test]
    fn storage_roles_follow_provisioning() {
        let store = StateStore::open_in_memory().unwrap();
        register(&store, &spec()).unwrap();
        let master = store
            .read(|view| view.get_instance(&InstanceKey::new(0, &InstanceAddr::new("10.0.0.1", 30000))))
            .unwrap()
            .unwrap();
        assert!(master.is_master());
        assert!(master.is_running());
    }
}
