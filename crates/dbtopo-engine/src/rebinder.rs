//! Entry rebinder — moves the local record of which instances serve an
//! entry. Provider-side propagation (DNS, CLB) is the orchestrator's job.

use tracing::info;

use dbtopo_store::{
    Cluster, Entry, EntryRole, InstanceKey, TopologyRead, TopologyTxn, epoch_secs,
};

use crate::error::{EngineError, EngineResult};
use crate::precheck::load_instance;

/// Replace `from` with `to` in `entry`'s serving set.
///
/// The new member is added before the old one is removed, so the set is
/// never empty. Returns false, touching nothing, when `from` is not bound.
pub fn move_binding(
    txn: &mut TopologyTxn,
    cluster: &Cluster,
    entry: &mut Entry,
    from: &InstanceKey,
    to: &InstanceKey,
) -> EngineResult<bool> {
    if !entry.is_bound_to(from) || from == to {
        return Ok(false);
    }
    if entry.cluster_id != cluster.id {
        return Err(EngineError::Invariant(format!(
            "entry {} belongs to cluster {}, not {}",
            entry.name, entry.cluster_id, cluster.id
        )));
    }
    let target = load_instance(&*txn, to)?;
    if !cluster.has_member(to) || !target.belongs_to(cluster.id) {
        return Err(EngineError::Invariant(format!(
            "cannot bind {} to {to}: not a member of cluster {}",
            entry.name, cluster.id
        )));
    }
    if !target.is_running() {
        return Err(EngineError::Invariant(format!(
            "cannot bind {} to {to}: instance is not running",
            entry.name
        )));
    }

    entry.bindings.insert(to.clone());
    entry.bindings.remove(from);
    entry.updated_at = epoch_secs();
    txn.put_entry(entry)?;
    info!(entry = %entry.name, %from, %to, "entry rebound");
    Ok(true)
}

/// Move every entry of `cluster` that binds `from` and matches `filter`.
///
/// Returns the names of the entries that moved.
pub fn move_entries(
    txn: &mut TopologyTxn,
    cluster: &Cluster,
    from: &InstanceKey,
    to: &InstanceKey,
    filter: impl Fn(&Entry) -> bool,
) -> EngineResult<Vec<String>> {
    let mut moved = Vec::new();
    for mut entry in txn.entries_for(cluster.id, from)? {
        if !filter(&entry) {
            continue;
        }
        if move_binding(txn, cluster, &mut entry, from, to)? {
            moved.push(entry.name);
        }
    }
    Ok(moved)
}

/// Filter selecting entries that serve one side of a pair.
pub fn facing(role: EntryRole) -> impl Fn(&Entry) -> bool {
    move |entry| entry.role == role
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use dbtopo_store::{InstanceStatus, TopologyRead};

    #[test]
    fn moves_only_bound_entries() {
        let fx = single_pair();
        let moved = fx
            .store
            .write(|txn| {
                let cluster = crate::precheck::load_cluster(&*txn, fx.cluster_id)?;
                move_entries(txn, &cluster, &key(M1), &key(S1), |_| true)
            })
            .unwrap();
        assert_eq!(moved, vec!["db.s.com".to_string()]);

        let entry = fx
            .store
            .read(|view| view.get_entry(fx.cluster_id, "db.s.com"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.bindings.len(), 1);
        assert!(entry.is_bound_to(&key(S1)));
    }

    #[test]
    fn role_filter_limits_move() {
        let fx = single_pair();
        let moved = fx
            .store
            .write(|txn| {
                let cluster = crate::precheck::load_cluster(&*txn, fx.cluster_id)?;
                move_entries(txn, &cluster, &key(S1), &key(M1), facing(EntryRole::MasterFacing))
            })
            .unwrap();
        assert!(moved.is_empty());
    }

    #[test]
    fn target_must_be_running() {
        let fx = single_pair();
        set_status(&fx.store, S1, InstanceStatus::Unavailable);
        let before = fx.store.dump().unwrap();

        let err = fx
            .store
            .write(|txn| {
                let cluster = crate::precheck::load_cluster(&*txn, fx.cluster_id)?;
                move_entries(txn, &cluster, &key(M1), &key(S1), |_| true)
            })
            .unwrap_err();

        assert!(matches!(err, EngineError::Invariant(_)));
        assert_eq!(fx.store.dump().unwrap(), before);
    }

    #[test]
    fn target_must_be_member() {
        let fx = single_pair();
        provision_storage(&fx.store, SPARE, dbtopo_store::InstanceRole::Slave);
        let err = fx
            .store
            .write(|txn| {
                let cluster = crate::precheck::load_cluster(&*txn, fx.cluster_id)?;
                move_entries(txn, &cluster, &key(M1), &key(SPARE), |_| true)
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }
}
