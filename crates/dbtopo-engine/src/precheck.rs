//! Precheck — decides whether a switch request is legal for the current
//! topology. Nothing here writes; every function takes any
//! [`TopologyRead`] so it runs the same against a snapshot or inside the
//! transaction that will perform the mutation.

use dbtopo_core::{ClusterId, InstanceAddr, SwitchParams};
use dbtopo_store::{Cluster, Instance, InstanceKey, StoreError, TopologyRead, Tuple};

use crate::error::{EngineError, EngineResult, Precondition};

/// Instances a switch request resolved to.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub cluster: Cluster,
    pub ejector: Instance,
    pub receiver: Instance,
}

/// Load a cluster row or fail with `NotFound`.
pub fn load_cluster(read: &impl TopologyRead, cluster_id: ClusterId) -> EngineResult<Cluster> {
    read.get_cluster(cluster_id)?
        .ok_or_else(|| EngineError::NotFound(format!("cluster {cluster_id}")))
}

/// Load an instance the caller already knows is referenced.
pub fn load_instance(read: &impl TopologyRead, key: &InstanceKey) -> EngineResult<Instance> {
    read.get_instance(key)?
        .ok_or_else(|| StoreError::Dangling(format!("instance {}", key.table_key())).into())
}

/// Resolve the ejector: a storage member of `cluster` whose inner role is MASTER.
pub fn resolve_ejector(
    read: &impl TopologyRead,
    cluster: &Cluster,
    addr: &InstanceAddr,
) -> EngineResult<Instance> {
    let not_master = || Precondition::NotMasterInCluster {
        cluster_id: cluster.id,
        addr: addr.clone(),
    };
    let key = cluster.instance_key(addr);
    if !cluster.has_storage(&key) {
        return Err(not_master().into());
    }
    let instance = load_instance(read, &key)?;
    if !instance.is_storage() || !instance.is_master() || !instance.belongs_to(cluster.id) {
        return Err(not_master().into());
    }
    Ok(instance)
}

/// Resolve the receiver: any storage member of `cluster`.
pub fn resolve_receiver(
    read: &impl TopologyRead,
    cluster: &Cluster,
    addr: &InstanceAddr,
) -> EngineResult<Instance> {
    let not_member = || Precondition::ReceiverNotInCluster {
        cluster_id: cluster.id,
        addr: addr.clone(),
    };
    let key = cluster.instance_key(addr);
    if !cluster.has_storage(&key) {
        return Err(not_member().into());
    }
    let instance = load_instance(read, &key)?;
    if !instance.is_storage() || !instance.belongs_to(cluster.id) {
        return Err(not_member().into());
    }
    Ok(instance)
}

/// Common validation shared by every switchover operation.
pub fn precheck(
    read: &impl TopologyRead,
    cluster_id: ClusterId,
    params: &SwitchParams,
) -> EngineResult<Resolved> {
    let cluster = load_cluster(read, cluster_id)?;
    if params.ejector == params.receiver {
        return Err(EngineError::InvalidRequest(format!(
            "ejector and receiver are both {}",
            params.ejector
        )));
    }
    let ejector = resolve_ejector(read, &cluster, &params.ejector)?;
    let receiver = resolve_receiver(read, &cluster, &params.receiver)?;
    Ok(Resolved {
        cluster,
        ejector,
        receiver,
    })
}

/// The single outgoing tuple of `ejector` inside `cluster_id`, if any.
///
/// More than one is an invariant violation.
pub fn tuple_for(
    read: &impl TopologyRead,
    cluster_id: ClusterId,
    ejector: &InstanceKey,
) -> EngineResult<Option<Tuple>> {
    let mut tuples: Vec<Tuple> = read
        .tuples_from(ejector)?
        .into_iter()
        .filter(|t| t.cluster_id == cluster_id)
        .collect();
    match tuples.len() {
        0 => Ok(None),
        1 => Ok(tuples.pop()),
        n => Err(EngineError::Invariant(format!(
            "{n} active tuples found for ejector {ejector} in cluster {cluster_id}"
        ))),
    }
}

/// The tuple feeding `receiver` inside `cluster_id`, if any.
pub fn feeding_tuple(
    read: &impl TopologyRead,
    cluster_id: ClusterId,
    receiver: &InstanceKey,
) -> EngineResult<Option<Tuple>> {
    let mut tuples: Vec<Tuple> = read
        .tuples_to(receiver)?
        .into_iter()
        .filter(|t| t.cluster_id == cluster_id)
        .collect();
    match tuples.len() {
        0 => Ok(None),
        1 => Ok(tuples.pop()),
        n => Err(EngineError::Invariant(format!(
            "{n} tuples feed receiver {receiver} in cluster {cluster_id}"
        ))),
    }
}
