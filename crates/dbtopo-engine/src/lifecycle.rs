//! Cluster lifecycle — wires a fresh topology together, tears one down, and
//! adjusts membership in between.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dbtopo_core::{CloudId, ClusterId, InstanceAddr};
use dbtopo_store::{
    Cluster, ClusterPhase, ClusterStatus, Entry, EntryRole, EntryType, InnerRole, Instance,
    InstanceKey, InstanceKind, InstanceRole, InstanceStatus, TopologyRead, TopologyTxn, Tuple,
    epoch_secs,
};

use crate::audit::{audit, verify};
use crate::classify::EntryClassifier;
use crate::error::{EngineError, EngineResult};
use crate::precheck::{load_cluster, load_instance, tuple_for};

/// One initial replication edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaPair {
    pub master: InstanceAddr,
    pub slave: InstanceAddr,
}

/// An entry to create with the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub name: String,
    #[serde(default)]
    pub entry_type: EntryType,
    /// Overrides name-based classification when set.
    #[serde(default)]
    pub role: Option<EntryRole>,
    /// Explicit serving set. Defaults to the proxies, or to the pair side
    /// matching the entry's role when the cluster has no proxies.
    #[serde(default)]
    pub bind: Option<Vec<InstanceAddr>>,
}

/// Everything needed to create a cluster from provisioned instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub bk_biz_id: u64,
    pub name: String,
    pub immute_domain: String,
    pub cluster_type: String,
    #[serde(default)]
    pub cloud_id: CloudId,
    pub storages: Vec<InstanceAddr>,
    #[serde(default)]
    pub proxies: Vec<InstanceAddr>,
    #[serde(default)]
    pub pairs: Vec<ReplicaPair>,
    #[serde(default)]
    pub entries: Vec<EntrySpec>,
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidRequest(msg.into())
}

/// Reject duplicate addresses and pairs that would break the tuple rules.
fn validate_request(req: &CreateClusterRequest) -> EngineResult<()> {
    if req.name.is_empty() || req.immute_domain.is_empty() || req.cluster_type.is_empty() {
        return Err(invalid("name, immute_domain and cluster_type are required"));
    }
    if req.storages.is_empty() {
        return Err(invalid("a cluster needs at least one storage instance"));
    }

    let mut seen = BTreeSet::new();
    for addr in req.storages.iter().chain(&req.proxies) {
        if !seen.insert(addr) {
            return Err(invalid(format!("{addr} listed more than once")));
        }
    }
    validate_pairs(&req.pairs, |addr| req.storages.contains(addr))?;

    let mut names = BTreeSet::new();
    for entry in &req.entries {
        if entry.name.is_empty() {
            return Err(invalid("entry name must not be empty"));
        }
        if !names.insert(entry.name.as_str()) {
            return Err(invalid(format!("entry {} listed more than once", entry.name)));
        }
    }
    Ok(())
}

fn validate_pairs(
    pairs: &[ReplicaPair],
    is_storage: impl Fn(&InstanceAddr) -> bool,
) -> EngineResult<()> {
    let mut masters = BTreeSet::new();
    let mut slaves = BTreeSet::new();
    for pair in pairs {
        if pair.master == pair.slave {
            return Err(invalid(format!("{} cannot replicate from itself", pair.master)));
        }
        for addr in [&pair.master, &pair.slave] {
            if !is_storage(addr) {
                return Err(invalid(format!("pair member {addr} is not a listed storage")));
            }
        }
        if !masters.insert(&pair.master) {
            return Err(invalid(format!("{} feeds more than one slave", pair.master)));
        }
        if !slaves.insert(&pair.slave) {
            return Err(invalid(format!("{} has more than one master", pair.slave)));
        }
    }
    if let Some(addr) = masters.intersection(&slaves).next() {
        return Err(invalid(format!(
            "{addr} is both a master and a slave; chained replication is not supported"
        )));
    }
    Ok(())
}

/// Load a provisioned instance of `kind`, failing with `NotFound` if the
/// provisioning collaborator never registered it.
fn load_provisioned(
    txn: &TopologyTxn,
    key: &InstanceKey,
    kind: InstanceKind,
) -> EngineResult<Instance> {
    let machine = txn
        .get_machine(key.cloud_id, &key.ip)?
        .ok_or_else(|| EngineError::NotFound(format!("machine {}/{}", key.cloud_id, key.ip)))?;
    if machine.machine_type != kind.machine_type() {
        return Err(invalid(format!(
            "{key} is on a {:?} machine, expected {:?}",
            machine.machine_type,
            kind.machine_type()
        )));
    }
    let instance = txn
        .get_instance(key)?
        .ok_or_else(|| EngineError::NotFound(format!("instance {key}")))?;
    if instance.kind != kind {
        return Err(invalid(format!("{key} is not a {kind:?} instance")));
    }
    Ok(instance)
}

/// ABNORMAL while an endpoint of one of the cluster's tuples is UNAVAILABLE.
pub(crate) fn derive_status(
    read: &impl TopologyRead,
    cluster: &Cluster,
) -> EngineResult<ClusterStatus> {
    for key in &cluster.storages {
        let Some(instance) = read.get_instance(key)? else {
            continue;
        };
        if instance.status != InstanceStatus::Unavailable {
            continue;
        }
        let mut edges = read.tuples_from(key)?;
        edges.extend(read.tuples_to(key)?);
        if edges.iter().any(|t| t.cluster_id == cluster.id) {
            return Ok(ClusterStatus::Abnormal);
        }
    }
    Ok(ClusterStatus::Normal)
}

/// Recompute the cluster status and store it when it changed.
pub(crate) fn refresh_status(txn: &mut TopologyTxn, cluster: &mut Cluster) -> EngineResult<()> {
    let status = derive_status(&*txn, cluster)?;
    if cluster.status != status {
        info!(cluster_id = cluster.id, ?status, "cluster status changed");
        cluster.status = status;
        cluster.updated_at = epoch_secs();
        txn.put_cluster(cluster)?;
    }
    Ok(())
}

/// Storage roles are cluster-scoped, so a storage joins at most one cluster.
fn ensure_unclaimed(instance: &Instance) -> EngineResult<()> {
    match instance.clusters.first() {
        Some(other) => Err(invalid(format!(
            "{} already belongs to cluster {other}",
            instance.key
        ))),
        None => Ok(()),
    }
}

fn set_pair_role(instance: &mut Instance, role: InstanceRole) {
    instance.inner_role = Some(match role {
        InstanceRole::Master => InnerRole::Master,
        _ => InnerRole::Slave,
    });
    instance.role = role;
}

fn join(instance: &mut Instance, cluster: &Cluster) {
    instance.clusters.insert(cluster.id);
    instance.cluster_type = Some(cluster.cluster_type.clone());
    instance.updated_at = epoch_secs();
}

fn leave(instance: &mut Instance, cluster_id: ClusterId) {
    instance.clusters.remove(&cluster_id);
    if instance.clusters.is_empty() {
        instance.cluster_type = None;
    }
    instance.updated_at = epoch_secs();
}

/// Create a cluster and everything it owns in the caller's transaction.
pub fn create(
    txn: &mut TopologyTxn,
    classifier: &EntryClassifier,
    req: &CreateClusterRequest,
) -> EngineResult<ClusterId> {
    validate_request(req)?;
    if let Some(id) = txn.cluster_id_by_name(req.bk_biz_id, &req.name)? {
        return Err(invalid(format!(
            "cluster {}/{} already exists with id {id}",
            req.bk_biz_id, req.name
        )));
    }
    if let Some(id) = txn.cluster_id_by_domain(&req.immute_domain)? {
        return Err(invalid(format!(
            "domain {} already belongs to cluster {id}",
            req.immute_domain
        )));
    }

    let key_of = |addr: &InstanceAddr| InstanceKey::new(req.cloud_id, addr);
    let mut storages = BTreeMap::new();
    for addr in &req.storages {
        let key = key_of(addr);
        let instance = load_provisioned(txn, &key, InstanceKind::Storage)?;
        ensure_unclaimed(&instance)?;
        storages.insert(key, instance);
    }
    let mut proxies = BTreeMap::new();
    for addr in &req.proxies {
        let key = key_of(addr);
        proxies.insert(key.clone(), load_provisioned(txn, &key, InstanceKind::Proxy)?);
    }

    let now = epoch_secs();
    let cluster = Cluster {
        id: txn.next_cluster_id()?,
        bk_biz_id: req.bk_biz_id,
        name: req.name.clone(),
        immute_domain: req.immute_domain.clone(),
        cluster_type: req.cluster_type.clone(),
        cloud_id: req.cloud_id,
        phase: ClusterPhase::Online,
        status: ClusterStatus::Normal,
        storages: storages.keys().cloned().collect(),
        proxies: proxies.keys().cloned().collect(),
        created_at: now,
        updated_at: now,
    };

    let mut masters = BTreeSet::new();
    let mut slaves = BTreeSet::new();
    for pair in &req.pairs {
        masters.insert(key_of(&pair.master));
        slaves.insert(key_of(&pair.slave));
    }
    for (key, instance) in storages.iter_mut() {
        if masters.contains(key) {
            set_pair_role(instance, InstanceRole::Master);
        } else if slaves.contains(key) {
            set_pair_role(instance, InstanceRole::Slave);
        } else {
            let role = instance.role;
            set_pair_role(instance, role);
        }
        join(instance, &cluster);
        txn.put_instance(instance)?;
    }
    for instance in proxies.values_mut() {
        join(instance, &cluster);
        txn.put_instance(instance)?;
    }
    txn.put_cluster(&cluster)?;

    for pair in &req.pairs {
        txn.put_tuple(&Tuple::new(cluster.id, key_of(&pair.master), key_of(&pair.slave)))?;
    }

    // Storages outside any pair still count as master-serving when flagged so.
    let mut serving_masters = masters.clone();
    serving_masters.extend(
        storages
            .values()
            .filter(|i| i.is_master() && !slaves.contains(&i.key))
            .map(|i| i.key.clone()),
    );
    for spec in &req.entries {
        let role = classifier.resolve(&spec.name, spec.role);
        let bindings: BTreeSet<InstanceKey> = match &spec.bind {
            Some(addrs) => addrs.iter().map(key_of).collect(),
            None if !cluster.proxies.is_empty() => cluster.proxies.clone(),
            None => match role {
                EntryRole::MasterFacing => serving_masters.clone(),
                EntryRole::SlaveFacing => slaves.clone(),
            },
        };
        if bindings.is_empty() {
            return Err(invalid(format!("entry {} would have no bindings", spec.name)));
        }
        if let Some(outsider) = bindings.iter().find(|k| !cluster.has_member(k)) {
            return Err(invalid(format!(
                "entry {} binds {outsider}, which is not a member",
                spec.name
            )));
        }
        txn.put_entry(&Entry {
            cluster_id: cluster.id,
            name: spec.name.clone(),
            entry_type: spec.entry_type,
            role,
            bindings,
            created_at: now,
            updated_at: now,
        })?;
        debug!(entry = %spec.name, ?role, "entry created");
    }

    let violations = audit(&*txn, cluster.id)?;
    if !violations.is_empty() {
        let detail: Vec<String> = violations.iter().map(ToString::to_string).collect();
        return Err(invalid(detail.join("; ")));
    }

    info!(
        cluster_id = cluster.id,
        name = %cluster.name,
        storages = cluster.storages.len(),
        proxies = cluster.proxies.len(),
        "cluster created"
    );
    Ok(cluster.id)
}

/// Remove a cluster and everything it owns. Returns false if it was
/// already gone.
pub fn decommission(txn: &mut TopologyTxn, cluster_id: ClusterId) -> EngineResult<bool> {
    let Some(cluster) = txn.get_cluster(cluster_id)? else {
        debug!(cluster_id, "cluster already decommissioned");
        return Ok(false);
    };

    for entry in txn.entries_of(cluster_id)? {
        txn.delete_entry(cluster_id, &entry.name)?;
    }

    let mut tuples = Vec::new();
    for key in &cluster.storages {
        tuples.extend(txn.tuples_from(key)?);
        tuples.extend(txn.tuples_to(key)?);
    }
    for tuple in tuples.iter().filter(|t| t.cluster_id == cluster_id) {
        txn.delete_tuple(tuple)?;
    }

    for key in cluster.storages.iter().chain(&cluster.proxies) {
        match txn.get_instance(key)? {
            Some(mut instance) => {
                leave(&mut instance, cluster_id);
                txn.put_instance(&instance)?;
            }
            None => warn!(cluster_id, instance = %key, "member row already gone"),
        }
    }

    txn.delete_cluster(&cluster)?;
    info!(cluster_id, name = %cluster.name, "cluster decommissioned");
    Ok(true)
}

/// Add provisioned storages to a cluster, optionally wiring replica pairs
/// among its storages.
pub fn attach_storages(
    txn: &mut TopologyTxn,
    cluster_id: ClusterId,
    addrs: &[InstanceAddr],
    pairs: &[ReplicaPair],
) -> EngineResult<Cluster> {
    let mut cluster = load_cluster(&*txn, cluster_id)?;
    for addr in addrs {
        let key = cluster.instance_key(addr);
        if cluster.has_storage(&key) {
            continue;
        }
        let mut instance = load_provisioned(txn, &key, InstanceKind::Storage)?;
        ensure_unclaimed(&instance)?;
        join(&mut instance, &cluster);
        txn.put_instance(&instance)?;
        cluster.storages.insert(key);
    }

    validate_pairs(pairs, |addr| cluster.has_storage(&cluster.instance_key(addr)))?;
    let mut touched = Vec::new();
    for pair in pairs {
        let master = cluster.instance_key(&pair.master);
        let slave = cluster.instance_key(&pair.slave);
        if tuple_for(&*txn, cluster_id, &master)?.is_some() {
            return Err(invalid(format!("{master} already feeds a slave")));
        }
        if txn.tuples_to(&slave)?.iter().any(|t| t.cluster_id == cluster_id) {
            return Err(invalid(format!("{slave} already has a master")));
        }
        for (key, role) in [(&master, InstanceRole::Master), (&slave, InstanceRole::Slave)] {
            let mut instance = load_instance(&*txn, key)?;
            set_pair_role(&mut instance, role);
            instance.updated_at = epoch_secs();
            txn.put_instance(&instance)?;
        }
        txn.put_tuple(&Tuple::new(cluster_id, master.clone(), slave.clone()))?;
        touched.push(master);
        touched.push(slave);
    }

    cluster.status = derive_status(&*txn, &cluster)?;
    cluster.updated_at = epoch_secs();
    txn.put_cluster(&cluster)?;
    let touched: Vec<&InstanceKey> = touched.iter().collect();
    verify(&*txn, cluster_id, &touched)?;
    info!(cluster_id, attached = addrs.len(), pairs = pairs.len(), "storages attached");
    Ok(cluster)
}

/// Add provisioned proxies to a cluster. Proxies may serve several clusters.
pub fn attach_proxies(
    txn: &mut TopologyTxn,
    cluster_id: ClusterId,
    addrs: &[InstanceAddr],
) -> EngineResult<Cluster> {
    let mut cluster = load_cluster(&*txn, cluster_id)?;
    for addr in addrs {
        let key = cluster.instance_key(addr);
        if cluster.proxies.contains(&key) {
            continue;
        }
        let mut instance = load_provisioned(txn, &key, InstanceKind::Proxy)?;
        join(&mut instance, &cluster);
        txn.put_instance(&instance)?;
        cluster.proxies.insert(key);
    }
    cluster.updated_at = epoch_secs();
    txn.put_cluster(&cluster)?;
    info!(cluster_id, attached = addrs.len(), "proxies attached");
    Ok(cluster)
}

/// Remove instances from a cluster.
///
/// An instance still bound to an entry is rejected. A tuple endpoint is
/// rejected unless the other endpoint is detached in the same call, in
/// which case the tuple goes with them.
pub fn detach_instances(
    txn: &mut TopologyTxn,
    cluster_id: ClusterId,
    addrs: &[InstanceAddr],
) -> EngineResult<Cluster> {
    let mut cluster = load_cluster(&*txn, cluster_id)?;
    let keys: BTreeSet<InstanceKey> = addrs.iter().map(|a| cluster.instance_key(a)).collect();

    let mut doomed = Vec::new();
    for key in &keys {
        if !cluster.has_member(key) {
            return Err(invalid(format!("{key} is not a member of cluster {cluster_id}")));
        }
        if let Some(entry) = txn.entries_for(cluster_id, key)?.first() {
            return Err(invalid(format!("{key} is still bound to entry {}", entry.name)));
        }
        let mut edges = txn.tuples_from(key)?;
        edges.extend(txn.tuples_to(key)?);
        for tuple in edges.into_iter().filter(|t| t.cluster_id == cluster_id) {
            let other = if &tuple.ejector == key {
                &tuple.receiver
            } else {
                &tuple.ejector
            };
            if !keys.contains(other) {
                return Err(invalid(format!(
                    "{key} still replicates with {other}; detach both together"
                )));
            }
            if !doomed.contains(&tuple) {
                doomed.push(tuple);
            }
        }
    }

    for tuple in &doomed {
        txn.delete_tuple(tuple)?;
    }
    for key in &keys {
        let mut instance = load_instance(&*txn, key)?;
        leave(&mut instance, cluster_id);
        txn.put_instance(&instance)?;
        cluster.storages.remove(key);
        cluster.proxies.remove(key);
    }
    cluster.status = derive_status(&*txn, &cluster)?;
    cluster.updated_at = epoch_secs();
    txn.put_cluster(&cluster)?;
    info!(cluster_id, detached = keys.len(), tuples = doomed.len(), status = ?cluster.status, "instances detached");
    Ok(cluster)
}

/// Toggle a cluster ONLINE or OFFLINE.
pub fn set_phase(
    txn: &mut TopologyTxn,
    cluster_id: ClusterId,
    phase: ClusterPhase,
) -> EngineResult<Cluster> {
    let mut cluster = load_cluster(&*txn, cluster_id)?;
    if cluster.phase != phase {
        cluster.phase = phase;
        cluster.updated_at = epoch_secs();
        txn.put_cluster(&cluster)?;
        info!(cluster_id, ?phase, "cluster phase changed");
    }
    Ok(cluster)
}
