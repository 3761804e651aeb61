//! Topology audit — read-only invariant checks over one cluster.
//!
//! Switchover operations call [`verify`] on the instances they touched
//! before committing; [`audit`] reports every violation in a cluster.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::error;

use dbtopo_core::ClusterId;
use dbtopo_store::{Instance, InstanceKey, TopologyRead, Topology, Tuple};

use crate::error::{EngineError, EngineResult};
use crate::precheck::{load_cluster, load_instance};

/// A broken topology invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Tuple endpoints do not hold MASTER → SLAVE inner roles.
    TupleRoles {
        ejector: InstanceKey,
        receiver: InstanceKey,
    },
    /// An ejector feeds more than one receiver.
    MultipleTuples { ejector: InstanceKey, count: usize },
    /// An entry serves nobody.
    EmptyEntry { entry: String },
    /// An entry binds an instance outside the cluster.
    EntryBindsNonMember { entry: String, instance: InstanceKey },
    /// An entry binds an instance that is not running.
    EntryBindsUnavailable { entry: String, instance: InstanceKey },
    /// A replication group does not have exactly one master.
    GroupMasters {
        members: Vec<InstanceKey>,
        masters: usize,
    },
}

impl Violation {
    /// Check if `key` is one of the instances this violation is about.
    pub fn involves(&self, key: &InstanceKey) -> bool {
        match self {
            Violation::TupleRoles { ejector, receiver } => ejector == key || receiver == key,
            Violation::MultipleTuples { ejector, .. } => ejector == key,
            Violation::EmptyEntry { .. } => false,
            Violation::EntryBindsNonMember { instance, .. }
            | Violation::EntryBindsUnavailable { instance, .. } => instance == key,
            Violation::GroupMasters { members, .. } => members.contains(key),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::TupleRoles { ejector, receiver } => {
                write!(f, "tuple {ejector} -> {receiver} is not master -> slave")
            }
            Violation::MultipleTuples { ejector, count } => {
                write!(f, "{ejector} has {count} outgoing tuples")
            }
            Violation::EmptyEntry { entry } => write!(f, "entry {entry} has no bindings"),
            Violation::EntryBindsNonMember { entry, instance } => {
                write!(f, "entry {entry} binds non-member {instance}")
            }
            Violation::EntryBindsUnavailable { entry, instance } => {
                write!(f, "entry {entry} binds unavailable {instance}")
            }
            Violation::GroupMasters { members, masters } => {
                let names: Vec<String> = members.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "replication group [{}] has {masters} masters",
                    names.join(", ")
                )
            }
        }
    }
}

/// Report every invariant violation in `cluster_id`.
pub fn audit(read: &impl TopologyRead, cluster_id: ClusterId) -> EngineResult<Vec<Violation>> {
    load_cluster(read, cluster_id)?;
    let topology = read
        .topology(cluster_id)?
        .ok_or_else(|| EngineError::NotFound(format!("cluster {cluster_id}")))?;
    check(read, &topology)
}

/// Fail with `Invariant` if any violation involves one of `touched`.
///
/// Violations elsewhere in the cluster predate the operation and are left
/// for [`audit`] to report.
pub fn verify(
    read: &impl TopologyRead,
    cluster_id: ClusterId,
    touched: &[&InstanceKey],
) -> EngineResult<()> {
    let relevant: Vec<Violation> = audit(read, cluster_id)?
        .into_iter()
        .filter(|v| match v {
            Violation::EmptyEntry { .. } => true,
            _ => touched.iter().any(|key| v.involves(key)),
        })
        .collect();
    if relevant.is_empty() {
        return Ok(());
    }
    let detail: Vec<String> = relevant.iter().map(ToString::to_string).collect();
    error!(cluster_id, violations = %detail.join("; "), "topology invariant violated");
    Err(EngineError::Invariant(detail.join("; ")))
}

fn check(read: &impl TopologyRead, topology: &Topology) -> EngineResult<Vec<Violation>> {
    let cluster = &topology.cluster;
    let mut violations = Vec::new();

    // Tuple endpoints may have been detached from membership, so load any
    // instance the topology itself did not return.
    let mut instances: BTreeMap<InstanceKey, Instance> = topology
        .storages
        .iter()
        .chain(&topology.proxies)
        .map(|i| (i.key.clone(), i.clone()))
        .collect();
    for tuple in &topology.tuples {
        if !instances.contains_key(&tuple.receiver) {
            let receiver = load_instance(read, &tuple.receiver)?;
            instances.insert(receiver.key.clone(), receiver);
        }
    }

    let mut outgoing: BTreeMap<&InstanceKey, usize> = BTreeMap::new();
    for tuple in &topology.tuples {
        *outgoing.entry(&tuple.ejector).or_default() += 1;
        let ejector_ok = instances.get(&tuple.ejector).is_some_and(Instance::is_master);
        let receiver_ok = instances.get(&tuple.receiver).is_some_and(Instance::is_slave);
        if !ejector_ok || !receiver_ok {
            violations.push(Violation::TupleRoles {
                ejector: tuple.ejector.clone(),
                receiver: tuple.receiver.clone(),
            });
        }
    }
    for (ejector, count) in outgoing {
        if count > 1 {
            violations.push(Violation::MultipleTuples {
                ejector: ejector.clone(),
                count,
            });
        }
    }

    for entry in &topology.entries {
        if entry.bindings.is_empty() {
            violations.push(Violation::EmptyEntry {
                entry: entry.name.clone(),
            });
        }
        for key in &entry.bindings {
            match instances.get(key) {
                Some(instance) if cluster.has_member(key) && instance.belongs_to(cluster.id) => {
                    if !instance.is_running() {
                        violations.push(Violation::EntryBindsUnavailable {
                            entry: entry.name.clone(),
                            instance: key.clone(),
                        });
                    }
                }
                _ => violations.push(Violation::EntryBindsNonMember {
                    entry: entry.name.clone(),
                    instance: key.clone(),
                }),
            }
        }
    }

    for members in replication_groups(&topology.tuples) {
        let masters = members
            .iter()
            .filter(|key| instances.get(*key).is_some_and(Instance::is_master))
            .count();
        if masters != 1 {
            violations.push(Violation::GroupMasters {
                members: members.into_iter().collect(),
                masters,
            });
        }
    }

    Ok(violations)
}

/// Connected components of the tuple graph.
fn replication_groups(tuples: &[Tuple]) -> Vec<BTreeSet<InstanceKey>> {
    let mut groups: Vec<BTreeSet<InstanceKey>> = Vec::new();
    for tuple in tuples {
        let touching: Vec<usize> = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.contains(&tuple.ejector) || g.contains(&tuple.receiver))
            .map(|(idx, _)| idx)
            .collect();
        let mut merged = BTreeSet::from([tuple.ejector.clone(), tuple.receiver.clone()]);
        // Remove back to front so earlier indexes stay valid.
        for idx in touching.into_iter().rev() {
            merged.extend(groups.swap_remove(idx));
        }
        groups.push(merged);
    }
    groups
}
