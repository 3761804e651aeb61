//! Switchover engine — promote-slave, paired-switch and repair-slave.
//!
//! Each function runs inside the caller's write transaction: it prechecks,
//! mutates instances, tuples and entry bindings, verifies the invariants on
//! everything it touched, and returns the resulting topology. Any error
//! leaves the transaction to be aborted by [`dbtopo_store::StateStore::write`].

use tracing::{debug, info};

use dbtopo_core::{ClusterId, SwitchParams};
use dbtopo_store::{
    Cluster, EntryRole, InnerRole, Instance, InstanceRole, InstanceStatus, Topology, TopologyRead,
    TopologyTxn, Tuple, epoch_secs,
};

use crate::audit::verify;
use crate::error::{EngineError, EngineResult, Precondition};
use crate::lifecycle::refresh_status;
use crate::precheck::{Resolved, feeding_tuple, load_instance, precheck, tuple_for};
use crate::rebinder::{facing, move_entries};

fn assign(instance: &mut Instance, role: InstanceRole, inner: InnerRole, status: InstanceStatus) {
    instance.role = role;
    instance.inner_role = Some(inner);
    instance.status = status;
    instance.updated_at = epoch_secs();
}

fn mark_unavailable(instance: &mut Instance) {
    instance.status = InstanceStatus::Unavailable;
    instance.updated_at = epoch_secs();
}

fn finish(txn: &mut TopologyTxn, mut cluster: Cluster) -> EngineResult<Topology> {
    refresh_status(txn, &mut cluster)?;
    let cluster_id = cluster.id;
    txn.topology(cluster_id)?
        .ok_or_else(|| EngineError::Invariant(format!("cluster {cluster_id} vanished mid-switch")))
}

/// Single switch: the ejector's slave becomes the master.
///
/// The ejector is demoted to an UNAVAILABLE slave, the tuple is flipped so
/// it becomes the receiver for a later repair, and every entry bound to it
/// moves to the new master.
pub fn promote_slave(
    txn: &mut TopologyTxn,
    cluster_id: ClusterId,
    params: &SwitchParams,
) -> EngineResult<Topology> {
    let Resolved {
        cluster,
        mut ejector,
        mut receiver,
    } = precheck(&*txn, cluster_id, params)?;

    if !receiver.is_slave() {
        return Err(Precondition::ReceiverNotSlave {
            addr: params.receiver.clone(),
        }
        .into());
    }
    let tuple = match tuple_for(&*txn, cluster.id, &ejector.key)? {
        Some(tuple) if tuple.receiver == receiver.key => tuple,
        Some(tuple) => {
            return Err(Precondition::ExpectedSlaveMissing {
                master: params.ejector.clone(),
                detail: format!("replicates to {}, not {}", tuple.receiver, params.receiver),
            }
            .into());
        }
        None => {
            return Err(Precondition::ExpectedSlaveMissing {
                master: params.ejector.clone(),
                detail: "no active tuple".to_string(),
            }
            .into());
        }
    };

    assign(
        &mut ejector,
        InstanceRole::Slave,
        InnerRole::Slave,
        InstanceStatus::Unavailable,
    );
    assign(
        &mut receiver,
        InstanceRole::Master,
        InnerRole::Master,
        InstanceStatus::Running,
    );
    txn.put_instance(&ejector)?;
    txn.put_instance(&receiver)?;

    txn.delete_tuple(&tuple)?;
    txn.put_tuple(&Tuple::new(cluster.id, receiver.key.clone(), ejector.key.clone()))?;

    let moved = move_entries(txn, &cluster, &ejector.key, &receiver.key, |_| true)?;
    verify(&*txn, cluster.id, &[&ejector.key, &receiver.key])?;

    info!(
        cluster_id,
        old_master = %ejector.key,
        new_master = %receiver.key,
        entries = moved.len(),
        "slave promoted"
    );
    finish(txn, cluster)
}

/// Double switch: hand the whole old pair's entries to an already-synced
/// pair whose master is `receiver`.
///
/// Master-facing entries bound to either old instance go to `receiver`;
/// slave-facing ones go to the receiver's own slave. Both old instances
/// end UNAVAILABLE and unbound.
pub fn paired_switch(
    txn: &mut TopologyTxn,
    cluster_id: ClusterId,
    params: &SwitchParams,
) -> EngineResult<Topology> {
    let Resolved {
        cluster,
        mut ejector,
        mut receiver,
    } = precheck(&*txn, cluster_id, params)?;

    if !receiver.is_master() {
        return Err(Precondition::ReceiverNotMaster {
            addr: params.receiver.clone(),
        }
        .into());
    }
    let new_tuple = tuple_for(&*txn, cluster.id, &receiver.key)?.ok_or_else(|| {
        Precondition::ExpectedSlaveMissing {
            master: params.receiver.clone(),
            detail: "receiver has no slave of its own".to_string(),
        }
    })?;
    let old_tuple = tuple_for(&*txn, cluster.id, &ejector.key)?.ok_or_else(|| {
        Precondition::ExpectedSlaveMissing {
            master: params.ejector.clone(),
            detail: "ejector has no slave to retire".to_string(),
        }
    })?;

    let new_slave = load_instance(&*txn, &new_tuple.receiver)?;
    if !cluster.has_storage(&new_slave.key) || !new_slave.belongs_to(cluster.id) {
        return Err(Precondition::ReceiverNotInCluster {
            cluster_id: cluster.id,
            addr: new_slave.key.addr(),
        }
        .into());
    }
    for candidate in [&receiver, &new_slave] {
        if !candidate.is_running() {
            return Err(Precondition::ReceiverUnavailable {
                addr: candidate.key.addr(),
            }
            .into());
        }
    }
    let mut old_slave = load_instance(&*txn, &old_tuple.receiver)?;

    mark_unavailable(&mut ejector);
    mark_unavailable(&mut old_slave);
    let status = receiver.status;
    assign(&mut receiver, InstanceRole::Master, InnerRole::Master, status);
    txn.put_instance(&ejector)?;
    txn.put_instance(&old_slave)?;
    txn.put_instance(&receiver)?;

    let mut moved = Vec::new();
    for old in [&ejector.key, &old_slave.key] {
        moved.extend(move_entries(
            txn,
            &cluster,
            old,
            &receiver.key,
            facing(EntryRole::MasterFacing),
        )?);
        moved.extend(move_entries(
            txn,
            &cluster,
            old,
            &new_slave.key,
            facing(EntryRole::SlaveFacing),
        )?);
    }
    verify(
        &*txn,
        cluster.id,
        &[&ejector.key, &old_slave.key, &receiver.key, &new_slave.key],
    )?;

    info!(
        cluster_id,
        old_master = %ejector.key,
        old_slave = %old_slave.key,
        new_master = %receiver.key,
        new_slave = %new_slave.key,
        entries = moved.len(),
        "pair switched"
    );
    finish(txn, cluster)
}

/// Give the ejector a fresh slave in place of a dead or missing one.
///
/// Refused while the current slave is RUNNING. An UNAVAILABLE instance that
/// is still the ejector's receiver may be named again to re-admit it.
pub fn repair_slave(
    txn: &mut TopologyTxn,
    cluster_id: ClusterId,
    params: &SwitchParams,
) -> EngineResult<Topology> {
    let Resolved {
        cluster,
        ejector,
        mut receiver,
    } = precheck(&*txn, cluster_id, params)?;

    let current = tuple_for(&*txn, cluster.id, &ejector.key)?;
    if let Some(tuple) = &current {
        let slave = load_instance(&*txn, &tuple.receiver)?;
        if slave.is_running() {
            return Err(Precondition::SlaveAlreadyHealthy {
                master: params.ejector.clone(),
                slave: slave.key.addr(),
            }
            .into());
        }
    }
    if let Some(tuple) = feeding_tuple(&*txn, cluster.id, &receiver.key)? {
        if tuple.ejector != ejector.key {
            return Err(Precondition::ReceiverAlreadyReplicating {
                master: tuple.ejector.addr(),
                addr: params.receiver.clone(),
            }
            .into());
        }
    }
    if tuple_for(&*txn, cluster.id, &receiver.key)?.is_some() {
        return Err(Precondition::ReceiverHasReplicas {
            addr: params.receiver.clone(),
        }
        .into());
    }

    assign(
        &mut receiver,
        InstanceRole::Slave,
        InnerRole::Slave,
        InstanceStatus::Running,
    );
    receiver.cluster_type = Some(cluster.cluster_type.clone());
    txn.put_instance(&receiver)?;

    if let Some(tuple) = &current {
        txn.delete_tuple(tuple)?;
    }
    txn.put_tuple(&Tuple::new(cluster.id, ejector.key.clone(), receiver.key.clone()))?;

    let mut touched = vec![&ejector.key, &receiver.key];
    let mut moved = Vec::new();
    if let Some(tuple) = &current {
        moved = move_entries(
            txn,
            &cluster,
            &tuple.receiver,
            &receiver.key,
            facing(EntryRole::SlaveFacing),
        )?;
        touched.push(&tuple.receiver);
    } else {
        debug!(cluster_id, master = %ejector.key, "no previous slave to replace");
    }
    verify(&*txn, cluster.id, &touched)?;

    info!(
        cluster_id,
        master = %ejector.key,
        slave = %receiver.key,
        entries = moved.len(),
        "slave repaired"
    );
    finish(txn, cluster)
}
