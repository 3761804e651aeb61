//! Transaction handles over the topology tables.
//!
//! [`TopologyTxn`] wraps a redb write transaction and [`TopologyView`] a read
//! snapshot. Both expose the same lookups through [`TopologyRead`], so
//! validation code can run against either one.

use std::collections::BTreeSet;

use redb::{ReadTransaction, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

fn get_json<T, R>(table: &R, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn scan_json<T, R>(table: &R, prefix: &str) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        let record: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push(record);
    }
    Ok(results)
}

/// Read access to the topology, shared by write transactions and snapshots.
pub trait TopologyRead {
    /// Fetch and decode one record.
    fn get_record<T: DeserializeOwned>(&self, table: RecordTable, key: &str)
    -> StoreResult<Option<T>>;

    /// Decode every record whose key starts with `prefix`, in key order.
    fn scan_records<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        prefix: &str,
    ) -> StoreResult<Vec<T>>;

    fn get_cluster(&self, id: ClusterId) -> StoreResult<Option<Cluster>> {
        self.get_record(CLUSTERS, &id.to_string())
    }

    fn cluster_id_by_name(&self, bk_biz_id: u64, name: &str) -> StoreResult<Option<ClusterId>> {
        self.get_record(CLUSTER_NAMES, &cluster_name_key(bk_biz_id, name))
    }

    fn cluster_id_by_domain(&self, immute_domain: &str) -> StoreResult<Option<ClusterId>> {
        self.get_record(CLUSTER_DOMAINS, immute_domain)
    }

    fn get_machine(&self, cloud_id: CloudId, ip: &str) -> StoreResult<Option<Machine>> {
        self.get_record(MACHINES, &machine_key(cloud_id, ip))
    }

    fn get_instance(&self, key: &InstanceKey) -> StoreResult<Option<Instance>> {
        self.get_record(INSTANCES, &key.table_key())
    }

    /// Load every instance in `keys`. A missing row is a dangling reference.
    fn members(&self, keys: &BTreeSet<InstanceKey>) -> StoreResult<Vec<Instance>> {
        keys.iter()
            .map(|key| {
                self.get_instance(key)?
                    .ok_or_else(|| StoreError::Dangling(format!("instance {}", key.table_key())))
            })
            .collect()
    }

    /// Tuples whose ejector is `ejector`, across all clusters.
    fn tuples_from(&self, ejector: &InstanceKey) -> StoreResult<Vec<Tuple>> {
        self.scan_records(TUPLES, &format!("{}>", ejector.table_key()))
    }

    /// Tuples whose receiver is `receiver`, via the receiver-side index.
    fn tuples_to(&self, receiver: &InstanceKey) -> StoreResult<Vec<Tuple>> {
        let keys: Vec<String> =
            self.scan_records(TUPLES_BY_RECEIVER, &format!("{}<", receiver.table_key()))?;
        keys.iter()
            .map(|key| {
                self.get_record(TUPLES, key)?
                    .ok_or_else(|| StoreError::Dangling(format!("tuple {key}")))
            })
            .collect()
    }

    fn entries_of(&self, cluster_id: ClusterId) -> StoreResult<Vec<Entry>> {
        self.scan_records(ENTRIES, &format!("{cluster_id}/"))
    }

    /// Entries of `cluster_id` that currently bind `key`.
    fn entries_for(&self, cluster_id: ClusterId, key: &InstanceKey) -> StoreResult<Vec<Entry>> {
        Ok(self
            .entries_of(cluster_id)?
            .into_iter()
            .filter(|e| e.is_bound_to(key))
            .collect())
    }

    fn get_entry(&self, cluster_id: ClusterId, name: &str) -> StoreResult<Option<Entry>> {
        self.get_record(ENTRIES, &entry_key(cluster_id, name))
    }

    /// Assemble the cluster-scoped topology, or `None` if the cluster is gone.
    fn topology(&self, cluster_id: ClusterId) -> StoreResult<Option<Topology>> {
        let Some(cluster) = self.get_cluster(cluster_id)? else {
            return Ok(None);
        };
        let storages = self.members(&cluster.storages)?;
        let proxies = self.members(&cluster.proxies)?;
        let mut tuples = Vec::new();
        for key in &cluster.storages {
            tuples.extend(
                self.tuples_from(key)?
                    .into_iter()
                    .filter(|t| t.cluster_id == cluster_id),
            );
        }
        let entries = self.entries_of(cluster_id)?;
        Ok(Some(Topology {
            cluster,
            storages,
            proxies,
            tuples,
            entries,
        }))
    }
}

/// A single write transaction over the topology tables.
///
/// Created by [`crate::StateStore::write`]; nothing written through it is
/// visible to other readers until the enclosing closure returns `Ok`.
pub struct TopologyTxn {
    txn: WriteTransaction,
}

impl TopologyTxn {
    pub(crate) fn new(txn: WriteTransaction) -> Self {
        Self { txn }
    }

    pub(crate) fn commit(self) -> StoreResult<()> {
        self.txn.commit().map_err(map_err!(Transaction))
    }

    pub(crate) fn abort(self) -> StoreResult<()> {
        self.txn.abort().map_err(map_err!(Transaction))
    }

    fn put_record<T: Serialize>(&mut self, table: RecordTable, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn remove_record(&mut self, table: RecordTable, key: &str) -> StoreResult<bool> {
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Hand out the next cluster id.
    pub fn next_cluster_id(&mut self) -> StoreResult<ClusterId> {
        let next: Option<ClusterId> = self.get_record(META, NEXT_CLUSTER_ID)?;
        let id = next.unwrap_or(1);
        self.put_record(META, NEXT_CLUSTER_ID, &(id + 1))?;
        Ok(id)
    }

    /// Insert or update a cluster row together with its uniqueness indexes.
    pub fn put_cluster(&mut self, cluster: &Cluster) -> StoreResult<()> {
        self.put_record(CLUSTERS, &cluster.table_key(), cluster)?;
        self.put_record(CLUSTER_NAMES, &cluster.name_key(), &cluster.id)?;
        self.put_record(CLUSTER_DOMAINS, &cluster.immute_domain, &cluster.id)?;
        debug!(cluster_id = cluster.id, name = %cluster.name, "cluster stored");
        Ok(())
    }

    /// Delete a cluster row and its indexes. Returns true if it existed.
    pub fn delete_cluster(&mut self, cluster: &Cluster) -> StoreResult<bool> {
        let existed = self.remove_record(CLUSTERS, &cluster.table_key())?;
        self.remove_record(CLUSTER_NAMES, &cluster.name_key())?;
        self.remove_record(CLUSTER_DOMAINS, &cluster.immute_domain)?;
        debug!(cluster_id = cluster.id, existed, "cluster deleted");
        Ok(existed)
    }

    // ── Machines ───────────────────────────────────────────────────

    pub fn put_machine(&mut self, machine: &Machine) -> StoreResult<()> {
        self.put_record(MACHINES, &machine.table_key(), machine)
    }

    // ── Instances ──────────────────────────────────────────────────

    pub fn put_instance(&mut self, instance: &Instance) -> StoreResult<()> {
        self.put_record(INSTANCES, &instance.key.table_key(), instance)?;
        debug!(
            instance = %instance.key,
            role = ?instance.role,
            status = ?instance.status,
            "instance stored"
        );
        Ok(())
    }

    // ── Tuples ─────────────────────────────────────────────────────

    /// Insert a tuple and its receiver-side index row.
    pub fn put_tuple(&mut self, tuple: &Tuple) -> StoreResult<()> {
        let key = tuple.table_key();
        self.put_record(TUPLES, &key, tuple)?;
        self.put_record(TUPLES_BY_RECEIVER, &tuple.receiver_index_key(), &key)?;
        debug!(ejector = %tuple.ejector, receiver = %tuple.receiver, "tuple stored");
        Ok(())
    }

    /// Delete a tuple and its index row. Returns true if it existed.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> StoreResult<bool> {
        let existed = self.remove_record(TUPLES, &tuple.table_key())?;
        self.remove_record(TUPLES_BY_RECEIVER, &tuple.receiver_index_key())?;
        debug!(ejector = %tuple.ejector, receiver = %tuple.receiver, existed, "tuple deleted");
        Ok(existed)
    }

    // ── Entries ────────────────────────────────────────────────────

    pub fn put_entry(&mut self, entry: &Entry) -> StoreResult<()> {
        self.put_record(ENTRIES, &entry.table_key(), entry)?;
        debug!(entry = %entry.name, bindings = entry.bindings.len(), "entry stored");
        Ok(())
    }

    pub fn delete_entry(&mut self, cluster_id: ClusterId, name: &str) -> StoreResult<bool> {
        self.remove_record(ENTRIES, &entry_key(cluster_id, name))
    }
}

impl TopologyRead for TopologyTxn {
    fn get_record<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        get_json(&table, key)
    }

    fn scan_records<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        prefix: &str,
    ) -> StoreResult<Vec<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        scan_json(&table, prefix)
    }
}

/// A consistent read snapshot of the topology tables.
pub struct TopologyView {
    txn: ReadTransaction,
}

impl TopologyView {
    pub(crate) fn new(txn: ReadTransaction) -> Self {
        Self { txn }
    }
}

impl TopologyRead for TopologyView {
    fn get_record<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        get_json(&table, key)
    }

    fn scan_records<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        prefix: &str,
    ) -> StoreResult<Vec<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        scan_json(&table, prefix)
    }
}
