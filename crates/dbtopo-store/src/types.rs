//! Record types for the dbtopo topology store.
//!
//! These types represent the persisted state of machines, instances,
//! replication tuples, access entries and clusters. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use dbtopo_core::{CloudId, ClusterId, InstanceAddr};

// ── Machine ───────────────────────────────────────────────────────

/// Role class of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineType {
    Storage,
    Proxy,
}

/// A host, unique by `(ip, cloud_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub ip: String,
    pub cloud_id: CloudId,
    pub machine_type: MachineType,
    pub created_at: u64,
}

impl Machine {
    /// Build the composite key for the machines table.
    pub fn table_key(&self) -> String {
        machine_key(self.cloud_id, &self.ip)
    }
}

pub(crate) fn machine_key(cloud_id: CloudId, ip: &str) -> String {
    format!("{cloud_id}/{ip}")
}

// ── Instance ──────────────────────────────────────────────────────

/// Identity of an instance: the machine it runs on plus its port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub cloud_id: CloudId,
    pub ip: String,
    pub port: u16,
}

impl InstanceKey {
    pub fn new(cloud_id: CloudId, addr: &InstanceAddr) -> Self {
        Self {
            cloud_id,
            ip: addr.ip.clone(),
            port: addr.port,
        }
    }

    pub fn addr(&self) -> InstanceAddr {
        InstanceAddr::new(self.ip.clone(), self.port)
    }

    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        format!("{}/{}:{}", self.cloud_id, self.ip, self.port)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Storage,
    Proxy,
}

impl InstanceKind {
    /// Machine class an instance of this kind must run on.
    pub fn machine_type(self) -> MachineType {
        match self {
            InstanceKind::Storage => MachineType::Storage,
            InstanceKind::Proxy => MachineType::Proxy,
        }
    }
}

/// General role tag of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    Master,
    Slave,
    Proxy,
}

/// Replication role of a storage instance within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InnerRole {
    Master,
    Slave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Unavailable,
}

/// A storage or proxy instance, unique by `(machine, port)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub key: InstanceKey,
    pub kind: InstanceKind,
    pub role: InstanceRole,
    /// Only set for storage instances.
    pub inner_role: Option<InnerRole>,
    pub status: InstanceStatus,
    pub cluster_type: Option<String>,
    /// Clusters this instance is currently a member of.
    pub clusters: BTreeSet<ClusterId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Instance {
    /// A freshly provisioned instance that belongs to no cluster yet.
    pub fn provisioned(key: InstanceKey, kind: InstanceKind, role: InstanceRole) -> Self {
        let inner_role = match (kind, role) {
            (InstanceKind::Storage, InstanceRole::Master) => Some(InnerRole::Master),
            (InstanceKind::Storage, _) => Some(InnerRole::Slave),
            (InstanceKind::Proxy, _) => None,
        };
        let now = epoch_secs();
        Self {
            key,
            kind,
            role,
            inner_role,
            status: InstanceStatus::Running,
            cluster_type: None,
            clusters: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_storage(&self) -> bool {
        self.kind == InstanceKind::Storage
    }

    pub fn is_master(&self) -> bool {
        self.inner_role == Some(InnerRole::Master)
    }

    pub fn is_slave(&self) -> bool {
        self.inner_role == Some(InnerRole::Slave)
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    pub fn belongs_to(&self, cluster_id: ClusterId) -> bool {
        self.clusters.contains(&cluster_id)
    }
}

// ── Tuple ─────────────────────────────────────────────────────────

/// Directed replication edge from a master (ejector) to its slave (receiver).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tuple {
    pub cluster_id: ClusterId,
    pub ejector: InstanceKey,
    pub receiver: InstanceKey,
    pub created_at: u64,
}

impl Tuple {
    pub fn new(cluster_id: ClusterId, ejector: InstanceKey, receiver: InstanceKey) -> Self {
        Self {
            cluster_id,
            ejector,
            receiver,
            created_at: epoch_secs(),
        }
    }

    /// Build the composite key for the tuples table.
    pub fn table_key(&self) -> String {
        tuple_key(&self.ejector, &self.receiver)
    }

    /// Build the composite key for the receiver-side index.
    pub fn receiver_index_key(&self) -> String {
        format!("{}<{}", self.receiver.table_key(), self.ejector.table_key())
    }
}

pub(crate) fn tuple_key(ejector: &InstanceKey, receiver: &InstanceKey) -> String {
    format!("{}>{}", ejector.table_key(), receiver.table_key())
}

// ── Entry ─────────────────────────────────────────────────────────

/// Kind of external access point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    #[default]
    Dns,
    Clb,
    Polaris,
}

/// Which side of a replication pair an entry serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    MasterFacing,
    SlaveFacing,
}

/// Named access point bound to the instances currently serving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub cluster_id: ClusterId,
    pub name: String,
    pub entry_type: EntryType,
    pub role: EntryRole,
    pub bindings: BTreeSet<InstanceKey>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Entry {
    /// Build the composite key for the entries table.
    pub fn table_key(&self) -> String {
        entry_key(self.cluster_id, &self.name)
    }

    pub fn is_bound_to(&self, key: &InstanceKey) -> bool {
        self.bindings.contains(key)
    }
}

pub(crate) fn entry_key(cluster_id: ClusterId, name: &str) -> String {
    format!("{cluster_id}/{name}")
}

// ── Cluster ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterPhase {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Normal,
    /// A replication endpoint of the cluster is UNAVAILABLE.
    Abnormal,
}

/// A database cluster, unique by `(bk_biz_id, name)` and by `immute_domain`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub bk_biz_id: u64,
    pub name: String,
    pub immute_domain: String,
    pub cluster_type: String,
    pub cloud_id: CloudId,
    pub phase: ClusterPhase,
    pub status: ClusterStatus,
    pub storages: BTreeSet<InstanceKey>,
    pub proxies: BTreeSet<InstanceKey>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Cluster {
    /// Build the key for the clusters table.
    pub fn table_key(&self) -> String {
        self.id.to_string()
    }

    /// Build the key for the `(bk_biz_id, name)` uniqueness index.
    pub fn name_key(&self) -> String {
        cluster_name_key(self.bk_biz_id, &self.name)
    }

    /// Resolve an orchestrator address inside this cluster's cloud.
    pub fn instance_key(&self, addr: &InstanceAddr) -> InstanceKey {
        InstanceKey::new(self.cloud_id, addr)
    }

    pub fn has_storage(&self, key: &InstanceKey) -> bool {
        self.storages.contains(key)
    }

    pub fn has_member(&self, key: &InstanceKey) -> bool {
        self.storages.contains(key) || self.proxies.contains(key)
    }
}

pub(crate) fn cluster_name_key(bk_biz_id: u64, name: &str) -> String {
    format!("{bk_biz_id}/{name}")
}

// ── Topology ──────────────────────────────────────────────────────

/// Cluster-scoped view of everything the engine manages for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topology {
    pub cluster: Cluster,
    pub storages: Vec<Instance>,
    pub proxies: Vec<Instance>,
    pub tuples: Vec<Tuple>,
    pub entries: Vec<Entry>,
}

impl Topology {
    pub fn storage(&self, addr: &InstanceAddr) -> Option<&Instance> {
        self.storages.iter().find(|i| i.key.addr() == *addr)
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
