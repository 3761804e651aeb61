//! redb table definitions for the dbtopo topology store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Index tables map a secondary key to the JSON-encoded primary key.

use redb::TableDefinition;

/// Shape shared by every table in the store.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Clusters keyed by `{cluster_id}`.
pub const CLUSTERS: RecordTable = TableDefinition::new("clusters");

/// Uniqueness index `{bk_biz_id}/{name}` → cluster id.
pub const CLUSTER_NAMES: RecordTable = TableDefinition::new("cluster_names");

/// Uniqueness index `{immute_domain}` → cluster id.
pub const CLUSTER_DOMAINS: RecordTable = TableDefinition::new("cluster_domains");

/// Machines keyed by `{cloud_id}/{ip}`.
pub const MACHINES: RecordTable = TableDefinition::new("machines");

/// Storage and proxy instances keyed by `{cloud_id}/{ip}:{port}`.
pub const INSTANCES: RecordTable = TableDefinition::new("instances");

/// Replication tuples keyed by `{ejector}>{receiver}`.
pub const TUPLES: RecordTable = TableDefinition::new("tuples");

/// Receiver-side index `{receiver}<{ejector}` → tuple key.
pub const TUPLES_BY_RECEIVER: RecordTable = TableDefinition::new("tuples_by_receiver");

/// Access entries keyed by `{cluster_id}/{name}`.
pub const ENTRIES: RecordTable = TableDefinition::new("entries");

/// Sequences and other bookkeeping values.
pub const META: RecordTable = TableDefinition::new("meta");

/// Every table, in dump order.
pub const ALL_TABLES: [RecordTable; 9] = [
    CLUSTERS,
    CLUSTER_NAMES,
    CLUSTER_DOMAINS,
    MACHINES,
    INSTANCES,
    TUPLES,
    TUPLES_BY_RECEIVER,
    ENTRIES,
    META,
];

/// Key in [`META`] holding the next cluster id to hand out.
pub const NEXT_CLUSTER_ID: &str = "next_cluster_id";
