//! dbtopo-store — the topology store for dbtopo.
//!
//! Backed by [redb](https://docs.rs/redb), holds machines, instances,
//! replication tuples, access entries and clusters: the single durable
//! source of truth for which instances form a database cluster.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{cloud_id}/{ip}:{port}`, `{cluster_id}/{entry}`,
//! `{ejector}>{receiver}`) keep related records adjacent so lookups are
//! prefix range scans rather than full table walks.
//!
//! Every logical mutation runs through [`StateStore::write`], which hands a
//! [`TopologyTxn`] to a closure and commits only if the closure succeeds.
//! redb admits one writer at a time, so two mutations never interleave.

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StoreError::$variant(e.to_string())
    };
}

pub mod error;
pub mod store;
pub mod tables;
pub mod txn;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::{StateStore, StoreDump};
pub use txn::{TopologyRead, TopologyTxn, TopologyView};
pub use types::*;
