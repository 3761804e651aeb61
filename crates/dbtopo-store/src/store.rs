//! StateStore — redb-backed persistence for the cluster topology.
//!
//! Hands out scoped transactions: [`StateStore::write`] commits when its
//! closure succeeds and aborts otherwise, [`StateStore::read`] runs over a
//! consistent snapshot. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::txn::{TopologyTxn, TopologyView};

/// Raw table contents: table name → key → stored bytes.
pub type StoreDump = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Thread-safe topology store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "topology store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory topology store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL_TABLES {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside one write transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and is rolled back if it
    /// returns `Err` or panics. redb serializes writers, so at most one
    /// closure mutates the store at any moment.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut TopologyTxn) -> Result<T, E>,
        E: From<StoreError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut scoped = TopologyTxn::new(txn);
        match f(&mut scoped) {
            Ok(value) => {
                scoped.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = scoped.abort() {
                    warn!(error = %abort_err, "failed to abort topology transaction");
                }
                Err(err)
            }
        }
    }

    /// Run `f` over a read snapshot.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&TopologyView) -> Result<T, E>,
        E: From<StoreError>,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&TopologyView::new(txn))
    }

    /// Export every table's raw contents.
    pub fn dump(&self) -> StoreResult<StoreDump> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let mut dump = StoreDump::new();
        for def in ALL_TABLES {
            let table = txn.open_table(def).map_err(map_err!(Table))?;
            let mut rows = BTreeMap::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                rows.insert(key.value().to_string(), value.value().to_vec());
            }
            dump.insert(def.name().to_string(), rows);
        }
        Ok(dump)
    }
}
