//! TopologyEngine — the operations an orchestrator calls as named steps.
//!
//! Each method opens a span for correlation, runs its work in exactly one
//! store transaction, and logs the outcome by error kind.

use tracing::{error, info, info_span, warn};

use dbtopo_core::{ClusterId, InstanceAddr, SwitchParams, TopoConfig};
use dbtopo_store::{
    Cluster, ClusterPhase, StateStore, Topology, TopologyRead, TopologyTxn,
};

use crate::audit::{self, Violation};
use crate::classify::EntryClassifier;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::lifecycle::{self, CreateClusterRequest, ReplicaPair};
use crate::switchover;

/// Transactional facade over the topology store.
#[derive(Clone)]
pub struct TopologyEngine {
    store: StateStore,
    classifier: EntryClassifier,
}

impl TopologyEngine {
    pub fn new(store: StateStore, classifier: EntryClassifier) -> Self {
        Self { store, classifier }
    }

    /// Build an engine whose classifier follows `config.entries`.
    pub fn from_config(store: StateStore, config: &TopoConfig) -> EngineResult<Self> {
        let classifier = EntryClassifier::new(&config.entries.slave_pattern).map_err(|e| {
            EngineError::InvalidRequest(format!(
                "invalid slave_pattern {:?}: {e}",
                config.entries.slave_pattern
            ))
        })?;
        Ok(Self::new(store, classifier))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Commit `f` as one transaction and log the outcome.
    fn run<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut TopologyTxn) -> EngineResult<T>,
    ) -> EngineResult<T> {
        match self.store.write(f) {
            Ok(value) => {
                info!(op, "committed");
                Ok(value)
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::PreconditionViolation | ErrorKind::NotFound => {
                        warn!(op, error = %err, "rejected");
                    }
                    ErrorKind::StoreFailure => warn!(op, error = %err, "store failure, not committed"),
                    ErrorKind::InvariantViolation => error!(op, error = %err, "aborted"),
                }
                Err(err)
            }
        }
    }

    // ── Switchover ─────────────────────────────────────────────────

    pub fn promote_slave(
        &self,
        cluster_id: ClusterId,
        params: &SwitchParams,
    ) -> EngineResult<Topology> {
        let span = info_span!(
            "promote_slave",
            cluster_id,
            ejector = %params.ejector,
            receiver = %params.receiver
        );
        let _enter = span.enter();
        self.run("promote_slave", |txn| {
            switchover::promote_slave(txn, cluster_id, params)
        })
    }

    pub fn paired_switch(
        &self,
        cluster_id: ClusterId,
        params: &SwitchParams,
    ) -> EngineResult<Topology> {
        let span = info_span!(
            "paired_switch",
            cluster_id,
            ejector = %params.ejector,
            receiver = %params.receiver
        );
        let _enter = span.enter();
        self.run("paired_switch", |txn| {
            switchover::paired_switch(txn, cluster_id, params)
        })
    }

    pub fn repair_slave(
        &self,
        cluster_id: ClusterId,
        params: &SwitchParams,
    ) -> EngineResult<Topology> {
        let span = info_span!(
            "repair_slave",
            cluster_id,
            ejector = %params.ejector,
            receiver = %params.receiver
        );
        let _enter = span.enter();
        self.run("repair_slave", |txn| {
            switchover::repair_slave(txn, cluster_id, params)
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Create a cluster. Every failure, including a failed commit, comes
    /// back wrapped in `CreateFailed`.
    pub fn create_cluster(&self, req: &CreateClusterRequest) -> EngineResult<ClusterId> {
        let span = info_span!("create_cluster", bk_biz_id = req.bk_biz_id, name = %req.name);
        let _enter = span.enter();
        self.run("create_cluster", |txn| {
            lifecycle::create(txn, &self.classifier, req)
        })
        .map_err(|err| EngineError::CreateFailed(Box::new(err)))
    }

    /// Tear a cluster down. Returns false when there was nothing to remove.
    pub fn decommission(&self, cluster_id: ClusterId) -> EngineResult<bool> {
        let span = info_span!("decommission", cluster_id);
        let _enter = span.enter();
        self.run("decommission", |txn| lifecycle::decommission(txn, cluster_id))
    }

    pub fn attach_storages(
        &self,
        cluster_id: ClusterId,
        addrs: &[InstanceAddr],
        pairs: &[ReplicaPair],
    ) -> EngineResult<Cluster> {
        let span = info_span!("attach_storages", cluster_id);
        let _enter = span.enter();
        self.run("attach_storages", |txn| {
            lifecycle::attach_storages(txn, cluster_id, addrs, pairs)
        })
    }

    pub fn attach_proxies(
        &self,
        cluster_id: ClusterId,
        addrs: &[InstanceAddr],
    ) -> EngineResult<Cluster> {
        let span = info_span!("attach_proxies", cluster_id);
        let _enter = span.enter();
        self.run("attach_proxies", |txn| {
            lifecycle::attach_proxies(txn, cluster_id, addrs)
        })
    }

    pub fn detach_instances(
        &self,
        cluster_id: ClusterId,
        addrs: &[InstanceAddr],
    ) -> EngineResult<Cluster> {
        let span = info_span!("detach_instances", cluster_id);
        let _enter = span.enter();
        self.run("detach_instances", |txn| {
            lifecycle::detach_instances(txn, cluster_id, addrs)
        })
    }

    pub fn set_phase(&self, cluster_id: ClusterId, phase: ClusterPhase) -> EngineResult<Cluster> {
        let span = info_span!("set_phase", cluster_id, ?phase);
        let _enter = span.enter();
        self.run("set_phase", |txn| lifecycle::set_phase(txn, cluster_id, phase))
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Current topology of a cluster.
    pub fn topology(&self, cluster_id: ClusterId) -> EngineResult<Topology> {
        self.store.read(|view| {
            view.topology(cluster_id)?
                .ok_or_else(|| EngineError::NotFound(format!("cluster {cluster_id}")))
        })
    }

    /// Every invariant violation currently present in a cluster.
    pub fn audit(&self, cluster_id: ClusterId) -> EngineResult<Vec<Violation>> {
        self.store.read(|view| audit::audit(view, cluster_id))
    }
}
