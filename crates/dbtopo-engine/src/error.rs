//! Engine error types.

use serde::Serialize;
use thiserror::Error;

use dbtopo_core::{ClusterId, InstanceAddr};
use dbtopo_store::StoreError;

/// Caller-side conditions that make a requested mutation illegal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("{addr} is not a master storage instance of cluster {cluster_id}")]
    NotMasterInCluster {
        cluster_id: ClusterId,
        addr: InstanceAddr,
    },

    #[error("{addr} is not a storage instance of cluster {cluster_id}")]
    ReceiverNotInCluster {
        cluster_id: ClusterId,
        addr: InstanceAddr,
    },

    #[error("expected slave of {master} is missing: {detail}")]
    ExpectedSlaveMissing { master: InstanceAddr, detail: String },

    #[error("slave {slave} of {master} is still running")]
    SlaveAlreadyHealthy {
        master: InstanceAddr,
        slave: InstanceAddr,
    },

    #[error("{addr} is not a slave")]
    ReceiverNotSlave { addr: InstanceAddr },

    #[error("{addr} is not a master")]
    ReceiverNotMaster { addr: InstanceAddr },

    #[error("{addr} is not running")]
    ReceiverUnavailable { addr: InstanceAddr },

    #[error("{addr} already replicates from {master}")]
    ReceiverAlreadyReplicating {
        master: InstanceAddr,
        addr: InstanceAddr,
    },

    #[error("{addr} still has slaves of its own")]
    ReceiverHasReplicas { addr: InstanceAddr },
}

/// Errors returned by engine operations.
///
/// Any error aborts the enclosing store transaction.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("precondition violated: {0}")]
    Precondition(#[from] Precondition),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("cluster creation failed: {0}")]
    CreateFailed(#[source] Box<EngineError>),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error classification reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fix the input and call again.
    PreconditionViolation,
    NotFound,
    /// The transaction did not commit; the whole call may be retried.
    StoreFailure,
    /// Internal consistency check failed. Never retried.
    InvariantViolation,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Precondition(_) | EngineError::InvalidRequest(_) => {
                ErrorKind::PreconditionViolation
            }
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Store(StoreError::Dangling(_)) => ErrorKind::InvariantViolation,
            EngineError::Store(_) => ErrorKind::StoreFailure,
            EngineError::Invariant(_) => ErrorKind::InvariantViolation,
            EngineError::CreateFailed(inner) => inner.kind(),
        }
    }

    /// Check if the operation may be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StoreFailure
    }

    /// Check if this error indicates a missing cluster, instance or entry.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_failures_are_retryable() {
        let store = EngineError::Store(StoreError::Transaction("conflict".into()));
        assert!(store.is_retryable());

        let pre = EngineError::from(Precondition::ReceiverNotSlave {
            addr: InstanceAddr::new("10.0.0.1", 30000),
        });
        assert!(!pre.is_retryable());
        assert_eq!(pre.kind(), ErrorKind::PreconditionViolation);

        let invariant = EngineError::Invariant("two masters".into());
        assert!(!invariant.is_retryable());
    }

    #[test]
    fn dangling_reference_is_an_invariant_violation() {
        let err = EngineError::Store(StoreError::Dangling("instance 0/1.1.1.1:1".into()));
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[test]
    fn create_failed_reports_inner_kind() {
        let err = EngineError::CreateFailed(Box::new(EngineError::NotFound("instance".into())));
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("cluster creation failed"));
    }
}
