//! dbtopo switchover engine.
//!
//! Commits topology changes for a database cluster after an external
//! orchestrator has done the risky out-of-band work (copying data,
//! starting processes, flipping DNS at the provider). Every operation runs
//! in a single store transaction and either commits completely or leaves
//! the topology untouched.
//!
//! # Components
//!
//! - **`precheck`** — side-effect-free validation of switch parameters
//! - **`rebinder`** — moves entry bindings between instances
//! - **`switchover`** — promote-slave, paired-switch, repair-slave
//! - **`lifecycle`** — create/decommission clusters and adjust membership
//! - **`audit`** — topology invariant checks
//! - **`engine`** — the [`TopologyEngine`] facade wiring them to the store

pub mod audit;
pub mod classify;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod precheck;
pub mod rebinder;
pub mod switchover;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::Violation;
pub use classify::EntryClassifier;
pub use engine::TopologyEngine;
pub use error::{EngineError, EngineResult, ErrorKind, Precondition};
pub use lifecycle::{CreateClusterRequest, EntrySpec, ReplicaPair};
