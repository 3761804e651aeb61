//! Shared types used across dbtopo crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a cluster row.
pub type ClusterId = u64;

/// Identifier of the cloud region a machine lives in.
pub type CloudId = u64;

/// Network address of an instance as handed over by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceAddr {
    pub ip: String,
    pub port: u16,
}

impl InstanceAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for InstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parameters of a switchover step: `{ejector:{ip,port}, receiver:{ip,port}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchParams {
    pub ejector: InstanceAddr,
    pub receiver: InstanceAddr,
}
