//! Entry classification — decides once, at creation time, whether an entry
//! serves the master or the slave side of a replication pair.

use regex::Regex;

use dbtopo_core::config::DEFAULT_SLAVE_PATTERN;
use dbtopo_store::EntryRole;

/// Classifies entry names that carry no explicit role.
#[derive(Debug, Clone)]
pub struct EntryClassifier {
    slave_pattern: Regex,
}

impl EntryClassifier {
    /// Build a classifier from a slave-name regex.
    pub fn new(slave_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            slave_pattern: Regex::new(slave_pattern)?,
        })
    }

    /// The stock convention: names containing `-slave.` are slave-facing.
    pub fn standard() -> Result<Self, regex::Error> {
        Self::new(DEFAULT_SLAVE_PATTERN)
    }

    pub fn classify(&self, name: &str) -> EntryRole {
        if self.slave_pattern.is_match(name) {
            EntryRole::SlaveFacing
        } else {
            EntryRole::MasterFacing
        }
    }

    /// Use `explicit` when given, otherwise classify by name.
    pub fn resolve(&self, name: &str, explicit: Option<EntryRole>) -> EntryRole {
        explicit.unwrap_or_else(|| self.classify(name))
    }
}
