// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based tests for the switchover engine.
//!
//! These tests use proptest to generate entry sets and switch requests and
//! verify that:
//! 1. promote_slave followed by the reverse promote_slave restores roles,
//!    tuple direction and master-facing bindings
//! 2. repair_slave never touches a cluster whose slave is still running
//! 3. any rejected request leaves the store byte-for-byte unchanged
//! 4. any accepted request leaves the cluster free of violations

mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;

use common::*;
use dbtopo_engine::{CreateClusterRequest, EntryClassifier, EntrySpec, ReplicaPair, TopologyEngine};
use dbtopo_store::{InstanceRole, StateStore};

// =============================================================================
// Strategies
// =============================================================================

/// Master-facing entry names; the alphabet cannot produce the slave marker.
fn master_entry_names() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-z]{1,8}\\.db\\.com", 1..5)
}

fn pool_addr() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(M1),
        Just(S1),
        Just(M2),
        Just(S2),
        Just(SPARE),
        Just("10.9.9.9:1"),
    ]
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Promote,
    Paired,
    Repair,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![Just(Step::Promote), Just(Step::Paired), Just(Step::Repair)]
}

// =============================================================================
// Helpers
// =============================================================================

fn cluster_with_entries(names: &BTreeSet<String>) -> (TopologyEngine, u64) {
    let store = StateStore::open_in_memory().unwrap();
    provision_storage(&store, M1, InstanceRole::Master);
    provision_storage(&store, S1, InstanceRole::Slave);
    let engine = TopologyEngine::new(store, EntryClassifier::standard().unwrap());
    let req = CreateClusterRequest {
        bk_biz_id: 7,
        name: "prop".to_string(),
        immute_domain: "prop.db.com".to_string(),
        cluster_type: "tendis_cache".to_string(),
        cloud_id: 0,
        storages: vec![addr(M1), addr(S1)],
        proxies: vec![],
        pairs: vec![ReplicaPair {
            master: addr(M1),
            slave: addr(S1),
        }],
        entries: names
            .iter()
            .map(|name| EntrySpec {
                name: name.clone(),
                entry_type: Default::default(),
                role: None,
                bind: None,
            })
            .collect(),
    };
    let id = engine.create_cluster(&req).unwrap();
    (engine, id)
}

fn staged() -> Fixture {
    let fx = single_pair();
    stage_pair(&fx, M2, S2);
    stage_spare(&fx);
    fx
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: swapping there and back restores the original assignment
    #[test]
    fn prop_promote_round_trip(names in master_entry_names()) {
        let (engine, id) = cluster_with_entries(&names);
        let before = engine.topology(id).unwrap();

        engine.promote_slave(id, &params(M1, S1)).unwrap();
        let after = engine.promote_slave(id, &params(S1, M1)).unwrap();

        prop_assert!(after.storage(&addr(M1)).unwrap().is_master());
        prop_assert!(after.storage(&addr(S1)).unwrap().is_slave());
        prop_assert_eq!(after.tuples.len(), 1);
        prop_assert_eq!(&after.tuples[0].ejector, &key(M1));
        prop_assert_eq!(&after.tuples[0].receiver, &key(S1));
        for entry in &before.entries {
            prop_assert_eq!(&after.entry(&entry.name).unwrap().bindings, &entry.bindings);
        }
    }

    /// Property: repair is refused while the current slave runs
    #[test]
    fn prop_repair_guard_leaves_store_untouched(receiver in prop_oneof![Just(S1), Just(SPARE), Just(S2)]) {
        let fx = staged();
        let before = fx.store.dump().unwrap();

        let result = fx.engine.repair_slave(fx.cluster_id, &params(M1, receiver));

        prop_assert!(result.is_err());
        prop_assert_eq!(fx.store.dump().unwrap(), before);
    }

    /// Property: rejected requests never mutate, accepted ones stay consistent
    #[test]
    fn prop_outcome_is_all_or_nothing(
        op in step(),
        ejector in pool_addr(),
        receiver in pool_addr(),
    ) {
        let fx = staged();
        let before = fx.store.dump().unwrap();

        let p = params(ejector, receiver);
        let result = match op {
            Step::Promote => fx.engine.promote_slave(fx.cluster_id, &p),
            Step::Paired => fx.engine.paired_switch(fx.cluster_id, &p),
            Step::Repair => fx.engine.repair_slave(fx.cluster_id, &p),
        };

        match result {
            Err(err) => {
                prop_assert!(!err.is_retryable(), "unexpected store failure: {}", err);
                prop_assert_eq!(fx.store.dump().unwrap(), before);
            }
            Ok(topo) => {
                let violations = fx.engine.audit(fx.cluster_id).unwrap();
                prop_assert!(violations.is_empty(), "{:?}", violations);
                for tuple in &topo.tuples {
                    let ejector = topo.storages.iter().find(|i| i.key == tuple.ejector).unwrap();
                    let receiver = topo.storages.iter().find(|i| i.key == tuple.receiver).unwrap();
                    prop_assert!(ejector.is_master());
                    prop_assert!(receiver.is_slave());
                }
            }
        }
    }
}
