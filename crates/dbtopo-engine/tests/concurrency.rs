//! Concurrent callers against one engine.
//!
//! Readers outside a transaction must observe either the state before a
//! switch or the state after it, writers on different clusters must not
//! interfere, and two writers racing on the same cluster must serialize.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use dbtopo_core::ClusterId;
use dbtopo_engine::{CreateClusterRequest, ErrorKind, TopologyEngine};
use dbtopo_store::{InstanceRole, Topology};

const ROUNDS: usize = 100;

/// Which instance currently serves as master, provided the whole topology
/// agrees on it: roles, tuple direction and the master entry binding.
fn serving_master(topo: &Topology) -> Option<&'static str> {
    for (master, slave) in [(M1, S1), (S1, M1)] {
        let m = topo.storage(&addr(master))?;
        let s = topo.storage(&addr(slave))?;
        let consistent = m.is_master()
            && s.is_slave()
            && topo.tuples.len() == 1
            && topo.tuples[0].ejector == key(master)
            && topo.tuples[0].receiver == key(slave)
            && topo.entry("db.s.com")?.bindings == BTreeSet::from([key(master)]);
        if consistent {
            return Some(master);
        }
    }
    None
}

/// Swap the pair there and back `rounds` times.
fn toggle(engine: &TopologyEngine, cluster_id: ClusterId, a: &str, b: &str, rounds: usize) {
    for _ in 0..rounds {
        engine.promote_slave(cluster_id, &params(a, b)).unwrap();
        engine.promote_slave(cluster_id, &params(b, a)).unwrap();
    }
}

fn second_cluster(fx: &Fixture) -> ClusterId {
    provision_storage(&fx.store, M2, InstanceRole::Master);
    provision_storage(&fx.store, S2, InstanceRole::Slave);
    let req: CreateClusterRequest = serde_json::from_value(serde_json::json!({
        "bk_biz_id": 100,
        "name": "t",
        "immute_domain": "db.t.com",
        "cluster_type": "tendis_cache",
        "storages": [
            {"ip": "10.0.0.3", "port": 30000},
            {"ip": "10.0.0.4", "port": 30000}
        ],
        "pairs": [{
            "master": {"ip": "10.0.0.3", "port": 30000},
            "slave": {"ip": "10.0.0.4", "port": 30000}
        }],
        "entries": [{"name": "db.t.com"}]
    }))
    .unwrap();
    fx.engine.create_cluster(&req).unwrap()
}

#[test]
fn readers_see_whole_switches_only() {
    let fx = single_pair();
    let done = AtomicBool::new(false);

    let reads = thread::scope(|scope| {
        let reader_engine = fx.engine.clone();
        let done = &done;
        let reader = scope.spawn(move || {
            let mut reads = 0usize;
            let mut seen = BTreeSet::new();
            while !done.load(Ordering::Acquire) {
                let topo = reader_engine.topology(fx.cluster_id).unwrap();
                let master = serving_master(&topo);
                assert!(master.is_some(), "half-applied switch observed: {topo:?}");
                seen.extend(master);
                for entry in &topo.entries {
                    assert!(!entry.bindings.is_empty(), "{} lost its bindings", entry.name);
                }
                reads += 1;
            }
            (reads, seen)
        });

        toggle(&fx.engine, fx.cluster_id, M1, S1, ROUNDS);
        done.store(true, Ordering::Release);
        reader.join().unwrap()
    });

    let (count, seen) = reads;
    assert!(count > 0);
    assert!(!seen.is_empty());
    let last = fx.engine.topology(fx.cluster_id).unwrap();
    assert_eq!(serving_master(&last), Some(M1));
}

#[test]
fn switches_on_different_clusters_both_commit() {
    let fx = single_pair();
    let other = second_cluster(&fx);

    thread::scope(|scope| {
        let engine = fx.engine.clone();
        let first = scope.spawn(move || toggle(&engine, fx.cluster_id, M1, S1, ROUNDS));
        let engine = fx.engine.clone();
        let second = scope.spawn(move || toggle(&engine, other, M2, S2, ROUNDS));
        first.join().unwrap();
        second.join().unwrap();
    });

    for id in [fx.cluster_id, other] {
        let violations = fx.engine.audit(id).unwrap();
        assert!(violations.is_empty(), "cluster {id}: {violations:?}");
    }
    let s = fx.engine.topology(fx.cluster_id).unwrap();
    assert!(s.storage(&addr(M1)).unwrap().is_master());
    let t = fx.engine.topology(other).unwrap();
    assert!(t.storage(&addr(M2)).unwrap().is_master());
    assert_eq!(t.entry("db.t.com").unwrap().bindings, BTreeSet::from([key(M2)]));
}

#[test]
fn racing_promotes_on_one_cluster_serialize() {
    let fx = single_pair();
    let barrier = Arc::new(Barrier::new(2));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = fx.engine.clone();
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    engine.promote_slave(fx.cluster_id, &params(M1, S1))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1, "{results:?}");
    let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(rejected.kind(), ErrorKind::PreconditionViolation);

    let topo = fx.engine.topology(fx.cluster_id).unwrap();
    assert_eq!(serving_master(&topo), Some(S1));
    assert!(fx.engine.audit(fx.cluster_id).unwrap().is_empty());
}
