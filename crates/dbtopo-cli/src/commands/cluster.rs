use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use dbtopo_core::{ClusterId, InstanceAddr};
use dbtopo_engine::{CreateClusterRequest, ReplicaPair, TopologyEngine};
use dbtopo_store::ClusterPhase;

use super::emit;

/// Body of an `attach` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AttachSpec {
    storages: Vec<InstanceAddr>,
    pairs: Vec<ReplicaPair>,
    proxies: Vec<InstanceAddr>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

pub fn create(engine: &TopologyEngine, spec: &Path) -> anyhow::Result<()> {
    let req: CreateClusterRequest = read_json(spec)?;
    let cluster_id = engine.create_cluster(&req)?;
    emit(&serde_json::json!({ "cluster_id": cluster_id }))
}

pub fn decommission(engine: &TopologyEngine, cluster: ClusterId) -> anyhow::Result<()> {
    let removed = engine.decommission(cluster)?;
    emit(&serde_json::json!({ "cluster_id": cluster, "removed": removed }))
}

pub fn attach(engine: &TopologyEngine, cluster: ClusterId, spec: &Path) -> anyhow::Result<()> {
    let spec: AttachSpec = read_json(spec)?;
    if !spec.storages.is_empty() || !spec.pairs.is_empty() {
        engine.attach_storages(cluster, &spec.storages, &spec.pairs)?;
    }
    if !spec.proxies.is_empty() {
        engine.attach_proxies(cluster, &spec.proxies)?;
    }
    emit(&engine.topology(cluster)?)
}

pub fn detach(engine: &TopologyEngine, cluster: ClusterId, raw: &str) -> anyhow::Result<()> {
    let addrs: Vec<InstanceAddr> =
        serde_json::from_str(raw).context("--addrs must be a JSON list of {ip,port}")?;
    emit(&engine.detach_instances(cluster, &addrs)?)
}

pub fn phase(engine: &TopologyEngine, cluster: ClusterId, set: &str) -> anyhow::Result<()> {
    let phase = match set {
        "online" => ClusterPhase::Online,
        "offline" => ClusterPhase::Offline,
        other => anyhow::bail!("unknown phase {other}"),
    };
    emit(&engine.set_phase(cluster, phase)?)
}

pub fn show(engine: &TopologyEngine, cluster: ClusterId) -> anyhow::Result<()> {
    emit(&engine.topology(cluster)?)
}

pub fn audit(engine: &TopologyEngine, cluster: ClusterId) -> anyhow::Result<()> {
    let violations = engine.audit(cluster)?;
    emit(&serde_json::json!({
        "cluster_id": cluster,
        "clean": violations.is_empty(),
        "violations": violations,
    }))
}
