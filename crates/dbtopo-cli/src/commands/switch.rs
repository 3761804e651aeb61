use anyhow::Context;

use dbtopo_core::{ClusterId, SwitchParams};
use dbtopo_engine::TopologyEngine;

use super::emit;

fn parse_params(raw: &str) -> anyhow::Result<SwitchParams> {
    serde_json::from_str(raw).context("--params must be {\"ejector\":{ip,port},\"receiver\":{ip,port}}")
}

pub fn promote_slave(engine: &TopologyEngine, cluster: ClusterId, raw: &str) -> anyhow::Result<()> {
    let params = parse_params(raw)?;
    emit(&engine.promote_slave(cluster, &params)?)
}

pub fn paired_switch(engine: &TopologyEngine, cluster: ClusterId, raw: &str) -> anyhow::Result<()> {
    let params = parse_params(raw)?;
    emit(&engine.paired_switch(cluster, &params)?)
}

pub fn repair_slave(engine: &TopologyEngine, cluster: ClusterId, raw: &str) -> anyhow::Result<()> {
    let params = parse_params(raw)?;
    emit(&engine.repair_slave(cluster, &params)?)
}
