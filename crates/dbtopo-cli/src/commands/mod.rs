pub mod cluster;
pub mod store;
pub mod switch;

use serde::Serialize;

/// Print `value` as pretty JSON on stdout.
pub(crate) fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
