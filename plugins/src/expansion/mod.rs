pub mod file;
pub mod http;

use serde_json::Value;

use taskmesh_core::api::ExpansionRequirement;

pub use file::FileExpansionLookup;
pub use http::HttpExpansionLookup;

/// Accepts either a bare array of requirements or `{"requirements": [...]}`.
pub(crate) fn requirements_from_value(value: Value) -> anyhow::Result<Vec<ExpansionRequirement>> {
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut obj) => match obj.remove("requirements") {
            Some(list @ Value::Array(_)) => list,
            _ => anyhow::bail!("expected a `requirements` array in lookup response"),
        },
        Value::Null => return Ok(Vec::new()),
        other => anyhow::bail!("unexpected lookup response: {}", other),
    };
    Ok(serde_json::from_value(list)?)
}
