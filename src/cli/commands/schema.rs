use crate::intent::Intent;
use anyhow::Result;
use serde_json::Value;

pub fn intent_schema() -> Result<Value> {
    let schema = schemars::schema_for!(Vec<Intent>);
    Ok(serde_json::to_value(&schema)?)
}
