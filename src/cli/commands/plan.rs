use super::{load_intents, load_workbook, orchestrator_for};
use crate::config::OrchestratorConfig;
use anyhow::Result;
use serde_json::{Value, json};
use std::path::PathBuf;

pub async fn compile(
    config: &OrchestratorConfig,
    intents: PathBuf,
    workbook: Option<PathBuf>,
    dry_run: bool,
) -> Result<Value> {
    let intents = load_intents(&intents)?;
    let orchestrator = orchestrator_for(config, load_workbook(workbook.as_deref())?);
    let batch = orchestrator.compile(&intents, dry_run).await?;
    Ok(serde_json::to_value(&batch)?)
}

pub async fn check(
    config: &OrchestratorConfig,
    intents: PathBuf,
    workbook: Option<PathBuf>,
) -> Result<Value> {
    let intents = load_intents(&intents)?;
    let orchestrator = orchestrator_for(config, load_workbook(workbook.as_deref())?);
    let batch = orchestrator.compile(&intents, true).await?;
    let violations = orchestrator.enforce(&batch);
    Ok(json!({
        "fingerprint": batch.fingerprint(),
        "estimate": batch.estimate(),
        "destructive": batch.is_destructive(),
        "allowed": violations.is_empty(),
        "violations": violations,
    }))
}

pub async fn preview(
    config: &OrchestratorConfig,
    intents: PathBuf,
    workbook: Option<PathBuf>,
) -> Result<Value> {
    let intents = load_intents(&intents)?;
    let orchestrator = orchestrator_for(config, load_workbook(workbook.as_deref())?);
    let preview = orchestrator.preview(&intents).await?;
    Ok(serde_json::to_value(&preview)?)
}
