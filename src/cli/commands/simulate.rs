use super::{load_intents, load_workbook, orchestrator_for};
use crate::cli::errors::envelope_for_ops;
use crate::config::OrchestratorConfig;
use crate::model::SectionId;
use crate::orchestrator::ExecuteOptions;
use crate::provider::Fault;
use crate::transaction::CommitOptions;
use anyhow::Result;
use serde_json::{Value, json};
use std::path::PathBuf;

#[derive(Debug)]
pub struct SimulateArgs {
    pub intents: PathBuf,
    pub workbook: PathBuf,
    pub confirm: bool,
    pub transaction: Option<u32>,
    pub fail_after: Option<usize>,
}

pub async fn simulate(config: &OrchestratorConfig, args: SimulateArgs) -> Result<Value> {
    let intents = load_intents(&args.intents)?;
    let provider = load_workbook(Some(&args.workbook))?;
    if let Some(n) = args.fail_after {
        provider.inject(Fault::FailAfter(n));
    }
    let orchestrator = orchestrator_for(config, provider.clone());

    let Some(section) = args.transaction else {
        let result = orchestrator
            .execute(
                &intents,
                ExecuteOptions {
                    confirmed: args.confirm,
                    ..ExecuteOptions::default()
                },
            )
            .await?;
        return Ok(json!({
            "dispatch": result,
            "document": provider.document(),
            "provider_calls": provider.dispatch_count(),
        }));
    };

    let id = orchestrator.begin(SectionId(section)).await?;
    for intent in intents {
        orchestrator.queue(&id, intent).await?;
    }
    let commit = orchestrator
        .commit(
            &id,
            CommitOptions {
                confirmed: args.confirm,
                ..CommitOptions::default()
            },
        )
        .await;
    let status = orchestrator.transaction_status(&id).await?;
    let commit = match commit {
        Ok(outcome) => serde_json::to_value(&outcome)?,
        // A failed commit still has a recovery story worth printing.
        Err(err) => json!({ "error": envelope_for_ops(&err) }),
    };
    Ok(json!({
        "commit": commit,
        "transaction": status,
        "document": provider.document(),
        "provider_calls": provider.dispatch_count(),
    }))
}
