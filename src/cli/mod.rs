pub mod commands;
pub mod errors;
pub mod output;

use crate::config::{CliArgs, OrchestratorConfig};
use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "sheetops",
    version,
    about = "Compile, check, preview and simulate spreadsheet operation batches"
)]
pub struct Cli {
    #[command(flatten)]
    pub config: CliArgs,

    #[arg(long, global = true)]
    pub compact: bool,

    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compile intents into the provider batch.
    Compile {
        /// JSON or YAML list of intents.
        intents: PathBuf,
        /// Workbook fixture the intents resolve against.
        #[arg(long)]
        workbook: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Compile and report policy violations.
    Check {
        intents: PathBuf,
        #[arg(long)]
        workbook: Option<PathBuf>,
    },
    /// Dry-run compile with policy check and projected diff tier.
    Preview {
        intents: PathBuf,
        #[arg(long)]
        workbook: Option<PathBuf>,
    },
    /// Run intents against an in-memory copy of a workbook fixture.
    Simulate {
        intents: PathBuf,
        #[arg(long)]
        workbook: PathBuf,
        /// Dispatch despite policy violations.
        #[arg(long)]
        confirm: bool,
        /// Queue the intents in a transaction anchored on this section.
        #[arg(long, value_name = "SECTION_ID")]
        transaction: Option<u32>,
        /// Make the provider fail after applying this many requests.
        #[arg(long, value_name = "N")]
        fail_after: Option<usize>,
    },
    /// JSON Schema of the intent vocabulary.
    Schema,
}

pub async fn run_command(config: CliArgs, command: Commands) -> Result<Value> {
    let config = OrchestratorConfig::from_args(config)?;
    match command {
        Commands::Compile {
            intents,
            workbook,
            dry_run,
        } => commands::plan::compile(&config, intents, workbook, dry_run).await,
        Commands::Check { intents, workbook } => {
            commands::plan::check(&config, intents, workbook).await
        }
        Commands::Preview { intents, workbook } => {
            commands::plan::preview(&config, intents, workbook).await
        }
        Commands::Simulate {
            intents,
            workbook,
            confirm,
            transaction,
            fail_after,
        } => {
            commands::simulate::simulate(
                &config,
                commands::simulate::SimulateArgs {
                    intents,
                    workbook,
                    confirm,
                    transaction,
                    fail_after,
                },
            )
            .await
        }
        Commands::Schema => commands::schema::intent_schema(),
    }
}
