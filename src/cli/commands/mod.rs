pub mod plan;
pub mod schema;
pub mod simulate;

use crate::config::OrchestratorConfig;
use crate::intent::Intent;
use crate::orchestrator::Orchestrator;
use crate::provider::MemoryProvider;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Read a JSON or YAML list of intents.
pub fn load_intents(path: &Path) -> Result<Vec<Intent>> {
    if !path.exists() {
        anyhow::bail!("intents file {:?} does not exist", path);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read intents file {:?}", path))?;
    let intents: Vec<Intent> = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML intents {:?}", path))?,
        _ => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON intents {:?}", path))?,
    };
    Ok(intents)
}

pub fn load_workbook(path: Option<&Path>) -> Result<Arc<MemoryProvider>> {
    let provider = match path {
        Some(path) => {
            anyhow::ensure!(path.exists(), "workbook {:?} does not exist", path);
            MemoryProvider::load(path)?
        }
        None => MemoryProvider::new("Untitled"),
    };
    Ok(Arc::new(provider))
}

pub fn orchestrator_for(config: &OrchestratorConfig, provider: Arc<MemoryProvider>) -> Orchestrator {
    Orchestrator::new(provider, config)
}
