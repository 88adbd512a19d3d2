//! Blast-radius checks run between compile and dispatch.

use crate::compiler::CompiledBatch;
use crate::errors::{OpsError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CELLS: u64 = 50_000;
pub const DEFAULT_MAX_DELETE_ROWS: u32 = 10_000;
pub const DEFAULT_MAX_DELETE_COLUMNS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Ceiling on the deduplicated cell estimate of one batch.
    pub max_cells: u64,
    /// Ceiling on rows removed by a single delete.
    pub max_delete_rows: u32,
    pub max_delete_columns: u32,
    /// Reject batches mixing destructive classes (e.g. row deletion plus
    /// permission removal).
    pub single_destructive_class: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_cells: DEFAULT_MAX_CELLS,
            max_delete_rows: DEFAULT_MAX_DELETE_ROWS,
            max_delete_columns: DEFAULT_MAX_DELETE_COLUMNS,
            single_destructive_class: true,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyRule {
    MaxCells,
    MaxDeleteRows,
    MaxDeleteColumns,
    SingleDestructiveClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyViolation {
    pub rule: PolicyRule,
    pub limit: u64,
    pub observed: u64,
    /// Offending intent for per-operation rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_index: Option<usize>,
    pub message: String,
}

/// Every violation of `policy` by `batch`, cheapest checks first.
pub fn check(batch: &CompiledBatch, policy: &Policy) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();

    let cells = batch.estimated_cells();
    if cells > policy.max_cells {
        violations.push(PolicyViolation {
            rule: PolicyRule::MaxCells,
            limit: policy.max_cells,
            observed: cells,
            intent_index: None,
            message: format!(
                "batch affects an estimated {cells} cells, over the max_cells ceiling of {}",
                policy.max_cells
            ),
        });
    }

    for op in batch.ops() {
        if op.deleted_rows > policy.max_delete_rows {
            violations.push(PolicyViolation {
                rule: PolicyRule::MaxDeleteRows,
                limit: u64::from(policy.max_delete_rows),
                observed: u64::from(op.deleted_rows),
                intent_index: Some(op.intent_index),
                message: format!(
                    "intent #{} deletes {} rows, over the max_delete_rows ceiling of {}",
                    op.intent_index, op.deleted_rows, policy.max_delete_rows
                ),
            });
        }
        if op.deleted_columns > policy.max_delete_columns {
            violations.push(PolicyViolation {
                rule: PolicyRule::MaxDeleteColumns,
                limit: u64::from(policy.max_delete_columns),
                observed: u64::from(op.deleted_columns),
                intent_index: Some(op.intent_index),
                message: format!(
                    "intent #{} deletes {} columns, over the max_delete_columns ceiling of {}",
                    op.intent_index, op.deleted_columns, policy.max_delete_columns
                ),
            });
        }
    }

    let classes = batch.destructive_classes();
    if policy.single_destructive_class && classes.len() > 1 {
        let names: Vec<String> = classes.iter().map(ToString::to_string).collect();
        violations.push(PolicyViolation {
            rule: PolicyRule::SingleDestructiveClass,
            limit: 1,
            observed: classes.len() as u64,
            intent_index: None,
            message: format!(
                "batch mixes {} destructive classes ({}); split it so one failure stays legible",
                classes.len(),
                names.join(", ")
            ),
        });
    }

    violations
}

/// [`check`] as a gate: any violation becomes `OpsError::PolicyViolation`.
pub fn enforce(batch: &CompiledBatch, policy: &Policy) -> Result<()> {
    let violations = check(batch, policy);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(OpsError::PolicyViolation { violations })
    }
}
