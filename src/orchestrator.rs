//! Handler-facing entry point.
//!
//! [`Orchestrator`] wires one provider to one rate limiter, resolver cache,
//! dispatcher and transaction table, and exposes the operations the per-feature
//! handlers call: compile, enforce, preview, execute, dispatch, the transaction
//! verbs and conflict pre-flight.

use crate::compiler::{BatchEstimate, CompileOptions, CompiledBatch, CompiledOp, compile};
use crate::config::OrchestratorConfig;
use crate::conflict::{ConflictDetector, ConflictReport};
use crate::diff::{DiffEngine, DiffTier};
use crate::dispatch::{DispatchOptions, DispatchResult, Dispatcher};
use crate::errors::{OpsError, Result};
use crate::intent::{DestructiveClass, Intent};
use crate::model::{GridRange, SectionId};
use crate::policy::{self, Policy, PolicyViolation};
use crate::provider::SheetProvider;
use crate::rate_limit::RateLimiter;
use crate::resolver::{RangeRef, RangeResolver};
use crate::transaction::{
    CommitOptions, CommitOutcome, SweepReport, TransactionId, TransactionManager,
    TransactionStatus,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a batch would do, without doing it.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub fingerprint: String,
    pub requests: usize,
    pub estimate: BatchEstimate,
    pub destructive_classes: Vec<DestructiveClass>,
    /// Tier the diff of a real dispatch would be reported at.
    pub diff_tier: DiffTier,
    pub violations: Vec<PolicyViolation>,
    pub ops: Vec<CompiledOp>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Preview {
    /// True when the batch would pass policy without confirmation.
    pub fn is_allowed(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Dispatch despite policy violations.
    pub confirmed: bool,
    /// Refuse unless the batch matches this previewed fingerprint.
    pub expected_fingerprint: Option<String>,
    pub cancel: Option<CancellationToken>,
    pub timeout: Option<Duration>,
    pub skip_diff: bool,
}

/// A checksum the caller recorded when it last read `range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConflictExpectation {
    pub range: GridRange,
    pub checksum: String,
}

pub struct Orchestrator {
    resolver: Arc<RangeResolver>,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<Dispatcher>,
    transactions: TransactionManager,
    conflicts: ConflictDetector,
    policy: Policy,
    max_batch_bytes: Option<usize>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn SheetProvider>, config: &OrchestratorConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit()));
        let resolver = Arc::new(RangeResolver::new(
            provider.clone(),
            limiter.clone(),
            config.resolver(),
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(
                provider.clone(),
                limiter.clone(),
                DiffEngine::new(config.diff_thresholds()),
                config.snapshot_max_bytes,
                config.call_timeout(),
            )
            .with_resolver(resolver.clone()),
        );
        let policy = config.policy();
        let transactions = TransactionManager::new(
            dispatcher.clone(),
            resolver.clone(),
            policy.clone(),
            config.transaction(),
        );
        Self {
            conflicts: ConflictDetector::new(provider, limiter.clone()),
            resolver,
            limiter,
            dispatcher,
            transactions,
            policy,
            max_batch_bytes: config.max_batch_bytes(),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn resolver(&self) -> &Arc<RangeResolver> {
        &self.resolver
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Prefetch the metadata `intents` reference, then compile offline.
    pub async fn compile(&self, intents: &[Intent], dry_run: bool) -> Result<CompiledBatch> {
        let scope = self.resolver.prefetch_for(intents).await?;
        compile(
            intents,
            &scope,
            &CompileOptions {
                dry_run,
                max_batch_bytes: self.max_batch_bytes,
            },
        )
    }

    /// Every policy violation of `batch`. Never mutates or rejects it.
    pub fn enforce(&self, batch: &CompiledBatch) -> Vec<PolicyViolation> {
        policy::check(batch, &self.policy)
    }

    /// Dry-run compile, policy check and projected diff tier.
    pub async fn preview(&self, intents: &[Intent]) -> Result<Preview> {
        let batch = self.compile(intents, true).await?;
        let violations = self.enforce(&batch);
        let diff_tier = self
            .dispatcher
            .diff_engine()
            .thresholds()
            .tier(batch.estimated_cells());
        debug!(
            fingerprint = batch.fingerprint(),
            violations = violations.len(),
            tier = %diff_tier,
            "previewed batch"
        );
        Ok(Preview {
            fingerprint: batch.fingerprint().to_string(),
            requests: batch.requests().len(),
            estimate: *batch.estimate(),
            destructive_classes: batch.destructive_classes().iter().copied().collect(),
            diff_tier,
            violations,
            ops: batch.ops().to_vec(),
            warnings: batch.warnings().to_vec(),
        })
    }

    /// Compile, enforce and dispatch. Policy violations abort before any
    /// quota is spent unless `confirmed`.
    pub async fn execute(
        &self,
        intents: &[Intent],
        options: ExecuteOptions,
    ) -> Result<DispatchResult> {
        let batch = self.compile(intents, false).await?;
        let violations = self.enforce(&batch);
        if !violations.is_empty() {
            if !options.confirmed {
                return Err(OpsError::PolicyViolation { violations });
            }
            info!(
                fingerprint = batch.fingerprint(),
                violations = violations.len(),
                "dispatching confirmed batch despite policy violations"
            );
        }
        self.dispatch(
            &batch,
            &DispatchOptions {
                expected_fingerprint: options.expected_fingerprint,
                cancel: options.cancel,
                timeout: options.timeout,
                skip_diff: options.skip_diff,
                capture_snapshot: None,
            },
        )
        .await
    }

    /// Rate-limit, send and diff an already compiled batch.
    pub async fn dispatch(
        &self,
        batch: &CompiledBatch,
        options: &DispatchOptions,
    ) -> Result<DispatchResult> {
        self.dispatcher.dispatch(batch, options).await
    }

    /// [`Orchestrator::dispatch`] after checking that no expected range
    /// changed underneath the caller.
    pub async fn dispatch_guarded(
        &self,
        batch: &CompiledBatch,
        expectations: &[ConflictExpectation],
        options: &DispatchOptions,
    ) -> Result<DispatchResult> {
        for expectation in expectations {
            let report = self
                .conflicts
                .detect(&expectation.range, &expectation.checksum)
                .await?;
            if report.is_conflict() {
                return Err(OpsError::ConflictDetected {
                    report: Box::new(report),
                });
            }
        }
        self.dispatch(batch, options).await
    }

    pub async fn begin(&self, section_id: SectionId) -> Result<TransactionId> {
        self.transactions.begin(section_id).await
    }

    pub async fn queue(&self, id: &TransactionId, intent: Intent) -> Result<usize> {
        self.transactions.queue(id, intent).await
    }

    pub async fn commit(&self, id: &TransactionId, options: CommitOptions) -> Result<CommitOutcome> {
        self.transactions.commit(id, options).await
    }

    pub async fn rollback(&self, id: &TransactionId) -> Result<TransactionStatus> {
        self.transactions.rollback(id).await
    }

    pub async fn transaction_status(&self, id: &TransactionId) -> Result<TransactionStatus> {
        self.transactions.status(id).await
    }

    pub fn sweep_transactions(&self) -> SweepReport {
        self.transactions.sweep()
    }

    /// Compare the current content of `range` with `expected_checksum`.
    pub async fn detect_conflict(
        &self,
        section_id: SectionId,
        range: &RangeRef,
        expected_checksum: &str,
    ) -> Result<ConflictReport> {
        let range = self.resolve_in(section_id, range).await?;
        self.conflicts.detect(&range, expected_checksum).await
    }

    /// Checksum to hand back to [`Orchestrator::detect_conflict`] later.
    pub async fn range_checksum(&self, section_id: SectionId, range: &RangeRef) -> Result<String> {
        let grid = self.resolve_in(section_id, range).await?;
        self.conflicts
            .checksum(&grid)
            .await?
            .ok_or_else(|| OpsError::RangeNotFound {
                intent_index: None,
                reference: range.to_string(),
                reason: format!("section {section_id} does not exist"),
            })
    }

    async fn resolve_in(&self, section_id: SectionId, range: &RangeRef) -> Result<GridRange> {
        let reference = match range {
            RangeRef::A1 {
                section_id: None,
                notation,
            } => RangeRef::A1 {
                section_id: Some(section_id),
                notation: notation.clone(),
            },
            other => other.clone(),
        };
        let resolved = self.resolver.resolve(&reference).await?.range;
        if resolved.section_id != section_id {
            return Err(OpsError::validation(format!(
                "{reference} resolves into section {}, not section {section_id}",
                resolved.section_id
            )));
        }
        Ok(resolved)
    }
}
