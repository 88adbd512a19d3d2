//! Pseudo-transactions over a service that has no server-side rollback.
//!
//! `begin` captures a structural snapshot, `queue` collects intents locally and
//! `commit` compiles them into one batch. When the provider fails part way
//! through a commit, the applied prefix is undone with compensating intents
//! built from values captured just before dispatch. What cannot be undone is
//! reported, never hidden.

use crate::compiler::{CompileOptions, CompiledBatch, CompiledOp, compile};
use crate::dispatch::{CallGuard, DispatchOptions, DispatchResult, Dispatcher, provider_failure};
use crate::errors::{OpsError, ProviderErrorKind, Result};
use crate::intent::Intent;
use crate::intent::inverse::{
    CapturedRegion, Compensation, CompensationInput, CreatedIds, needs_value_capture,
    plan_compensation, value_restore,
};
use crate::model::{DocumentMetadata, SectionId};
use crate::policy::{self, Policy, PolicyViolation};
use crate::provider::RequestReply;
use crate::rate_limit::OperationClass;
use crate::resolver::RangeResolver;
use crate::snapshot::Snapshot;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_COMPENSATION_MAX_CELLS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    fn generate() -> Self {
        Self(format!("tx-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionState {
    /// Registered; the snapshot is being captured.
    Pending,
    Active,
    Committed,
    RolledBack,
    /// Ended in a state that could not be fully restored.
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

/// How a failed commit is undone.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    clap::ValueEnum,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RollbackMode {
    /// Per-intent compensation from captured values and document structure.
    #[default]
    Compensating,
    /// Restore only what the begin-time snapshot describes.
    Structural,
}

#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Active transactions older than this are rolled back by the sweep.
    pub retention: Duration,
    /// Terminal transactions stay queryable this long.
    pub grace: Duration,
    pub rollback_mode: RollbackMode,
    /// Ceiling on cells captured for compensation per commit.
    pub compensation_max_cells: u64,
    pub max_batch_bytes: Option<usize>,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            grace: DEFAULT_GRACE,
            rollback_mode: RollbackMode::default(),
            compensation_max_cells: DEFAULT_COMPENSATION_MAX_CELLS,
            max_batch_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Accept policy violations.
    pub confirmed: bool,
    pub cancel: Option<CancellationToken>,
    pub timeout: Option<Duration>,
}

/// An intent whose effect could only be partly undone, or not at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoGap {
    pub intent_index: usize,
    pub kind: &'static str,
    pub compensation: Compensation,
}

/// What recovery after a failed commit did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub mode: RollbackMode,
    /// Leading requests the provider applied; `None` when it could not say.
    pub applied_requests: Option<usize>,
    pub compensated_intents: Vec<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gaps: Vec<UndoGap>,
    pub restore_requests: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when the compensating batch itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionOutcome {
    pub state: TransactionState,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionStatus {
    pub transaction_id: TransactionId,
    pub state: TransactionState,
    pub section_id: SectionId,
    pub queued: usize,
    pub age_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TransactionOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub transaction_id: TransactionId,
    pub state: TransactionState,
    pub dispatched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchResult>,
    /// Violations accepted by confirmation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accepted_violations: Vec<PolicyViolation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
}

struct Transaction {
    id: TransactionId,
    section_id: SectionId,
    state: TransactionState,
    intents: Vec<Intent>,
    snapshot: Option<Snapshot>,
    created_at: Instant,
    finished_at: Option<Instant>,
    outcome: Option<TransactionOutcome>,
}

impl Transaction {
    fn new(id: TransactionId, section_id: SectionId) -> Self {
        Self {
            id,
            section_id,
            state: TransactionState::Pending,
            intents: Vec::new(),
            snapshot: None,
            created_at: Instant::now(),
            finished_at: None,
            outcome: None,
        }
    }

    fn require(&self, state: TransactionState, operation: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(OpsError::InvalidTransactionState {
                transaction_id: self.id.clone(),
                state: self.state,
                operation,
            })
        }
    }

    fn finish(
        &mut self,
        state: TransactionState,
        reason: impl Into<String>,
        fingerprint: Option<String>,
        recovery: Option<RecoveryReport>,
    ) {
        self.state = state;
        self.finished_at = Some(Instant::now());
        self.intents.clear();
        self.outcome = Some(TransactionOutcome {
            state,
            reason: reason.into(),
            fingerprint,
            recovery,
        });
    }

    fn status(&self) -> TransactionStatus {
        TransactionStatus {
            transaction_id: self.id.clone(),
            state: self.state,
            section_id: self.section_id,
            queued: self.intents.len(),
            age_ms: self.created_at.elapsed().as_millis() as u64,
            snapshot: self.snapshot.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Pre-dispatch state kept for compensation.
#[derive(Default)]
struct Captured {
    /// Indexed like the batch's ops.
    regions: Vec<Vec<CapturedRegion>>,
    document: Option<DocumentMetadata>,
    warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppliedPrefix {
    Nothing,
    Known(usize),
    Unknown,
}

impl AppliedPrefix {
    fn of(err: &OpsError) -> Self {
        match err {
            OpsError::Provider(provider) => match (provider.applied_requests, provider.kind) {
                (Some(0), _) => Self::Nothing,
                (Some(n), _) => Self::Known(n),
                // Rejected before the batch was applied.
                (
                    None,
                    ProviderErrorKind::Auth
                    | ProviderErrorKind::NotFound
                    | ProviderErrorKind::InvalidRequest
                    | ProviderErrorKind::Throttled,
                ) => Self::Nothing,
                (None, ProviderErrorKind::Unavailable | ProviderErrorKind::Other) => Self::Unknown,
            },
            OpsError::Timeout {
                dispatched: true, ..
            }
            | OpsError::Cancelled {
                dispatched: true, ..
            } => Self::Unknown,
            _ => Self::Nothing,
        }
    }

    fn count(self) -> Option<usize> {
        match self {
            Self::Nothing => Some(0),
            Self::Known(n) => Some(n),
            Self::Unknown => None,
        }
    }
}

/// What the failed dispatch left applied, with the replies the provider sent
/// for that prefix.
#[derive(Clone, Copy)]
struct Applied<'a> {
    prefix: AppliedPrefix,
    replies: &'a [RequestReply],
}

/// Ids assigned by the provider to objects `op`'s requests created.
fn created_ids(op: &CompiledOp, replies: &[RequestReply]) -> CreatedIds {
    let mut created = CreatedIds::default();
    for reply in op.request_indices.iter().filter_map(|&i| replies.get(i)) {
        created.section_id = created.section_id.or(reply.created_section_id);
        created.object_id = created.object_id.or(reply.created_object_id);
        if created.permission_id.is_none() {
            created.permission_id = reply.created_permission_id.clone();
        }
    }
    created
}

type Handle = Arc<AsyncMutex<Transaction>>;

/// Table of live transactions. Each transaction has its own lock, so a slow
/// commit never blocks work on another transaction.
pub struct TransactionManager {
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<RangeResolver>,
    policy: Policy,
    config: TransactionConfig,
    table: Mutex<HashMap<TransactionId, Handle>>,
}

impl TransactionManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<RangeResolver>,
        policy: Policy,
        config: TransactionConfig,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            policy,
            config,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Open a transaction anchored on `section_id` and snapshot the document.
    pub async fn begin(&self, section_id: SectionId) -> Result<TransactionId> {
        self.sweep();
        let id = TransactionId::generate();
        let handle: Handle = Arc::new(AsyncMutex::new(Transaction::new(id.clone(), section_id)));
        let mut tx = handle.clone().lock_owned().await;
        self.table.lock().insert(id.clone(), handle);

        match self.dispatcher.capture_snapshot(Some(section_id)).await {
            Ok(snapshot) => {
                debug!(
                    transaction_id = %id,
                    sections = snapshot.sections().len(),
                    bytes = snapshot.serialized_bytes(),
                    "captured transaction snapshot"
                );
                tx.snapshot = Some(snapshot);
                tx.state = TransactionState::Active;
                info!(transaction_id = %id, section_id = %section_id, "transaction begun");
                Ok(id)
            }
            Err(err) => {
                warn!(transaction_id = %id, error = %err, "snapshot capture failed");
                tx.finish(
                    TransactionState::Failed,
                    format!("snapshot capture failed: {err}"),
                    None,
                    None,
                );
                Err(err)
            }
        }
    }

    /// Append an intent; returns the queue length. Nothing is sent.
    pub async fn queue(&self, id: &TransactionId, intent: Intent) -> Result<usize> {
        let handle = self.handle(id)?;
        let mut tx = handle.lock().await;
        tx.require(TransactionState::Active, "queue")?;
        let position = tx.intents.len();
        intent.validate().map_err(|e| e.at_intent(position))?;
        tx.intents.push(intent);
        Ok(tx.intents.len())
    }

    /// Compile the queue into one batch, enforce policy and dispatch it.
    ///
    /// Failures before anything reached the provider leave the transaction
    /// active so the caller can fix and retry. Once requests were applied, the
    /// applied prefix is compensated and the transaction ends `RolledBack`, or
    /// `Failed` when some of it could not be undone.
    pub async fn commit(&self, id: &TransactionId, options: CommitOptions) -> Result<CommitOutcome> {
        let handle = self.handle(id)?;
        let mut tx = handle.lock().await;
        tx.require(TransactionState::Active, "commit")?;

        if tx.intents.is_empty() {
            tx.finish(
                TransactionState::Committed,
                "empty transaction; nothing dispatched",
                None,
                None,
            );
            info!(transaction_id = %id, "committed empty transaction");
            return Ok(CommitOutcome {
                transaction_id: id.clone(),
                state: tx.state,
                dispatched: false,
                dispatch: None,
                accepted_violations: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let dispatch_options = DispatchOptions {
            cancel: options.cancel.clone(),
            timeout: options.timeout,
            capture_snapshot: Some(false),
            ..DispatchOptions::default()
        };
        let guard = self.dispatcher.guard(&dispatch_options);

        let batch = guard
            .run("transaction compile", false, self.compile(&tx.intents))
            .await?;
        let violations = policy::check(&batch, &self.policy);
        if !violations.is_empty() && !options.confirmed {
            return Err(OpsError::PolicyViolation { violations });
        }

        let captured = match self.config.rollback_mode {
            RollbackMode::Compensating => {
                guard
                    .run("compensation capture", false, self.capture(&batch, &tx.intents))
                    .await?
            }
            RollbackMode::Structural => Captured::default(),
        };

        match self
            .dispatcher
            .dispatch_with(&batch, &dispatch_options, &guard)
            .await
        {
            Ok(result) => {
                let mut warnings = captured.warnings;
                warnings.extend(result.warnings.iter().cloned());
                tx.finish(
                    TransactionState::Committed,
                    "committed",
                    Some(batch.fingerprint().to_string()),
                    None,
                );
                info!(
                    transaction_id = %id,
                    requests = result.requests_dispatched,
                    elapsed_ms = result.elapsed_ms,
                    "transaction committed"
                );
                Ok(CommitOutcome {
                    transaction_id: id.clone(),
                    state: tx.state,
                    dispatched: true,
                    dispatch: Some(result),
                    accepted_violations: violations,
                    warnings,
                })
            }
            Err(err) => {
                let applied = AppliedPrefix::of(&err);
                if applied == AppliedPrefix::Nothing {
                    debug!(transaction_id = %id, error = %err, "commit failed before any request applied");
                    return Err(err);
                }
                warn!(
                    transaction_id = %id,
                    applied = ?applied.count(),
                    error = %err,
                    "commit failed after dispatch; recovering"
                );
                let replies: &[RequestReply] = match &err {
                    OpsError::Provider(provider) => provider.applied_replies.as_slice(),
                    _ => &[],
                };
                let (state, report) = self
                    .recover(
                        &batch,
                        &tx.intents,
                        &captured,
                        Applied { prefix: applied, replies },
                        tx.snapshot.as_ref(),
                    )
                    .await;
                tx.finish(
                    state,
                    format!("commit failed: {err}"),
                    Some(batch.fingerprint().to_string()),
                    Some(report),
                );
                info!(transaction_id = %id, state = %state, "transaction recovery finished");
                Err(err)
            }
        }
    }

    /// Abandon a transaction that has not committed. Nothing remote happens.
    pub async fn rollback(&self, id: &TransactionId) -> Result<TransactionStatus> {
        let handle = self.handle(id)?;
        let mut tx = handle.lock().await;
        if tx.state.is_terminal() {
            return Err(OpsError::InvalidTransactionState {
                transaction_id: id.clone(),
                state: tx.state,
                operation: "rollback",
            });
        }
        let discarded = tx.intents.len();
        tx.finish(
            TransactionState::RolledBack,
            "rolled back before commit; nothing was dispatched",
            None,
            None,
        );
        info!(transaction_id = %id, discarded, "transaction rolled back");
        Ok(tx.status())
    }

    pub async fn status(&self, id: &TransactionId) -> Result<TransactionStatus> {
        let handle = self.handle(id)?;
        let tx = handle.lock().await;
        Ok(tx.status())
    }

    /// Expire idle transactions and purge terminal ones past their grace
    /// period. Transactions busy in another call are left for the next sweep.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let retention = self.config.retention;
        let grace = self.config.grace;
        self.table.lock().retain(|id, handle| {
            let Ok(mut tx) = handle.try_lock() else {
                return true;
            };
            if !tx.state.is_terminal() && tx.created_at.elapsed() > retention {
                tx.finish(
                    TransactionState::RolledBack,
                    "expired before commit",
                    None,
                    None,
                );
                report.expired += 1;
                debug!(transaction_id = %id, "transaction expired");
                return true;
            }
            let purge = tx
                .finished_at
                .is_some_and(|finished| finished.elapsed() > grace);
            if purge {
                report.purged += 1;
            }
            !purge
        });
        report
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    fn handle(&self, id: &TransactionId) -> Result<Handle> {
        self.sweep();
        self.table
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| OpsError::UnknownTransaction {
                transaction_id: id.clone(),
            })
    }

    async fn compile(&self, intents: &[Intent]) -> Result<CompiledBatch> {
        let scope = self.resolver.prefetch_for(intents).await?;
        compile(
            intents,
            &scope,
            &CompileOptions {
                dry_run: false,
                max_batch_bytes: self.config.max_batch_bytes,
            },
        )
    }

    async fn fetch_document(&self) -> Result<DocumentMetadata> {
        let limiter = self.dispatcher.limiter();
        limiter.acquire(OperationClass::Read, 1).await?;
        self.dispatcher
            .provider()
            .fetch_document()
            .await
            .map_err(|err| provider_failure(limiter, OperationClass::Read, err))
    }

    /// Read the values each value-restoring op is about to overwrite, up to
    /// the compensation cell ceiling.
    async fn capture(&self, batch: &CompiledBatch, intents: &[Intent]) -> Result<Captured> {
        let limiter = self.dispatcher.limiter();
        let provider = self.dispatcher.provider();
        let mut captured = Captured {
            regions: vec![Vec::new(); batch.ops().len()],
            document: Some(self.fetch_document().await?),
            warnings: Vec::new(),
        };
        let mut budget = self.config.compensation_max_cells;

        for (slot, op) in batch.ops().iter().enumerate() {
            if !needs_value_capture(&intents[op.intent_index]) {
                continue;
            }
            if op.area > budget {
                captured.warnings.push(format!(
                    "intent #{} covers {} cells, beyond the remaining compensation budget of {budget}; it cannot be undone",
                    op.intent_index, op.area
                ));
                continue;
            }
            budget -= op.area;
            for range in &op.footprint {
                limiter.acquire(OperationClass::Read, 1).await?;
                let state = provider
                    .fetch_section(range.section_id, Some(range))
                    .await
                    .map_err(|err| provider_failure(limiter, OperationClass::Read, err))?;
                captured.regions[slot].push(CapturedRegion {
                    range: *range,
                    values: state.values_in(range),
                });
            }
        }
        debug!(
            cells = self.config.compensation_max_cells - budget,
            "captured values for compensation"
        );
        Ok(captured)
    }

    async fn recover(
        &self,
        batch: &CompiledBatch,
        intents: &[Intent],
        captured: &Captured,
        applied: Applied<'_>,
        snapshot: Option<&Snapshot>,
    ) -> (TransactionState, RecoveryReport) {
        let Applied {
            prefix: applied,
            replies,
        } = applied;
        let mut report = RecoveryReport {
            mode: self.config.rollback_mode,
            applied_requests: applied.count(),
            compensated_intents: Vec::new(),
            gaps: Vec::new(),
            restore_requests: 0,
            warnings: captured.warnings.clone(),
            error: None,
        };

        let restore = match self.config.rollback_mode {
            RollbackMode::Compensating => {
                self.compensation_intents(batch, intents, captured, applied, replies, &mut report)
            }
            RollbackMode::Structural => match (snapshot, self.fetch_document().await) {
                (Some(snapshot), Ok(current)) => {
                    let plan = snapshot.restore_plan(&current);
                    report.warnings.extend(plan.warnings);
                    plan.intents
                }
                (None, _) => {
                    report.error = Some("no snapshot to restore from".to_string());
                    Vec::new()
                }
                (_, Err(err)) => {
                    report.error = Some(format!("could not list the document: {err}"));
                    Vec::new()
                }
            },
        };

        if !restore.is_empty() && report.error.is_none() {
            match self.dispatch_restore(&restore).await {
                Ok(requests) => report.restore_requests = requests,
                Err(err) => {
                    warn!(error = %err, "compensating batch failed");
                    report.error = Some(err.to_string());
                }
            }
        }

        let clean = applied != AppliedPrefix::Unknown
            && self.config.rollback_mode == RollbackMode::Compensating
            && report.error.is_none()
            && !report
                .gaps
                .iter()
                .any(|gap| matches!(gap.compensation, Compensation::Irreversible { .. }));
        let state = if clean {
            TransactionState::RolledBack
        } else {
            TransactionState::Failed
        };
        (state, report)
    }

    fn compensation_intents(
        &self,
        batch: &CompiledBatch,
        intents: &[Intent],
        captured: &Captured,
        applied: AppliedPrefix,
        replies: &[RequestReply],
        report: &mut RecoveryReport,
    ) -> Vec<Intent> {
        let mut restore = Vec::new();
        for (slot, op) in batch.ops().iter().enumerate().rev() {
            let intent = &intents[op.intent_index];
            let created = created_ids(op, replies);
            let input = CompensationInput {
                footprint: &op.footprint,
                captured: &captured.regions[slot],
                document: captured.document.as_ref(),
                created: &created,
            };
            match applied {
                AppliedPrefix::Known(count) => {
                    if !op.request_indices.iter().any(|&i| i < count) {
                        continue;
                    }
                    let plan = plan_compensation(intent, input);
                    if !plan.compensation.is_exact() {
                        warn!(
                            intent_index = op.intent_index,
                            kind = op.kind,
                            compensation = ?plan.compensation,
                            "intent cannot be fully undone"
                        );
                        report.gaps.push(UndoGap {
                            intent_index: op.intent_index,
                            kind: op.kind,
                            compensation: plan.compensation,
                        });
                    }
                    if !plan.intents.is_empty() {
                        report.compensated_intents.push(op.intent_index);
                    }
                    restore.extend(plan.intents);
                }
                AppliedPrefix::Unknown => {
                    let values = value_restore(intent, input);
                    if !values.is_empty() {
                        report.compensated_intents.push(op.intent_index);
                    }
                    restore.extend(values);
                }
                AppliedPrefix::Nothing => {}
            }
        }
        if applied == AppliedPrefix::Unknown {
            report.warnings.push(
                "the provider did not report how much of the batch applied; only captured values were restored"
                    .to_string(),
            );
        }
        restore
    }

    /// Dispatch recovery intents on their own deadline; the caller's
    /// cancellation does not apply to cleanup.
    async fn dispatch_restore(&self, intents: &[Intent]) -> Result<usize> {
        let batch = self.compile(intents).await?;
        let options = DispatchOptions {
            skip_diff: true,
            capture_snapshot: Some(false),
            ..DispatchOptions::default()
        };
        let guard: CallGuard = self.dispatcher.guard(&options);
        let result = self.dispatcher.dispatch_with(&batch, &options, &guard).await?;
        Ok(result.requests_dispatched)
    }
}
