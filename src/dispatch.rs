//! The one path a compiled batch takes to the provider:
//! read budget for the "before" fetch, write budget for the batch, a single
//! provider call, then the "after" fetch and the tiered diff.

use crate::compiler::CompiledBatch;
use crate::diff::{DiffEngine, DiffResult, DiffTier};
use crate::errors::{OpsError, ProviderError, Result};
use crate::model::{GridRange, SectionId, SectionState};
use crate::provider::{BatchReply, SheetProvider};
use crate::rate_limit::{OperationClass, RateLimiter};
use crate::resolver::RangeResolver;
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Fingerprint of the previewed batch; a different batch is refused.
    pub expected_fingerprint: Option<String>,
    pub cancel: Option<CancellationToken>,
    /// Overrides the dispatcher's default call timeout.
    pub timeout: Option<Duration>,
    pub skip_diff: bool,
    /// Capture a structural snapshot first. Defaults to "when destructive".
    pub capture_snapshot: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub fingerprint: String,
    pub requests_dispatched: usize,
    pub replies: BatchReply,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffResult>,
    /// Structure before a destructive batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

/// Turn a provider failure into the caller-facing error, slowing the bucket
/// when the provider reports throttling.
pub(crate) fn provider_failure(
    limiter: &RateLimiter,
    class: OperationClass,
    err: ProviderError,
) -> OpsError {
    if err.is_throttle() {
        let retry_after_ms = limiter.report_throttle(class);
        return OpsError::QuotaExceeded {
            class,
            retry_after_ms,
        };
    }
    OpsError::Provider(err)
}

/// Deadline and cancellation shared by every await of one call.
pub(crate) struct CallGuard {
    started: Instant,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallGuard {
    pub fn new(timeout: Option<Duration>, cancel: Option<CancellationToken>) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: timeout.map(|t| started + t),
            cancel: cancel.unwrap_or_default(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Await `fut` unless the call is cancelled or runs past its deadline.
    pub async fn run<T>(
        &self,
        operation: &'static str,
        dispatched: bool,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or_else(|_| {
                        Err(OpsError::Timeout {
                            operation,
                            elapsed_ms: self.elapsed_ms(),
                            dispatched,
                        })
                    }),
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OpsError::Cancelled { operation, dispatched }),
            out = bounded => out,
        }
    }
}

/// What to fetch around the batch for the diff.
struct DiffPlan {
    tier: DiffTier,
    targets: Vec<(SectionId, Option<GridRange>)>,
    warnings: Vec<String>,
}

pub struct Dispatcher {
    provider: Arc<dyn SheetProvider>,
    limiter: Arc<RateLimiter>,
    resolver: Option<Arc<RangeResolver>>,
    diff: DiffEngine,
    snapshot_max_bytes: usize,
    default_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn SheetProvider>,
        limiter: Arc<RateLimiter>,
        diff: DiffEngine,
        snapshot_max_bytes: usize,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            provider,
            limiter,
            resolver: None,
            diff,
            snapshot_max_bytes,
            default_timeout,
        }
    }

    /// Invalidate this resolver's cache for every section a batch touched.
    pub fn with_resolver(mut self, resolver: Arc<RangeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn provider(&self) -> &Arc<dyn SheetProvider> {
        &self.provider
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn diff_engine(&self) -> &DiffEngine {
        &self.diff
    }

    pub fn snapshot_max_bytes(&self) -> usize {
        self.snapshot_max_bytes
    }

    pub(crate) fn guard(&self, options: &DispatchOptions) -> CallGuard {
        CallGuard::new(
            options.timeout.or(self.default_timeout),
            options.cancel.clone(),
        )
    }

    /// Send `batch` to the provider in compiler order, in one call.
    pub async fn dispatch(
        &self,
        batch: &CompiledBatch,
        options: &DispatchOptions,
    ) -> Result<DispatchResult> {
        let guard = self.guard(options);
        self.dispatch_with(batch, options, &guard).await
    }

    pub(crate) async fn dispatch_with(
        &self,
        batch: &CompiledBatch,
        options: &DispatchOptions,
        guard: &CallGuard,
    ) -> Result<DispatchResult> {
        if batch.is_dry_run() {
            return Err(OpsError::validation(
                "dry-run batches are compile-only; recompile or call for_dispatch()",
            ));
        }
        if let Some(expected) = &options.expected_fingerprint
            && expected != batch.fingerprint()
        {
            return Err(OpsError::validation(format!(
                "batch fingerprint {} does not match the previewed {expected}; recompile and preview again",
                batch.fingerprint()
            )));
        }
        if batch.is_empty() {
            return Ok(DispatchResult {
                fingerprint: batch.fingerprint().to_string(),
                requests_dispatched: 0,
                replies: BatchReply::default(),
                diff: None,
                snapshot: None,
                warnings: batch.warnings().to_vec(),
                elapsed_ms: guard.elapsed_ms(),
            });
        }

        let mut warnings = batch.warnings().to_vec();

        let snapshot = if options
            .capture_snapshot
            .unwrap_or_else(|| batch.is_destructive())
        {
            let focus = batch.sections().into_iter().next();
            Some(guard.run("snapshot", false, self.capture_snapshot(focus)).await?)
        } else {
            None
        };

        let plan = (!options.skip_diff).then(|| self.plan_diff(batch));
        let before = match &plan {
            Some(plan) => Some(guard.run("diff prefetch", false, self.fetch_states(plan)).await?),
            None => None,
        };

        guard
            .run(
                "write quota",
                false,
                self.limiter
                    .acquire_with_cancel(OperationClass::Write, 1, guard.cancel_token()),
            )
            .await?;

        let replies = guard
            .run("batch dispatch", true, async {
                self.provider
                    .batch_dispatch(batch.requests())
                    .await
                    .map_err(|err| provider_failure(&self.limiter, OperationClass::Write, err))
            })
            .await;
        self.invalidate(batch);
        let replies = match replies {
            Ok(replies) => replies,
            Err(err) => {
                warn!(
                    fingerprint = batch.fingerprint(),
                    code = err.code(),
                    error = %err,
                    "batch dispatch failed"
                );
                return Err(err);
            }
        };

        let diff = match (plan, before) {
            (Some(plan), Some(before)) => {
                warnings.extend(plan.warnings.iter().cloned());
                match guard.run("diff fetch", true, self.fetch_states(&plan)).await {
                    Ok(after) => Some(self.diff_states(&before, &after, batch.estimated_cells())),
                    Err(err) => {
                        warnings.push(format!("dispatch succeeded but the diff fetch failed: {err}"));
                        None
                    }
                }
            }
            _ => None,
        };

        let elapsed_ms = guard.elapsed_ms();
        info!(
            requests = batch.requests().len(),
            cells = batch.estimated_cells(),
            tier = ?diff.as_ref().map(DiffResult::tier),
            elapsed_ms,
            fingerprint = batch.fingerprint(),
            "dispatched batch"
        );

        Ok(DispatchResult {
            fingerprint: batch.fingerprint().to_string(),
            requests_dispatched: batch.requests().len(),
            replies,
            diff,
            snapshot,
            warnings,
            elapsed_ms,
        })
    }

    fn invalidate(&self, batch: &CompiledBatch) {
        if let Some(resolver) = &self.resolver {
            resolver.invalidate(batch.sections());
        }
    }

    pub(crate) async fn capture_snapshot(&self, focus: Option<SectionId>) -> Result<Snapshot> {
        self.limiter.acquire(OperationClass::Read, 1).await?;
        let document = self
            .provider
            .fetch_document()
            .await
            .map_err(|err| provider_failure(&self.limiter, OperationClass::Read, err))?;
        Snapshot::capture(&document, focus, self.snapshot_max_bytes)
    }

    /// Values are fetched per section over the bounding box of the batch's
    /// footprints, unless that box is far larger than the estimate.
    fn plan_diff(&self, batch: &CompiledBatch) -> DiffPlan {
        let tier = self.diff.thresholds().tier(batch.estimated_cells());
        let mut boxes: BTreeMap<SectionId, (GridRange, u64)> = BTreeMap::new();
        for range in batch.footprints() {
            boxes
                .entry(range.section_id)
                .and_modify(|(bounds, area)| {
                    *bounds = bounds.bounding(range).unwrap_or(*bounds);
                    *area += range.area();
                })
                .or_insert((*range, range.area()));
        }

        let fetch_ceiling = self.diff.thresholds().sample_max_cells.max(1);
        let mut warnings = Vec::new();
        let targets = batch
            .sections()
            .into_iter()
            .map(|id| {
                let range = match (tier, boxes.get(&id)) {
                    (DiffTier::Metadata, _) | (_, None) => None,
                    (_, Some((bounds, area))) => {
                        if bounds.area() <= fetch_ceiling.max(area.saturating_mul(2)) {
                            Some(*bounds)
                        } else {
                            warnings.push(format!(
                                "changes in section {id} are too scattered to diff cell by cell"
                            ));
                            None
                        }
                    }
                };
                (id, range)
            })
            .collect();
        DiffPlan {
            tier,
            targets,
            warnings,
        }
    }

    async fn fetch_states(&self, plan: &DiffPlan) -> Result<Vec<SectionState>> {
        let mut states = Vec::with_capacity(plan.targets.len());
        for (id, range) in &plan.targets {
            self.limiter.acquire(OperationClass::Read, 1).await?;
            let state = self
                .provider
                .fetch_section(*id, range.as_ref())
                .await
                .map_err(|err| provider_failure(&self.limiter, OperationClass::Read, err))?;
            states.push(state);
        }
        debug!(sections = states.len(), tier = %plan.tier, "fetched diff states");
        Ok(states)
    }

    fn diff_states(
        &self,
        before: &[SectionState],
        after: &[SectionState],
        estimated_cells: u64,
    ) -> DiffResult {
        self.diff
            .diff_sections(before.iter().zip(after.iter()), estimated_cells)
    }
}
