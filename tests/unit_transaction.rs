use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::time::Instant;

use sheetops::compiler::ProviderRequest;
use sheetops::errors::ProviderErrorKind;
use sheetops::intent::{Anchor, ChartSpec, ChartType, LegendPosition};
use sheetops::model::{CellValue, Color, GridRange, SectionId};
use sheetops::provider::Fault;
use sheetops::rate_limit::OperationClass;
use sheetops::transaction::RollbackMode;
use sheetops::{CommitOptions, Intent, OpsError, RangeRef, TransactionId, TransactionState};

mod support;

use support::builders::n;
use support::{SALES, a1, set_values};

fn highlight_header() -> Intent {
    Intent::SetBackgroundColor {
        range: a1(SALES, "A1:D1"),
        color: Color::rgb(0.9, 0.9, 0.9),
    }
}

#[tokio::test]
async fn empty_commit_dispatches_nothing() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    let outcome = ops.commit(&id, CommitOptions::default()).await.unwrap();

    assert_eq!(outcome.state, TransactionState::Committed);
    assert!(!outcome.dispatched);
    assert!(outcome.dispatch.is_none());
    assert_eq!(provider.dispatch_count(), 0);
}

#[tokio::test]
async fn begin_captures_a_structural_snapshot() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    let status = ops.transaction_status(&id).await.unwrap();

    assert_eq!(status.state, TransactionState::Active);
    assert_eq!(status.section_id, SALES);
    let snapshot = status.snapshot.expect("snapshot");
    assert_eq!(snapshot.section_count(), 2);
    assert!(!snapshot.is_truncated());
}

#[tokio::test]
async fn queued_intents_go_out_in_one_call() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    assert_eq!(
        ops.queue(&id, set_values(SALES, "B2", vec![vec![n(1.0)]]))
            .await
            .unwrap(),
        1
    );
    assert_eq!(ops.queue(&id, highlight_header()).await.unwrap(), 2);
    assert_eq!(provider.dispatch_count(), 0, "queue never dispatches");

    let outcome = ops.commit(&id, CommitOptions::default()).await.unwrap();
    assert_eq!(outcome.state, TransactionState::Committed);
    assert!(outcome.dispatched);
    assert_eq!(provider.dispatch_count(), 1);
    assert_eq!(provider.cell(SALES, 1, 1), CellValue::Number(1.0));

    let status = ops.transaction_status(&id).await.unwrap();
    assert_eq!(status.queued, 0);
    let fingerprint = status.outcome.and_then(|o| o.fingerprint);
    assert_eq!(
        fingerprint.as_deref(),
        outcome.dispatch.as_ref().map(|d| d.fingerprint.as_str())
    );
}

#[tokio::test]
async fn invalid_intent_is_rejected_at_queue_time() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    let err = ops
        .queue(
            &id,
            Intent::ClearValues {
                range: RangeRef::Named {
                    name: "  ".into(),
                },
            },
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        OpsError::Validation {
            intent_index: Some(1),
            ..
        }
    );
    assert_eq!(ops.transaction_status(&id).await.unwrap().queued, 1);
}

#[tokio::test]
async fn terminal_transactions_refuse_further_verbs() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.commit(&id, CommitOptions::default()).await.unwrap();
    let err = ops.commit(&id, CommitOptions::default()).await.unwrap_err();
    assert_matches!(
        err,
        OpsError::InvalidTransactionState {
            state: TransactionState::Committed,
            operation: "commit",
            ..
        }
    );
    let err = ops.rollback(&id).await.unwrap_err();
    assert_matches!(
        err,
        OpsError::InvalidTransactionState {
            operation: "rollback",
            ..
        }
    );
}

#[tokio::test]
async fn rollback_before_commit_discards_the_queue() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    let status = ops.rollback(&id).await.unwrap();
    assert_eq!(status.state, TransactionState::RolledBack);
    assert_eq!(status.queued, 0);
    assert_eq!(provider.dispatch_count(), 0);

    let err = ops.queue(&id, highlight_header()).await.unwrap_err();
    assert_matches!(
        err,
        OpsError::InvalidTransactionState {
            state: TransactionState::RolledBack,
            operation: "queue",
            ..
        }
    );
    let err = ops.commit(&id, CommitOptions::default()).await.unwrap_err();
    assert_matches!(err, OpsError::InvalidTransactionState { .. });
}

#[tokio::test]
async fn unknown_transaction_ids_are_reported() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let err = ops
        .transaction_status(&TransactionId::from("tx-missing"))
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::UnknownTransaction { .. });
    assert_eq!(err.code(), "UNKNOWN_TRANSACTION");
}

#[tokio::test]
async fn policy_violation_keeps_the_transaction_open() {
    let provider = support::sales_book();
    let ops = support::orchestrator_with(&provider, |config| config.max_cells = 2);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();

    let err = ops.commit(&id, CommitOptions::default()).await.unwrap_err();
    assert_matches!(err, OpsError::PolicyViolation { .. });
    assert_eq!(provider.dispatch_count(), 0);
    assert_eq!(
        ops.transaction_status(&id).await.unwrap().state,
        TransactionState::Active
    );

    let outcome = ops
        .commit(
            &id,
            CommitOptions {
                confirmed: true,
                ..CommitOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.state, TransactionState::Committed);
    assert_eq!(outcome.accepted_violations.len(), 1);
    assert_eq!(provider.dispatch_count(), 1);
}

#[tokio::test]
async fn throttled_commit_stays_active_and_slows_the_bucket() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    provider.inject(Fault::Throttle);

    let err = ops.commit(&id, CommitOptions::default()).await.unwrap_err();
    assert_matches!(
        err,
        OpsError::QuotaExceeded {
            class: OperationClass::Write,
            ..
        }
    );
    assert!(err.is_retryable());
    assert!(ops.limiter().snapshot(OperationClass::Write).cooling_down);
    assert_eq!(
        ops.transaction_status(&id).await.unwrap().state,
        TransactionState::Active
    );

    let outcome = ops.commit(&id, CommitOptions::default()).await.unwrap();
    assert_eq!(outcome.state, TransactionState::Committed);
}

#[tokio::test]
async fn partial_failure_is_compensated() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, set_values(SALES, "B2", vec![vec![n(999.0)]]))
        .await
        .unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    provider.inject(Fault::FailAfter(1));

    let err = ops.commit(&id, CommitOptions::default()).await.unwrap_err();
    assert_matches!(err, OpsError::Provider(_));

    let status = ops.transaction_status(&id).await.unwrap();
    assert_eq!(status.state, TransactionState::RolledBack);
    let recovery = status
        .outcome
        .and_then(|o| o.recovery)
        .expect("recovery report");
    assert_eq!(recovery.mode, RollbackMode::Compensating);
    assert_eq!(recovery.applied_requests, Some(1));
    assert_eq!(recovery.compensated_intents, vec![0]);
    assert!(recovery.gaps.is_empty());
    assert!(recovery.restore_requests >= 1);
    assert_eq!(provider.cell(SALES, 1, 1), CellValue::Number(120.0));
    assert_eq!(provider.dispatch_count(), 2);
}

#[tokio::test]
async fn applied_irreversible_intent_fails_the_transaction() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, set_values(SALES, "B2", vec![vec![n(999.0)]]))
        .await
        .unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    ops.queue(&id, set_values(SALES, "F50", vec![vec![n(1.0)]]))
        .await
        .unwrap();
    provider.inject(Fault::FailAfter(2));

    ops.commit(&id, CommitOptions::default()).await.unwrap_err();

    let status = ops.transaction_status(&id).await.unwrap();
    assert_eq!(status.state, TransactionState::Failed);
    let recovery = status.outcome.and_then(|o| o.recovery).unwrap();
    assert_eq!(recovery.gaps.len(), 1);
    assert_eq!(recovery.gaps[0].intent_index, 1);
    assert_eq!(provider.cell(SALES, 1, 1), CellValue::Number(120.0));
}

#[tokio::test]
async fn opaque_failure_restores_values_but_fails() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, set_values(SALES, "B2", vec![vec![n(999.0)]]))
        .await
        .unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    provider.inject(Fault::Opaque(1));

    ops.commit(&id, CommitOptions::default()).await.unwrap_err();

    let status = ops.transaction_status(&id).await.unwrap();
    assert_eq!(status.state, TransactionState::Failed);
    let recovery = status.outcome.and_then(|o| o.recovery).unwrap();
    assert_eq!(recovery.applied_requests, None);
    assert!(!recovery.warnings.is_empty());
    assert_eq!(provider.cell(SALES, 1, 1), CellValue::Number(120.0));
}

#[tokio::test]
async fn structural_mode_removes_sections_added_by_a_failed_commit() {
    let provider = support::sales_book();
    let ops = support::orchestrator_with(&provider, |config| {
        config.rollback_mode = RollbackMode::Structural;
    });

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(
        &id,
        Intent::AddSheet {
            title: "Scratch".into(),
            index: None,
            section_id: Some(SectionId(9)),
            rows: Some(10),
            columns: Some(5),
        },
    )
    .await
    .unwrap();
    ops.queue(&id, set_values(SALES, "B2", vec![vec![n(999.0)]]))
        .await
        .unwrap();
    provider.inject(Fault::FailAfter(1));

    ops.commit(&id, CommitOptions::default()).await.unwrap_err();

    let status = ops.transaction_status(&id).await.unwrap();
    assert_eq!(status.state, TransactionState::Failed);
    let recovery = status.outcome.and_then(|o| o.recovery).unwrap();
    assert_eq!(recovery.mode, RollbackMode::Structural);
    assert!(recovery.error.is_none(), "{:?}", recovery.error);
    assert!(provider.document().section(SectionId(9)).is_none());
}

#[tokio::test]
async fn snapshot_over_the_ceiling_fails_begin() {
    let provider = support::sales_book();
    let ops = support::orchestrator_with(&provider, |config| config.snapshot_max_bytes = 16);

    let err = ops.begin(SALES).await.unwrap_err();
    assert_matches!(err, OpsError::SnapshotTooLarge { limit: 16, .. });
}

#[tokio::test(start_paused = true)]
async fn idle_transactions_expire_then_get_purged() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();

    tokio::time::advance(Duration::from_secs(3601)).await;
    let report = ops.sweep_transactions();
    assert_eq!(report.expired, 1);
    let status = ops.transaction_status(&id).await.unwrap();
    assert_eq!(status.state, TransactionState::RolledBack);
    assert_eq!(provider.dispatch_count(), 0);

    tokio::time::advance(Duration::from_secs(601)).await;
    let err = ops.transaction_status(&id).await.unwrap_err();
    assert_matches!(err, OpsError::UnknownTransaction { .. });
    assert!(ops.transactions().is_empty());
}

#[tokio::test]
async fn grid_compensation_restores_exact_ranges() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let before = provider.values(&GridRange::new(SALES, 1, 4, 0, 4));

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(
        &id,
        Intent::ClearValues {
            range: RangeRef::Grid(GridRange::new(SALES, 1, 4, 0, 4)),
        },
    )
    .await
    .unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    provider.inject(Fault::FailAfter(1));

    ops.commit(&id, CommitOptions::default()).await.unwrap_err();
    assert_eq!(
        ops.transaction_status(&id).await.unwrap().state,
        TransactionState::RolledBack
    );
    assert_eq!(provider.values(&GridRange::new(SALES, 1, 4, 0, 4)), before);
}

#[tokio::test]
async fn refused_commit_stays_active_without_a_recovery_write() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, set_values(SALES, "B2", vec![vec![n(999.0)]]))
        .await
        .unwrap();
    provider.inject(Fault::Reject(ProviderErrorKind::Auth));

    let err = ops.commit(&id, CommitOptions::default()).await.unwrap_err();
    assert_matches!(&err, OpsError::Provider(p) if p.kind == ProviderErrorKind::Auth);
    assert_eq!(provider.dispatch_count(), 1);
    assert_eq!(
        ops.transaction_status(&id).await.unwrap().state,
        TransactionState::Active
    );
    assert_eq!(provider.cell(SALES, 1, 1), CellValue::Number(120.0));
}

#[tokio::test]
async fn created_chart_is_deleted_by_its_provider_id() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(
        &id,
        Intent::AddChart {
            spec: ChartSpec {
                chart_type: ChartType::Column,
                title: Some("Amounts".into()),
                source: a1(SALES, "A1:B4"),
                header_count: 1,
                legend: LegendPosition::default(),
            },
            anchor: Anchor {
                section_id: SALES,
                row: 5,
                col: 0,
                width_pixels: None,
                height_pixels: None,
            },
        },
    )
    .await
    .unwrap();
    ops.queue(&id, highlight_header()).await.unwrap();
    provider.inject(Fault::FailAfter(1));

    ops.commit(&id, CommitOptions::default()).await.unwrap_err();

    let status = ops.transaction_status(&id).await.unwrap();
    assert_eq!(status.state, TransactionState::RolledBack);
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert!(
        calls[1].contains(&ProviderRequest::DeleteEmbeddedObject { object_id: 1 }),
        "{:?}",
        calls[1]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queues_on_one_transaction_serialize() {
    let provider = support::sales_book();
    let ops = Arc::new(support::orchestrator(&provider));
    let id = ops.begin(SALES).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for value in 1..=8u32 {
        let ops = ops.clone();
        let id = id.clone();
        tasks.spawn(async move {
            let intent = set_values(SALES, "B2", vec![vec![n(f64::from(value))]]);
            (ops.queue(&id, intent).await.unwrap(), value)
        });
    }
    let mut positions = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        positions.push(joined.unwrap());
    }
    positions.sort();

    let order: Vec<usize> = positions.iter().map(|(position, _)| *position).collect();
    assert_eq!(order, (1..=8).collect::<Vec<_>>());
    assert_eq!(ops.transaction_status(&id).await.unwrap().queued, 8);

    // The intent queued last wins the shared cell.
    let (_, last) = positions[7];
    ops.commit(&id, CommitOptions::default()).await.unwrap();
    assert_eq!(provider.cell(SALES, 1, 1), CellValue::Number(f64::from(last)));
}

#[tokio::test(start_paused = true)]
async fn slow_commit_blocks_only_its_own_transaction() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let slow = ops.begin(SALES).await.unwrap();
    let other = ops.begin(SALES).await.unwrap();
    ops.queue(&slow, highlight_header()).await.unwrap();
    provider.set_dispatch_delay(Some(Duration::from_secs(5)));

    let started = Instant::now();
    let commit = async {
        let outcome = ops.commit(&slow, CommitOptions::default()).await;
        (outcome, started.elapsed())
    };
    let queue_other = async {
        let queued = ops
            .queue(&other, set_values(SALES, "B2", vec![vec![n(1.0)]]))
            .await;
        (queued, started.elapsed())
    };
    let queue_same = async {
        let queued = ops.queue(&slow, highlight_header()).await;
        (queued, started.elapsed())
    };
    let ((outcome, commit_took), (other_queued, other_took), (same_queued, same_took)) =
        tokio::join!(commit, queue_other, queue_same);

    assert_eq!(outcome.unwrap().state, TransactionState::Committed);
    assert!(commit_took >= Duration::from_secs(5));

    assert_eq!(other_queued.unwrap(), 1);
    assert!(other_took < Duration::from_secs(5), "{other_took:?}");

    assert_matches!(
        same_queued,
        Err(OpsError::InvalidTransactionState {
            state: TransactionState::Committed,
            ..
        })
    );
    assert!(same_took >= Duration::from_secs(5));
}
