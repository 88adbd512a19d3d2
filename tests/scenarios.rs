use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio_util::sync::CancellationToken;

use sheetops::conflict::ConflictResolution;
use sheetops::diff::DiffTier;
use sheetops::model::{CellValue, Color, GridRange, SectionId, SectionProperties};
use sheetops::orchestrator::ConflictExpectation;
use sheetops::provider::{Fault, MemoryProvider};
use sheetops::rate_limit::OperationClass;
use sheetops::{
    CommitOptions, DispatchOptions, ExecuteOptions, Intent, OpsError, RangeRef, TransactionState,
};

mod support;

use support::builders::{n, t};
use support::{NOTES, SALES, a1, set_values};

const WIDE: SectionId = SectionId(3);

fn wide_book() -> Arc<MemoryProvider> {
    Arc::new(
        MemoryProvider::from_fixture(support::sales_fixture())
            .with_section(SectionProperties::new(WIDE, "Wide", 2).with_extents(2000, 25)),
    )
}

fn paint(range: RangeRef) -> Intent {
    Intent::SetBackgroundColor {
        range,
        color: Color::rgb(0.8, 1.0, 0.8),
    }
}

#[tokio::test]
async fn two_cell_writes_share_one_request() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let intents = vec![
        set_values(NOTES, "A1", vec![vec![t("left")]]),
        set_values(NOTES, "C3", vec![vec![t("right")]]),
    ];
    let batch = ops.compile(&intents, false).await.unwrap();
    assert_eq!(batch.requests().len(), 1);
    assert_eq!(batch.requests()[0].name(), "updateValues");
    assert_eq!(batch.ops()[0].request_indices.as_slice(), &[0]);
    assert_eq!(batch.ops()[1].request_indices.as_slice(), &[0]);

    let result = ops
        .dispatch(&batch, &DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(result.requests_dispatched, 1);
    assert_eq!(provider.dispatch_count(), 1);
    assert_eq!(provider.cell(NOTES, 0, 0), t("left"));
    assert_eq!(provider.cell(NOTES, 2, 2), t("right"));
}

#[tokio::test]
async fn compile_is_deterministic() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let intents = vec![
        set_values(SALES, "B2:C3", vec![vec![n(1.0), n(2.0)], vec![n(3.0), n(4.0)]]),
        paint(RangeRef::Header {
            section_id: SALES,
            header: "Amount".into(),
            best_effort: false,
        }),
        Intent::RenameSheet {
            section_id: NOTES,
            title: "Scratchpad".into(),
        },
    ];

    let first = ops.compile(&intents, true).await.unwrap();
    let second = ops.compile(&intents, true).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn small_batches_get_a_full_diff() {
    let provider = wide_book();
    let ops = support::orchestrator(&provider);

    let intents = vec![set_values(WIDE, "A1:Y20", support::numbered_block(20, 25))];
    let result = ops
        .execute(&intents, ExecuteOptions::default())
        .await
        .unwrap();
    let diff = result.diff.expect("diff");
    assert_eq!(diff.tier(), DiffTier::Full);
    assert_eq!(diff.estimated_cells(), 500);
    assert_eq!(diff.changes().len(), 500);
}

#[tokio::test]
async fn mid_sized_batches_get_a_sampled_diff() {
    let provider = wide_book();
    let ops = support::orchestrator(&provider);

    let intents = vec![set_values(WIDE, "A1:Y100", support::numbered_block(100, 25))];
    let result = ops
        .execute(&intents, ExecuteOptions::default())
        .await
        .unwrap();
    let diff = result.diff.expect("diff");
    assert_eq!(diff.tier(), DiffTier::Sample);
    assert!(diff.changes().is_empty());
    assert!(!diff.samples().is_empty());
}

#[tokio::test]
async fn large_batches_get_a_metadata_diff() {
    let provider = wide_book();
    let ops = support::orchestrator(&provider);

    let intents = vec![paint(a1(WIDE, "A1:Y2000"))];
    let preview = ops.preview(&intents).await.unwrap();
    assert_eq!(preview.estimate.cells, 50_000);
    assert_eq!(preview.diff_tier, DiffTier::Metadata);
    assert!(preview.is_allowed());

    let result = ops
        .execute(&intents, ExecuteOptions::default())
        .await
        .unwrap();
    let diff = result.diff.expect("diff");
    assert_eq!(diff.tier(), DiffTier::Metadata);
    assert!(diff.changes().is_empty());
    assert!(diff.samples().is_empty());
}

#[tokio::test]
async fn transaction_commit_keeps_queue_order() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let id = ops.begin(SALES).await.unwrap();
    ops.queue(&id, set_values(SALES, "E2", vec![vec![t("checked")]]))
        .await
        .unwrap();
    ops.queue(&id, paint(a1(SALES, "A1:D1"))).await.unwrap();
    ops.queue(
        &id,
        Intent::RenameSheet {
            section_id: SALES,
            title: "Sales (reviewed)".into(),
        },
    )
    .await
    .unwrap();

    let outcome = ops.commit(&id, CommitOptions::default()).await.unwrap();
    assert_eq!(outcome.state, TransactionState::Committed);

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    let names: Vec<&str> = calls[0].iter().map(|r| r.name()).collect();
    assert_eq!(
        names,
        vec!["updateValues", "repeatCell", "updateSheetProperties"]
    );
    assert_eq!(
        provider
            .document()
            .section(SALES)
            .map(|s| s.title.as_str()),
        Some("Sales (reviewed)")
    );
}

#[tokio::test]
async fn conflict_detection_tracks_concurrent_edits() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let range = a1(SALES, "A1:D4");

    let checksum = ops.range_checksum(SALES, &range).await.unwrap();
    let report = ops.detect_conflict(SALES, &range, &checksum).await.unwrap();
    assert_eq!(report.resolution, ConflictResolution::Proceed);
    assert!(!report.is_conflict());

    provider.set_cell(SALES, 2, 1, 81.0);
    let report = ops.detect_conflict(SALES, &range, &checksum).await.unwrap();
    assert_eq!(report.resolution, ConflictResolution::NeedsMerge);
    assert_eq!(report.expected_checksum, checksum);
}

#[tokio::test]
async fn conflict_outside_the_range_is_ignored() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let range = a1(SALES, "A1:D4");

    let checksum = ops.range_checksum(SALES, &range).await.unwrap();
    provider.set_cell(SALES, 20, 5, "elsewhere");
    let report = ops.detect_conflict(SALES, &range, &checksum).await.unwrap();
    assert_eq!(report.resolution, ConflictResolution::Proceed);
}

#[tokio::test]
async fn detect_conflict_rejects_ranges_in_other_sections() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let err = ops
        .detect_conflict(SALES, &a1(NOTES, "A1"), "abc")
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::Validation { .. });
}

#[tokio::test]
async fn guarded_dispatch_refuses_stale_ranges() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let range = GridRange::new(SALES, 1, 4, 1, 2);

    let checksum = ops
        .range_checksum(SALES, &RangeRef::Grid(range))
        .await
        .unwrap();
    let batch = ops
        .compile(
            &[set_values(SALES, "B2:B4", vec![vec![n(1.0)], vec![n(2.0)], vec![n(3.0)]])],
            false,
        )
        .await
        .unwrap();
    let expectations = [ConflictExpectation { range, checksum }];

    provider.set_cell(SALES, 3, 1, 0.0);
    let err = ops
        .dispatch_guarded(&batch, &expectations, &DispatchOptions::default())
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::ConflictDetected { ref report } if report.resolution == ConflictResolution::NeedsMerge);
    assert_eq!(provider.dispatch_count(), 0);
}

#[tokio::test]
async fn oversized_batch_never_reaches_the_provider() {
    let provider = support::sales_book();
    let ops = support::orchestrator_with(&provider, |config| config.max_cells = 100);
    let intents = vec![paint(RangeRef::Grid(GridRange::new(NOTES, 0, 50, 0, 10)))];

    let preview = ops.preview(&intents).await.unwrap();
    assert!(!preview.is_allowed());

    let err = ops
        .execute(&intents, ExecuteOptions::default())
        .await
        .unwrap_err();
    match &err {
        OpsError::PolicyViolation { violations } => {
            assert_eq!(violations.len(), 1);
            assert!(violations[0].message.contains("100"));
            assert!(violations[0].message.contains("500"));
        }
        other => panic!("expected a policy violation, got {other:?}"),
    }
    assert_eq!(provider.dispatch_count(), 0);

    ops.execute(
        &intents,
        ExecuteOptions {
            confirmed: true,
            ..ExecuteOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(provider.dispatch_count(), 1);
}

#[tokio::test]
async fn previewed_fingerprint_gates_execution() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let intents = vec![set_values(NOTES, "A1", vec![vec![t("x")]])];

    let preview = ops.preview(&intents).await.unwrap();
    let err = ops
        .execute(
            &intents,
            ExecuteOptions {
                expected_fingerprint: Some("0000".into()),
                ..ExecuteOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::Validation { .. });
    assert_eq!(provider.dispatch_count(), 0);

    let result = ops
        .execute(
            &intents,
            ExecuteOptions {
                expected_fingerprint: Some(preview.fingerprint.clone()),
                ..ExecuteOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.fingerprint, preview.fingerprint);
}

#[tokio::test]
async fn dry_run_batches_cannot_be_dispatched() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let batch = ops
        .compile(&[set_values(NOTES, "A1", vec![vec![t("x")]])], true)
        .await
        .unwrap();

    let err = ops
        .dispatch(&batch, &DispatchOptions::default())
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::Validation { .. });

    ops.dispatch(&batch.for_dispatch(), &DispatchOptions::default())
        .await
        .unwrap();
    assert_eq!(provider.cell(NOTES, 0, 0), t("x"));
}

#[tokio::test]
async fn unresolvable_reference_names_the_intent() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let intents = vec![
        set_values(NOTES, "A1", vec![vec![t("x")]]),
        paint(RangeRef::Named {
            name: "missing".into(),
        }),
    ];
    let err = ops.compile(&intents, false).await.unwrap_err();
    assert_matches!(
        err,
        OpsError::RangeNotFound {
            intent_index: Some(1),
            ..
        }
    );
}

#[tokio::test]
async fn throttled_dispatch_reports_quota_exceeded() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    provider.inject(Fault::Throttle);

    let err = ops
        .execute(
            &[set_values(NOTES, "A1", vec![vec![t("x")]])],
            ExecuteOptions::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        OpsError::QuotaExceeded {
            class: OperationClass::Write,
            ..
        }
    );
    let budget = ops.limiter().snapshot(OperationClass::Write);
    assert!(budget.refill_per_sec < budget.nominal_refill_per_sec);
}

#[tokio::test(start_paused = true)]
async fn slow_provider_times_out_after_dispatch() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    provider.set_dispatch_delay(Some(Duration::from_secs(5)));

    let err = ops
        .execute(
            &[set_values(NOTES, "A1", vec![vec![t("x")]])],
            ExecuteOptions {
                timeout: Some(Duration::from_millis(100)),
                ..ExecuteOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        OpsError::Timeout {
            dispatched: true,
            ..
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn cancelled_call_stops_before_dispatch() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ops
        .execute(
            &[set_values(NOTES, "A1", vec![vec![t("x")]])],
            ExecuteOptions {
                cancel: Some(cancel),
                ..ExecuteOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        OpsError::Cancelled {
            dispatched: false,
            ..
        }
    );
    assert_eq!(provider.dispatch_count(), 0);
    assert_eq!(provider.cell(NOTES, 0, 0), CellValue::Empty);
}

#[tokio::test]
async fn dispatch_invalidates_cached_metadata() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);
    let intents = vec![Intent::RenameSheet {
        section_id: NOTES,
        title: "Log".into(),
    }];

    ops.compile(&intents, true).await.unwrap();
    assert_eq!(ops.resolver().cached_sections(), 1);
    ops.execute(&intents, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(ops.resolver().cached_sections(), 0);

    let resolved = ops
        .resolver()
        .resolve(&RangeRef::A1 {
            section_id: None,
            notation: "Log!A1".into(),
        })
        .await
        .unwrap();
    assert_eq!(resolved.range.section_id, NOTES);
}

#[tokio::test]
async fn destructive_dispatch_carries_a_snapshot() {
    let provider = support::sales_book();
    let ops = support::orchestrator(&provider);

    let result = ops
        .execute(
            &[Intent::DeleteRows {
                section_id: NOTES,
                start: 10,
                count: 5,
            }],
            ExecuteOptions::default(),
        )
        .await
        .unwrap();
    let snapshot = result.snapshot.expect("snapshot before a destructive batch");
    assert_eq!(snapshot.focus(), Some(NOTES));
    assert_eq!(
        provider.document().section(NOTES).map(|s| s.row_count),
        Some(45)
    );
}
