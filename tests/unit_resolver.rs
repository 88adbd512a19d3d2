use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use sheetops::OpsError;
use sheetops::model::{GridRange, SectionId};
use sheetops::provider::MemoryProvider;
use sheetops::rate_limit::RateLimiter;
use sheetops::resolver::{RangeRef, RangeResolver, ResolverConfig};

mod support;

use support::{NOTES, SALES};

fn resolver(provider: &Arc<MemoryProvider>) -> RangeResolver {
    RangeResolver::new(
        provider.clone(),
        Arc::new(RateLimiter::default()),
        ResolverConfig::default(),
    )
}

fn header(section_id: SectionId, text: &str) -> RangeRef {
    RangeRef::Header {
        section_id,
        header: text.to_string(),
        best_effort: false,
    }
}

#[tokio::test(start_paused = true)]
async fn metadata_is_cached_until_the_ttl_lapses() {
    let provider = support::sales_book();
    let resolver = resolver(&provider);

    resolver.resolve(&header(SALES, "Amount")).await.unwrap();
    resolver.resolve(&header(SALES, "Qty")).await.unwrap();
    assert_eq!(provider.metadata_fetches(), 1);
    assert_eq!(resolver.cached_sections(), 1);

    tokio::time::advance(Duration::from_secs(29)).await;
    resolver.resolve(&header(SALES, "Amount")).await.unwrap();
    assert_eq!(provider.metadata_fetches(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    resolver.resolve(&header(SALES, "Amount")).await.unwrap();
    assert_eq!(provider.metadata_fetches(), 2);
}

#[tokio::test]
async fn invalidate_forces_a_refetch() {
    let provider = support::sales_book();
    let resolver = resolver(&provider);

    resolver.resolve(&header(SALES, "Amount")).await.unwrap();
    resolver
        .resolve(&RangeRef::Named {
            name: "sales_amounts".into(),
        })
        .await
        .unwrap();
    assert_eq!(provider.metadata_fetches(), 1);
    assert_eq!(provider.document_fetches(), 1);

    resolver.invalidate([SALES]);
    assert_eq!(resolver.cached_sections(), 0);

    resolver.resolve(&header(SALES, "Amount")).await.unwrap();
    resolver
        .resolve(&RangeRef::Named {
            name: "sales_amounts".into(),
        })
        .await
        .unwrap();
    assert_eq!(provider.metadata_fetches(), 2);
    assert_eq!(provider.document_fetches(), 2);
}

#[tokio::test]
async fn exact_header_resolves_to_the_data_column() {
    let provider = support::sales_book();
    let resolution = resolver(&provider)
        .resolve(&header(SALES, "Unit Price"))
        .await
        .unwrap();
    assert_eq!(resolution.range, GridRange::new(SALES, 1, 100, 2, 3));
    assert_eq!(resolution.confidence, 1.0);
    assert!(resolution.warnings.is_empty());
}

#[tokio::test]
async fn case_insensitive_header_clears_the_default_threshold() {
    let provider = support::sales_book();
    let resolution = resolver(&provider)
        .resolve(&header(SALES, "amount"))
        .await
        .unwrap();
    assert_eq!(resolution.range, GridRange::new(SALES, 1, 100, 1, 2));
    assert_eq!(resolution.confidence, 0.9);
    assert!(!resolution.warnings.is_empty());
}

#[tokio::test]
async fn weak_header_match_is_ambiguous_unless_best_effort() {
    let provider = support::sales_book();
    let resolver = resolver(&provider);

    let err = resolver.resolve(&header(SALES, "price")).await.unwrap_err();
    assert_matches!(
        err,
        OpsError::AmbiguousRange { confidence, ref candidates, .. }
            if confidence < 0.75 && candidates.len() == 1 && candidates[0].header == "Unit Price"
    );

    let resolution = resolver
        .resolve(&RangeRef::Header {
            section_id: SALES,
            header: "price".into(),
            best_effort: true,
        })
        .await
        .unwrap();
    assert_eq!(resolution.range, GridRange::new(SALES, 1, 100, 2, 3));
    assert!(resolution.confidence < 0.75);
    assert!(
        resolution
            .warnings
            .iter()
            .any(|w| w.contains("best_effort"))
    );
}

#[tokio::test]
async fn unmatched_header_is_not_found() {
    let provider = support::sales_book();
    let err = resolver(&provider)
        .resolve(&header(SALES, "zzz"))
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::RangeNotFound { .. });
}

#[tokio::test]
async fn header_in_missing_section_is_not_found() {
    let provider = support::sales_book();
    let resolver = resolver(&provider);
    let err = resolver
        .resolve(&header(SectionId(99), "Amount"))
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::RangeNotFound { .. });
    assert_eq!(resolver.cached_sections(), 0);
}

#[tokio::test]
async fn named_ranges_resolve_case_insensitively() {
    let provider = support::sales_book();
    let resolver = resolver(&provider);
    let expected = GridRange::new(SALES, 1, 4, 1, 2);

    for name in ["sales_amounts", "SALES_AMOUNTS"] {
        let resolution = resolver
            .resolve(&RangeRef::Named { name: name.into() })
            .await
            .unwrap();
        assert_eq!(resolution.range, expected);
    }

    let err = resolver
        .resolve(&RangeRef::Named {
            name: "nope".into(),
        })
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::RangeNotFound { .. });
}

#[tokio::test]
async fn sheet_prefixed_a1_uses_the_document_listing() {
    let provider = support::sales_book();
    let resolver = resolver(&provider);

    let resolution = resolver
        .resolve(&RangeRef::A1 {
            section_id: None,
            notation: "Notes!B2:C3".into(),
        })
        .await
        .unwrap();
    assert_eq!(resolution.range, GridRange::new(NOTES, 1, 3, 1, 3));
    assert_eq!(provider.document_fetches(), 1);

    let err = resolver
        .resolve(&RangeRef::A1 {
            section_id: None,
            notation: "Missing!A1".into(),
        })
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::RangeNotFound { .. });
}

#[tokio::test]
async fn closed_a1_needs_no_metadata() {
    let provider = support::sales_book();
    let resolution = resolver(&provider)
        .resolve(&RangeRef::a1(SALES, "B2:D9"))
        .await
        .unwrap();
    assert_eq!(resolution.range, GridRange::new(SALES, 1, 9, 1, 4));
    assert_eq!(provider.metadata_fetches(), 0);
    assert_eq!(provider.document_fetches(), 0);
}

#[tokio::test]
async fn open_ended_a1_takes_the_section_extents() {
    let provider = support::sales_book();
    let resolution = resolver(&provider)
        .resolve(&RangeRef::a1(SALES, "A:B"))
        .await
        .unwrap();
    assert_eq!(resolution.range, GridRange::new(SALES, 0, 100, 0, 2));
    assert_eq!(provider.metadata_fetches(), 1);
}

#[tokio::test]
async fn open_ended_a1_starting_past_the_extents_is_not_found() {
    let provider = support::sales_book();
    let resolver = resolver(&provider);

    let err = resolver
        .resolve(&RangeRef::a1(SALES, "A200:B"))
        .await
        .unwrap_err();
    assert_matches!(err, OpsError::RangeNotFound { reason, .. } if reason.contains("rows"));

    let tail = resolver
        .resolve(&RangeRef::a1(SALES, "A90:B"))
        .await
        .unwrap();
    assert_eq!(tail.range, GridRange::new(SALES, 89, 100, 0, 2));
}
