//! Intent list to provider batch.
//!
//! Compilation is pure: it reads the metadata already gathered in a
//! [`ResolutionScope`] and never touches the network. The same intents over
//! the same scope always produce byte-identical batches, which is what makes a
//! dry-run preview a faithful stand-in for the real call.

mod estimate;
mod lower;
mod merge;
pub mod request;

pub use estimate::BatchEstimate;
pub use lower::FALLBACK_EXTENTS;
pub use request::{
    Border, BorderPatch, CellPatch, ClearScope, DimensionPatch, DocumentPatch, Footprint,
    GridCoordinate, Layers, NewSheet, NumberFormat, PivotGroup, PivotValueSpec, ProviderRequest,
    ResolvedChart, ResolvedPivot, SheetPatch, ValueRange,
};

use crate::diff::hash::BoundedDigestWriter;
use crate::errors::{OpsError, Result};
use crate::intent::{DestructiveClass, Intent, validate_all};
use crate::model::{GridRange, SectionId};
use crate::resolver::ResolutionScope;
use lower::{Lowerer, footprint_area};
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub dry_run: bool,
    /// Ceiling on the serialized batch; `None` disables the check.
    pub max_batch_bytes: Option<usize>,
}

/// Where one intent ended up in the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledOp {
    pub intent_index: usize,
    pub kind: &'static str,
    /// Requests carrying this intent. Several intents may share one request
    /// after merging.
    pub request_indices: SmallVec<[usize; 1]>,
    pub footprint: SmallVec<[GridRange; 2]>,
    pub destructive: Option<DestructiveClass>,
    /// Sum of the footprint's rectangle areas, before any deduplication.
    pub area: u64,
    pub deleted_rows: u32,
    pub deleted_columns: u32,
}

/// Immutable result of [`compile`]. Recompile rather than mutate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledBatch {
    requests: Vec<ProviderRequest>,
    estimate: BatchEstimate,
    destructive_classes: BTreeSet<DestructiveClass>,
    dry_run: bool,
    ops: Vec<CompiledOp>,
    warnings: Vec<String>,
    fingerprint: String,
    serialized_bytes: usize,
}

impl CompiledBatch {
    pub fn requests(&self) -> &[ProviderRequest] {
        &self.requests
    }

    pub fn estimate(&self) -> &BatchEstimate {
        &self.estimate
    }

    pub fn estimated_cells(&self) -> u64 {
        self.estimate.cells
    }

    pub fn is_destructive(&self) -> bool {
        !self.destructive_classes.is_empty()
    }

    pub fn destructive_classes(&self) -> &BTreeSet<DestructiveClass> {
        &self.destructive_classes
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn ops(&self) -> &[CompiledOp] {
        &self.ops
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// SHA-256 over the serialized requests and estimate. Independent of the
    /// dry-run flag, so a preview and the real compile share it.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn serialized_bytes(&self) -> usize {
        self.serialized_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Every rectangle the batch changes, in op order.
    pub fn footprints(&self) -> impl Iterator<Item = &GridRange> {
        self.ops.iter().flat_map(|op| op.footprint.iter())
    }

    /// Sections addressed by any request or footprint, sorted.
    pub fn sections(&self) -> BTreeSet<SectionId> {
        self.requests
            .iter()
            .flat_map(ProviderRequest::sections)
            .chain(self.footprints().map(|r| r.section_id))
            .collect()
    }

    /// The same batch flagged for real dispatch.
    pub fn for_dispatch(&self) -> CompiledBatch {
        CompiledBatch {
            dry_run: false,
            ..self.clone()
        }
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    requests: &'a [ProviderRequest],
    estimate: &'a BatchEstimate,
}

/// Compile `intents` against metadata in `scope`.
///
/// Fails on the first intent that is invalid or whose range does not
/// resolve; the error carries that intent's index.
pub fn compile(
    intents: &[Intent],
    scope: &ResolutionScope,
    options: &CompileOptions,
) -> Result<CompiledBatch> {
    validate_all(intents)?;

    let mut warnings = Vec::new();
    let mut requests: Vec<ProviderRequest> = Vec::new();
    let mut ops = Vec::with_capacity(intents.len());
    let mut max_deleted_rows = 0;
    let mut max_deleted_columns = 0;

    for (index, intent) in intents.iter().enumerate() {
        let lowered = Lowerer::new(scope, &mut warnings)
            .lower(intent)
            .map_err(|e| e.at_intent(index))?;

        let mut request_indices: SmallVec<[usize; 1]> = SmallVec::new();
        for request in lowered.requests {
            let at = merge::push_merged(&mut requests, request);
            if !request_indices.contains(&at) {
                request_indices.push(at);
            }
        }
        max_deleted_rows = max_deleted_rows.max(lowered.deleted_rows);
        max_deleted_columns = max_deleted_columns.max(lowered.deleted_columns);

        ops.push(CompiledOp {
            intent_index: index,
            kind: intent.kind(),
            request_indices,
            area: footprint_area(&lowered.footprint),
            footprint: lowered.footprint,
            destructive: intent.destructive_class(),
            deleted_rows: lowered.deleted_rows,
            deleted_columns: lowered.deleted_columns,
        });
    }

    let estimate = BatchEstimate::measure(
        ops.iter().flat_map(|op: &CompiledOp| op.footprint.iter()),
        max_deleted_rows,
        max_deleted_columns,
    );
    let destructive_classes = ops.iter().filter_map(|op| op.destructive).collect();

    let (fingerprint, serialized_bytes) = digest_batch(&requests, &estimate, options)?;

    debug!(
        intents = intents.len(),
        requests = requests.len(),
        cells = estimate.cells,
        dry_run = options.dry_run,
        fingerprint = %fingerprint,
        "compiled batch"
    );

    Ok(CompiledBatch {
        requests,
        estimate,
        destructive_classes,
        dry_run: options.dry_run,
        ops,
        warnings,
        fingerprint,
        serialized_bytes,
    })
}

fn digest_batch(
    requests: &[ProviderRequest],
    estimate: &BatchEstimate,
    options: &CompileOptions,
) -> Result<(String, usize)> {
    let mut writer = BoundedDigestWriter::new(options.max_batch_bytes);
    let written = serde_json::to_writer(&mut writer, &FingerprintInput { requests, estimate });
    if writer.exceeded() {
        return Err(OpsError::SerializationLimitExceeded {
            what: "compiled batch",
            limit: options.max_batch_bytes.unwrap_or_default(),
        });
    }
    written.map_err(|e| OpsError::validation(format!("batch does not serialize: {e}")))?;
    Ok(writer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SectionMetadata, SectionProperties};
    use crate::resolver::RangeRef;

    fn scope() -> ResolutionScope {
        ResolutionScope::default().with_section(SectionMetadata {
            properties: SectionProperties::new(1, "Data", 0).with_extents(200, 10),
            header_row_index: 0,
            header_row: vec![],
        })
    }

    #[test]
    fn dry_run_and_real_compile_share_a_fingerprint() {
        let intents = vec![Intent::ClearValues {
            range: RangeRef::a1(1, "A1:C3"),
        }];
        let dry = compile(
            &intents,
            &scope(),
            &CompileOptions {
                dry_run: true,
                ..CompileOptions::default()
            },
        )
        .unwrap();
        let real = compile(&intents, &scope(), &CompileOptions::default()).unwrap();
        assert!(dry.is_dry_run());
        assert!(!real.is_dry_run());
        assert_eq!(dry.fingerprint(), real.fingerprint());
        assert_eq!(dry.estimate(), real.estimate());
    }

    #[test]
    fn byte_ceiling_rejects_large_batches() {
        let intents = vec![Intent::SetValues {
            range: RangeRef::a1(1, "A1"),
            values: vec![vec!["a long enough cell value".into(); 8]; 8],
        }];
        let err = compile(
            &intents,
            &scope(),
            &CompileOptions {
                dry_run: false,
                max_batch_bytes: Some(64),
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpsError::SerializationLimitExceeded { .. }));
    }

    #[test]
    fn lowering_errors_carry_the_intent_index() {
        let intents = vec![
            Intent::ClearValues {
                range: RangeRef::a1(1, "A1"),
            },
            Intent::DeleteRows {
                section_id: SectionId(1),
                start: 190,
                count: 50,
            },
        ];
        let err = compile(&intents, &scope(), &CompileOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OpsError::Validation {
                intent_index: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn writes_do_not_merge_across_an_auto_resize() {
        let intents = vec![
            Intent::SetValues {
                range: RangeRef::a1(1, "A1"),
                values: vec![vec!["short".into()]],
            },
            Intent::AutoResizeColumns {
                section_id: SectionId(1),
                start: 0,
                end: 2,
            },
            Intent::SetValues {
                range: RangeRef::a1(1, "B1"),
                values: vec![vec!["a much longer heading".into()]],
            },
        ];
        let batch = compile(&intents, &scope(), &CompileOptions::default()).unwrap();
        let names: Vec<_> = batch.requests().iter().map(ProviderRequest::name).collect();
        assert_eq!(names, ["updateValues", "autoResizeDimensions", "updateValues"]);
        assert_eq!(batch.ops()[2].request_indices.as_slice(), &[2]);
    }
}
