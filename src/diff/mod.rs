//! Before/after change reports with size-triggered fidelity.
//!
//! The tier is picked from the batch's estimated cell count, never by the
//! caller: up to `full_max_cells` every changed cell is listed, up to
//! `sample_max_cells` only the first and last few rows of the affected
//! rectangle are shown, and beyond that only counts and checksums survive.
//! Cost is therefore bounded regardless of how large the document is.

pub mod hash;

use crate::model::{CellValue, GridRange, SectionId, SectionState, column_letters};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_FULL_MAX_CELLS: u64 = 1_000;
pub const DEFAULT_SAMPLE_MAX_CELLS: u64 = 10_000;
pub const DEFAULT_SAMPLE_ROWS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DiffThresholds {
    /// Largest estimate still reported cell by cell.
    pub full_max_cells: u64,
    /// Largest estimate still reported with a sampled window.
    pub sample_max_cells: u64,
    /// Rows shown from each end of the affected rectangle in a sample.
    pub sample_rows: u32,
}

impl Default for DiffThresholds {
    fn default() -> Self {
        Self {
            full_max_cells: DEFAULT_FULL_MAX_CELLS,
            sample_max_cells: DEFAULT_SAMPLE_MAX_CELLS,
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }
}

impl DiffThresholds {
    pub fn tier(&self, estimated_cells: u64) -> DiffTier {
        if estimated_cells > self.sample_max_cells {
            DiffTier::Metadata
        } else if estimated_cells > self.full_max_cells {
            DiffTier::Sample
        } else {
            DiffTier::Full
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffTier {
    Metadata,
    Sample,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SectionChange {
    Added,
    Removed,
    Modified,
    Unchanged,
}

/// Structural and checksum delta of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SectionDelta {
    pub section_id: SectionId,
    pub change: SectionChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub rows_before: u32,
    pub rows_after: u32,
    pub columns_before: u32,
    pub columns_after: u32,
    pub row_delta: i64,
    pub column_delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_after: Option<String>,
    /// Checksum of the affected rectangle, when values were fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected: Option<GridRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellChange {
    CellAdded {
        section_id: SectionId,
        address: String,
        value: CellValue,
    },
    CellDeleted {
        section_id: SectionId,
        address: String,
        value: CellValue,
    },
    CellModified {
        section_id: SectionId,
        address: String,
        before: CellValue,
        after: CellValue,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SampleRow {
    /// Zero-based row index.
    pub row: u32,
    pub before: Vec<CellValue>,
    pub after: Vec<CellValue>,
    pub changed: bool,
}

/// First and last `sample_rows` rows of one section's affected rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SampleWindow {
    pub range: GridRange,
    pub rows: Vec<SampleRow>,
    pub omitted_rows: u32,
}

/// Change report. Built once by the engine and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tier", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffResult {
    Metadata {
        estimated_cells: u64,
        sections: Vec<SectionDelta>,
    },
    Sample {
        estimated_cells: u64,
        sections: Vec<SectionDelta>,
        samples: Vec<SampleWindow>,
    },
    Full {
        estimated_cells: u64,
        sections: Vec<SectionDelta>,
        changes: Vec<CellChange>,
    },
}

impl DiffResult {
    pub fn tier(&self) -> DiffTier {
        match self {
            Self::Metadata { .. } => DiffTier::Metadata,
            Self::Sample { .. } => DiffTier::Sample,
            Self::Full { .. } => DiffTier::Full,
        }
    }

    pub fn estimated_cells(&self) -> u64 {
        match self {
            Self::Metadata {
                estimated_cells, ..
            }
            | Self::Sample {
                estimated_cells, ..
            }
            | Self::Full {
                estimated_cells, ..
            } => *estimated_cells,
        }
    }

    pub fn sections(&self) -> &[SectionDelta] {
        match self {
            Self::Metadata { sections, .. }
            | Self::Sample { sections, .. }
            | Self::Full { sections, .. } => sections,
        }
    }

    /// Cell-level changes; empty below the `FULL` tier.
    pub fn changes(&self) -> &[CellChange] {
        match self {
            Self::Full { changes, .. } => changes,
            _ => &[],
        }
    }

    pub fn samples(&self) -> &[SampleWindow] {
        match self {
            Self::Sample { samples, .. } => samples,
            _ => &[],
        }
    }
}

/// Diff one section pair with the default thresholds.
pub fn diff(before: &SectionState, after: &SectionState, estimated_cells: u64) -> DiffResult {
    DiffEngine::default().diff(before, after, estimated_cells)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine {
    thresholds: DiffThresholds,
}

impl DiffEngine {
    pub fn new(thresholds: DiffThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DiffThresholds {
        &self.thresholds
    }

    pub fn diff(&self, before: &SectionState, after: &SectionState, estimated_cells: u64) -> DiffResult {
        self.diff_sections([(before, after)], estimated_cells)
    }

    /// One report over several sections, tiered on the shared estimate.
    pub fn diff_sections<'a>(
        &self,
        pairs: impl IntoIterator<Item = (&'a SectionState, &'a SectionState)>,
        estimated_cells: u64,
    ) -> DiffResult {
        let tier = self.thresholds.tier(estimated_cells);
        if tier != DiffTier::Full {
            warn!(%tier, estimated_cells, "diff reduced below full fidelity");
        }

        let mut sections = Vec::new();
        let mut samples = Vec::new();
        let mut changes = Vec::new();
        for (before, after) in pairs {
            let Some(delta) = section_delta(before, after) else {
                continue;
            };
            if let Some(affected) = delta.affected {
                match tier {
                    DiffTier::Metadata => {}
                    DiffTier::Sample => {
                        samples.push(sample_window(before, after, affected, self.thresholds.sample_rows))
                    }
                    DiffTier::Full => cell_changes(before, after, affected, &mut changes),
                }
            }
            sections.push(delta);
        }

        match tier {
            DiffTier::Metadata => DiffResult::Metadata {
                estimated_cells,
                sections,
            },
            DiffTier::Sample => DiffResult::Sample {
                estimated_cells,
                sections,
                samples,
            },
            DiffTier::Full => DiffResult::Full {
                estimated_cells,
                sections,
                changes,
            },
        }
    }
}

fn section_delta(before: &SectionState, after: &SectionState) -> Option<SectionDelta> {
    let props = before.properties.as_ref().or(after.properties.as_ref())?;
    let section_id = props.section_id;
    let extents = |state: &SectionState| {
        state
            .properties
            .as_ref()
            .map(|p| p.extents())
            .unwrap_or((0, 0))
    };
    let (rows_before, columns_before) = extents(before);
    let (rows_after, columns_after) = extents(after);
    let structure_before = before.properties.as_ref().map(|p| p.structural_checksum());
    let structure_after = after.properties.as_ref().map(|p| p.structural_checksum());

    let affected = match (before.covered, after.covered) {
        (Some(a), Some(b)) => a.bounding(&b).or(Some(a)),
        (a, b) => a.or(b),
    };
    let content_before = affected.filter(|_| before.exists()).map(|r| before.content_checksum(&r));
    let content_after = affected.filter(|_| after.exists()).map(|r| after.content_checksum(&r));

    let change = match (before.exists(), after.exists()) {
        (false, true) => SectionChange::Added,
        (true, false) => SectionChange::Removed,
        _ if structure_before != structure_after || content_before != content_after => {
            SectionChange::Modified
        }
        _ => SectionChange::Unchanged,
    };

    Some(SectionDelta {
        section_id,
        change,
        title: after
            .properties
            .as_ref()
            .or(before.properties.as_ref())
            .map(|p| p.title.clone()),
        rows_before,
        rows_after,
        columns_before,
        columns_after,
        row_delta: i64::from(rows_after) - i64::from(rows_before),
        column_delta: i64::from(columns_after) - i64::from(columns_before),
        structure_before,
        structure_after,
        affected,
        content_before,
        content_after,
    })
}

fn address(row: u32, col: u32) -> String {
    format!("{}{}", column_letters(col), row + 1)
}

fn cell_changes(
    before: &SectionState,
    after: &SectionState,
    affected: GridRange,
    out: &mut Vec<CellChange>,
) {
    let section_id = affected.section_id;
    for row in affected.start_row..affected.end_row {
        for col in affected.start_col..affected.end_col {
            let old = before.value_at(row, col);
            let new = after.value_at(row, col);
            if old.same_content(&new) {
                continue;
            }
            let address = address(row, col);
            out.push(match (old.is_empty(), new.is_empty()) {
                (true, _) => CellChange::CellAdded {
                    section_id,
                    address,
                    value: new,
                },
                (false, true) => CellChange::CellDeleted {
                    section_id,
                    address,
                    value: old,
                },
                (false, false) => CellChange::CellModified {
                    section_id,
                    address,
                    before: old,
                    after: new,
                },
            });
        }
    }
}

fn sample_window(
    before: &SectionState,
    after: &SectionState,
    affected: GridRange,
    sample_rows: u32,
) -> SampleWindow {
    let height = affected.rows();
    let rows: Vec<u32> = if height <= sample_rows.saturating_mul(2) {
        (affected.start_row..affected.end_row).collect()
    } else {
        (affected.start_row..affected.start_row + sample_rows)
            .chain(affected.end_row - sample_rows..affected.end_row)
            .collect()
    };
    let omitted_rows = height - rows.len() as u32;
    let rows = rows
        .into_iter()
        .map(|row| {
            let line = GridRange {
                start_row: row,
                end_row: row + 1,
                ..affected
            };
            let old = before.values_in(&line).pop().unwrap_or_default();
            let new = after.values_in(&line).pop().unwrap_or_default();
            let changed = old.iter().zip(&new).any(|(a, b)| !a.same_content(b));
            SampleRow {
                row,
                before: old,
                after: new,
                changed,
            }
        })
        .collect();
    SampleWindow {
        range: affected,
        rows,
        omitted_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellWindow, SectionProperties};

    fn state(rows: Vec<Vec<CellValue>>, covered: GridRange) -> SectionState {
        SectionState {
            properties: Some(SectionProperties::new(1, "Data", 0)),
            covered: Some(covered),
            windows: vec![CellWindow {
                origin_row: covered.start_row,
                origin_col: covered.start_col,
                rows,
            }],
        }
    }

    #[test]
    fn tier_boundaries_are_exact() {
        let t = DiffThresholds::default();
        assert_eq!(t.tier(0), DiffTier::Full);
        assert_eq!(t.tier(1_000), DiffTier::Full);
        assert_eq!(t.tier(1_001), DiffTier::Sample);
        assert_eq!(t.tier(10_000), DiffTier::Sample);
        assert_eq!(t.tier(10_001), DiffTier::Metadata);
    }

    #[test]
    fn full_tier_classifies_cell_changes() {
        let range = GridRange::new(1, 0, 1, 0, 3);
        let before = state(vec![vec![1.into(), CellValue::Empty, "x".into()]], range);
        let after = state(vec![vec![2.into(), "new".into(), CellValue::Empty]], range);
        let result = diff(&before, &after, 3);
        let kinds: Vec<_> = result
            .changes()
            .iter()
            .map(|c| match c {
                CellChange::CellAdded { address, .. } => format!("+{address}"),
                CellChange::CellDeleted { address, .. } => format!("-{address}"),
                CellChange::CellModified { address, .. } => format!("~{address}"),
            })
            .collect();
        assert_eq!(kinds, ["~A1", "+B1", "-C1"]);
        assert_eq!(result.sections()[0].change, SectionChange::Modified);
    }

    #[test]
    fn sample_shows_both_ends_of_tall_ranges() {
        let range = GridRange::new(1, 0, 20, 0, 1);
        let values: Vec<Vec<CellValue>> = (0..20).map(|i| vec![i.into()]).collect();
        let before = state(values.clone(), range);
        let after = state(values, range);
        let engine = DiffEngine::new(DiffThresholds {
            full_max_cells: 1,
            sample_max_cells: 100,
            sample_rows: 2,
        });
        let result = engine.diff(&before, &after, 20);
        let window = &result.samples()[0];
        let shown: Vec<u32> = window.rows.iter().map(|r| r.row).collect();
        assert_eq!(shown, [0, 1, 18, 19]);
        assert_eq!(window.omitted_rows, 16);
    }

    #[test]
    fn metadata_tier_carries_no_values() {
        let range = GridRange::new(1, 0, 1, 0, 1);
        let before = state(vec![vec![1.into()]], range);
        let after = state(vec![vec![2.into()]], range);
        let result = diff(&before, &after, 50_000);
        assert_eq!(result.tier(), DiffTier::Metadata);
        assert!(result.changes().is_empty());
        assert!(result.samples().is_empty());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["tier"], "METADATA");
    }
}
