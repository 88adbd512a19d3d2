//! Structural point-in-time captures of a document.
//!
//! A snapshot never holds cell content. Its serialized size is capped by a
//! byte ceiling fixed at capture time: sections nearest the focus section are
//! kept first and the rest are only counted, so a ten-thousand-section
//! document snapshots within the same ceiling as a ten-section one.

use crate::diff::hash::serialized_len;
use crate::errors::{OpsError, Result};
use crate::intent::Intent;
use crate::model::{DocumentMetadata, SectionId, SectionProperties};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SNAPSHOT_MAX_BYTES: usize = 32 * 1024;

const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SectionSummary {
    pub section_id: SectionId,
    pub index: u32,
    pub title: String,
    pub row_count: u32,
    pub column_count: u32,
    pub hidden: bool,
    /// Checksum over the section's structural properties.
    pub checksum: String,
}

impl SectionSummary {
    fn of(props: &SectionProperties) -> Self {
        Self {
            section_id: props.section_id,
            index: props.index,
            title: props.title.chars().take(MAX_TITLE_CHARS).collect(),
            row_count: props.row_count,
            column_count: props.column_count,
            hidden: props.hidden,
            checksum: props.structural_checksum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Snapshot {
    taken_at: DateTime<Utc>,
    document_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    focus: Option<SectionId>,
    section_count: usize,
    sections: Vec<SectionSummary>,
    omitted_sections: usize,
}

/// Intents that bring a document's structure back to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuralRestore {
    pub intents: Vec<Intent>,
    pub warnings: Vec<String>,
}

impl Snapshot {
    /// Capture `document`'s structure within `max_bytes` of serialized JSON.
    pub fn capture(
        document: &DocumentMetadata,
        focus: Option<SectionId>,
        max_bytes: usize,
    ) -> Result<Self> {
        let mut snapshot = Snapshot {
            taken_at: Utc::now(),
            document_title: document.title.chars().take(MAX_TITLE_CHARS).collect(),
            focus,
            section_count: document.sections.len(),
            sections: Vec::new(),
            // Widest value the counter can take, so the base size is an upper bound.
            omitted_sections: document.sections.len(),
        };
        let mut used = serialized_len(&snapshot);
        if used > max_bytes {
            return Err(OpsError::SnapshotTooLarge {
                required_bytes: used,
                limit: max_bytes,
            });
        }

        let anchor = focus
            .and_then(|id| document.section(id))
            .map_or(0, |props| props.index);
        let mut ordered: Vec<&SectionProperties> = document.sections.iter().collect();
        ordered.sort_by_key(|props| (props.index.abs_diff(anchor), props.index));

        for props in ordered {
            let summary = SectionSummary::of(props);
            let cost = serialized_len(&summary) + usize::from(!snapshot.sections.is_empty());
            if used + cost > max_bytes {
                if Some(props.section_id) == focus {
                    return Err(OpsError::SnapshotTooLarge {
                        required_bytes: used + cost,
                        limit: max_bytes,
                    });
                }
                break;
            }
            used += cost;
            snapshot.sections.push(summary);
        }
        snapshot.omitted_sections = snapshot.section_count - snapshot.sections.len();
        snapshot.sections.sort_by_key(|s| s.index);
        Ok(snapshot)
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn focus(&self) -> Option<SectionId> {
        self.focus
    }

    pub fn sections(&self) -> &[SectionSummary] {
        &self.sections
    }

    pub fn section(&self, id: SectionId) -> Option<&SectionSummary> {
        self.sections.iter().find(|s| s.section_id == id)
    }

    pub fn section_count(&self) -> usize {
        self.section_count
    }

    /// True when some sections were only counted, not captured.
    pub fn is_truncated(&self) -> bool {
        self.omitted_sections > 0
    }

    pub fn serialized_bytes(&self) -> usize {
        serialized_len(self)
    }

    /// Plan to restore section existence, order, titles and visibility.
    ///
    /// Cell values and extents are out of reach of a structural snapshot;
    /// differences there come back as warnings. Sections created after the
    /// capture are removed only when the snapshot is complete.
    pub fn restore_plan(&self, current: &DocumentMetadata) -> StructuralRestore {
        let mut plan = StructuralRestore::default();

        if !self.is_truncated() {
            for props in &current.sections {
                if self.section(props.section_id).is_none() {
                    plan.intents.push(Intent::DeleteSheet {
                        section_id: props.section_id,
                    });
                }
            }
        }

        for saved in &self.sections {
            match current.section(saved.section_id) {
                None => {
                    plan.intents.push(Intent::AddSheet {
                        title: saved.title.clone(),
                        index: Some(saved.index),
                        section_id: Some(saved.section_id),
                        rows: Some(saved.row_count),
                        columns: Some(saved.column_count),
                    });
                    plan.warnings.push(format!(
                        "section {} ('{}') re-created without its cell values",
                        saved.section_id, saved.title
                    ));
                    if saved.hidden {
                        plan.intents.push(Intent::HideSheet {
                            section_id: saved.section_id,
                        });
                    }
                }
                Some(now) => {
                    if now.title != saved.title {
                        plan.intents.push(Intent::RenameSheet {
                            section_id: saved.section_id,
                            title: saved.title.clone(),
                        });
                    }
                    if now.index != saved.index {
                        plan.intents.push(Intent::MoveSheet {
                            section_id: saved.section_id,
                            index: saved.index,
                        });
                    }
                    if now.hidden != saved.hidden {
                        plan.intents.push(if saved.hidden {
                            Intent::HideSheet {
                                section_id: saved.section_id,
                            }
                        } else {
                            Intent::ShowSheet {
                                section_id: saved.section_id,
                            }
                        });
                    }
                    if now.extents() != (saved.row_count, saved.column_count) {
                        plan.warnings.push(format!(
                            "section {} is {}x{}, was {}x{}; extents are not restored structurally",
                            saved.section_id,
                            now.row_count,
                            now.column_count,
                            saved.row_count,
                            saved.column_count
                        ));
                    }
                }
            }
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(sections: u32) -> DocumentMetadata {
        DocumentMetadata {
            title: "Budget".into(),
            locale: None,
            sections: (0..sections)
                .map(|i| SectionProperties::new(i + 1, format!("Sheet{}", i + 1), i))
                .collect(),
            named_ranges: Vec::new(),
        }
    }

    #[test]
    fn size_is_capped_regardless_of_section_count() {
        let small = Snapshot::capture(&document(10), None, 4096).unwrap();
        let large = Snapshot::capture(&document(10_000), Some(SectionId(5_000)), 4096).unwrap();
        assert!(small.serialized_bytes() <= 4096);
        assert!(large.serialized_bytes() <= 4096);
        assert!(!small.is_truncated());
        assert!(large.is_truncated());
        assert!(large.section(SectionId(5_000)).is_some());
    }

    #[test]
    fn ceiling_below_the_header_fails_fast() {
        let err = Snapshot::capture(&document(3), None, 16).unwrap_err();
        assert!(matches!(err, OpsError::SnapshotTooLarge { limit: 16, .. }));
    }

    #[test]
    fn restore_plan_recreates_deleted_sections() {
        let before = document(2);
        let snapshot = Snapshot::capture(&before, None, 4096).unwrap();
        let mut after = before.clone();
        after.sections.remove(1);
        let plan = snapshot.restore_plan(&after);
        assert!(matches!(
            plan.intents.as_slice(),
            [Intent::AddSheet { section_id: Some(SectionId(2)), .. }]
        ));
        assert_eq!(plan.warnings.len(), 1);
    }
}
