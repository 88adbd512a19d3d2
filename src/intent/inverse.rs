//! Compensating intents.
//!
//! The remote service cannot roll back. What a transaction can undo is limited
//! to what the engine knows about the pre-operation state: values captured just
//! before dispatch, the structural listing of the document, and ids the provider
//! returned for created objects. Each intent declares how well it can be undone.

use super::{Intent, MetadataLocation};
use crate::model::{CellValue, Dimension, DocumentMetadata, GridRange, SectionId};
use crate::resolver::RangeRef;
use serde::Serialize;

/// How faithfully an intent can be undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "exactness", rename_all = "snake_case")]
pub enum Compensation {
    Exact,
    Partial { reason: String },
    Irreversible { reason: String },
}

impl Compensation {
    fn partial(reason: &str) -> Self {
        Self::Partial {
            reason: reason.to_string(),
        }
    }

    fn irreversible(reason: &str) -> Self {
        Self::Irreversible {
            reason: reason.to_string(),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact)
    }

    /// The weaker of two grades.
    fn and(self, other: Compensation) -> Compensation {
        match (self, other) {
            (Self::Irreversible { reason }, _) | (_, Self::Irreversible { reason }) => {
                Self::Irreversible { reason }
            }
            (Self::Partial { reason }, _) | (_, Self::Partial { reason }) => Self::Partial { reason },
            (Self::Exact, Self::Exact) => Self::Exact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Write captured pre-operation values back over the footprint.
    RestoreValues { partial: Option<&'static str> },
    /// A structural inverse, optionally followed by a value restore.
    Inverse {
        restores_values: bool,
        partial: Option<&'static str>,
    },
    Irreversible(&'static str),
}

const FORMATS_NOT_CAPTURED: &str = "previous formatting is not captured";
const OBJECT_NOT_CAPTURED: &str = "the removed object's definition is not captured";
const PROPERTY_NOT_CAPTURED: &str = "the previous setting is not captured";

fn strategy(intent: &Intent) -> Strategy {
    use Strategy::*;
    let exact_values = RestoreValues { partial: None };
    let exact_inverse = Inverse {
        restores_values: false,
        partial: None,
    };
    match intent {
        Intent::SetValues { .. }
        | Intent::SetFormula { .. }
        | Intent::ClearValues { .. }
        | Intent::SortRange { .. }
        | Intent::RandomizeRange { .. }
        | Intent::TrimWhitespace { .. }
        | Intent::DeleteDuplicates { .. }
        | Intent::SplitTextToColumns { .. } => exact_values,
        Intent::FindReplace { range: Some(_), .. } => exact_values,
        Intent::FindReplace { range: None, .. } => {
            Irreversible("find/replace over whole sections is too wide to capture")
        }
        Intent::CopyRange { paste_type, .. } => match paste_type {
            super::PasteType::Values => exact_values,
            _ => RestoreValues {
                partial: Some("pasted formatting is not reverted"),
            },
        },
        Intent::MoveRange { .. } => RestoreValues {
            partial: Some("moved formatting is not reverted"),
        },
        Intent::AutoFill { .. } => RestoreValues {
            partial: Some("filled formatting is not reverted"),
        },
        Intent::ClearAll { .. } => RestoreValues {
            partial: Some(FORMATS_NOT_CAPTURED),
        },
        Intent::AppendRows { .. } => Irreversible("the provider chooses the append position"),
        Intent::SetNote { .. } | Intent::ClearNotes { .. } => {
            Irreversible("previous notes are not captured")
        }
        Intent::SetHyperlink { .. } => RestoreValues {
            partial: Some("link formatting is not reverted"),
        },

        Intent::ClearFormats { .. }
        | Intent::SetNumberFormat { .. }
        | Intent::SetBackgroundColor { .. }
        | Intent::SetTextColor { .. }
        | Intent::SetFont { .. }
        | Intent::SetTextStyle { .. }
        | Intent::SetHorizontalAlignment { .. }
        | Intent::SetVerticalAlignment { .. }
        | Intent::SetWrapStrategy { .. }
        | Intent::SetTextRotation { .. }
        | Intent::SetBorders { .. }
        | Intent::MergeCells { .. }
        | Intent::UnmergeCells { .. }
        | Intent::SetColumnWidth { .. }
        | Intent::SetRowHeight { .. }
        | Intent::AutoResizeColumns { .. }
        | Intent::AutoResizeRows { .. } => Irreversible(FORMATS_NOT_CAPTURED),

        Intent::AddConditionalFormat { .. } | Intent::AddBanding { .. } => exact_inverse,
        Intent::UpdateConditionalFormat { .. }
        | Intent::SetDataValidation { .. }
        | Intent::ClearDataValidation { .. } => Irreversible("previous rules are not captured"),
        Intent::DeleteConditionalFormat { .. } | Intent::DeleteBanding { .. } => {
            Irreversible(OBJECT_NOT_CAPTURED)
        }

        Intent::InsertRows { .. }
        | Intent::InsertColumns { .. }
        | Intent::AppendDimension { .. }
        | Intent::MoveRows { .. }
        | Intent::MoveColumns { .. }
        | Intent::GroupRows { .. }
        | Intent::GroupColumns { .. }
        | Intent::UngroupRows { .. }
        | Intent::UngroupColumns { .. }
        | Intent::FreezeRows { .. }
        | Intent::FreezeColumns { .. }
        | Intent::InsertCells { .. } => exact_inverse,
        Intent::HideRows { .. }
        | Intent::HideColumns { .. }
        | Intent::ShowRows { .. }
        | Intent::ShowColumns { .. } => Inverse {
            restores_values: false,
            partial: Some("previous visibility of individual rows/columns is not known"),
        },
        Intent::DeleteRows { .. } | Intent::DeleteColumns { .. } | Intent::DeleteCells { .. } => {
            Inverse {
                restores_values: true,
                partial: Some(FORMATS_NOT_CAPTURED),
            }
        }

        Intent::AddSheet { .. }
        | Intent::DuplicateSheet { .. }
        | Intent::RenameSheet { .. }
        | Intent::MoveSheet { .. }
        | Intent::HideSheet { .. }
        | Intent::ShowSheet { .. } => exact_inverse,
        Intent::DeleteSheet { .. } => Inverse {
            restores_values: true,
            partial: Some("formatting and embedded objects of the sheet are lost"),
        },
        Intent::SetTabColor { .. }
        | Intent::SetGridlinesVisible { .. }
        | Intent::SetRightToLeft { .. } => Irreversible(PROPERTY_NOT_CAPTURED),

        Intent::AddNamedRange { .. }
        | Intent::UpdateNamedRange { .. }
        | Intent::DeleteNamedRange { .. }
        | Intent::ProtectRange { .. } => exact_inverse,
        Intent::UnprotectRange { .. } => Irreversible(OBJECT_NOT_CAPTURED),

        Intent::AddFilterView { .. } => exact_inverse,
        Intent::SetBasicFilter { .. }
        | Intent::ClearBasicFilter { .. }
        | Intent::UpdateFilterView { .. } => Irreversible("previous filter is not captured"),
        Intent::DeleteFilterView { .. } => Irreversible(OBJECT_NOT_CAPTURED),

        Intent::AddChart { .. } => exact_inverse,
        Intent::UpdateChartSpec { .. } | Intent::MoveChart { .. } => {
            Irreversible("previous chart definition is not captured")
        }
        Intent::DeleteChart { .. } => Irreversible(OBJECT_NOT_CAPTURED),

        Intent::AddPivotTable { .. } => exact_inverse,
        Intent::UpdatePivotTable { .. } => Irreversible("previous pivot definition is not captured"),
        Intent::DeletePivotTable { .. } => Irreversible(OBJECT_NOT_CAPTURED),

        Intent::AddDeveloperMetadata { .. }
        | Intent::SetDocumentTitle { .. }
        | Intent::SetDocumentLocale { .. } => exact_inverse,
        Intent::DeleteDeveloperMetadata { .. } => Irreversible(OBJECT_NOT_CAPTURED),

        Intent::AddPermission { .. } => exact_inverse,
        Intent::UpdatePermission { .. } => Irreversible("previous role is not captured"),
        Intent::RemovePermission { .. } => Irreversible("removed grants cannot be re-issued"),
    }
}

/// Static grade of an intent's compensation, assuming every capture succeeds.
pub fn compensation_for(intent: &Intent) -> Compensation {
    match strategy(intent) {
        Strategy::RestoreValues { partial } | Strategy::Inverse { partial, .. } => match partial {
            Some(reason) => Compensation::partial(reason),
            None => Compensation::Exact,
        },
        Strategy::Irreversible(reason) => Compensation::irreversible(reason),
    }
}

/// True when undoing the intent needs its footprint's values captured first.
pub fn needs_value_capture(intent: &Intent) -> bool {
    matches!(
        strategy(intent),
        Strategy::RestoreValues { .. }
            | Strategy::Inverse {
                restores_values: true,
                ..
            }
    )
}

/// Pre-operation values of one rectangle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedRegion {
    pub range: GridRange,
    pub values: Vec<Vec<CellValue>>,
}

/// Ids the provider assigned while applying an intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreatedIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_id: Option<String>,
}

/// Everything known about the state an intent was applied to.
#[derive(Debug, Clone, Copy)]
pub struct CompensationInput<'a> {
    /// Resolved rectangles the intent addressed.
    pub footprint: &'a [GridRange],
    pub captured: &'a [CapturedRegion],
    /// Document structure listed just before dispatch.
    pub document: Option<&'a DocumentMetadata>,
    pub created: &'a CreatedIds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationPlan {
    pub intents: Vec<Intent>,
    pub compensation: Compensation,
}

impl CompensationPlan {
    fn irreversible(reason: &str) -> Self {
        Self {
            intents: Vec::new(),
            compensation: Compensation::irreversible(reason),
        }
    }
}

fn restore_intents(captured: &[CapturedRegion]) -> Vec<Intent> {
    captured
        .iter()
        .rev()
        .map(|region| Intent::SetValues {
            range: RangeRef::Grid(region.range),
            values: region.values.clone(),
        })
        .collect()
}

/// Only the value-restoring part of a plan, used when it is unknown which
/// structural edits reached the provider.
pub fn value_restore(intent: &Intent, input: CompensationInput<'_>) -> Vec<Intent> {
    if needs_value_capture(intent) && !matches!(strategy(intent), Strategy::Inverse { .. }) {
        restore_intents(input.captured)
    } else {
        Vec::new()
    }
}

/// Build the intents that undo `intent`, graded by how much they restore.
pub fn plan_compensation(intent: &Intent, input: CompensationInput<'_>) -> CompensationPlan {
    let grade = compensation_for(intent);
    match strategy(intent) {
        Strategy::Irreversible(reason) => CompensationPlan::irreversible(reason),
        Strategy::RestoreValues { .. } => {
            if input.captured.is_empty() {
                return CompensationPlan::irreversible("pre-operation values were not captured");
            }
            CompensationPlan {
                intents: restore_intents(input.captured),
                compensation: grade,
            }
        }
        Strategy::Inverse {
            restores_values, ..
        } => {
            let mut intents = match structural_inverse(intent, &input) {
                Ok(intents) => intents,
                Err(reason) => return CompensationPlan::irreversible(reason),
            };
            let mut compensation = grade;
            if restores_values {
                if input.captured.is_empty() {
                    compensation = compensation.and(Compensation::partial(
                        "pre-operation values were not captured",
                    ));
                } else {
                    intents.extend(restore_intents(input.captured));
                }
            }
            CompensationPlan {
                intents,
                compensation,
            }
        }
    }
}

fn structural_inverse(
    intent: &Intent,
    input: &CompensationInput<'_>,
) -> Result<Vec<Intent>, &'static str> {
    let document = || input.document.ok_or("document structure was not captured");
    let section = |id: SectionId| {
        document().and_then(|doc| doc.section(id).ok_or("section was not in the captured structure"))
    };
    let footprint = || input.footprint.first().copied().ok_or("intent has no footprint");

    let inverse = match intent {
        Intent::InsertRows {
            section_id,
            start,
            count,
            ..
        } => vec![Intent::DeleteRows {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::InsertColumns {
            section_id,
            start,
            count,
            ..
        } => vec![Intent::DeleteColumns {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::DeleteRows {
            section_id,
            start,
            count,
        } => vec![Intent::InsertRows {
            section_id: *section_id,
            start: *start,
            count: *count,
            inherit_from_before: *start > 0,
        }],
        Intent::DeleteColumns {
            section_id,
            start,
            count,
        } => vec![Intent::InsertColumns {
            section_id: *section_id,
            start: *start,
            count: *count,
            inherit_from_before: *start > 0,
        }],
        Intent::AppendDimension {
            section_id,
            dimension,
            count,
        } => {
            let props = section(*section_id)?;
            match dimension {
                Dimension::Rows => vec![Intent::DeleteRows {
                    section_id: *section_id,
                    start: props.row_count,
                    count: *count,
                }],
                Dimension::Columns => vec![Intent::DeleteColumns {
                    section_id: *section_id,
                    start: props.column_count,
                    count: *count,
                }],
            }
        }
        Intent::MoveRows {
            section_id,
            start,
            count,
            destination,
        } => {
            let (start, destination) = inverse_move(*start, *count, *destination);
            vec![Intent::MoveRows {
                section_id: *section_id,
                start,
                count: *count,
                destination,
            }]
        }
        Intent::MoveColumns {
            section_id,
            start,
            count,
            destination,
        } => {
            let (start, destination) = inverse_move(*start, *count, *destination);
            vec![Intent::MoveColumns {
                section_id: *section_id,
                start,
                count: *count,
                destination,
            }]
        }
        Intent::HideRows {
            section_id,
            start,
            count,
        } => vec![Intent::ShowRows {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::ShowRows {
            section_id,
            start,
            count,
        } => vec![Intent::HideRows {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::HideColumns {
            section_id,
            start,
            count,
        } => vec![Intent::ShowColumns {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::ShowColumns {
            section_id,
            start,
            count,
        } => vec![Intent::HideColumns {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::GroupRows {
            section_id,
            start,
            count,
        } => vec![Intent::UngroupRows {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::UngroupRows {
            section_id,
            start,
            count,
        } => vec![Intent::GroupRows {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::GroupColumns {
            section_id,
            start,
            count,
        } => vec![Intent::UngroupColumns {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::UngroupColumns {
            section_id,
            start,
            count,
        } => vec![Intent::GroupColumns {
            section_id: *section_id,
            start: *start,
            count: *count,
        }],
        Intent::FreezeRows { section_id, .. } => vec![Intent::FreezeRows {
            section_id: *section_id,
            count: section(*section_id)?.frozen_rows,
        }],
        Intent::FreezeColumns { section_id, .. } => vec![Intent::FreezeColumns {
            section_id: *section_id,
            count: section(*section_id)?.frozen_columns,
        }],
        Intent::InsertCells { shift, .. } => vec![Intent::DeleteCells {
            range: RangeRef::Grid(footprint()?),
            shift: *shift,
        }],
        Intent::DeleteCells { shift, .. } => vec![Intent::InsertCells {
            range: RangeRef::Grid(footprint()?),
            shift: *shift,
        }],

        Intent::AddSheet { section_id, .. } => {
            let id = input
                .created
                .section_id
                .or(*section_id)
                .ok_or("the created section id is unknown")?;
            vec![Intent::DeleteSheet { section_id: id }]
        }
        Intent::DuplicateSheet { .. } => {
            let id = input
                .created
                .section_id
                .ok_or("the created section id is unknown")?;
            vec![Intent::DeleteSheet { section_id: id }]
        }
        Intent::DeleteSheet { section_id } => {
            let props = section(*section_id)?;
            vec![Intent::AddSheet {
                title: props.title.clone(),
                index: Some(props.index),
                section_id: Some(*section_id),
                rows: Some(props.row_count),
                columns: Some(props.column_count),
            }]
        }
        Intent::RenameSheet { section_id, .. } => vec![Intent::RenameSheet {
            section_id: *section_id,
            title: section(*section_id)?.title.clone(),
        }],
        Intent::MoveSheet { section_id, .. } => vec![Intent::MoveSheet {
            section_id: *section_id,
            index: section(*section_id)?.index,
        }],
        Intent::HideSheet { section_id } => {
            if section(*section_id)?.hidden {
                Vec::new()
            } else {
                vec![Intent::ShowSheet {
                    section_id: *section_id,
                }]
            }
        }
        Intent::ShowSheet { section_id } => {
            if section(*section_id)?.hidden {
                vec![Intent::HideSheet {
                    section_id: *section_id,
                }]
            } else {
                Vec::new()
            }
        }

        Intent::AddNamedRange { name, .. } => vec![Intent::DeleteNamedRange { name: name.clone() }],
        Intent::UpdateNamedRange { name, new_name, .. } => {
            let previous = document()?
                .named_ranges
                .iter()
                .find(|n| &n.name == name)
                .ok_or("named range was not in the captured structure")?;
            vec![Intent::UpdateNamedRange {
                name: new_name.clone().unwrap_or_else(|| name.clone()),
                new_name: new_name.as_ref().map(|_| name.clone()),
                range: Some(RangeRef::Grid(previous.range)),
            }]
        }
        Intent::DeleteNamedRange { name } => {
            let previous = document()?
                .named_ranges
                .iter()
                .find(|n| &n.name == name)
                .ok_or("named range was not in the captured structure")?;
            vec![Intent::AddNamedRange {
                name: name.clone(),
                range: RangeRef::Grid(previous.range),
            }]
        }
        Intent::SetDocumentTitle { .. } => vec![Intent::SetDocumentTitle {
            title: document()?.title.clone(),
        }],
        Intent::SetDocumentLocale { .. } => {
            let locale = document()?
                .locale
                .clone()
                .ok_or("the previous locale is unknown")?;
            vec![Intent::SetDocumentLocale { locale }]
        }

        Intent::AddConditionalFormat { index, .. } => vec![Intent::DeleteConditionalFormat {
            section_id: footprint()?.section_id,
            index: index.unwrap_or(0),
        }],
        Intent::AddBanding { .. } => vec![Intent::DeleteBanding {
            banding_id: created_object(input)?,
        }],
        Intent::ProtectRange { .. } => vec![Intent::UnprotectRange {
            protected_range_id: created_object(input)?,
        }],
        Intent::AddFilterView { .. } => vec![Intent::DeleteFilterView {
            filter_view_id: created_object(input)?,
        }],
        Intent::AddChart { .. } => vec![Intent::DeleteChart {
            chart_id: created_object(input)?,
        }],
        Intent::AddPivotTable { anchor, .. } => vec![Intent::DeletePivotTable { anchor: *anchor }],
        Intent::AddDeveloperMetadata { location, .. } => {
            if let MetadataLocation::Section { section_id } = location {
                section(*section_id)?;
            }
            vec![Intent::DeleteDeveloperMetadata {
                metadata_id: created_object(input)?,
            }]
        }
        Intent::AddPermission { .. } => {
            let permission_id = input
                .created
                .permission_id
                .clone()
                .ok_or("the created permission id is unknown")?;
            vec![Intent::RemovePermission { permission_id }]
        }

        Intent::SetValues { .. }
        | Intent::SetFormula { .. }
        | Intent::ClearValues { .. }
        | Intent::ClearAll { .. }
        | Intent::SortRange { .. }
        | Intent::RandomizeRange { .. }
        | Intent::TrimWhitespace { .. }
        | Intent::DeleteDuplicates { .. }
        | Intent::SplitTextToColumns { .. }
        | Intent::FindReplace { .. }
        | Intent::CopyRange { .. }
        | Intent::MoveRange { .. }
        | Intent::AutoFill { .. }
        | Intent::SetHyperlink { .. } => return Err("undone by restoring captured values"),

        Intent::AppendRows { .. }
        | Intent::SetNote { .. }
        | Intent::ClearNotes { .. }
        | Intent::ClearFormats { .. }
        | Intent::SetNumberFormat { .. }
        | Intent::SetBackgroundColor { .. }
        | Intent::SetTextColor { .. }
        | Intent::SetFont { .. }
        | Intent::SetTextStyle { .. }
        | Intent::SetHorizontalAlignment { .. }
        | Intent::SetVerticalAlignment { .. }
        | Intent::SetWrapStrategy { .. }
        | Intent::SetTextRotation { .. }
        | Intent::SetBorders { .. }
        | Intent::MergeCells { .. }
        | Intent::UnmergeCells { .. }
        | Intent::SetColumnWidth { .. }
        | Intent::SetRowHeight { .. }
        | Intent::AutoResizeColumns { .. }
        | Intent::AutoResizeRows { .. }
        | Intent::UpdateConditionalFormat { .. }
        | Intent::DeleteConditionalFormat { .. }
        | Intent::SetDataValidation { .. }
        | Intent::ClearDataValidation { .. }
        | Intent::DeleteBanding { .. }
        | Intent::SetTabColor { .. }
        | Intent::SetGridlinesVisible { .. }
        | Intent::SetRightToLeft { .. }
        | Intent::UnprotectRange { .. }
        | Intent::SetBasicFilter { .. }
        | Intent::ClearBasicFilter { .. }
        | Intent::UpdateFilterView { .. }
        | Intent::DeleteFilterView { .. }
        | Intent::UpdateChartSpec { .. }
        | Intent::MoveChart { .. }
        | Intent::DeleteChart { .. }
        | Intent::UpdatePivotTable { .. }
        | Intent::DeletePivotTable { .. }
        | Intent::DeleteDeveloperMetadata { .. }
        | Intent::UpdatePermission { .. }
        | Intent::RemovePermission { .. } => {
            return Err("the state this overwrote is not captured");
        }
    };
    Ok(inverse)
}

fn created_object(input: &CompensationInput<'_>) -> Result<u32, &'static str> {
    input
        .created
        .object_id
        .ok_or("the created object id is unknown")
}

/// Move that puts a moved band back. Input and output use pre-move coordinates.
fn inverse_move(start: u32, count: u32, destination: u32) -> (u32, u32) {
    if destination > start {
        (destination - count, start)
    } else {
        (destination, start + count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SectionProperties;

    fn doc() -> DocumentMetadata {
        DocumentMetadata {
            title: "Budget".into(),
            locale: Some("en_US".into()),
            sections: vec![
                SectionProperties::new(1, "Data", 0).with_extents(100, 10),
                SectionProperties::new(2, "Notes", 1),
            ],
            named_ranges: Vec::new(),
        }
    }

    #[test]
    fn inverse_move_round_trips() {
        assert_eq!(inverse_move(2, 3, 10), (7, 2));
        assert_eq!(inverse_move(5, 3, 1), (1, 8));
    }

    #[test]
    fn delete_rows_reinserts_and_restores_values() {
        let band = GridRange::new(1, 4, 6, 0, 10);
        let captured = vec![CapturedRegion {
            range: band,
            values: vec![vec![CellValue::from(1); 10]; 2],
        }];
        let created = CreatedIds::default();
        let document = doc();
        let plan = plan_compensation(
            &Intent::DeleteRows {
                section_id: SectionId(1),
                start: 4,
                count: 2,
            },
            CompensationInput {
                footprint: &[band],
                captured: &captured,
                document: Some(&document),
                created: &created,
            },
        );
        assert!(matches!(plan.compensation, Compensation::Partial { .. }));
        assert_eq!(plan.intents.len(), 2);
        assert!(matches!(plan.intents[0], Intent::InsertRows { start: 4, count: 2, .. }));
        assert!(matches!(plan.intents[1], Intent::SetValues { .. }));
    }

    #[test]
    fn missing_created_id_is_irreversible() {
        let created = CreatedIds::default();
        let plan = plan_compensation(
            &Intent::DuplicateSheet {
                section_id: SectionId(1),
                new_title: None,
                index: None,
            },
            CompensationInput {
                footprint: &[],
                captured: &[],
                document: None,
                created: &created,
            },
        );
        assert!(matches!(plan.compensation, Compensation::Irreversible { .. }));
        assert!(plan.intents.is_empty());
    }

    #[test]
    fn rename_restores_previous_title() {
        let created = CreatedIds::default();
        let document = doc();
        let plan = plan_compensation(
            &Intent::RenameSheet {
                section_id: SectionId(2),
                title: "Archive".into(),
            },
            CompensationInput {
                footprint: &[],
                captured: &[],
                document: Some(&document),
                created: &created,
            },
        );
        assert!(plan.compensation.is_exact());
        assert_eq!(
            plan.intents,
            vec![Intent::RenameSheet {
                section_id: SectionId(2),
                title: "Notes".into()
            }]
        );
    }

    #[test]
    fn only_inverse_strategies_build_structural_inverses() {
        let created = CreatedIds {
            object_id: Some(7),
            ..CreatedIds::default()
        };
        let document = doc();
        let input = CompensationInput {
            footprint: &[],
            captured: &[],
            document: Some(&document),
            created: &created,
        };
        assert_eq!(
            structural_inverse(&Intent::DeleteChart { chart_id: 7 }, &input),
            Err("the state this overwrote is not captured")
        );
        assert_eq!(
            structural_inverse(
                &Intent::ClearValues {
                    range: RangeRef::a1(1, "A1")
                },
                &input
            ),
            Err("undone by restoring captured values")
        );
        assert_eq!(
            structural_inverse(
                &Intent::RenameSheet {
                    section_id: SectionId(1),
                    title: "Other".into()
                },
                &input
            ),
            Ok(vec![Intent::RenameSheet {
                section_id: SectionId(1),
                title: "Data".into()
            }])
        );
    }
}
