//! Closed vocabulary of spreadsheet operations.
//!
//! Every operation the engine understands is one [`Intent`] variant. Sites that
//! branch on the operation kind match exhaustively, so a new variant fails to
//! compile until lowering, classification and compensation all handle it.

pub mod inverse;
pub mod types;

use crate::errors::{OpsError, Result};
use crate::model::{A1Range, CellValue, Color, Dimension, SectionId};
use crate::resolver::{MetadataNeeds, RangeRef};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use inverse::{Compensation, compensation_for};
pub use types::*;

const MAX_TITLE_CHARS: usize = 100;

static NAMED_RANGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_\\][A-Za-z0-9_.]{0,249}$").expect("valid regex"));
static LOOKS_LIKE_CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:[A-Z]{1,3}[0-9]+|R[0-9]*C[0-9]*)$").expect("valid regex")
});
static LOCALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(?:_[A-Z]{2})?$").expect("valid regex"));

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentCategory {
    Values,
    Formatting,
    Rules,
    Structure,
    Sheets,
    NamesProtection,
    Filters,
    Charts,
    Pivots,
    Document,
    Permissions,
}

/// Kinds of loss a destructive intent can cause. A batch that mixes classes
/// is flagged by the policy enforcer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DestructiveClass {
    RowDeletion,
    ColumnDeletion,
    SheetDeletion,
    ValueClear,
    ObjectDeletion,
    PermissionRemoval,
}

/// One spreadsheet-level operation, before compilation.
///
/// Serialized as `{"kind": "<snake_case>", ...fields}`. Row and column indices
/// are zero-based; `start`/`count` pairs describe a band starting at `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, strum::IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Intent {
    // values
    SetValues {
        range: RangeRef,
        values: Vec<Vec<CellValue>>,
    },
    /// Same formula written into every cell; references shift relatively.
    SetFormula {
        range: RangeRef,
        formula: String,
    },
    AppendRows {
        section_id: SectionId,
        values: Vec<Vec<CellValue>>,
    },
    ClearValues {
        range: RangeRef,
    },
    ClearFormats {
        range: RangeRef,
    },
    ClearAll {
        range: RangeRef,
    },
    /// Scope is `range` when given, else `section_id`, else every section.
    FindReplace {
        find: String,
        replacement: String,
        #[serde(default)]
        range: Option<RangeRef>,
        #[serde(default)]
        section_id: Option<SectionId>,
        #[serde(default)]
        match_case: bool,
        #[serde(default)]
        match_entire_cell: bool,
        #[serde(default)]
        use_regex: bool,
        #[serde(default)]
        include_formulas: bool,
    },
    CopyRange {
        source: RangeRef,
        destination: RangeRef,
        #[serde(default)]
        paste_type: PasteType,
    },
    /// Cut `source` and paste at the top-left of `destination`.
    MoveRange {
        source: RangeRef,
        destination: RangeRef,
    },
    SortRange {
        range: RangeRef,
        sort_specs: Vec<SortSpec>,
    },
    RandomizeRange {
        range: RangeRef,
    },
    TrimWhitespace {
        range: RangeRef,
    },
    DeleteDuplicates {
        range: RangeRef,
        #[serde(default)]
        comparison_columns: Vec<u32>,
    },
    SplitTextToColumns {
        range: RangeRef,
        #[serde(default)]
        delimiter: SplitDelimiter,
    },
    AutoFill {
        source: RangeRef,
        dimension: Dimension,
        fill_length: u32,
    },
    SetNote {
        range: RangeRef,
        note: String,
    },
    ClearNotes {
        range: RangeRef,
    },
    SetHyperlink {
        range: RangeRef,
        url: String,
        #[serde(default)]
        label: Option<String>,
    },

    // formatting
    SetNumberFormat {
        range: RangeRef,
        format: NumberFormatKind,
        #[serde(default)]
        pattern: Option<String>,
    },
    SetBackgroundColor {
        range: RangeRef,
        color: Color,
    },
    SetTextColor {
        range: RangeRef,
        color: Color,
    },
    SetFont {
        range: RangeRef,
        #[serde(default)]
        family: Option<String>,
        #[serde(default)]
        size: Option<u32>,
    },
    SetTextStyle {
        range: RangeRef,
        style: TextStyle,
    },
    SetHorizontalAlignment {
        range: RangeRef,
        alignment: HorizontalAlign,
    },
    SetVerticalAlignment {
        range: RangeRef,
        alignment: VerticalAlign,
    },
    SetWrapStrategy {
        range: RangeRef,
        strategy: WrapStrategy,
    },
    SetTextRotation {
        range: RangeRef,
        angle: i32,
    },
    SetBorders {
        range: RangeRef,
        sides: BorderSides,
        #[serde(default)]
        style: BorderStyle,
        #[serde(default)]
        color: Option<Color>,
    },
    MergeCells {
        range: RangeRef,
        #[serde(default)]
        merge_type: MergeType,
    },
    UnmergeCells {
        range: RangeRef,
    },
    SetColumnWidth {
        section_id: SectionId,
        start: u32,
        end: u32,
        pixels: u32,
    },
    SetRowHeight {
        section_id: SectionId,
        start: u32,
        end: u32,
        pixels: u32,
    },
    AutoResizeColumns {
        section_id: SectionId,
        start: u32,
        end: u32,
    },
    AutoResizeRows {
        section_id: SectionId,
        start: u32,
        end: u32,
    },

    // rules
    AddConditionalFormat {
        range: RangeRef,
        rule: ConditionalRule,
        #[serde(default)]
        index: Option<u32>,
    },
    UpdateConditionalFormat {
        section_id: SectionId,
        index: u32,
        rule: ConditionalRule,
        #[serde(default)]
        range: Option<RangeRef>,
    },
    DeleteConditionalFormat {
        section_id: SectionId,
        index: u32,
    },
    SetDataValidation {
        range: RangeRef,
        rule: ValidationRule,
    },
    ClearDataValidation {
        range: RangeRef,
    },
    AddBanding {
        range: RangeRef,
        colors: BandingColors,
    },
    DeleteBanding {
        banding_id: u32,
    },

    // structure
    InsertRows {
        section_id: SectionId,
        start: u32,
        count: u32,
        #[serde(default)]
        inherit_from_before: bool,
    },
    InsertColumns {
        section_id: SectionId,
        start: u32,
        count: u32,
        #[serde(default)]
        inherit_from_before: bool,
    },
    DeleteRows {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    DeleteColumns {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    AppendDimension {
        section_id: SectionId,
        dimension: Dimension,
        count: u32,
    },
    /// `destination` is an index in the pre-move coordinates.
    MoveRows {
        section_id: SectionId,
        start: u32,
        count: u32,
        destination: u32,
    },
    MoveColumns {
        section_id: SectionId,
        start: u32,
        count: u32,
        destination: u32,
    },
    HideRows {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    HideColumns {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    ShowRows {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    ShowColumns {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    GroupRows {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    GroupColumns {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    UngroupRows {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    UngroupColumns {
        section_id: SectionId,
        start: u32,
        count: u32,
    },
    FreezeRows {
        section_id: SectionId,
        count: u32,
    },
    FreezeColumns {
        section_id: SectionId,
        count: u32,
    },
    InsertCells {
        range: RangeRef,
        shift: Dimension,
    },
    DeleteCells {
        range: RangeRef,
        shift: Dimension,
    },

    // sheets
    AddSheet {
        title: String,
        #[serde(default)]
        index: Option<u32>,
        /// Requested id; the provider assigns one when absent.
        #[serde(default)]
        section_id: Option<SectionId>,
        #[serde(default)]
        rows: Option<u32>,
        #[serde(default)]
        columns: Option<u32>,
    },
    DeleteSheet {
        section_id: SectionId,
    },
    DuplicateSheet {
        section_id: SectionId,
        #[serde(default)]
        new_title: Option<String>,
        #[serde(default)]
        index: Option<u32>,
    },
    RenameSheet {
        section_id: SectionId,
        title: String,
    },
    MoveSheet {
        section_id: SectionId,
        index: u32,
    },
    HideSheet {
        section_id: SectionId,
    },
    ShowSheet {
        section_id: SectionId,
    },
    SetTabColor {
        section_id: SectionId,
        #[serde(default)]
        color: Option<Color>,
    },
    SetGridlinesVisible {
        section_id: SectionId,
        visible: bool,
    },
    SetRightToLeft {
        section_id: SectionId,
        right_to_left: bool,
    },

    // names & protection
    AddNamedRange {
        name: String,
        range: RangeRef,
    },
    UpdateNamedRange {
        name: String,
        #[serde(default)]
        new_name: Option<String>,
        #[serde(default)]
        range: Option<RangeRef>,
    },
    DeleteNamedRange {
        name: String,
    },
    ProtectRange {
        range: RangeRef,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        warning_only: bool,
        #[serde(default)]
        editors: Vec<String>,
    },
    UnprotectRange {
        protected_range_id: u32,
    },

    // filters
    SetBasicFilter {
        range: RangeRef,
        #[serde(default)]
        criteria: Vec<FilterCriterion>,
    },
    ClearBasicFilter {
        section_id: SectionId,
    },
    AddFilterView {
        title: String,
        range: RangeRef,
        #[serde(default)]
        criteria: Vec<FilterCriterion>,
    },
    UpdateFilterView {
        filter_view_id: u32,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        criteria: Option<Vec<FilterCriterion>>,
    },
    DeleteFilterView {
        filter_view_id: u32,
    },

    // charts
    AddChart {
        spec: ChartSpec,
        anchor: Anchor,
    },
    UpdateChartSpec {
        chart_id: u32,
        spec: ChartSpec,
    },
    MoveChart {
        chart_id: u32,
        anchor: Anchor,
    },
    DeleteChart {
        chart_id: u32,
    },

    // pivots
    AddPivotTable {
        source: RangeRef,
        anchor: Anchor,
        spec: PivotSpec,
    },
    UpdatePivotTable {
        source: RangeRef,
        anchor: Anchor,
        spec: PivotSpec,
    },
    DeletePivotTable {
        anchor: Anchor,
    },

    // document
    AddDeveloperMetadata {
        key: String,
        value: String,
        location: MetadataLocation,
    },
    DeleteDeveloperMetadata {
        metadata_id: u32,
    },
    SetDocumentTitle {
        title: String,
    },
    SetDocumentLocale {
        locale: String,
    },

    // permissions
    AddPermission {
        principal: Principal,
        role: PermissionRole,
    },
    UpdatePermission {
        permission_id: String,
        role: PermissionRole,
    },
    RemovePermission {
        permission_id: String,
    },
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub fn category(&self) -> IntentCategory {
        use IntentCategory as C;
        match self {
            Self::SetValues { .. }
            | Self::SetFormula { .. }
            | Self::AppendRows { .. }
            | Self::ClearValues { .. }
            | Self::ClearFormats { .. }
            | Self::ClearAll { .. }
            | Self::FindReplace { .. }
            | Self::CopyRange { .. }
            | Self::MoveRange { .. }
            | Self::SortRange { .. }
            | Self::RandomizeRange { .. }
            | Self::TrimWhitespace { .. }
            | Self::DeleteDuplicates { .. }
            | Self::SplitTextToColumns { .. }
            | Self::AutoFill { .. }
            | Self::SetNote { .. }
            | Self::ClearNotes { .. }
            | Self::SetHyperlink { .. } => C::Values,
            Self::SetNumberFormat { .. }
            | Self::SetBackgroundColor { .. }
            | Self::SetTextColor { .. }
            | Self::SetFont { .. }
            | Self::SetTextStyle { .. }
            | Self::SetHorizontalAlignment { .. }
            | Self::SetVerticalAlignment { .. }
            | Self::SetWrapStrategy { .. }
            | Self::SetTextRotation { .. }
            | Self::SetBorders { .. }
            | Self::MergeCells { .. }
            | Self::UnmergeCells { .. }
            | Self::SetColumnWidth { .. }
            | Self::SetRowHeight { .. }
            | Self::AutoResizeColumns { .. }
            | Self::AutoResizeRows { .. } => C::Formatting,
            Self::AddConditionalFormat { .. }
            | Self::UpdateConditionalFormat { .. }
            | Self::DeleteConditionalFormat { .. }
            | Self::SetDataValidation { .. }
            | Self::ClearDataValidation { .. }
            | Self::AddBanding { .. }
            | Self::DeleteBanding { .. } => C::Rules,
            Self::InsertRows { .. }
            | Self::InsertColumns { .. }
            | Self::DeleteRows { .. }
            | Self::DeleteColumns { .. }
            | Self::AppendDimension { .. }
            | Self::MoveRows { .. }
            | Self::MoveColumns { .. }
            | Self::HideRows { .. }
            | Self::HideColumns { .. }
            | Self::ShowRows { .. }
            | Self::ShowColumns { .. }
            | Self::GroupRows { .. }
            | Self::GroupColumns { .. }
            | Self::UngroupRows { .. }
            | Self::UngroupColumns { .. }
            | Self::FreezeRows { .. }
            | Self::FreezeColumns { .. }
            | Self::InsertCells { .. }
            | Self::DeleteCells { .. } => C::Structure,
            Self::AddSheet { .. }
            | Self::DeleteSheet { .. }
            | Self::DuplicateSheet { .. }
            | Self::RenameSheet { .. }
            | Self::MoveSheet { .. }
            | Self::HideSheet { .. }
            | Self::ShowSheet { .. }
            | Self::SetTabColor { .. }
            | Self::SetGridlinesVisible { .. }
            | Self::SetRightToLeft { .. } => C::Sheets,
            Self::AddNamedRange { .. }
            | Self::UpdateNamedRange { .. }
            | Self::DeleteNamedRange { .. }
            | Self::ProtectRange { .. }
            | Self::UnprotectRange { .. } => C::NamesProtection,
            Self::SetBasicFilter { .. }
            | Self::ClearBasicFilter { .. }
            | Self::AddFilterView { .. }
            | Self::UpdateFilterView { .. }
            | Self::DeleteFilterView { .. } => C::Filters,
            Self::AddChart { .. }
            | Self::UpdateChartSpec { .. }
            | Self::MoveChart { .. }
            | Self::DeleteChart { .. } => C::Charts,
            Self::AddPivotTable { .. }
            | Self::UpdatePivotTable { .. }
            | Self::DeletePivotTable { .. } => C::Pivots,
            Self::AddDeveloperMetadata { .. }
            | Self::DeleteDeveloperMetadata { .. }
            | Self::SetDocumentTitle { .. }
            | Self::SetDocumentLocale { .. } => C::Document,
            Self::AddPermission { .. }
            | Self::UpdatePermission { .. }
            | Self::RemovePermission { .. } => C::Permissions,
        }
    }

    pub fn destructive_class(&self) -> Option<DestructiveClass> {
        use DestructiveClass as D;
        match self {
            Self::DeleteRows { .. } => Some(D::RowDeletion),
            Self::DeleteColumns { .. } => Some(D::ColumnDeletion),
            Self::DeleteSheet { .. } => Some(D::SheetDeletion),
            Self::ClearValues { .. }
            | Self::ClearAll { .. }
            | Self::DeleteDuplicates { .. }
            | Self::DeleteCells { .. } => Some(D::ValueClear),
            Self::DeleteConditionalFormat { .. }
            | Self::DeleteBanding { .. }
            | Self::DeleteNamedRange { .. }
            | Self::UnprotectRange { .. }
            | Self::DeleteFilterView { .. }
            | Self::DeleteChart { .. }
            | Self::DeletePivotTable { .. }
            | Self::DeleteDeveloperMetadata { .. } => Some(D::ObjectDeletion),
            Self::RemovePermission { .. } => Some(D::PermissionRemoval),
            Self::SetValues { .. }
            | Self::SetFormula { .. }
            | Self::AppendRows { .. }
            | Self::ClearFormats { .. }
            | Self::FindReplace { .. }
            | Self::CopyRange { .. }
            | Self::MoveRange { .. }
            | Self::SortRange { .. }
            | Self::RandomizeRange { .. }
            | Self::TrimWhitespace { .. }
            | Self::SplitTextToColumns { .. }
            | Self::AutoFill { .. }
            | Self::SetNote { .. }
            | Self::ClearNotes { .. }
            | Self::SetHyperlink { .. }
            | Self::SetNumberFormat { .. }
            | Self::SetBackgroundColor { .. }
            | Self::SetTextColor { .. }
            | Self::SetFont { .. }
            | Self::SetTextStyle { .. }
            | Self::SetHorizontalAlignment { .. }
            | Self::SetVerticalAlignment { .. }
            | Self::SetWrapStrategy { .. }
            | Self::SetTextRotation { .. }
            | Self::SetBorders { .. }
            | Self::MergeCells { .. }
            | Self::UnmergeCells { .. }
            | Self::SetColumnWidth { .. }
            | Self::SetRowHeight { .. }
            | Self::AutoResizeColumns { .. }
            | Self::AutoResizeRows { .. }
            | Self::AddConditionalFormat { .. }
            | Self::UpdateConditionalFormat { .. }
            | Self::SetDataValidation { .. }
            | Self::ClearDataValidation { .. }
            | Self::AddBanding { .. }
            | Self::InsertRows { .. }
            | Self::InsertColumns { .. }
            | Self::AppendDimension { .. }
            | Self::MoveRows { .. }
            | Self::MoveColumns { .. }
            | Self::HideRows { .. }
            | Self::HideColumns { .. }
            | Self::ShowRows { .. }
            | Self::ShowColumns { .. }
            | Self::GroupRows { .. }
            | Self::GroupColumns { .. }
            | Self::UngroupRows { .. }
            | Self::UngroupColumns { .. }
            | Self::FreezeRows { .. }
            | Self::FreezeColumns { .. }
            | Self::InsertCells { .. }
            | Self::AddSheet { .. }
            | Self::DuplicateSheet { .. }
            | Self::RenameSheet { .. }
            | Self::MoveSheet { .. }
            | Self::HideSheet { .. }
            | Self::ShowSheet { .. }
            | Self::SetTabColor { .. }
            | Self::SetGridlinesVisible { .. }
            | Self::SetRightToLeft { .. }
            | Self::AddNamedRange { .. }
            | Self::UpdateNamedRange { .. }
            | Self::ProtectRange { .. }
            | Self::SetBasicFilter { .. }
            | Self::ClearBasicFilter { .. }
            | Self::AddFilterView { .. }
            | Self::UpdateFilterView { .. }
            | Self::AddChart { .. }
            | Self::UpdateChartSpec { .. }
            | Self::MoveChart { .. }
            | Self::AddPivotTable { .. }
            | Self::UpdatePivotTable { .. }
            | Self::AddDeveloperMetadata { .. }
            | Self::SetDocumentTitle { .. }
            | Self::SetDocumentLocale { .. }
            | Self::AddPermission { .. }
            | Self::UpdatePermission { .. } => None,
        }
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive_class().is_some()
    }

    /// Every loose range reference carried by the intent.
    pub fn range_refs(&self) -> SmallVec<[&RangeRef; 2]> {
        let mut refs = SmallVec::new();
        match self {
            Self::SetValues { range, .. }
            | Self::SetFormula { range, .. }
            | Self::ClearValues { range }
            | Self::ClearFormats { range }
            | Self::ClearAll { range }
            | Self::SortRange { range, .. }
            | Self::RandomizeRange { range }
            | Self::TrimWhitespace { range }
            | Self::DeleteDuplicates { range, .. }
            | Self::SplitTextToColumns { range, .. }
            | Self::SetNote { range, .. }
            | Self::ClearNotes { range }
            | Self::SetHyperlink { range, .. }
            | Self::SetNumberFormat { range, .. }
            | Self::SetBackgroundColor { range, .. }
            | Self::SetTextColor { range, .. }
            | Self::SetFont { range, .. }
            | Self::SetTextStyle { range, .. }
            | Self::SetHorizontalAlignment { range, .. }
            | Self::SetVerticalAlignment { range, .. }
            | Self::SetWrapStrategy { range, .. }
            | Self::SetTextRotation { range, .. }
            | Self::SetBorders { range, .. }
            | Self::MergeCells { range, .. }
            | Self::UnmergeCells { range }
            | Self::AddConditionalFormat { range, .. }
            | Self::SetDataValidation { range, .. }
            | Self::ClearDataValidation { range }
            | Self::AddBanding { range, .. }
            | Self::InsertCells { range, .. }
            | Self::DeleteCells { range, .. }
            | Self::AddNamedRange { range, .. }
            | Self::ProtectRange { range, .. }
            | Self::SetBasicFilter { range, .. }
            | Self::AddFilterView { range, .. } => refs.push(range),
            Self::AutoFill { source, .. } => refs.push(source),
            Self::CopyRange {
                source,
                destination,
                ..
            }
            | Self::MoveRange {
                source,
                destination,
            } => {
                refs.push(source);
                refs.push(destination);
            }
            Self::FindReplace { range, .. }
            | Self::UpdateConditionalFormat { range, .. }
            | Self::UpdateNamedRange { range, .. } => {
                if let Some(range) = range {
                    refs.push(range);
                }
            }
            Self::AddChart { spec, .. } | Self::UpdateChartSpec { spec, .. } => {
                refs.push(&spec.source)
            }
            Self::AddPivotTable { source, .. } | Self::UpdatePivotTable { source, .. } => {
                refs.push(source)
            }
            Self::AppendRows { .. }
            | Self::SetColumnWidth { .. }
            | Self::SetRowHeight { .. }
            | Self::AutoResizeColumns { .. }
            | Self::AutoResizeRows { .. }
            | Self::DeleteConditionalFormat { .. }
            | Self::DeleteBanding { .. }
            | Self::InsertRows { .. }
            | Self::InsertColumns { .. }
            | Self::DeleteRows { .. }
            | Self::DeleteColumns { .. }
            | Self::AppendDimension { .. }
            | Self::MoveRows { .. }
            | Self::MoveColumns { .. }
            | Self::HideRows { .. }
            | Self::HideColumns { .. }
            | Self::ShowRows { .. }
            | Self::ShowColumns { .. }
            | Self::GroupRows { .. }
            | Self::GroupColumns { .. }
            | Self::UngroupRows { .. }
            | Self::UngroupColumns { .. }
            | Self::FreezeRows { .. }
            | Self::FreezeColumns { .. }
            | Self::AddSheet { .. }
            | Self::DeleteSheet { .. }
            | Self::DuplicateSheet { .. }
            | Self::RenameSheet { .. }
            | Self::MoveSheet { .. }
            | Self::HideSheet { .. }
            | Self::ShowSheet { .. }
            | Self::SetTabColor { .. }
            | Self::SetGridlinesVisible { .. }
            | Self::SetRightToLeft { .. }
            | Self::DeleteNamedRange { .. }
            | Self::UnprotectRange { .. }
            | Self::ClearBasicFilter { .. }
            | Self::UpdateFilterView { .. }
            | Self::DeleteFilterView { .. }
            | Self::MoveChart { .. }
            | Self::DeleteChart { .. }
            | Self::DeletePivotTable { .. }
            | Self::AddDeveloperMetadata { .. }
            | Self::DeleteDeveloperMetadata { .. }
            | Self::SetDocumentTitle { .. }
            | Self::SetDocumentLocale { .. }
            | Self::AddPermission { .. }
            | Self::UpdatePermission { .. }
            | Self::RemovePermission { .. } => {}
        }
        refs
    }

    /// Section named directly by the intent (not through a range reference).
    pub fn direct_section(&self) -> Option<SectionId> {
        match self {
            Self::AppendRows { section_id, .. }
            | Self::SetColumnWidth { section_id, .. }
            | Self::SetRowHeight { section_id, .. }
            | Self::AutoResizeColumns { section_id, .. }
            | Self::AutoResizeRows { section_id, .. }
            | Self::UpdateConditionalFormat { section_id, .. }
            | Self::DeleteConditionalFormat { section_id, .. }
            | Self::InsertRows { section_id, .. }
            | Self::InsertColumns { section_id, .. }
            | Self::DeleteRows { section_id, .. }
            | Self::DeleteColumns { section_id, .. }
            | Self::AppendDimension { section_id, .. }
            | Self::MoveRows { section_id, .. }
            | Self::MoveColumns { section_id, .. }
            | Self::HideRows { section_id, .. }
            | Self::HideColumns { section_id, .. }
            | Self::ShowRows { section_id, .. }
            | Self::ShowColumns { section_id, .. }
            | Self::GroupRows { section_id, .. }
            | Self::GroupColumns { section_id, .. }
            | Self::UngroupRows { section_id, .. }
            | Self::UngroupColumns { section_id, .. }
            | Self::FreezeRows { section_id, .. }
            | Self::FreezeColumns { section_id, .. }
            | Self::DeleteSheet { section_id }
            | Self::DuplicateSheet { section_id, .. }
            | Self::RenameSheet { section_id, .. }
            | Self::MoveSheet { section_id, .. }
            | Self::HideSheet { section_id }
            | Self::ShowSheet { section_id }
            | Self::SetTabColor { section_id, .. }
            | Self::SetGridlinesVisible { section_id, .. }
            | Self::SetRightToLeft { section_id, .. }
            | Self::ClearBasicFilter { section_id } => Some(*section_id),
            Self::FindReplace { section_id, .. } => *section_id,
            Self::AddChart { anchor, .. }
            | Self::MoveChart { anchor, .. }
            | Self::AddPivotTable { anchor, .. }
            | Self::UpdatePivotTable { anchor, .. }
            | Self::DeletePivotTable { anchor } => Some(anchor.section_id),
            Self::AddDeveloperMetadata { location, .. } => match location {
                MetadataLocation::Document => None,
                MetadataLocation::Section { section_id }
                | MetadataLocation::Rows { section_id, .. }
                | MetadataLocation::Columns { section_id, .. } => Some(*section_id),
            },
            Self::AddSheet { section_id, .. } => *section_id,
            Self::SetValues { .. }
            | Self::SetFormula { .. }
            | Self::ClearValues { .. }
            | Self::ClearFormats { .. }
            | Self::ClearAll { .. }
            | Self::CopyRange { .. }
            | Self::MoveRange { .. }
            | Self::SortRange { .. }
            | Self::RandomizeRange { .. }
            | Self::TrimWhitespace { .. }
            | Self::DeleteDuplicates { .. }
            | Self::SplitTextToColumns { .. }
            | Self::AutoFill { .. }
            | Self::SetNote { .. }
            | Self::ClearNotes { .. }
            | Self::SetHyperlink { .. }
            | Self::SetNumberFormat { .. }
            | Self::SetBackgroundColor { .. }
            | Self::SetTextColor { .. }
            | Self::SetFont { .. }
            | Self::SetTextStyle { .. }
            | Self::SetHorizontalAlignment { .. }
            | Self::SetVerticalAlignment { .. }
            | Self::SetWrapStrategy { .. }
            | Self::SetTextRotation { .. }
            | Self::SetBorders { .. }
            | Self::MergeCells { .. }
            | Self::UnmergeCells { .. }
            | Self::AddConditionalFormat { .. }
            | Self::SetDataValidation { .. }
            | Self::ClearDataValidation { .. }
            | Self::AddBanding { .. }
            | Self::DeleteBanding { .. }
            | Self::InsertCells { .. }
            | Self::DeleteCells { .. }
            | Self::AddNamedRange { .. }
            | Self::UpdateNamedRange { .. }
            | Self::DeleteNamedRange { .. }
            | Self::ProtectRange { .. }
            | Self::UnprotectRange { .. }
            | Self::SetBasicFilter { .. }
            | Self::AddFilterView { .. }
            | Self::UpdateFilterView { .. }
            | Self::DeleteFilterView { .. }
            | Self::UpdateChartSpec { .. }
            | Self::DeleteChart { .. }
            | Self::DeleteDeveloperMetadata { .. }
            | Self::SetDocumentTitle { .. }
            | Self::SetDocumentLocale { .. }
            | Self::AddPermission { .. }
            | Self::UpdatePermission { .. }
            | Self::RemovePermission { .. } => None,
        }
    }

    /// Record which metadata the resolver must have cached before this intent
    /// can be compiled.
    pub fn collect_metadata_needs(&self, needs: &mut MetadataNeeds) {
        for range in self.range_refs() {
            range.collect_metadata_needs(needs);
        }
        if let Some(section_id) = self.direct_section()
            && !matches!(self, Self::AddSheet { .. })
        {
            needs.section(section_id);
        }
        if matches!(self, Self::FindReplace { range: None, section_id: None, .. }) {
            needs.document();
        }
    }

    /// Shape validation. No I/O; references are checked for form, not existence.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        let invalid = |message: String| OpsError::Validation {
            intent_index: None,
            kind: Some(kind),
            message,
        };
        let ensure = |ok: bool, message: &str| {
            if ok {
                Ok(())
            } else {
                Err(invalid(message.to_string()))
            }
        };

        for range in self.range_refs() {
            range.validate().map_err(|e| invalid(e.to_string()))?;
        }

        match self {
            Self::SetValues { values, .. } | Self::AppendRows { values, .. } => {
                ensure(
                    values.iter().any(|row| !row.is_empty()),
                    "values must contain at least one cell",
                )?;
            }
            Self::SetFormula { formula, .. } => {
                let body = formula.trim().trim_start_matches('=');
                ensure(!body.is_empty(), "formula is empty")?;
            }
            Self::FindReplace {
                find,
                range,
                section_id,
                use_regex,
                ..
            } => {
                ensure(!find.is_empty(), "find text is empty")?;
                ensure(
                    !(range.is_some() && section_id.is_some()),
                    "range and section_id are mutually exclusive",
                )?;
                if *use_regex {
                    Regex::new(find).map_err(|e| invalid(format!("invalid regex: {e}")))?;
                }
            }
            Self::SortRange { sort_specs, .. } => {
                ensure(!sort_specs.is_empty(), "sort_specs must not be empty")?;
            }
            Self::SplitTextToColumns {
                delimiter: SplitDelimiter::Custom(custom),
                ..
            } => ensure(!custom.is_empty(), "custom delimiter is empty")?,
            Self::AutoFill { fill_length, .. } => {
                ensure(*fill_length > 0, "fill_length must be positive")?;
            }
            Self::SetHyperlink { url, .. } => {
                let lower = url.to_ascii_lowercase();
                ensure(
                    ["http://", "https://", "mailto:"]
                        .iter()
                        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len()),
                    "url must be an http(s) or mailto link",
                )?;
            }
            Self::SetNumberFormat {
                pattern: Some(pattern),
                ..
            } => ensure(!pattern.trim().is_empty(), "pattern is empty")?,
            Self::SetBackgroundColor { color, .. } | Self::SetTextColor { color, .. } => {
                ensure(color.is_valid(), "color channels must be within [0, 1]")?;
            }
            Self::SetFont { family, size, .. } => {
                ensure(
                    family.is_some() || size.is_some(),
                    "set_font needs a family or a size",
                )?;
                if let Some(family) = family {
                    ensure(!family.trim().is_empty(), "font family is empty")?;
                }
                if let Some(size) = size {
                    ensure((1..=400).contains(size), "font size must be within 1..=400")?;
                }
            }
            Self::SetTextStyle { style, .. } => {
                ensure(!style.is_empty(), "text style sets no attribute")?;
            }
            Self::SetTextRotation { angle, .. } => {
                ensure((-90..=90).contains(angle), "angle must be within -90..=90")?;
            }
            Self::SetBorders { sides, color, .. } => {
                ensure(sides.any(), "no border side selected")?;
                ensure(
                    color.is_none_or(|c| c.is_valid()),
                    "color channels must be within [0, 1]",
                )?;
            }
            Self::SetColumnWidth {
                start, end, pixels, ..
            }
            | Self::SetRowHeight {
                start, end, pixels, ..
            } => {
                ensure(start < end, "start must be below end")?;
                ensure((1..=10_000).contains(pixels), "pixels must be within 1..=10000")?;
            }
            Self::AutoResizeColumns { start, end, .. } | Self::AutoResizeRows { start, end, .. } => {
                ensure(start < end, "start must be below end")?;
            }
            Self::AddConditionalFormat { rule, .. } | Self::UpdateConditionalFormat { rule, .. } => {
                validate_condition(&rule.condition).map_err(invalid)?;
                ensure(!rule.format.is_empty(), "rule format sets no attribute")?;
                for color in [rule.format.background, rule.format.text_color]
                    .into_iter()
                    .flatten()
                {
                    ensure(color.is_valid(), "color channels must be within [0, 1]")?;
                }
            }
            Self::SetDataValidation { rule, .. } => {
                validate_condition(&rule.condition).map_err(invalid)?;
            }
            Self::AddBanding { colors, .. } => {
                let all = [
                    colors.header,
                    Some(colors.first_band),
                    Some(colors.second_band),
                    colors.footer,
                ];
                ensure(
                    all.iter().flatten().all(Color::is_valid),
                    "color channels must be within [0, 1]",
                )?;
            }
            Self::InsertRows { count, .. }
            | Self::InsertColumns { count, .. }
            | Self::DeleteRows { count, .. }
            | Self::DeleteColumns { count, .. }
            | Self::AppendDimension { count, .. }
            | Self::HideRows { count, .. }
            | Self::HideColumns { count, .. }
            | Self::ShowRows { count, .. }
            | Self::ShowColumns { count, .. }
            | Self::GroupRows { count, .. }
            | Self::GroupColumns { count, .. }
            | Self::UngroupRows { count, .. }
            | Self::UngroupColumns { count, .. } => {
                ensure(*count > 0, "count must be positive")?;
            }
            Self::MoveRows {
                start,
                count,
                destination,
                ..
            }
            | Self::MoveColumns {
                start,
                count,
                destination,
                ..
            } => {
                ensure(*count > 0, "count must be positive")?;
                let end = start.saturating_add(*count);
                ensure(
                    *destination <= *start || *destination >= end,
                    "destination falls inside the moved band",
                )?;
            }
            Self::AddSheet {
                title,
                rows,
                columns,
                ..
            } => {
                validate_title(title).map_err(invalid)?;
                ensure(rows.is_none_or(|r| r > 0), "rows must be positive")?;
                ensure(columns.is_none_or(|c| c > 0), "columns must be positive")?;
            }
            Self::DuplicateSheet {
                new_title: Some(title),
                ..
            }
            | Self::RenameSheet { title, .. } => validate_title(title).map_err(invalid)?,
            Self::SetTabColor {
                color: Some(color), ..
            } => ensure(color.is_valid(), "color channels must be within [0, 1]")?,
            Self::AddNamedRange { name, .. } | Self::DeleteNamedRange { name } => {
                validate_range_name(name).map_err(invalid)?;
            }
            Self::UpdateNamedRange {
                name,
                new_name,
                range,
            } => {
                validate_range_name(name).map_err(invalid)?;
                if let Some(new_name) = new_name {
                    validate_range_name(new_name).map_err(invalid)?;
                }
                ensure(
                    new_name.is_some() || range.is_some(),
                    "update_named_range changes nothing",
                )?;
            }
            Self::ProtectRange { editors, .. } => {
                ensure(
                    editors.iter().all(|e| looks_like_email(e)),
                    "editors must be email addresses",
                )?;
            }
            Self::SetBasicFilter { criteria, .. } => validate_criteria(criteria).map_err(invalid)?,
            Self::AddFilterView { title, criteria, .. } => {
                ensure(!title.trim().is_empty(), "filter view title is empty")?;
                validate_criteria(criteria).map_err(invalid)?;
            }
            Self::UpdateFilterView {
                title, criteria, ..
            } => {
                ensure(
                    title.is_some() || criteria.is_some(),
                    "update_filter_view changes nothing",
                )?;
                if let Some(title) = title {
                    ensure(!title.trim().is_empty(), "filter view title is empty")?;
                }
                if let Some(criteria) = criteria {
                    validate_criteria(criteria).map_err(invalid)?;
                }
            }
            Self::AddChart { spec, .. } | Self::UpdateChartSpec { spec, .. } => {
                if let Some(title) = &spec.title {
                    ensure(
                        title.chars().count() <= MAX_TITLE_CHARS,
                        "chart title is too long",
                    )?;
                }
            }
            Self::AddPivotTable { spec, .. } | Self::UpdatePivotTable { spec, .. } => {
                ensure(!spec.values.is_empty(), "pivot needs at least one value")?;
            }
            Self::AddDeveloperMetadata { key, location, .. } => {
                ensure(!key.trim().is_empty(), "metadata key is empty")?;
                if let MetadataLocation::Rows { start, end, .. }
                | MetadataLocation::Columns { start, end, .. } = location
                {
                    ensure(start < end, "start must be below end")?;
                }
            }
            Self::SetDocumentTitle { title } => {
                ensure(!title.trim().is_empty(), "document title is empty")?;
            }
            Self::SetDocumentLocale { locale } => {
                ensure(LOCALE.is_match(locale), "locale must look like en or en_US")?;
            }
            Self::AddPermission { principal, .. } => match principal {
                Principal::User { email } | Principal::Group { email } => {
                    ensure(looks_like_email(email), "principal email is malformed")?
                }
                Principal::Domain { domain } => {
                    ensure(domain.contains('.'), "principal domain is malformed")?
                }
                Principal::Anyone => {}
            },
            Self::UpdatePermission { permission_id, .. }
            | Self::RemovePermission { permission_id } => {
                ensure(!permission_id.trim().is_empty(), "permission_id is empty")?;
            }
            Self::ClearValues { .. }
            | Self::ClearFormats { .. }
            | Self::ClearAll { .. }
            | Self::CopyRange { .. }
            | Self::MoveRange { .. }
            | Self::RandomizeRange { .. }
            | Self::TrimWhitespace { .. }
            | Self::DeleteDuplicates { .. }
            | Self::SplitTextToColumns { .. }
            | Self::SetNote { .. }
            | Self::ClearNotes { .. }
            | Self::SetNumberFormat { .. }
            | Self::SetHorizontalAlignment { .. }
            | Self::SetVerticalAlignment { .. }
            | Self::SetWrapStrategy { .. }
            | Self::MergeCells { .. }
            | Self::UnmergeCells { .. }
            | Self::DeleteConditionalFormat { .. }
            | Self::ClearDataValidation { .. }
            | Self::DeleteBanding { .. }
            | Self::FreezeRows { .. }
            | Self::FreezeColumns { .. }
            | Self::InsertCells { .. }
            | Self::DeleteCells { .. }
            | Self::DeleteSheet { .. }
            | Self::DuplicateSheet { .. }
            | Self::MoveSheet { .. }
            | Self::HideSheet { .. }
            | Self::ShowSheet { .. }
            | Self::SetTabColor { .. }
            | Self::SetGridlinesVisible { .. }
            | Self::SetRightToLeft { .. }
            | Self::UnprotectRange { .. }
            | Self::ClearBasicFilter { .. }
            | Self::DeleteFilterView { .. }
            | Self::MoveChart { .. }
            | Self::DeleteChart { .. }
            | Self::DeletePivotTable { .. }
            | Self::DeleteDeveloperMetadata { .. } => {}
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> std::result::Result<(), String> {
    if title.trim().is_empty() {
        return Err("title is empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(format!("title exceeds {MAX_TITLE_CHARS} characters"));
    }
    Ok(())
}

fn validate_range_name(name: &str) -> std::result::Result<(), String> {
    if !NAMED_RANGE_NAME.is_match(name) {
        return Err(format!("'{name}' is not a valid range name"));
    }
    if LOOKS_LIKE_CELL.is_match(name) || A1Range::parse(name).is_ok() {
        return Err(format!("'{name}' collides with a cell reference"));
    }
    Ok(())
}

fn validate_condition(condition: &Condition) -> std::result::Result<(), String> {
    let arity = condition.kind.arity();
    let count = condition.values.len();
    if !arity.contains(&count) {
        return Err(format!(
            "condition {:?} takes {}..={} values, got {count}",
            condition.kind,
            arity.start(),
            arity.end()
        ));
    }
    if condition.kind.is_numeric()
        && let Some(bad) = condition
            .values
            .iter()
            .find(|v| !v.starts_with('=') && v.trim().parse::<f64>().is_err())
    {
        return Err(format!("'{bad}' is not a number"));
    }
    Ok(())
}

fn validate_criteria(criteria: &[FilterCriterion]) -> std::result::Result<(), String> {
    let mut seen = std::collections::BTreeSet::new();
    for criterion in criteria {
        if !seen.insert(criterion.column) {
            return Err(format!("column {} has two filter criteria", criterion.column));
        }
        if let Some(condition) = &criterion.condition {
            validate_condition(condition)?;
        }
    }
    Ok(())
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

/// Validate every intent, tagging the first failure with its position.
pub fn validate_all(intents: &[Intent]) -> Result<()> {
    for (index, intent) in intents.iter().enumerate() {
        intent.validate().map_err(|e| e.at_intent(index))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GridRange;

    fn grid(r0: u32, r1: u32, c0: u32, c1: u32) -> RangeRef {
        RangeRef::Grid(GridRange::new(1, r0, r1, c0, c1))
    }

    #[test]
    fn kind_names_follow_serde_tags() {
        let intent = Intent::DeleteRows {
            section_id: SectionId(1),
            start: 0,
            count: 3,
        };
        assert_eq!(intent.kind(), "delete_rows");
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["kind"], "delete_rows");
    }

    #[test]
    fn destructive_classes_cover_object_removal() {
        assert_eq!(
            Intent::DeleteChart { chart_id: 4 }.destructive_class(),
            Some(DestructiveClass::ObjectDeletion)
        );
        assert_eq!(
            Intent::ClearAll {
                range: grid(0, 1, 0, 1)
            }
            .destructive_class(),
            Some(DestructiveClass::ValueClear)
        );
        assert!(
            !Intent::ClearFormats {
                range: grid(0, 1, 0, 1)
            }
            .is_destructive()
        );
    }

    #[test]
    fn validation_rejects_bad_shapes() {
        let bad_name = Intent::AddNamedRange {
            name: "A1".into(),
            range: grid(0, 1, 0, 1),
        };
        assert!(bad_name.validate().is_err());

        let bad_move = Intent::MoveRows {
            section_id: SectionId(1),
            start: 2,
            count: 3,
            destination: 4,
        };
        assert!(bad_move.validate().is_err());

        let between = Intent::SetDataValidation {
            range: grid(0, 5, 0, 1),
            rule: ValidationRule {
                condition: Condition {
                    kind: ConditionKind::NumberBetween,
                    values: vec!["1".into()],
                },
                strict: true,
                show_dropdown: false,
                input_message: None,
            },
        };
        assert!(between.validate().is_err());
    }

    #[test]
    fn validate_all_reports_position() {
        let intents = vec![
            Intent::SetDocumentTitle {
                title: "Budget".into(),
            },
            Intent::SetDocumentTitle { title: " ".into() },
        ];
        match validate_all(&intents) {
            Err(OpsError::Validation {
                intent_index, kind, ..
            }) => {
                assert_eq!(intent_index, Some(1));
                assert_eq!(kind, Some("set_document_title"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
