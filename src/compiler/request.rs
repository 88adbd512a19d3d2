//! Provider-native request model, shaped like a spreadsheet `batchUpdate`.

use crate::intent::{
    Anchor, BandingColors, BorderStyle, ChartType, ConditionalRule, FilterCriterion,
    HorizontalAlign, LegendPosition, MergeType, MetadataLocation, NumberFormatKind, PasteType,
    PermissionRole, Principal, SortSpec, SplitDelimiter, SummarizeFunction, ValidationRule,
    VerticalAlign, WrapStrategy,
};
use crate::model::{CellValue, Color, Dimension, DimensionSpan, GridRange, SectionId};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    pub range: GridRange,
    pub values: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberFormat {
    #[serde(rename = "type")]
    pub kind: NumberFormatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Cell fields written by a `repeatCell`; unset fields are left alone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<NumberFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_alignment: Option<HorizontalAlign>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_alignment: Option<VerticalAlign>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_strategy: Option<WrapStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_rotation: Option<i32>,
}

macro_rules! overlay_fields {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

impl CellPatch {
    /// Later patch wins field by field.
    pub fn overlay(&mut self, later: &CellPatch) {
        overlay_fields!(self, later;
            formula, note, number_format, background_color, foreground_color, font_family,
            font_size, bold, italic, underline, strikethrough, horizontal_alignment,
            vertical_alignment, wrap_strategy, text_rotation,
        );
    }

    /// Provider field mask naming what the patch writes.
    pub fn field_mask(&self) -> String {
        let mut fields = Vec::new();
        let mut push = |set: bool, name: &'static str| {
            if set {
                fields.push(name);
            }
        };
        push(self.formula.is_some(), "userEnteredValue");
        push(self.note.is_some(), "note");
        push(self.number_format.is_some(), "userEnteredFormat.numberFormat");
        push(self.background_color.is_some(), "userEnteredFormat.backgroundColor");
        push(
            self.foreground_color.is_some(),
            "userEnteredFormat.textFormat.foregroundColor",
        );
        push(self.font_family.is_some(), "userEnteredFormat.textFormat.fontFamily");
        push(self.font_size.is_some(), "userEnteredFormat.textFormat.fontSize");
        push(self.bold.is_some(), "userEnteredFormat.textFormat.bold");
        push(self.italic.is_some(), "userEnteredFormat.textFormat.italic");
        push(self.underline.is_some(), "userEnteredFormat.textFormat.underline");
        push(
            self.strikethrough.is_some(),
            "userEnteredFormat.textFormat.strikethrough",
        );
        push(
            self.horizontal_alignment.is_some(),
            "userEnteredFormat.horizontalAlignment",
        );
        push(
            self.vertical_alignment.is_some(),
            "userEnteredFormat.verticalAlignment",
        );
        push(self.wrap_strategy.is_some(), "userEnteredFormat.wrapStrategy");
        push(self.text_rotation.is_some(), "userEnteredFormat.textRotation");
        fields.join(",")
    }

    fn writes_value(&self) -> bool {
        self.formula.is_some()
    }

    fn writes_format(&self) -> bool {
        let value_only = CellPatch {
            formula: self.formula.clone(),
            ..CellPatch::default()
        };
        *self != value_only
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearScope {
    Values,
    Formats,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCoordinate {
    pub section_id: SectionId,
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Border {
    pub style: BorderStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<Border>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<Border>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Border>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Border>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_horizontal: Option<Border>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_vertical: Option<Border>,
}

impl BorderPatch {
    pub fn overlay(&mut self, later: &BorderPatch) {
        overlay_fields!(self, later; top, bottom, left, right, inner_horizontal, inner_vertical);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_by_user: Option<bool>,
}

impl DimensionPatch {
    pub fn overlay(&mut self, later: &DimensionPatch) {
        overlay_fields!(self, later; pixel_size, hidden_by_user);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSheet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub row_count: u32,
    pub column_count: u32,
}

/// Sheet properties written by `updateSheetProperties`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen_row_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frozen_column_count: Option<u32>,
    /// `Some(None)` clears the tab color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_color: Option<Option<Color>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_gridlines: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_to_left: Option<bool>,
}

impl SheetPatch {
    pub fn overlay(&mut self, later: &SheetPatch) {
        overlay_fields!(self, later;
            title, index, hidden, frozen_row_count, frozen_column_count, tab_color,
            hide_gridlines, right_to_left,
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl DocumentPatch {
    pub fn overlay(&mut self, later: &DocumentPatch) {
        overlay_fields!(self, later; title, locale);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedChart {
    pub chart_type: ChartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub source: GridRange,
    pub header_count: u32,
    pub legend_position: LegendPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotGroup {
    pub source_column_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotValueSpec {
    pub source_column_offset: u32,
    pub summarize_function: SummarizeFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPivot {
    pub source: GridRange,
    pub rows: Vec<PivotGroup>,
    pub columns: Vec<PivotGroup>,
    pub values: Vec<PivotValueSpec>,
}

/// One provider-native request. Serialized externally tagged with camelCase
/// names, e.g. `{"insertDimension": {"span": ..., "inheritFromBefore": false}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProviderRequest {
    UpdateValues {
        section_id: SectionId,
        data: Vec<ValueRange>,
    },
    RepeatCell {
        range: GridRange,
        cell: CellPatch,
        fields: String,
    },
    AppendCells {
        section_id: SectionId,
        rows: Vec<Vec<CellValue>>,
    },
    ClearRange {
        range: GridRange,
        scope: ClearScope,
    },
    FindReplace {
        find: String,
        replacement: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<GridRange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        section_id: Option<SectionId>,
        all_sheets: bool,
        match_case: bool,
        match_entire_cell: bool,
        search_by_regex: bool,
        include_formulas: bool,
    },
    CopyPaste {
        source: GridRange,
        destination: GridRange,
        paste_type: PasteType,
    },
    CutPaste {
        source: GridRange,
        destination: GridCoordinate,
    },
    SortRange {
        range: GridRange,
        sort_specs: Vec<SortSpec>,
    },
    RandomizeRange {
        range: GridRange,
    },
    TrimWhitespace {
        range: GridRange,
    },
    DeleteDuplicates {
        range: GridRange,
        comparison_columns: Vec<u32>,
    },
    TextToColumns {
        source: GridRange,
        delimiter: SplitDelimiter,
    },
    AutoFill {
        source: GridRange,
        dimension: Dimension,
        fill_length: u32,
    },
    UpdateBorders {
        range: GridRange,
        borders: BorderPatch,
    },
    MergeCells {
        range: GridRange,
        merge_type: MergeType,
    },
    UnmergeCells {
        range: GridRange,
    },
    UpdateDimensionProperties {
        span: DimensionSpan,
        properties: DimensionPatch,
    },
    AutoResizeDimensions {
        span: DimensionSpan,
    },
    AddConditionalFormatRule {
        ranges: Vec<GridRange>,
        rule: ConditionalRule,
        index: u32,
    },
    UpdateConditionalFormatRule {
        section_id: SectionId,
        index: u32,
        rule: ConditionalRule,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ranges: Option<Vec<GridRange>>,
    },
    DeleteConditionalFormatRule {
        section_id: SectionId,
        index: u32,
    },
    SetDataValidation {
        range: GridRange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rule: Option<ValidationRule>,
    },
    AddBanding {
        range: GridRange,
        colors: BandingColors,
    },
    DeleteBanding {
        banding_id: u32,
    },
    InsertDimension {
        span: DimensionSpan,
        inherit_from_before: bool,
    },
    DeleteDimension {
        span: DimensionSpan,
    },
    AppendDimension {
        section_id: SectionId,
        dimension: Dimension,
        length: u32,
    },
    MoveDimension {
        source: DimensionSpan,
        destination_index: u32,
    },
    AddDimensionGroup {
        span: DimensionSpan,
    },
    DeleteDimensionGroup {
        span: DimensionSpan,
    },
    InsertRange {
        range: GridRange,
        shift_dimension: Dimension,
    },
    DeleteRange {
        range: GridRange,
        shift_dimension: Dimension,
    },
    AddSheet {
        properties: NewSheet,
    },
    DeleteSheet {
        section_id: SectionId,
    },
    DuplicateSheet {
        source_section_id: SectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        insert_index: Option<u32>,
    },
    UpdateSheetProperties {
        section_id: SectionId,
        properties: SheetPatch,
    },
    AddNamedRange {
        name: String,
        range: GridRange,
    },
    UpdateNamedRange {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<GridRange>,
    },
    DeleteNamedRange {
        name: String,
    },
    AddProtectedRange {
        range: GridRange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        warning_only: bool,
        editors: Vec<String>,
    },
    DeleteProtectedRange {
        protected_range_id: u32,
    },
    SetBasicFilter {
        range: GridRange,
        criteria: Vec<FilterCriterion>,
    },
    ClearBasicFilter {
        section_id: SectionId,
    },
    AddFilterView {
        title: String,
        range: GridRange,
        criteria: Vec<FilterCriterion>,
    },
    UpdateFilterView {
        filter_view_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        criteria: Option<Vec<FilterCriterion>>,
    },
    DeleteFilterView {
        filter_view_id: u32,
    },
    AddChart {
        chart: ResolvedChart,
        anchor: Anchor,
    },
    UpdateChartSpec {
        chart_id: u32,
        chart: ResolvedChart,
    },
    UpdateEmbeddedObjectPosition {
        object_id: u32,
        anchor: Anchor,
    },
    DeleteEmbeddedObject {
        object_id: u32,
    },
    /// `pivot: None` removes the pivot anchored at `anchor`.
    UpdatePivotTable {
        anchor: Anchor,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pivot: Option<ResolvedPivot>,
    },
    CreateDeveloperMetadata {
        key: String,
        value: String,
        location: MetadataLocation,
    },
    DeleteDeveloperMetadata {
        metadata_id: u32,
    },
    UpdateSpreadsheetProperties {
        properties: DocumentPatch,
    },
    CreatePermission {
        principal: Principal,
        role: PermissionRole,
    },
    UpdatePermission {
        permission_id: String,
        role: PermissionRole,
    },
    DeletePermission {
        permission_id: String,
    },
}

/// What kind of state a request writes. Requests on different layers commute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layers(u8);

impl Layers {
    pub const VALUES: Layers = Layers(1);
    pub const FORMATS: Layers = Layers(1 << 1);
    pub const DIMENSIONS: Layers = Layers(1 << 2);
    pub const SHEET_PROPS: Layers = Layers(1 << 3);
    pub const DOCUMENT: Layers = Layers(1 << 4);
    pub const OBJECTS: Layers = Layers(1 << 5);
    pub const PERMISSIONS: Layers = Layers(1 << 6);
    pub const RULES: Layers = Layers(1 << 7);

    pub fn union(self, other: Layers) -> Layers {
        Layers(self.0 | other.0)
    }

    pub fn overlaps(self, other: Layers) -> bool {
        self.0 & other.0 != 0
    }
}

/// Region of the document a request reads or writes, for commutation checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Footprint {
    Cells(SmallVec<[GridRange; 2]>),
    Section(SectionId),
    Document,
}

impl Footprint {
    fn cells(range: GridRange) -> Self {
        Self::Cells(smallvec![range])
    }

    pub fn disjoint(&self, other: &Footprint) -> bool {
        match (self, other) {
            (Self::Document, _) | (_, Self::Document) => false,
            (Self::Section(a), Self::Section(b)) => a != b,
            (Self::Section(s), Self::Cells(ranges)) | (Self::Cells(ranges), Self::Section(s)) => {
                ranges.iter().all(|r| r.section_id != *s)
            }
            (Self::Cells(a), Self::Cells(b)) => {
                a.iter().all(|x| b.iter().all(|y| !x.intersects(y)))
            }
        }
    }
}

impl ProviderRequest {
    pub fn repeat_cell(range: GridRange, cell: CellPatch) -> Self {
        let fields = cell.field_mask();
        Self::RepeatCell {
            range,
            cell,
            fields,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateValues { .. } => "updateValues",
            Self::RepeatCell { .. } => "repeatCell",
            Self::AppendCells { .. } => "appendCells",
            Self::ClearRange { .. } => "clearRange",
            Self::FindReplace { .. } => "findReplace",
            Self::CopyPaste { .. } => "copyPaste",
            Self::CutPaste { .. } => "cutPaste",
            Self::SortRange { .. } => "sortRange",
            Self::RandomizeRange { .. } => "randomizeRange",
            Self::TrimWhitespace { .. } => "trimWhitespace",
            Self::DeleteDuplicates { .. } => "deleteDuplicates",
            Self::TextToColumns { .. } => "textToColumns",
            Self::AutoFill { .. } => "autoFill",
            Self::UpdateBorders { .. } => "updateBorders",
            Self::MergeCells { .. } => "mergeCells",
            Self::UnmergeCells { .. } => "unmergeCells",
            Self::UpdateDimensionProperties { .. } => "updateDimensionProperties",
            Self::AutoResizeDimensions { .. } => "autoResizeDimensions",
            Self::AddConditionalFormatRule { .. } => "addConditionalFormatRule",
            Self::UpdateConditionalFormatRule { .. } => "updateConditionalFormatRule",
            Self::DeleteConditionalFormatRule { .. } => "deleteConditionalFormatRule",
            Self::SetDataValidation { .. } => "setDataValidation",
            Self::AddBanding { .. } => "addBanding",
            Self::DeleteBanding { .. } => "deleteBanding",
            Self::InsertDimension { .. } => "insertDimension",
            Self::DeleteDimension { .. } => "deleteDimension",
            Self::AppendDimension { .. } => "appendDimension",
            Self::MoveDimension { .. } => "moveDimension",
            Self::AddDimensionGroup { .. } => "addDimensionGroup",
            Self::DeleteDimensionGroup { .. } => "deleteDimensionGroup",
            Self::InsertRange { .. } => "insertRange",
            Self::DeleteRange { .. } => "deleteRange",
            Self::AddSheet { .. } => "addSheet",
            Self::DeleteSheet { .. } => "deleteSheet",
            Self::DuplicateSheet { .. } => "duplicateSheet",
            Self::UpdateSheetProperties { .. } => "updateSheetProperties",
            Self::AddNamedRange { .. } => "addNamedRange",
            Self::UpdateNamedRange { .. } => "updateNamedRange",
            Self::DeleteNamedRange { .. } => "deleteNamedRange",
            Self::AddProtectedRange { .. } => "addProtectedRange",
            Self::DeleteProtectedRange { .. } => "deleteProtectedRange",
            Self::SetBasicFilter { .. } => "setBasicFilter",
            Self::ClearBasicFilter { .. } => "clearBasicFilter",
            Self::AddFilterView { .. } => "addFilterView",
            Self::UpdateFilterView { .. } => "updateFilterView",
            Self::DeleteFilterView { .. } => "deleteFilterView",
            Self::AddChart { .. } => "addChart",
            Self::UpdateChartSpec { .. } => "updateChartSpec",
            Self::UpdateEmbeddedObjectPosition { .. } => "updateEmbeddedObjectPosition",
            Self::DeleteEmbeddedObject { .. } => "deleteEmbeddedObject",
            Self::UpdatePivotTable { .. } => "updatePivotTable",
            Self::CreateDeveloperMetadata { .. } => "createDeveloperMetadata",
            Self::DeleteDeveloperMetadata { .. } => "deleteDeveloperMetadata",
            Self::UpdateSpreadsheetProperties { .. } => "updateSpreadsheetProperties",
            Self::CreatePermission { .. } => "createPermission",
            Self::UpdatePermission { .. } => "updatePermission",
            Self::DeletePermission { .. } => "deletePermission",
        }
    }

    /// Requests that shift coordinates or create/remove sections. They commute
    /// with nothing, so no merge ever moves work across them.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self,
            Self::InsertDimension { .. }
                | Self::DeleteDimension { .. }
                | Self::AppendDimension { .. }
                | Self::MoveDimension { .. }
                | Self::InsertRange { .. }
                | Self::DeleteRange { .. }
                | Self::AddSheet { .. }
                | Self::DeleteSheet { .. }
                | Self::DuplicateSheet { .. }
                | Self::CutPaste { .. }
                | Self::SortRange { .. }
                | Self::TextToColumns { .. }
                | Self::DeleteDuplicates { .. }
        )
    }

    pub fn layers(&self) -> Layers {
        match self {
            Self::RepeatCell { cell, .. } => {
                let mut layers = Layers(0);
                if cell.writes_value() {
                    layers = layers.union(Layers::VALUES);
                }
                if cell.writes_format() {
                    layers = layers.union(Layers::FORMATS);
                }
                layers
            }
            Self::UpdateValues { .. }
            | Self::AppendCells { .. }
            | Self::FindReplace { .. }
            | Self::RandomizeRange { .. }
            | Self::TrimWhitespace { .. }
            | Self::SortRange { .. }
            | Self::DeleteDuplicates { .. }
            | Self::TextToColumns { .. } => Layers::VALUES,
            Self::ClearRange { scope, .. } => match scope {
                ClearScope::Values => Layers::VALUES,
                ClearScope::Formats => Layers::FORMATS,
                ClearScope::All => Layers::VALUES.union(Layers::FORMATS),
            },
            Self::CopyPaste { .. } | Self::CutPaste { .. } | Self::AutoFill { .. } => {
                Layers::VALUES.union(Layers::FORMATS)
            }
            Self::UpdateBorders { .. } | Self::MergeCells { .. } | Self::UnmergeCells { .. } => {
                Layers::FORMATS
            }
            // Fitted sizes depend on the content and formatting being measured.
            Self::AutoResizeDimensions { .. } => Layers::DIMENSIONS
                .union(Layers::VALUES)
                .union(Layers::FORMATS),
            Self::UpdateDimensionProperties { .. }
            | Self::AddDimensionGroup { .. }
            | Self::DeleteDimensionGroup { .. } => Layers::DIMENSIONS,
            Self::AddConditionalFormatRule { .. }
            | Self::UpdateConditionalFormatRule { .. }
            | Self::DeleteConditionalFormatRule { .. }
            | Self::SetDataValidation { .. }
            | Self::AddBanding { .. }
            | Self::DeleteBanding { .. } => Layers::RULES,
            Self::UpdateSheetProperties { .. } => Layers::SHEET_PROPS,
            Self::AddNamedRange { .. }
            | Self::UpdateNamedRange { .. }
            | Self::DeleteNamedRange { .. }
            | Self::AddProtectedRange { .. }
            | Self::DeleteProtectedRange { .. }
            | Self::SetBasicFilter { .. }
            | Self::ClearBasicFilter { .. }
            | Self::AddFilterView { .. }
            | Self::UpdateFilterView { .. }
            | Self::DeleteFilterView { .. }
            | Self::AddChart { .. }
            | Self::UpdateChartSpec { .. }
            | Self::UpdateEmbeddedObjectPosition { .. }
            | Self::DeleteEmbeddedObject { .. }
            | Self::UpdatePivotTable { .. }
            | Self::CreateDeveloperMetadata { .. }
            | Self::DeleteDeveloperMetadata { .. } => Layers::OBJECTS,
            Self::UpdateSpreadsheetProperties { .. } => Layers::DOCUMENT,
            Self::CreatePermission { .. }
            | Self::UpdatePermission { .. }
            | Self::DeletePermission { .. } => Layers::PERMISSIONS,
            Self::InsertDimension { .. }
            | Self::DeleteDimension { .. }
            | Self::AppendDimension { .. }
            | Self::MoveDimension { .. }
            | Self::InsertRange { .. }
            | Self::DeleteRange { .. }
            | Self::AddSheet { .. }
            | Self::DeleteSheet { .. }
            | Self::DuplicateSheet { .. } => Layers(u8::MAX),
        }
    }

    pub fn footprint(&self) -> Footprint {
        match self {
            Self::UpdateValues { data, .. } => {
                Footprint::Cells(data.iter().map(|d| d.range).collect())
            }
            Self::RepeatCell { range, .. }
            | Self::ClearRange { range, .. }
            | Self::SortRange { range, .. }
            | Self::RandomizeRange { range }
            | Self::TrimWhitespace { range }
            | Self::DeleteDuplicates { range, .. }
            | Self::UpdateBorders { range, .. }
            | Self::MergeCells { range, .. }
            | Self::UnmergeCells { range }
            | Self::SetDataValidation { range, .. }
            | Self::AddBanding { range, .. }
            | Self::InsertRange { range, .. }
            | Self::DeleteRange { range, .. } => Footprint::cells(*range),
            Self::CopyPaste {
                source,
                destination,
                ..
            } => Footprint::Cells(smallvec![*source, *destination]),
            Self::CutPaste {
                source,
                destination,
            } => Footprint::Cells(smallvec![
                *source,
                GridRange::new(
                    destination.section_id,
                    destination.row,
                    destination.row + source.rows(),
                    destination.col,
                    destination.col + source.columns(),
                )
            ]),
            Self::AutoFill {
                source,
                dimension,
                fill_length,
            } => {
                let mut filled = *source;
                match dimension {
                    Dimension::Rows => filled.end_row += fill_length,
                    Dimension::Columns => filled.end_col += fill_length,
                }
                Footprint::cells(filled)
            }
            Self::FindReplace {
                range, section_id, ..
            } => match (range, section_id) {
                (Some(range), _) => Footprint::cells(*range),
                (None, Some(section)) => Footprint::Section(*section),
                (None, None) => Footprint::Document,
            },
            Self::AddConditionalFormatRule { ranges, .. } => {
                match ranges.first().map(|r| r.section_id) {
                    Some(section) => Footprint::Section(section),
                    None => Footprint::Document,
                }
            }
            Self::AppendCells { section_id, .. }
            | Self::UpdateConditionalFormatRule { section_id, .. }
            | Self::DeleteConditionalFormatRule { section_id, .. }
            | Self::AppendDimension { section_id, .. }
            | Self::DeleteSheet { section_id }
            | Self::UpdateSheetProperties { section_id, .. }
            | Self::ClearBasicFilter { section_id } => Footprint::Section(*section_id),
            Self::TextToColumns { source, .. } => Footprint::Section(source.section_id),
            Self::UpdateDimensionProperties { span, .. }
            | Self::AutoResizeDimensions { span }
            | Self::AddDimensionGroup { span }
            | Self::DeleteDimensionGroup { span }
            | Self::InsertDimension { span, .. }
            | Self::DeleteDimension { span } => Footprint::Section(span.section_id),
            Self::MoveDimension { source, .. } => Footprint::Section(source.section_id),
            Self::SetBasicFilter { range, .. } | Self::AddFilterView { range, .. } => {
                Footprint::Section(range.section_id)
            }
            Self::AddChart { anchor, .. }
            | Self::UpdateEmbeddedObjectPosition { anchor, .. }
            | Self::UpdatePivotTable { anchor, .. } => Footprint::Section(anchor.section_id),
            Self::DuplicateSheet {
                source_section_id, ..
            } => Footprint::Section(*source_section_id),
            Self::AddSheet { .. }
            | Self::DeleteBanding { .. }
            | Self::AddNamedRange { .. }
            | Self::UpdateNamedRange { .. }
            | Self::DeleteNamedRange { .. }
            | Self::AddProtectedRange { .. }
            | Self::DeleteProtectedRange { .. }
            | Self::UpdateFilterView { .. }
            | Self::DeleteFilterView { .. }
            | Self::UpdateChartSpec { .. }
            | Self::DeleteEmbeddedObject { .. }
            | Self::CreateDeveloperMetadata { .. }
            | Self::DeleteDeveloperMetadata { .. }
            | Self::UpdateSpreadsheetProperties { .. }
            | Self::CreatePermission { .. }
            | Self::UpdatePermission { .. }
            | Self::DeletePermission { .. } => Footprint::Document,
        }
    }

    /// Whether swapping `self` and `later` leaves the document in the same state.
    pub fn commutes_with(&self, later: &ProviderRequest) -> bool {
        if self.is_barrier() || later.is_barrier() {
            return false;
        }
        !self.layers().overlaps(later.layers()) || self.footprint().disjoint(&later.footprint())
    }

    /// Sections the request touches, where it names them.
    pub fn sections(&self) -> SmallVec<[SectionId; 2]> {
        match self.footprint() {
            Footprint::Cells(ranges) => {
                let mut ids: SmallVec<[SectionId; 2]> = SmallVec::new();
                for range in ranges {
                    if !ids.contains(&range.section_id) {
                        ids.push(range.section_id);
                    }
                }
                ids
            }
            Footprint::Section(id) => smallvec![id],
            Footprint::Document => SmallVec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_camel_case() {
        let request = ProviderRequest::InsertDimension {
            span: DimensionSpan::new(SectionId(3), Dimension::Rows, 0, 2),
            inherit_from_before: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["insertDimension"]["inheritFromBefore"].is_boolean());
        assert_eq!(request.name(), "insertDimension");
    }

    #[test]
    fn barriers_never_commute() {
        let insert = ProviderRequest::InsertDimension {
            span: DimensionSpan::new(SectionId(1), Dimension::Rows, 0, 1),
            inherit_from_before: false,
        };
        let format = ProviderRequest::repeat_cell(
            GridRange::new(2, 0, 1, 0, 1),
            CellPatch {
                bold: Some(true),
                ..CellPatch::default()
            },
        );
        assert!(!insert.commutes_with(&format));
        assert!(!format.commutes_with(&insert));
    }

    #[test]
    fn value_and_format_layers_commute() {
        let write = ProviderRequest::UpdateValues {
            section_id: SectionId(1),
            data: vec![ValueRange {
                range: GridRange::new(1, 0, 1, 0, 1),
                values: vec![vec![CellValue::from(1)]],
            }],
        };
        let bold = ProviderRequest::repeat_cell(
            GridRange::new(1, 0, 1, 0, 1),
            CellPatch {
                bold: Some(true),
                ..CellPatch::default()
            },
        );
        assert!(write.commutes_with(&bold));
        let overwrite = ProviderRequest::ClearRange {
            range: GridRange::new(1, 0, 5, 0, 5),
            scope: ClearScope::Values,
        };
        assert!(!write.commutes_with(&overwrite));
    }

    #[test]
    fn field_mask_follows_patch() {
        let patch = CellPatch {
            bold: Some(true),
            background_color: Some(Color::rgb(1.0, 0.0, 0.0)),
            ..CellPatch::default()
        };
        assert_eq!(
            patch.field_mask(),
            "userEnteredFormat.backgroundColor,userEnteredFormat.textFormat.bold"
        );
    }
}
