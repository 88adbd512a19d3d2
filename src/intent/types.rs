use crate::model::{Color, SectionId};
use crate::resolver::RangeRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

fn default_true() -> bool {
    true
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PasteType {
    #[default]
    Normal,
    Values,
    Formats,
    Formulas,
    NoBorders,
    DataValidation,
    ConditionalFormatting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SortSpec {
    /// Absolute zero-based column index inside the sorted range.
    pub column: u32,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitDelimiter {
    #[default]
    Autodetect,
    Comma,
    Semicolon,
    Period,
    Space,
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NumberFormatKind {
    Text,
    Number,
    Percent,
    Currency,
    Date,
    Time,
    DateTime,
    Scientific,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct TextStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
}

impl TextStyle {
    pub fn is_empty(&self) -> bool {
        self.bold.is_none()
            && self.italic.is_none()
            && self.underline.is_none()
            && self.strikethrough.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerticalAlign {
    Top,
    Middle,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WrapStrategy {
    OverflowCell,
    Clip,
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BorderStyle {
    #[default]
    Solid,
    SolidMedium,
    SolidThick,
    Dashed,
    Dotted,
    Double,
    None,
}

/// Which edges of a range a border intent touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct BorderSides {
    #[serde(default)]
    pub top: bool,
    #[serde(default)]
    pub bottom: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub inner_horizontal: bool,
    #[serde(default)]
    pub inner_vertical: bool,
}

impl BorderSides {
    pub fn outer() -> Self {
        Self {
            top: true,
            bottom: true,
            left: true,
            right: true,
            ..Self::default()
        }
    }

    pub fn any(&self) -> bool {
        self.top
            || self.bottom
            || self.left
            || self.right
            || self.inner_horizontal
            || self.inner_vertical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeType {
    #[default]
    MergeAll,
    MergeColumns,
    MergeRows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    NumberGreater,
    NumberGreaterOrEqual,
    NumberLess,
    NumberLessOrEqual,
    NumberEq,
    NumberBetween,
    TextContains,
    TextNotContains,
    TextEq,
    TextStartsWith,
    TextEndsWith,
    DateBefore,
    DateAfter,
    Blank,
    NotBlank,
    OneOfList,
    Boolean,
    CustomFormula,
}

impl ConditionKind {
    /// How many operand values the condition takes.
    pub fn arity(self) -> RangeInclusive<usize> {
        match self {
            Self::Blank | Self::NotBlank => 0..=0,
            Self::Boolean => 0..=2,
            Self::NumberBetween => 2..=2,
            Self::OneOfList => 1..=500,
            Self::NumberGreater
            | Self::NumberGreaterOrEqual
            | Self::NumberLess
            | Self::NumberLessOrEqual
            | Self::NumberEq
            | Self::TextContains
            | Self::TextNotContains
            | Self::TextEq
            | Self::TextStartsWith
            | Self::TextEndsWith
            | Self::DateBefore
            | Self::DateAfter
            | Self::CustomFormula => 1..=1,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::NumberGreater
                | Self::NumberGreaterOrEqual
                | Self::NumberLess
                | Self::NumberLessOrEqual
                | Self::NumberEq
                | Self::NumberBetween
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    pub kind: ConditionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct RuleFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
}

impl RuleFormat {
    pub fn is_empty(&self) -> bool {
        self.background.is_none()
            && self.text_color.is_none()
            && self.bold.is_none()
            && self.italic.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConditionalRule {
    pub condition: Condition,
    pub format: RuleFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationRule {
    pub condition: Condition,
    /// Reject input that fails the rule instead of only flagging it.
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_true")]
    pub show_dropdown: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BandingColors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Color>,
    pub first_band: Color,
    pub second_band: Color,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<Color>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FilterCriterion {
    /// Absolute zero-based column index.
    pub column: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Column,
    Line,
    Area,
    Pie,
    Scatter,
    Combo,
    Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LegendPosition {
    #[default]
    Bottom,
    Left,
    Right,
    Top,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Data the chart plots; first column is the domain.
    pub source: RangeRef,
    /// Leading rows of `source` treated as series labels.
    #[serde(default)]
    pub header_count: u32,
    #[serde(default)]
    pub legend: LegendPosition,
}

/// Top-left placement of an embedded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Anchor {
    pub section_id: SectionId,
    pub row: u32,
    pub col: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_pixels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_pixels: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SummarizeFunction {
    Sum,
    Count,
    CountA,
    CountUnique,
    Average,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PivotValue {
    /// Zero-based column offset inside the pivot source.
    pub column: u32,
    pub function: SummarizeFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PivotSpec {
    #[serde(default)]
    pub rows: Vec<u32>,
    #[serde(default)]
    pub columns: Vec<u32>,
    pub values: Vec<PivotValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MetadataLocation {
    Document,
    Section {
        section_id: SectionId,
    },
    Rows {
        section_id: SectionId,
        start: u32,
        end: u32,
    },
    Columns {
        section_id: SectionId,
        start: u32,
        end: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionRole {
    Reader,
    Commenter,
    Writer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Principal {
    User { email: String },
    Group { email: String },
    Domain { domain: String },
    Anyone,
}
