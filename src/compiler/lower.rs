//! Lowering of one intent to provider requests plus the rectangles it addresses.

use super::request::{
    Border, BorderPatch, CellPatch, ClearScope, DimensionPatch, DocumentPatch, GridCoordinate,
    NewSheet, NumberFormat, PivotGroup, PivotValueSpec, ProviderRequest, ResolvedChart,
    ResolvedPivot, SheetPatch, ValueRange,
};
use crate::errors::{OpsError, Result};
use crate::intent::{ChartSpec, FilterCriterion, Intent, PivotSpec};
use crate::model::{CellValue, Dimension, DimensionSpan, GridRange, SectionId};
use crate::resolver::{RangeRef, ResolutionScope};
use smallvec::SmallVec;

/// Extents assumed for a section whose metadata is not in scope.
pub const FALLBACK_EXTENTS: (u32, u32) = (1000, 26);

const DEFAULT_NEW_SHEET_ROWS: u32 = 1000;
const DEFAULT_NEW_SHEET_COLUMNS: u32 = 26;

#[derive(Debug, Clone, Default)]
pub(crate) struct Lowered {
    pub requests: Vec<ProviderRequest>,
    /// Rectangles whose cells the intent changes.
    pub footprint: SmallVec<[GridRange; 2]>,
    pub deleted_rows: u32,
    pub deleted_columns: u32,
}

impl Lowered {
    fn one(request: ProviderRequest) -> Self {
        Self {
            requests: vec![request],
            ..Self::default()
        }
    }

    fn touching(mut self, range: GridRange) -> Self {
        if !range.is_empty() {
            self.footprint.push(range);
        }
        self
    }
}

pub(crate) struct Lowerer<'a> {
    scope: &'a ResolutionScope,
    warnings: &'a mut Vec<String>,
}

impl<'a> Lowerer<'a> {
    pub fn new(scope: &'a ResolutionScope, warnings: &'a mut Vec<String>) -> Self {
        Self { scope, warnings }
    }

    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn range(&mut self, reference: &RangeRef) -> Result<GridRange> {
        let resolution = self.scope.resolve(reference)?;
        for warning in resolution.warnings {
            self.warn(warning);
        }
        Ok(resolution.range)
    }

    fn optional_range(&mut self, reference: Option<&RangeRef>) -> Result<Option<GridRange>> {
        reference.map(|r| self.range(r)).transpose()
    }

    fn extents(&mut self, section_id: SectionId) -> (u32, u32) {
        match self.scope.extents(section_id) {
            Some(extents) => extents,
            None => {
                self.warn(format!(
                    "extents of section {section_id} unknown; assuming {}x{}",
                    FALLBACK_EXTENTS.0, FALLBACK_EXTENTS.1
                ));
                FALLBACK_EXTENTS
            }
        }
    }

    fn known_extents(&self, section_id: SectionId) -> Option<(u32, u32)> {
        self.scope.extents(section_id)
    }

    /// The `[start, start + count)` band, checked against known extents.
    fn band(
        &mut self,
        section_id: SectionId,
        dimension: Dimension,
        start: u32,
        count: u32,
        allow_at_end: bool,
    ) -> Result<(DimensionSpan, GridRange)> {
        let end = start
            .checked_add(count)
            .ok_or_else(|| OpsError::validation("band end overflows"))?;
        let span = DimensionSpan::new(section_id, dimension, start, end);
        if let Some((rows, cols)) = self.known_extents(section_id) {
            let extent = match dimension {
                Dimension::Rows => rows,
                Dimension::Columns => cols,
            };
            let limit_ok = if allow_at_end {
                start <= extent
            } else {
                end <= extent
            };
            if !limit_ok {
                return Err(OpsError::validation(format!(
                    "{} {start}..{end} is outside section {section_id} ({extent} {})",
                    dimension.as_str(),
                    dimension.as_str()
                )));
            }
        }
        let (rows, cols) = self.extents(section_id);
        let cross = match dimension {
            Dimension::Rows => cols,
            Dimension::Columns => rows,
        };
        Ok((span, span.as_grid(cross)))
    }

    fn full_section(&mut self, section_id: SectionId) -> GridRange {
        let (rows, cols) = self.extents(section_id);
        GridRange::new(section_id, 0, rows, 0, cols)
    }

    fn patch(&mut self, reference: &RangeRef, cell: CellPatch) -> Result<Lowered> {
        let range = self.range(reference)?;
        Ok(Lowered::one(ProviderRequest::repeat_cell(range, cell)).touching(range))
    }

    fn sheet_patch(section_id: SectionId, properties: SheetPatch) -> Lowered {
        Lowered::one(ProviderRequest::UpdateSheetProperties {
            section_id,
            properties,
        })
    }

    fn dimension_patch(
        section_id: SectionId,
        dimension: Dimension,
        start: u32,
        end: u32,
        properties: DimensionPatch,
    ) -> Lowered {
        Lowered::one(ProviderRequest::UpdateDimensionProperties {
            span: DimensionSpan::new(section_id, dimension, start, end),
            properties,
        })
    }

    fn chart(&mut self, spec: &ChartSpec) -> Result<ResolvedChart> {
        let source = self.range(&spec.source)?;
        if source.rows() <= spec.header_count {
            return Err(OpsError::validation(format!(
                "chart source {source} has no rows below its {} header rows",
                spec.header_count
            )));
        }
        Ok(ResolvedChart {
            chart_type: spec.chart_type,
            title: spec.title.clone(),
            source,
            header_count: spec.header_count,
            legend_position: spec.legend,
        })
    }

    fn pivot(&mut self, source: &RangeRef, spec: &PivotSpec) -> Result<ResolvedPivot> {
        let source = self.range(source)?;
        let width = source.columns();
        let offsets = spec
            .rows
            .iter()
            .chain(&spec.columns)
            .chain(spec.values.iter().map(|v| &v.column));
        if let Some(bad) = offsets.into_iter().find(|&&c| c >= width) {
            return Err(OpsError::validation(format!(
                "pivot column offset {bad} is outside the {width}-column source"
            )));
        }
        Ok(ResolvedPivot {
            source,
            rows: spec
                .rows
                .iter()
                .map(|&c| PivotGroup {
                    source_column_offset: c,
                })
                .collect(),
            columns: spec
                .columns
                .iter()
                .map(|&c| PivotGroup {
                    source_column_offset: c,
                })
                .collect(),
            values: spec
                .values
                .iter()
                .map(|v| PivotValueSpec {
                    source_column_offset: v.column,
                    summarize_function: v.function,
                })
                .collect(),
        })
    }

    fn title_taken(&self, title: &str, except: Option<SectionId>) -> bool {
        self.scope.document().is_some_and(|doc| {
            doc.sections
                .iter()
                .any(|s| Some(s.section_id) != except && s.title.eq_ignore_ascii_case(title))
        })
    }

    fn name_taken(&self, name: &str) -> bool {
        self.scope.document().is_some_and(|doc| {
            doc.named_ranges
                .iter()
                .any(|n| n.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn lower(&mut self, intent: &Intent) -> Result<Lowered> {
        let scope = self.scope;
        let kind = intent.kind();
        let invalid = |message: String| OpsError::Validation {
            intent_index: None,
            kind: Some(kind),
            message,
        };

        let lowered = match intent {
            Intent::SetValues { range, values } => {
                let target = self.range(range)?;
                let height = values.len() as u32;
                let width = values.iter().map(Vec::len).max().unwrap_or(0) as u32;
                let single_cell = target.rows() == 1 && target.columns() == 1;
                if !single_cell && (height > target.rows() || width > target.columns()) {
                    return Err(invalid(format!(
                        "{height}x{width} values do not fit {target}"
                    )));
                }
                let written = GridRange::new(
                    target.section_id,
                    target.start_row,
                    target.start_row + height,
                    target.start_col,
                    target.start_col + width,
                );
                Lowered::one(ProviderRequest::UpdateValues {
                    section_id: target.section_id,
                    data: vec![ValueRange {
                        range: written,
                        values: values.clone(),
                    }],
                })
                .touching(written)
            }
            Intent::SetFormula { range, formula } => {
                let normalized = CellValue::formula(formula.trim()).to_string();
                self.patch(
                    range,
                    CellPatch {
                        formula: Some(normalized),
                        ..CellPatch::default()
                    },
                )?
            }
            Intent::AppendRows { section_id, values } => {
                let (rows, _) = self.extents(*section_id);
                let width = values.iter().map(Vec::len).max().unwrap_or(0) as u32;
                let appended = GridRange::new(
                    *section_id,
                    rows,
                    rows + values.len() as u32,
                    0,
                    width,
                );
                Lowered::one(ProviderRequest::AppendCells {
                    section_id: *section_id,
                    rows: values.clone(),
                })
                .touching(appended)
            }
            Intent::ClearValues { range } => self.clear(range, ClearScope::Values)?,
            Intent::ClearFormats { range } => self.clear(range, ClearScope::Formats)?,
            Intent::ClearAll { range } => self.clear(range, ClearScope::All)?,
            Intent::FindReplace {
                find,
                replacement,
                range,
                section_id,
                match_case,
                match_entire_cell,
                use_regex,
                include_formulas,
            } => {
                let range = self.optional_range(range.as_ref())?;
                let mut lowered = Lowered::one(ProviderRequest::FindReplace {
                    find: find.clone(),
                    replacement: replacement.clone(),
                    range,
                    section_id: if range.is_some() { None } else { *section_id },
                    all_sheets: range.is_none() && section_id.is_none(),
                    match_case: *match_case,
                    match_entire_cell: *match_entire_cell,
                    search_by_regex: *use_regex,
                    include_formulas: *include_formulas,
                });
                match (range, section_id) {
                    (Some(range), _) => lowered = lowered.touching(range),
                    (None, Some(id)) => {
                        let full = self.full_section(*id);
                        lowered = lowered.touching(full);
                    }
                    (None, None) => match scope.document() {
                        Some(doc) => {
                            for section in &doc.sections {
                                lowered = lowered.touching(section.full_range());
                            }
                        }
                        None => self.warn(
                            "document structure unknown; find_replace over every section is not estimated"
                                .to_string(),
                        ),
                    },
                }
                lowered
            }
            Intent::CopyRange {
                source,
                destination,
                paste_type,
            } => {
                let source = self.range(source)?;
                let mut destination = self.range(destination)?;
                if destination.rows() <= 1 && destination.columns() <= 1 {
                    destination.end_row = destination.start_row + source.rows();
                    destination.end_col = destination.start_col + source.columns();
                }
                Lowered::one(ProviderRequest::CopyPaste {
                    source,
                    destination,
                    paste_type: *paste_type,
                })
                .touching(destination)
            }
            Intent::MoveRange {
                source,
                destination,
            } => {
                let source = self.range(source)?;
                let destination = self.range(destination)?;
                let landing = GridRange::new(
                    destination.section_id,
                    destination.start_row,
                    destination.start_row + source.rows(),
                    destination.start_col,
                    destination.start_col + source.columns(),
                );
                Lowered::one(ProviderRequest::CutPaste {
                    source,
                    destination: GridCoordinate {
                        section_id: destination.section_id,
                        row: destination.start_row,
                        col: destination.start_col,
                    },
                })
                .touching(source)
                .touching(landing)
            }
            Intent::SortRange { range, sort_specs } => {
                let range = self.range(range)?;
                if let Some(spec) = sort_specs
                    .iter()
                    .find(|s| !(range.start_col..range.end_col).contains(&s.column))
                {
                    return Err(invalid(format!(
                        "sort column {} is outside {range}",
                        spec.column
                    )));
                }
                Lowered::one(ProviderRequest::SortRange {
                    range,
                    sort_specs: sort_specs.clone(),
                })
                .touching(range)
            }
            Intent::RandomizeRange { range } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::RandomizeRange { range }).touching(range)
            }
            Intent::TrimWhitespace { range } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::TrimWhitespace { range }).touching(range)
            }
            Intent::DeleteDuplicates {
                range,
                comparison_columns,
            } => {
                let range = self.range(range)?;
                if let Some(col) = comparison_columns
                    .iter()
                    .find(|c| !(range.start_col..range.end_col).contains(c))
                {
                    return Err(invalid(format!("comparison column {col} is outside {range}")));
                }
                Lowered::one(ProviderRequest::DeleteDuplicates {
                    range,
                    comparison_columns: comparison_columns.clone(),
                })
                .touching(range)
            }
            Intent::SplitTextToColumns { range, delimiter } => {
                let source = self.range(range)?;
                if source.columns() != 1 {
                    return Err(invalid(format!("{source} must be a single column")));
                }
                let (_, cols) = self.extents(source.section_id);
                let spill = GridRange {
                    end_col: cols.max(source.end_col),
                    ..source
                };
                Lowered::one(ProviderRequest::TextToColumns {
                    source,
                    delimiter: delimiter.clone(),
                })
                .touching(spill)
            }
            Intent::AutoFill {
                source,
                dimension,
                fill_length,
            } => {
                let source = self.range(source)?;
                let filled = match dimension {
                    Dimension::Rows => GridRange {
                        start_row: source.end_row,
                        end_row: source.end_row + fill_length,
                        ..source
                    },
                    Dimension::Columns => GridRange {
                        start_col: source.end_col,
                        end_col: source.end_col + fill_length,
                        ..source
                    },
                };
                Lowered::one(ProviderRequest::AutoFill {
                    source,
                    dimension: *dimension,
                    fill_length: *fill_length,
                })
                .touching(filled)
            }
            Intent::SetNote { range, note } => self.patch(
                range,
                CellPatch {
                    note: Some(note.clone()),
                    ..CellPatch::default()
                },
            )?,
            Intent::ClearNotes { range } => self.patch(
                range,
                CellPatch {
                    note: Some(String::new()),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetHyperlink { range, url, label } => {
                let quote = |s: &str| s.replace('"', "\"\"");
                let formula = match label {
                    Some(label) => format!("=HYPERLINK(\"{}\",\"{}\")", quote(url), quote(label)),
                    None => format!("=HYPERLINK(\"{}\")", quote(url)),
                };
                self.patch(
                    range,
                    CellPatch {
                        formula: Some(formula),
                        ..CellPatch::default()
                    },
                )?
            }

            Intent::SetNumberFormat {
                range,
                format,
                pattern,
            } => self.patch(
                range,
                CellPatch {
                    number_format: Some(NumberFormat {
                        kind: *format,
                        pattern: pattern.clone(),
                    }),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetBackgroundColor { range, color } => self.patch(
                range,
                CellPatch {
                    background_color: Some(*color),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetTextColor { range, color } => self.patch(
                range,
                CellPatch {
                    foreground_color: Some(*color),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetFont {
                range,
                family,
                size,
            } => self.patch(
                range,
                CellPatch {
                    font_family: family.clone(),
                    font_size: *size,
                    ..CellPatch::default()
                },
            )?,
            Intent::SetTextStyle { range, style } => self.patch(
                range,
                CellPatch {
                    bold: style.bold,
                    italic: style.italic,
                    underline: style.underline,
                    strikethrough: style.strikethrough,
                    ..CellPatch::default()
                },
            )?,
            Intent::SetHorizontalAlignment { range, alignment } => self.patch(
                range,
                CellPatch {
                    horizontal_alignment: Some(*alignment),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetVerticalAlignment { range, alignment } => self.patch(
                range,
                CellPatch {
                    vertical_alignment: Some(*alignment),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetWrapStrategy { range, strategy } => self.patch(
                range,
                CellPatch {
                    wrap_strategy: Some(*strategy),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetTextRotation { range, angle } => self.patch(
                range,
                CellPatch {
                    text_rotation: Some(*angle),
                    ..CellPatch::default()
                },
            )?,
            Intent::SetBorders {
                range,
                sides,
                style,
                color,
            } => {
                let range = self.range(range)?;
                let border = Border {
                    style: *style,
                    color: *color,
                };
                let pick = |on: bool| on.then_some(border);
                let borders = BorderPatch {
                    top: pick(sides.top),
                    bottom: pick(sides.bottom),
                    left: pick(sides.left),
                    right: pick(sides.right),
                    inner_horizontal: pick(sides.inner_horizontal),
                    inner_vertical: pick(sides.inner_vertical),
                };
                Lowered::one(ProviderRequest::UpdateBorders { range, borders }).touching(range)
            }
            Intent::MergeCells { range, merge_type } => {
                let range = self.range(range)?;
                if range.area() < 2 {
                    return Err(invalid(format!("{range} is a single cell")));
                }
                Lowered::one(ProviderRequest::MergeCells {
                    range,
                    merge_type: *merge_type,
                })
                .touching(range)
            }
            Intent::UnmergeCells { range } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::UnmergeCells { range }).touching(range)
            }
            Intent::SetColumnWidth {
                section_id,
                start,
                end,
                pixels,
            } => Self::dimension_patch(
                *section_id,
                Dimension::Columns,
                *start,
                *end,
                DimensionPatch {
                    pixel_size: Some(*pixels),
                    hidden_by_user: None,
                },
            ),
            Intent::SetRowHeight {
                section_id,
                start,
                end,
                pixels,
            } => Self::dimension_patch(
                *section_id,
                Dimension::Rows,
                *start,
                *end,
                DimensionPatch {
                    pixel_size: Some(*pixels),
                    hidden_by_user: None,
                },
            ),
            Intent::AutoResizeColumns {
                section_id,
                start,
                end,
            } => Lowered::one(ProviderRequest::AutoResizeDimensions {
                span: DimensionSpan::new(*section_id, Dimension::Columns, *start, *end),
            }),
            Intent::AutoResizeRows {
                section_id,
                start,
                end,
            } => Lowered::one(ProviderRequest::AutoResizeDimensions {
                span: DimensionSpan::new(*section_id, Dimension::Rows, *start, *end),
            }),

            Intent::AddConditionalFormat { range, rule, index } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::AddConditionalFormatRule {
                    ranges: vec![range],
                    rule: rule.clone(),
                    index: index.unwrap_or(0),
                })
                .touching(range)
            }
            Intent::UpdateConditionalFormat {
                section_id,
                index,
                rule,
                range,
            } => {
                let range = self.optional_range(range.as_ref())?;
                if let Some(range) = range
                    && range.section_id != *section_id
                {
                    return Err(invalid(format!(
                        "{range} is not in section {section_id}"
                    )));
                }
                let mut lowered = Lowered::one(ProviderRequest::UpdateConditionalFormatRule {
                    section_id: *section_id,
                    index: *index,
                    rule: rule.clone(),
                    ranges: range.map(|r| vec![r]),
                });
                if let Some(range) = range {
                    lowered = lowered.touching(range);
                }
                lowered
            }
            Intent::DeleteConditionalFormat { section_id, index } => {
                Lowered::one(ProviderRequest::DeleteConditionalFormatRule {
                    section_id: *section_id,
                    index: *index,
                })
            }
            Intent::SetDataValidation { range, rule } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::SetDataValidation {
                    range,
                    rule: Some(rule.clone()),
                })
                .touching(range)
            }
            Intent::ClearDataValidation { range } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::SetDataValidation { range, rule: None })
                    .touching(range)
            }
            Intent::AddBanding { range, colors } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::AddBanding {
                    range,
                    colors: *colors,
                })
                .touching(range)
            }
            Intent::DeleteBanding { banding_id } => {
                Lowered::one(ProviderRequest::DeleteBanding {
                    banding_id: *banding_id,
                })
            }

            Intent::InsertRows {
                section_id,
                start,
                count,
                inherit_from_before,
            } => self.insert_dimension(
                *section_id,
                Dimension::Rows,
                *start,
                *count,
                *inherit_from_before,
            )?,
            Intent::InsertColumns {
                section_id,
                start,
                count,
                inherit_from_before,
            } => self.insert_dimension(
                *section_id,
                Dimension::Columns,
                *start,
                *count,
                *inherit_from_before,
            )?,
            Intent::DeleteRows {
                section_id,
                start,
                count,
            } => {
                let (span, band) = self.band(*section_id, Dimension::Rows, *start, *count, false)?;
                Lowered {
                    deleted_rows: *count,
                    ..Lowered::one(ProviderRequest::DeleteDimension { span }).touching(band)
                }
            }
            Intent::DeleteColumns {
                section_id,
                start,
                count,
            } => {
                let (span, band) =
                    self.band(*section_id, Dimension::Columns, *start, *count, false)?;
                Lowered {
                    deleted_columns: *count,
                    ..Lowered::one(ProviderRequest::DeleteDimension { span }).touching(band)
                }
            }
            Intent::AppendDimension {
                section_id,
                dimension,
                count,
            } => Lowered::one(ProviderRequest::AppendDimension {
                section_id: *section_id,
                dimension: *dimension,
                length: *count,
            }),
            Intent::MoveRows {
                section_id,
                start,
                count,
                destination,
            } => self.move_dimension(*section_id, Dimension::Rows, *start, *count, *destination)?,
            Intent::MoveColumns {
                section_id,
                start,
                count,
                destination,
            } => self.move_dimension(
                *section_id,
                Dimension::Columns,
                *start,
                *count,
                *destination,
            )?,
            Intent::HideRows {
                section_id,
                start,
                count,
            } => self.visibility(*section_id, Dimension::Rows, *start, *count, true),
            Intent::HideColumns {
                section_id,
                start,
                count,
            } => self.visibility(*section_id, Dimension::Columns, *start, *count, true),
            Intent::ShowRows {
                section_id,
                start,
                count,
            } => self.visibility(*section_id, Dimension::Rows, *start, *count, false),
            Intent::ShowColumns {
                section_id,
                start,
                count,
            } => self.visibility(*section_id, Dimension::Columns, *start, *count, false),
            Intent::GroupRows {
                section_id,
                start,
                count,
            } => Lowered::one(ProviderRequest::AddDimensionGroup {
                span: DimensionSpan::new(*section_id, Dimension::Rows, *start, start + count),
            }),
            Intent::GroupColumns {
                section_id,
                start,
                count,
            } => Lowered::one(ProviderRequest::AddDimensionGroup {
                span: DimensionSpan::new(*section_id, Dimension::Columns, *start, start + count),
            }),
            Intent::UngroupRows {
                section_id,
                start,
                count,
            } => Lowered::one(ProviderRequest::DeleteDimensionGroup {
                span: DimensionSpan::new(*section_id, Dimension::Rows, *start, start + count),
            }),
            Intent::UngroupColumns {
                section_id,
                start,
                count,
            } => Lowered::one(ProviderRequest::DeleteDimensionGroup {
                span: DimensionSpan::new(*section_id, Dimension::Columns, *start, start + count),
            }),
            Intent::FreezeRows { section_id, count } => {
                if let Some((rows, _)) = self.known_extents(*section_id)
                    && *count >= rows
                {
                    return Err(invalid(format!(
                        "cannot freeze {count} of {rows} rows in section {section_id}"
                    )));
                }
                Self::sheet_patch(
                    *section_id,
                    SheetPatch {
                        frozen_row_count: Some(*count),
                        ..SheetPatch::default()
                    },
                )
            }
            Intent::FreezeColumns { section_id, count } => {
                if let Some((_, cols)) = self.known_extents(*section_id)
                    && *count >= cols
                {
                    return Err(invalid(format!(
                        "cannot freeze {count} of {cols} columns in section {section_id}"
                    )));
                }
                Self::sheet_patch(
                    *section_id,
                    SheetPatch {
                        frozen_column_count: Some(*count),
                        ..SheetPatch::default()
                    },
                )
            }
            Intent::InsertCells { range, shift } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::InsertRange {
                    range,
                    shift_dimension: *shift,
                })
                .touching(range)
            }
            Intent::DeleteCells { range, shift } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::DeleteRange {
                    range,
                    shift_dimension: *shift,
                })
                .touching(range)
            }

            Intent::AddSheet {
                title,
                index,
                section_id,
                rows,
                columns,
            } => {
                if self.title_taken(title, None) {
                    return Err(invalid(format!("a sheet titled '{title}' already exists")));
                }
                Lowered::one(ProviderRequest::AddSheet {
                    properties: NewSheet {
                        section_id: *section_id,
                        title: title.clone(),
                        index: *index,
                        row_count: rows.unwrap_or(DEFAULT_NEW_SHEET_ROWS),
                        column_count: columns.unwrap_or(DEFAULT_NEW_SHEET_COLUMNS),
                    },
                })
            }
            Intent::DeleteSheet { section_id } => {
                let full = self.full_section(*section_id);
                Lowered::one(ProviderRequest::DeleteSheet {
                    section_id: *section_id,
                })
                .touching(full)
            }
            Intent::DuplicateSheet {
                section_id,
                new_title,
                index,
            } => {
                if let Some(title) = new_title
                    && self.title_taken(title, None)
                {
                    return Err(invalid(format!("a sheet titled '{title}' already exists")));
                }
                Lowered::one(ProviderRequest::DuplicateSheet {
                    source_section_id: *section_id,
                    new_title: new_title.clone(),
                    insert_index: *index,
                })
            }
            Intent::RenameSheet { section_id, title } => {
                if self.title_taken(title, Some(*section_id)) {
                    return Err(invalid(format!("a sheet titled '{title}' already exists")));
                }
                Self::sheet_patch(
                    *section_id,
                    SheetPatch {
                        title: Some(title.clone()),
                        ..SheetPatch::default()
                    },
                )
            }
            Intent::MoveSheet { section_id, index } => Self::sheet_patch(
                *section_id,
                SheetPatch {
                    index: Some(*index),
                    ..SheetPatch::default()
                },
            ),
            Intent::HideSheet { section_id } => Self::sheet_patch(
                *section_id,
                SheetPatch {
                    hidden: Some(true),
                    ..SheetPatch::default()
                },
            ),
            Intent::ShowSheet { section_id } => Self::sheet_patch(
                *section_id,
                SheetPatch {
                    hidden: Some(false),
                    ..SheetPatch::default()
                },
            ),
            Intent::SetTabColor { section_id, color } => Self::sheet_patch(
                *section_id,
                SheetPatch {
                    tab_color: Some(*color),
                    ..SheetPatch::default()
                },
            ),
            Intent::SetGridlinesVisible {
                section_id,
                visible,
            } => Self::sheet_patch(
                *section_id,
                SheetPatch {
                    hide_gridlines: Some(!visible),
                    ..SheetPatch::default()
                },
            ),
            Intent::SetRightToLeft {
                section_id,
                right_to_left,
            } => Self::sheet_patch(
                *section_id,
                SheetPatch {
                    right_to_left: Some(*right_to_left),
                    ..SheetPatch::default()
                },
            ),

            Intent::AddNamedRange { name, range } => {
                if self.name_taken(name) {
                    return Err(invalid(format!("named range '{name}' already exists")));
                }
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::AddNamedRange {
                    name: name.clone(),
                    range,
                })
            }
            Intent::UpdateNamedRange {
                name,
                new_name,
                range,
            } => {
                if let Some(new_name) = new_name
                    && !new_name.eq_ignore_ascii_case(name)
                    && self.name_taken(new_name)
                {
                    return Err(invalid(format!("named range '{new_name}' already exists")));
                }
                let range = self.optional_range(range.as_ref())?;
                Lowered::one(ProviderRequest::UpdateNamedRange {
                    name: name.clone(),
                    new_name: new_name.clone(),
                    range,
                })
            }
            Intent::DeleteNamedRange { name } => {
                Lowered::one(ProviderRequest::DeleteNamedRange { name: name.clone() })
            }
            Intent::ProtectRange {
                range,
                description,
                warning_only,
                editors,
            } => {
                let range = self.range(range)?;
                Lowered::one(ProviderRequest::AddProtectedRange {
                    range,
                    description: description.clone(),
                    warning_only: *warning_only,
                    editors: editors.clone(),
                })
            }
            Intent::UnprotectRange { protected_range_id } => {
                Lowered::one(ProviderRequest::DeleteProtectedRange {
                    protected_range_id: *protected_range_id,
                })
            }

            Intent::SetBasicFilter { range, criteria } => {
                let range = self.range(range)?;
                check_criteria(&range, criteria).map_err(invalid)?;
                Lowered::one(ProviderRequest::SetBasicFilter {
                    range,
                    criteria: criteria.clone(),
                })
            }
            Intent::ClearBasicFilter { section_id } => {
                Lowered::one(ProviderRequest::ClearBasicFilter {
                    section_id: *section_id,
                })
            }
            Intent::AddFilterView {
                title,
                range,
                criteria,
            } => {
                let range = self.range(range)?;
                check_criteria(&range, criteria).map_err(invalid)?;
                Lowered::one(ProviderRequest::AddFilterView {
                    title: title.clone(),
                    range,
                    criteria: criteria.clone(),
                })
            }
            Intent::UpdateFilterView {
                filter_view_id,
                title,
                criteria,
            } => Lowered::one(ProviderRequest::UpdateFilterView {
                filter_view_id: *filter_view_id,
                title: title.clone(),
                criteria: criteria.clone(),
            }),
            Intent::DeleteFilterView { filter_view_id } => {
                Lowered::one(ProviderRequest::DeleteFilterView {
                    filter_view_id: *filter_view_id,
                })
            }

            Intent::AddChart { spec, anchor } => {
                let chart = self.chart(spec)?;
                Lowered::one(ProviderRequest::AddChart {
                    chart,
                    anchor: *anchor,
                })
            }
            Intent::UpdateChartSpec { chart_id, spec } => {
                let chart = self.chart(spec)?;
                Lowered::one(ProviderRequest::UpdateChartSpec {
                    chart_id: *chart_id,
                    chart,
                })
            }
            Intent::MoveChart { chart_id, anchor } => {
                Lowered::one(ProviderRequest::UpdateEmbeddedObjectPosition {
                    object_id: *chart_id,
                    anchor: *anchor,
                })
            }
            Intent::DeleteChart { chart_id } => {
                Lowered::one(ProviderRequest::DeleteEmbeddedObject {
                    object_id: *chart_id,
                })
            }

            Intent::AddPivotTable {
                source,
                anchor,
                spec,
            }
            | Intent::UpdatePivotTable {
                source,
                anchor,
                spec,
            } => {
                let pivot = self.pivot(source, spec)?;
                Lowered::one(ProviderRequest::UpdatePivotTable {
                    anchor: *anchor,
                    pivot: Some(pivot),
                })
                .touching(GridRange::cell(anchor.section_id, anchor.row, anchor.col))
            }
            Intent::DeletePivotTable { anchor } => {
                Lowered::one(ProviderRequest::UpdatePivotTable {
                    anchor: *anchor,
                    pivot: None,
                })
                .touching(GridRange::cell(anchor.section_id, anchor.row, anchor.col))
            }

            Intent::AddDeveloperMetadata {
                key,
                value,
                location,
            } => Lowered::one(ProviderRequest::CreateDeveloperMetadata {
                key: key.clone(),
                value: value.clone(),
                location: *location,
            }),
            Intent::DeleteDeveloperMetadata { metadata_id } => {
                Lowered::one(ProviderRequest::DeleteDeveloperMetadata {
                    metadata_id: *metadata_id,
                })
            }
            Intent::SetDocumentTitle { title } => {
                Lowered::one(ProviderRequest::UpdateSpreadsheetProperties {
                    properties: DocumentPatch {
                        title: Some(title.clone()),
                        locale: None,
                    },
                })
            }
            Intent::SetDocumentLocale { locale } => {
                Lowered::one(ProviderRequest::UpdateSpreadsheetProperties {
                    properties: DocumentPatch {
                        title: None,
                        locale: Some(locale.clone()),
                    },
                })
            }

            Intent::AddPermission { principal, role } => {
                Lowered::one(ProviderRequest::CreatePermission {
                    principal: principal.clone(),
                    role: *role,
                })
            }
            Intent::UpdatePermission {
                permission_id,
                role,
            } => Lowered::one(ProviderRequest::UpdatePermission {
                permission_id: permission_id.clone(),
                role: *role,
            }),
            Intent::RemovePermission { permission_id } => {
                Lowered::one(ProviderRequest::DeletePermission {
                    permission_id: permission_id.clone(),
                })
            }
        };
        Ok(lowered)
    }

    fn clear(&mut self, reference: &RangeRef, scope: ClearScope) -> Result<Lowered> {
        let range = self.range(reference)?;
        Ok(Lowered::one(ProviderRequest::ClearRange { range, scope }).touching(range))
    }

    fn insert_dimension(
        &mut self,
        section_id: SectionId,
        dimension: Dimension,
        start: u32,
        count: u32,
        inherit_from_before: bool,
    ) -> Result<Lowered> {
        if inherit_from_before && start == 0 {
            return Err(OpsError::validation(
                "inherit_from_before needs a row or column before the insertion point",
            ));
        }
        let (span, band) = self.band(section_id, dimension, start, count, true)?;
        Ok(Lowered::one(ProviderRequest::InsertDimension {
            span,
            inherit_from_before,
        })
        .touching(band))
    }

    fn move_dimension(
        &mut self,
        section_id: SectionId,
        dimension: Dimension,
        start: u32,
        count: u32,
        destination: u32,
    ) -> Result<Lowered> {
        let (span, _) = self.band(section_id, dimension, start, count, false)?;
        // Every index between the band and its destination shifts.
        let low = start.min(destination);
        let high = span.end.max(destination);
        let (_, shifted) = self.band(section_id, dimension, low, high - low, false)?;
        Ok(Lowered::one(ProviderRequest::MoveDimension {
            source: span,
            destination_index: destination,
        })
        .touching(shifted))
    }

    fn visibility(
        &mut self,
        section_id: SectionId,
        dimension: Dimension,
        start: u32,
        count: u32,
        hidden: bool,
    ) -> Lowered {
        Self::dimension_patch(
            section_id,
            dimension,
            start,
            start.saturating_add(count),
            DimensionPatch {
                pixel_size: None,
                hidden_by_user: Some(hidden),
            },
        )
    }
}

fn check_criteria(range: &GridRange, criteria: &[FilterCriterion]) -> std::result::Result<(), String> {
    match criteria
        .iter()
        .find(|c| !(range.start_col..range.end_col).contains(&c.column))
    {
        Some(bad) => Err(format!("filter column {} is outside {range}", bad.column)),
        None => Ok(()),
    }
}

/// Cells addressed by a footprint, counting overlaps once per rectangle.
pub(crate) fn footprint_area(footprint: &[GridRange]) -> u64 {
    footprint.iter().map(GridRange::area).sum()
}
