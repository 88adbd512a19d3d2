use super::{BatchReply, RequestReply, SheetProvider};
use crate::compiler::{ClearScope, ProviderRequest};
use crate::errors::{ProviderError, ProviderErrorKind};
use crate::intent::{PasteType, SortSpec, SplitDelimiter};
use crate::model::{
    CellValue, CellWindow, Dimension, DimensionSpan, DocumentMetadata, GridRange, NamedRange,
    SectionId, SectionMetadata, SectionProperties, SectionState,
};
use ahash::AHashMap;
use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tracing::debug;

/// Failure injected into the next `batch_dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reject with a throttling signal; nothing applied.
    Throttle,
    /// Reject as temporarily unavailable; nothing applied.
    Unavailable,
    /// Apply the first `n` requests, then fail reporting `n` applied.
    FailAfter(usize),
    /// Apply the first `n` requests, then fail without saying how many landed.
    Opaque(usize),
    /// Refuse the whole batch with this kind, e.g. expired credentials.
    Reject(ProviderErrorKind),
}

/// JSON shape accepted by [`MemoryProvider::from_fixture`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkbookFixture {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub sections: Vec<SectionFixture>,
    #[serde(default)]
    pub named_ranges: Vec<NamedRange>,
}

fn default_title() -> String {
    "Untitled".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionFixture {
    pub section_id: SectionId,
    pub title: String,
    #[serde(default)]
    pub row_count: Option<u32>,
    #[serde(default)]
    pub column_count: Option<u32>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub header_row_index: u32,
    /// Dense values starting at A1.
    #[serde(default)]
    pub values: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone)]
struct Sheet {
    properties: SectionProperties,
    header_row_index: u32,
    cells: AHashMap<(u32, u32), CellValue>,
}

impl Sheet {
    fn new(properties: SectionProperties) -> Self {
        Self {
            properties,
            header_row_index: 0,
            cells: AHashMap::new(),
        }
    }

    fn get(&self, row: u32, col: u32) -> CellValue {
        self.cells.get(&(row, col)).cloned().unwrap_or_default()
    }

    fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if value.is_empty() {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), value);
        }
    }

    fn read(&self, range: &GridRange) -> Vec<Vec<CellValue>> {
        (range.start_row..range.end_row)
            .map(|r| {
                (range.start_col..range.end_col)
                    .map(|c| self.get(r, c))
                    .collect()
            })
            .collect()
    }

    fn write(&mut self, range: &GridRange, values: &[Vec<CellValue>]) {
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                let (row_idx, col_idx) = (range.start_row + r as u32, range.start_col + c as u32);
                if row_idx < range.end_row && col_idx < range.end_col {
                    self.set(row_idx, col_idx, value.clone());
                }
            }
        }
    }

    fn clear(&mut self, range: &GridRange) {
        self.cells.retain(|&(r, c), _| !range.contains_cell(r, c));
    }

    fn last_used_row(&self) -> Option<u32> {
        self.cells.keys().map(|&(r, _)| r).max()
    }

    /// Rewrite every cell coordinate; `None` drops the cell.
    fn remap(&mut self, f: impl Fn(u32, u32) -> Option<(u32, u32)>) {
        let cells = std::mem::take(&mut self.cells);
        for ((r, c), value) in cells {
            if let Some(at) = f(r, c) {
                self.cells.insert(at, value);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Workbook {
    title: String,
    locale: Option<String>,
    sheets: IndexMap<SectionId, Sheet>,
    named_ranges: IndexMap<String, GridRange>,
    permissions: IndexMap<String, ()>,
    next_section_id: u32,
    next_object_id: u32,
}

impl Workbook {
    fn sheet(&self, id: SectionId) -> Result<&Sheet, ProviderError> {
        self.sheets
            .get(&id)
            .ok_or_else(|| ProviderError::not_found(format!("no section with id {id}")))
    }

    fn sheet_mut(&mut self, id: SectionId) -> Result<&mut Sheet, ProviderError> {
        self.sheets
            .get_mut(&id)
            .ok_or_else(|| ProviderError::not_found(format!("no section with id {id}")))
    }

    fn reindex(&mut self) {
        for (index, sheet) in self.sheets.values_mut().enumerate() {
            sheet.properties.index = index as u32;
        }
    }

    fn object_id(&mut self) -> u32 {
        self.next_object_id += 1;
        self.next_object_id
    }

    fn document(&self) -> DocumentMetadata {
        DocumentMetadata {
            title: self.title.clone(),
            locale: self.locale.clone(),
            sections: self.sheets.values().map(|s| s.properties.clone()).collect(),
            named_ranges: self
                .named_ranges
                .iter()
                .map(|(name, range)| NamedRange {
                    name: name.clone(),
                    range: *range,
                })
                .collect(),
        }
    }

    fn apply(&mut self, request: &ProviderRequest) -> Result<RequestReply, ProviderError> {
        let mut reply = RequestReply::default();
        match request {
            ProviderRequest::UpdateValues { section_id, data } => {
                let sheet = self.sheet_mut(*section_id)?;
                for chunk in data {
                    check_bounds(&sheet.properties, &chunk.range)?;
                    sheet.write(&chunk.range, &chunk.values);
                }
            }
            ProviderRequest::RepeatCell { range, cell, .. } => {
                let sheet = self.sheet_mut(range.section_id)?;
                check_bounds(&sheet.properties, range)?;
                if let Some(formula) = &cell.formula {
                    for r in range.start_row..range.end_row {
                        for c in range.start_col..range.end_col {
                            sheet.set(r, c, CellValue::text(formula.clone()));
                        }
                    }
                }
            }
            ProviderRequest::AppendCells { section_id, rows } => {
                let sheet = self.sheet_mut(*section_id)?;
                let start = sheet.last_used_row().map_or(0, |r| r + 1);
                let needed = start + rows.len() as u32;
                if needed > sheet.properties.row_count {
                    sheet.properties.row_count = needed;
                }
                let width = rows.iter().map(Vec::len).max().unwrap_or(0) as u32;
                if width > sheet.properties.column_count {
                    sheet.properties.column_count = width;
                }
                let target = GridRange::new(*section_id, start, needed, 0, width);
                sheet.write(&target, rows);
            }
            ProviderRequest::ClearRange { range, scope } => {
                let sheet = self.sheet_mut(range.section_id)?;
                if *scope != ClearScope::Formats {
                    sheet.clear(range);
                }
            }
            ProviderRequest::FindReplace {
                find,
                replacement,
                range,
                section_id,
                match_case,
                match_entire_cell,
                search_by_regex,
                include_formulas,
                ..
            } => {
                let pattern = if *search_by_regex {
                    find.clone()
                } else {
                    regex::escape(find)
                };
                let pattern = if *match_entire_cell {
                    format!("^(?:{pattern})$")
                } else {
                    pattern
                };
                let matcher = RegexBuilder::new(&pattern)
                    .case_insensitive(!match_case)
                    .build()
                    .map_err(|e| {
                        ProviderError::new(ProviderErrorKind::InvalidRequest, e.to_string())
                    })?;
                let targets: Vec<SectionId> = match (range, section_id) {
                    (Some(range), _) => vec![range.section_id],
                    (None, Some(id)) => vec![*id],
                    (None, None) => self.sheets.keys().copied().collect(),
                };
                for id in targets {
                    let sheet = self.sheet_mut(id)?;
                    for ((r, c), value) in sheet.cells.iter_mut() {
                        if range.is_some_and(|range| !range.contains_cell(*r, *c)) {
                            continue;
                        }
                        let CellValue::Text(text) = value else {
                            continue;
                        };
                        if text.starts_with('=') && !include_formulas {
                            continue;
                        }
                        let replaced = matcher.replace_all(text, replacement.as_str());
                        if replaced != text.as_str() {
                            *text = replaced.into_owned();
                        }
                    }
                }
            }
            ProviderRequest::CopyPaste {
                source,
                destination,
                paste_type,
            } => {
                if !source.is_empty()
                    && matches!(
                        paste_type,
                        PasteType::Normal | PasteType::Values | PasteType::Formulas
                    )
                {
                    let values = self.sheet(source.section_id)?.read(source);
                    let sheet = self.sheet_mut(destination.section_id)?;
                    let (h, w) = (source.rows().max(1), source.columns().max(1));
                    for r in destination.start_row..destination.end_row {
                        for c in destination.start_col..destination.end_col {
                            let v = &values[((r - destination.start_row) % h) as usize]
                                [((c - destination.start_col) % w) as usize];
                            sheet.set(r, c, v.clone());
                        }
                    }
                }
            }
            ProviderRequest::CutPaste {
                source,
                destination,
            } => {
                let values = self.sheet(source.section_id)?.read(source);
                self.sheet_mut(source.section_id)?.clear(source);
                let target = GridRange::new(
                    destination.section_id,
                    destination.row,
                    destination.row + source.rows(),
                    destination.col,
                    destination.col + source.columns(),
                );
                let sheet = self.sheet_mut(destination.section_id)?;
                check_bounds(&sheet.properties, &target)?;
                sheet.write(&target, &values);
            }
            ProviderRequest::SortRange { range, sort_specs } => {
                let sheet = self.sheet_mut(range.section_id)?;
                let mut rows = sheet.read(range);
                rows.sort_by(|a, b| compare_rows(a, b, sort_specs, range.start_col));
                sheet.clear(range);
                sheet.write(range, &rows);
            }
            ProviderRequest::TrimWhitespace { range } => {
                let sheet = self.sheet_mut(range.section_id)?;
                for ((r, c), value) in sheet.cells.iter_mut() {
                    if range.contains_cell(*r, *c)
                        && let CellValue::Text(text) = value
                    {
                        *text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                    }
                }
            }
            ProviderRequest::DeleteDuplicates {
                range,
                comparison_columns,
            } => {
                let sheet = self.sheet_mut(range.section_id)?;
                let rows = sheet.read(range);
                let mut kept: Vec<Vec<CellValue>> = Vec::with_capacity(rows.len());
                for row in rows {
                    let key = |candidate: &Vec<CellValue>| -> Vec<String> {
                        candidate
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| {
                                comparison_columns.is_empty()
                                    || comparison_columns.contains(&(range.start_col + *i as u32))
                            })
                            .map(|(_, v)| v.to_string())
                            .collect()
                    };
                    let row_key = key(&row);
                    if !kept.iter().any(|k| key(k) == row_key) {
                        kept.push(row);
                    }
                }
                sheet.clear(range);
                sheet.write(range, &kept);
            }
            ProviderRequest::TextToColumns { source, delimiter } => {
                let sheet = self.sheet_mut(source.section_id)?;
                for r in source.start_row..source.end_row {
                    let CellValue::Text(text) = sheet.get(r, source.start_col) else {
                        continue;
                    };
                    let parts = split_text(&text, delimiter);
                    for (i, part) in parts.into_iter().enumerate() {
                        sheet.set(r, source.start_col + i as u32, CellValue::text(part));
                    }
                }
            }
            ProviderRequest::AutoFill {
                source,
                dimension,
                fill_length,
            } => {
                let sheet = self.sheet_mut(source.section_id)?;
                if source.is_empty() {
                    return Ok(reply);
                }
                let values = sheet.read(source);
                let (h, w) = (source.rows(), source.columns());
                let filled = match dimension {
                    Dimension::Rows => GridRange::new(
                        source.section_id,
                        source.end_row,
                        source.end_row + fill_length,
                        source.start_col,
                        source.end_col,
                    ),
                    Dimension::Columns => GridRange::new(
                        source.section_id,
                        source.start_row,
                        source.end_row,
                        source.end_col,
                        source.end_col + fill_length,
                    ),
                };
                check_bounds(&sheet.properties, &filled)?;
                for r in filled.start_row..filled.end_row {
                    for c in filled.start_col..filled.end_col {
                        let v = &values[((r - source.start_row) % h) as usize]
                            [((c - source.start_col) % w) as usize];
                        sheet.set(r, c, v.clone());
                    }
                }
            }
            ProviderRequest::InsertDimension { span, .. } => {
                let sheet = self.sheet_mut(span.section_id)?;
                let count = span.len();
                match span.dimension {
                    Dimension::Rows => {
                        sheet.remap(|r, c| Some((if r >= span.start { r + count } else { r }, c)));
                        sheet.properties.row_count += count;
                    }
                    Dimension::Columns => {
                        sheet.remap(|r, c| Some((r, if c >= span.start { c + count } else { c })));
                        sheet.properties.column_count += count;
                    }
                }
            }
            ProviderRequest::DeleteDimension { span } => {
                let sheet = self.sheet_mut(span.section_id)?;
                check_span(&sheet.properties, span)?;
                let count = span.len();
                let shift = |i: u32| -> Option<u32> {
                    if i < span.start {
                        Some(i)
                    } else if i < span.end {
                        None
                    } else {
                        Some(i - count)
                    }
                };
                match span.dimension {
                    Dimension::Rows => {
                        sheet.remap(|r, c| shift(r).map(|r| (r, c)));
                        sheet.properties.row_count -= count;
                    }
                    Dimension::Columns => {
                        sheet.remap(|r, c| shift(c).map(|c| (r, c)));
                        sheet.properties.column_count -= count;
                    }
                }
            }
            ProviderRequest::AppendDimension {
                section_id,
                dimension,
                length,
            } => {
                let sheet = self.sheet_mut(*section_id)?;
                match dimension {
                    Dimension::Rows => sheet.properties.row_count += length,
                    Dimension::Columns => sheet.properties.column_count += length,
                }
            }
            ProviderRequest::MoveDimension {
                source,
                destination_index,
            } => {
                let sheet = self.sheet_mut(source.section_id)?;
                check_span(&sheet.properties, source)?;
                let (s, e, d) = (source.start, source.end, *destination_index);
                match source.dimension {
                    Dimension::Rows => sheet.remap(|r, c| Some((moved_index(r, s, e, d), c))),
                    Dimension::Columns => sheet.remap(|r, c| Some((r, moved_index(c, s, e, d)))),
                }
            }
            ProviderRequest::InsertRange {
                range,
                shift_dimension,
            } => {
                let sheet = self.sheet_mut(range.section_id)?;
                let (rows, cols) = (range.rows(), range.columns());
                match shift_dimension {
                    Dimension::Rows => sheet.remap(|r, c| {
                        let inside = (range.start_col..range.end_col).contains(&c);
                        Some((if inside && r >= range.start_row { r + rows } else { r }, c))
                    }),
                    Dimension::Columns => sheet.remap(|r, c| {
                        let inside = (range.start_row..range.end_row).contains(&r);
                        Some((r, if inside && c >= range.start_col { c + cols } else { c }))
                    }),
                }
            }
            ProviderRequest::DeleteRange {
                range,
                shift_dimension,
            } => {
                let sheet = self.sheet_mut(range.section_id)?;
                sheet.clear(range);
                let (rows, cols) = (range.rows(), range.columns());
                match shift_dimension {
                    Dimension::Rows => sheet.remap(|r, c| {
                        let inside = (range.start_col..range.end_col).contains(&c);
                        Some((if inside && r >= range.end_row { r - rows } else { r }, c))
                    }),
                    Dimension::Columns => sheet.remap(|r, c| {
                        let inside = (range.start_row..range.end_row).contains(&r);
                        Some((r, if inside && c >= range.end_col { c - cols } else { c }))
                    }),
                }
            }
            ProviderRequest::AddSheet { properties } => {
                if self.sheets.values().any(|s| s.properties.title == properties.title) {
                    return Err(ProviderError::new(
                        ProviderErrorKind::InvalidRequest,
                        format!("a sheet titled '{}' already exists", properties.title),
                    ));
                }
                let id = match properties.section_id {
                    Some(id) if self.sheets.contains_key(&id) => {
                        return Err(ProviderError::new(
                            ProviderErrorKind::InvalidRequest,
                            format!("section id {id} is taken"),
                        ));
                    }
                    Some(id) => id,
                    None => self.fresh_section_id(),
                };
                let props = SectionProperties::new(id, properties.title.clone(), 0)
                    .with_extents(properties.row_count, properties.column_count);
                self.sheets.insert(id, Sheet::new(props));
                if let Some(index) = properties.index {
                    let last = self.sheets.len() - 1;
                    self.sheets.move_index(last, (index as usize).min(last));
                }
                self.reindex();
                reply.created_section_id = Some(id);
            }
            ProviderRequest::DeleteSheet { section_id } => {
                self.sheet(*section_id)?;
                if self.sheets.len() == 1 {
                    return Err(ProviderError::new(
                        ProviderErrorKind::InvalidRequest,
                        "cannot delete the only sheet",
                    ));
                }
                self.sheets.shift_remove(section_id);
                self.named_ranges.retain(|_, r| r.section_id != *section_id);
                self.reindex();
            }
            ProviderRequest::DuplicateSheet {
                source_section_id,
                new_title,
                insert_index,
            } => {
                let source = self.sheet(*source_section_id)?.clone();
                let id = self.fresh_section_id();
                let mut copy = source.clone();
                copy.properties.section_id = id;
                copy.properties.title = new_title
                    .clone()
                    .unwrap_or_else(|| format!("Copy of {}", source.properties.title));
                self.sheets.insert(id, copy);
                let last = self.sheets.len() - 1;
                let target = insert_index.map_or(
                    source.properties.index as usize + 1,
                    |index| index as usize,
                );
                self.sheets.move_index(last, target.min(last));
                self.reindex();
                reply.created_section_id = Some(id);
            }
            ProviderRequest::UpdateSheetProperties {
                section_id,
                properties,
            } => {
                let sheet = self.sheet_mut(*section_id)?;
                if let Some(title) = &properties.title {
                    sheet.properties.title = title.clone();
                }
                if let Some(hidden) = properties.hidden {
                    sheet.properties.hidden = hidden;
                }
                if let Some(rows) = properties.frozen_row_count {
                    sheet.properties.frozen_rows = rows;
                }
                if let Some(cols) = properties.frozen_column_count {
                    sheet.properties.frozen_columns = cols;
                }
                if let Some(index) = properties.index {
                    let from = self
                        .sheets
                        .get_index_of(section_id)
                        .ok_or_else(|| ProviderError::not_found("section vanished"))?;
                    let last = self.sheets.len() - 1;
                    self.sheets.move_index(from, (index as usize).min(last));
                    self.reindex();
                }
            }
            ProviderRequest::AddNamedRange { name, range } => {
                if self.named_ranges.contains_key(name) {
                    return Err(ProviderError::new(
                        ProviderErrorKind::InvalidRequest,
                        format!("named range '{name}' already exists"),
                    ));
                }
                self.named_ranges.insert(name.clone(), *range);
            }
            ProviderRequest::UpdateNamedRange {
                name,
                new_name,
                range,
            } => {
                let index = self.named_ranges.get_index_of(name).ok_or_else(|| {
                    ProviderError::not_found(format!("no named range '{name}'"))
                })?;
                if let Some(range) = range {
                    self.named_ranges[index] = *range;
                }
                if let Some(new_name) = new_name
                    && let Some((_, current)) = self.named_ranges.shift_remove_entry(name)
                {
                    self.named_ranges.insert(new_name.clone(), current);
                    let last = self.named_ranges.len() - 1;
                    self.named_ranges.move_index(last, index);
                }
            }
            ProviderRequest::DeleteNamedRange { name } => {
                self.named_ranges.shift_remove(name).ok_or_else(|| {
                    ProviderError::not_found(format!("no named range '{name}'"))
                })?;
            }
            ProviderRequest::UpdateSpreadsheetProperties { properties } => {
                if let Some(title) = &properties.title {
                    self.title = title.clone();
                }
                if let Some(locale) = &properties.locale {
                    self.locale = Some(locale.clone());
                }
            }
            ProviderRequest::AddConditionalFormatRule { .. }
            | ProviderRequest::AddBanding { .. }
            | ProviderRequest::AddProtectedRange { .. }
            | ProviderRequest::AddFilterView { .. }
            | ProviderRequest::AddChart { .. }
            | ProviderRequest::CreateDeveloperMetadata { .. } => {
                reply.created_object_id = Some(self.object_id());
            }
            ProviderRequest::CreatePermission { .. } => {
                let id = format!("perm-{}", self.object_id());
                self.permissions.insert(id.clone(), ());
                reply.created_permission_id = Some(id);
            }
            ProviderRequest::DeletePermission { permission_id } => {
                self.permissions.shift_remove(permission_id).ok_or_else(|| {
                    ProviderError::not_found(format!("no permission '{permission_id}'"))
                })?;
            }
            // Formatting, rules and object updates carry no value state here.
            ProviderRequest::RandomizeRange { .. }
            | ProviderRequest::UpdateBorders { .. }
            | ProviderRequest::MergeCells { .. }
            | ProviderRequest::UnmergeCells { .. }
            | ProviderRequest::UpdateDimensionProperties { .. }
            | ProviderRequest::AutoResizeDimensions { .. }
            | ProviderRequest::UpdateConditionalFormatRule { .. }
            | ProviderRequest::DeleteConditionalFormatRule { .. }
            | ProviderRequest::SetDataValidation { .. }
            | ProviderRequest::DeleteBanding { .. }
            | ProviderRequest::AddDimensionGroup { .. }
            | ProviderRequest::DeleteDimensionGroup { .. }
            | ProviderRequest::DeleteProtectedRange { .. }
            | ProviderRequest::SetBasicFilter { .. }
            | ProviderRequest::ClearBasicFilter { .. }
            | ProviderRequest::UpdateFilterView { .. }
            | ProviderRequest::DeleteFilterView { .. }
            | ProviderRequest::UpdateChartSpec { .. }
            | ProviderRequest::UpdateEmbeddedObjectPosition { .. }
            | ProviderRequest::DeleteEmbeddedObject { .. }
            | ProviderRequest::UpdatePivotTable { .. }
            | ProviderRequest::DeleteDeveloperMetadata { .. }
            | ProviderRequest::UpdatePermission { .. } => {}
        }
        Ok(reply)
    }

    fn fresh_section_id(&mut self) -> SectionId {
        loop {
            self.next_section_id += 1;
            let id = SectionId(self.next_section_id);
            if !self.sheets.contains_key(&id) {
                return id;
            }
        }
    }
}

fn check_bounds(properties: &SectionProperties, range: &GridRange) -> Result<(), ProviderError> {
    if range.end_row > properties.row_count || range.end_col > properties.column_count {
        return Err(ProviderError::new(
            ProviderErrorKind::InvalidRequest,
            format!(
                "{range} exceeds the {}x{} grid of '{}'",
                properties.row_count, properties.column_count, properties.title
            ),
        ));
    }
    Ok(())
}

fn check_span(properties: &SectionProperties, span: &DimensionSpan) -> Result<(), ProviderError> {
    let extent = match span.dimension {
        Dimension::Rows => properties.row_count,
        Dimension::Columns => properties.column_count,
    };
    if span.end > extent {
        return Err(ProviderError::new(
            ProviderErrorKind::InvalidRequest,
            format!(
                "{} {}..{} exceeds the {extent} available in '{}'",
                span.dimension.as_str(),
                span.start,
                span.end,
                properties.title
            ),
        ));
    }
    Ok(())
}

/// New position of index `i` after moving `[s, e)` to pre-move index `d`.
fn moved_index(i: u32, s: u32, e: u32, d: u32) -> u32 {
    let len = e - s;
    if d <= s {
        if (s..e).contains(&i) {
            d + (i - s)
        } else if (d..s).contains(&i) {
            i + len
        } else {
            i
        }
    } else if (s..e).contains(&i) {
        d - len + (i - s)
    } else if (e..d).contains(&i) {
        i - len
    } else {
        i
    }
}

fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.total_cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        _ => a.sort_rank().cmp(&b.sort_rank()),
    }
}

fn compare_rows(a: &[CellValue], b: &[CellValue], specs: &[SortSpec], origin: u32) -> Ordering {
    for spec in specs {
        let idx = spec.column.saturating_sub(origin) as usize;
        let (x, y) = (
            a.get(idx).cloned().unwrap_or_default(),
            b.get(idx).cloned().unwrap_or_default(),
        );
        // Blanks sort last regardless of direction.
        let ord = match (x.is_empty(), y.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if spec.ascending => compare_cells(&x, &y),
            (false, false) => compare_cells(&y, &x),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn split_text(text: &str, delimiter: &SplitDelimiter) -> Vec<String> {
    let parts: Vec<&str> = match delimiter {
        SplitDelimiter::Comma => text.split(',').collect(),
        SplitDelimiter::Semicolon => text.split(';').collect(),
        SplitDelimiter::Period => text.split('.').collect(),
        SplitDelimiter::Space => text.split(' ').collect(),
        SplitDelimiter::Custom(sep) => text.split(sep.as_str()).collect(),
        SplitDelimiter::Autodetect => {
            let sep = [',', ';', '\t', ' ']
                .into_iter()
                .find(|c| text.contains(*c))
                .unwrap_or(',');
            text.split(sep).collect()
        }
    };
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

/// Whole workbook held in memory, with fault injection and call recording.
pub struct MemoryProvider {
    book: Mutex<Workbook>,
    faults: Mutex<VecDeque<Fault>>,
    calls: Mutex<Vec<Vec<ProviderRequest>>>,
    dispatch_delay: Mutex<Option<Duration>>,
    metadata_fetches: AtomicUsize,
    document_fetches: AtomicUsize,
    section_fetches: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            book: Mutex::new(Workbook {
                title: title.into(),
                locale: None,
                sheets: IndexMap::new(),
                named_ranges: IndexMap::new(),
                permissions: IndexMap::new(),
                next_section_id: 0,
                next_object_id: 0,
            }),
            faults: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            dispatch_delay: Mutex::new(None),
            metadata_fetches: AtomicUsize::new(0),
            document_fetches: AtomicUsize::new(0),
            section_fetches: AtomicUsize::new(0),
        }
    }

    pub fn from_fixture(fixture: WorkbookFixture) -> Self {
        let provider = Self::new(fixture.title);
        {
            let mut book = provider.book.lock();
            book.locale = fixture.locale;
            for section in fixture.sections {
                let data_rows = section.values.len() as u32;
                let data_cols = section.values.iter().map(Vec::len).max().unwrap_or(0) as u32;
                let properties = SectionProperties {
                    hidden: section.hidden,
                    ..SectionProperties::new(section.section_id, section.title, 0).with_extents(
                        section.row_count.unwrap_or(1000).max(data_rows),
                        section.column_count.unwrap_or(26).max(data_cols),
                    )
                };
                let mut sheet = Sheet::new(properties);
                sheet.header_row_index = section.header_row_index;
                let all = GridRange::new(section.section_id, 0, data_rows, 0, data_cols);
                sheet.write(&all, &section.values);
                book.next_section_id = book.next_section_id.max(section.section_id.0);
                book.sheets.insert(section.section_id, sheet);
            }
            for named in fixture.named_ranges {
                book.named_ranges.insert(named.name, named.range);
            }
            book.reindex();
        }
        provider
    }

    /// Load a JSON or YAML workbook fixture.
    pub fn load(path: &Path) -> AnyResult<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read workbook {:?}", path))?;
        let fixture: WorkbookFixture = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse YAML workbook {:?}", path))?,
            _ => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse JSON workbook {:?}", path))?,
        };
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_section(self, properties: SectionProperties) -> Self {
        {
            let mut book = self.book.lock();
            book.next_section_id = book.next_section_id.max(properties.section_id.0);
            book.sheets.insert(properties.section_id, Sheet::new(properties));
            book.reindex();
        }
        self
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push_back(fault);
    }

    /// Hold every dispatch for `delay` before applying it.
    pub fn set_dispatch_delay(&self, delay: Option<Duration>) {
        *self.dispatch_delay.lock() = delay;
    }

    /// Write a cell directly, bypassing dispatch. Stands in for a concurrent editor.
    pub fn set_cell(&self, section_id: SectionId, row: u32, col: u32, value: impl Into<CellValue>) {
        if let Some(sheet) = self.book.lock().sheets.get_mut(&section_id) {
            sheet.set(row, col, value.into());
        }
    }

    pub fn cell(&self, section_id: SectionId, row: u32, col: u32) -> CellValue {
        self.book
            .lock()
            .sheets
            .get(&section_id)
            .map(|s| s.get(row, col))
            .unwrap_or_default()
    }

    pub fn values(&self, range: &GridRange) -> Vec<Vec<CellValue>> {
        self.book
            .lock()
            .sheets
            .get(&range.section_id)
            .map(|s| s.read(range))
            .unwrap_or_default()
    }

    pub fn document(&self) -> DocumentMetadata {
        self.book.lock().document()
    }

    pub fn permission_ids(&self) -> Vec<String> {
        self.book.lock().permissions.keys().cloned().collect()
    }

    /// Every batch that reached `batch_dispatch`, in order.
    pub fn calls(&self) -> Vec<Vec<ProviderRequest>> {
        self.calls.lock().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn metadata_fetches(&self) -> usize {
        self.metadata_fetches.load(AtomicOrdering::SeqCst)
    }

    pub fn document_fetches(&self) -> usize {
        self.document_fetches.load(AtomicOrdering::SeqCst)
    }

    pub fn section_fetches(&self) -> usize {
        self.section_fetches.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl SheetProvider for MemoryProvider {
    async fn batch_dispatch(
        &self,
        requests: &[ProviderRequest],
    ) -> Result<BatchReply, ProviderError> {
        let delay = *self.dispatch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(requests.to_vec());
        let fault = self.faults.lock().pop_front();

        let limit = match fault {
            Some(Fault::Throttle) => {
                return Err(ProviderError::throttled("rate limit exceeded for write requests"));
            }
            Some(Fault::Unavailable) => {
                return Err(ProviderError::new(
                    ProviderErrorKind::Unavailable,
                    "backend temporarily unavailable",
                )
                .with_applied(0));
            }
            Some(Fault::Reject(kind)) => {
                return Err(ProviderError::new(kind, format!("batch refused ({kind})")));
            }
            Some(Fault::FailAfter(n)) | Some(Fault::Opaque(n)) => Some(n.min(requests.len())),
            None => None,
        };

        let mut book = self.book.lock();
        let mut staged = book.clone();
        let mut replies = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().take(limit.unwrap_or(requests.len())).enumerate() {
            match staged.apply(request) {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    debug!(index, request = request.name(), error = %err, "batch rejected");
                    return Err(err.with_applied(0));
                }
            }
        }

        *book = staged;
        match fault {
            Some(Fault::FailAfter(_)) => {
                let applied = replies.len();
                Err(ProviderError::new(
                    ProviderErrorKind::Unavailable,
                    format!("connection reset after {applied} requests"),
                )
                .with_applied(applied)
                .with_replies(replies))
            }
            Some(Fault::Opaque(_)) => Err(ProviderError::new(
                ProviderErrorKind::Other,
                "backend returned an opaque failure",
            )),
            _ => Ok(BatchReply { replies }),
        }
    }

    async fn fetch_section(
        &self,
        section_id: SectionId,
        range: Option<&GridRange>,
    ) -> Result<SectionState, ProviderError> {
        self.section_fetches.fetch_add(1, AtomicOrdering::SeqCst);
        let book = self.book.lock();
        let Some(sheet) = book.sheets.get(&section_id) else {
            return Ok(SectionState::absent());
        };
        let mut state = SectionState::structure_only(sheet.properties.clone());
        if let Some(range) = range {
            let (rows, cols) = sheet.properties.extents();
            let clipped = range.clipped(rows, cols);
            state.covered = Some(clipped);
            state.windows.push(CellWindow {
                origin_row: clipped.start_row,
                origin_col: clipped.start_col,
                rows: sheet.read(&clipped),
            });
        }
        Ok(state)
    }

    async fn fetch_metadata(
        &self,
        section_id: SectionId,
    ) -> Result<SectionMetadata, ProviderError> {
        self.metadata_fetches.fetch_add(1, AtomicOrdering::SeqCst);
        let book = self.book.lock();
        let sheet = book.sheet(section_id)?;
        let header_row_index = sheet.header_row_index;
        let mut header_row: Vec<String> = (0..sheet.properties.column_count)
            .map(|c| sheet.get(header_row_index, c).to_string())
            .collect();
        while header_row.last().is_some_and(String::is_empty) {
            header_row.pop();
        }
        Ok(SectionMetadata {
            properties: sheet.properties.clone(),
            header_row_index,
            header_row,
        })
    }

    async fn fetch_document(&self) -> Result<DocumentMetadata, ProviderError> {
        self.document_fetches.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self.book.lock().document())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_index_matches_pre_move_destination() {
        // Move rows 1..3 to before row 5 in a 6-row band: 0 3 4 1 2 5.
        let order: Vec<u32> = (0..6).map(|i| moved_index(i, 1, 3, 5)).collect();
        assert_eq!(order, vec![0, 3, 4, 1, 2, 5]);
        // Move row 4 to the top.
        let order: Vec<u32> = (0..6).map(|i| moved_index(i, 4, 5, 0)).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 0, 5]);
    }

    #[tokio::test]
    async fn failed_request_leaves_workbook_untouched() {
        let provider =
            MemoryProvider::new("Book").with_section(SectionProperties::new(1, "Data", 0));
        let requests = vec![
            ProviderRequest::UpdateValues {
                section_id: SectionId(1),
                data: vec![crate::compiler::ValueRange {
                    range: GridRange::cell(1, 0, 0),
                    values: vec![vec![CellValue::from(7)]],
                }],
            },
            ProviderRequest::DeleteSheet {
                section_id: SectionId(9),
            },
        ];
        let err = provider.batch_dispatch(&requests).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
        assert_eq!(err.applied_requests, Some(0));
        assert_eq!(provider.cell(SectionId(1), 0, 0), CellValue::Empty);
    }
}
