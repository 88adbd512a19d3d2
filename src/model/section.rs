use super::grid::{GridRange, SectionId};
use super::value::CellValue;
use crate::diff::hash::{DigestWriter, hex_digest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;

/// Structural properties of one section. No cell content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SectionProperties {
    pub section_id: SectionId,
    pub title: String,
    pub index: u32,
    pub row_count: u32,
    pub column_count: u32,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub frozen_rows: u32,
    #[serde(default)]
    pub frozen_columns: u32,
}

impl SectionProperties {
    pub fn new(section_id: impl Into<SectionId>, title: impl Into<String>, index: u32) -> Self {
        Self {
            section_id: section_id.into(),
            title: title.into(),
            index,
            row_count: 1000,
            column_count: 26,
            hidden: false,
            frozen_rows: 0,
            frozen_columns: 0,
        }
    }

    pub fn with_extents(mut self, rows: u32, columns: u32) -> Self {
        self.row_count = rows;
        self.column_count = columns;
        self
    }

    pub fn extents(&self) -> (u32, u32) {
        (self.row_count, self.column_count)
    }

    pub fn full_range(&self) -> GridRange {
        GridRange::new(self.section_id, 0, self.row_count, 0, self.column_count)
    }

    /// Checksum over the structural fields only.
    pub fn structural_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        let mut writer = DigestWriter(&mut hasher);
        // Writing into a digest cannot fail.
        let _ = write!(
            writer,
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.section_id,
            self.title,
            self.index,
            self.row_count,
            self.column_count,
            self.hidden,
            self.frozen_rows,
            self.frozen_columns
        );
        hex_digest(hasher)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NamedRange {
    pub name: String,
    pub range: GridRange,
}

/// Per-section metadata as returned by the provider's metadata fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SectionMetadata {
    pub properties: SectionProperties,
    /// Zero-based row holding column headers.
    #[serde(default)]
    pub header_row_index: u32,
    /// Display text of the header row, one entry per column.
    #[serde(default)]
    pub header_row: Vec<String>,
}

/// Document-wide structural listing: every section's properties plus named ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentMetadata {
    pub title: String,
    #[serde(default)]
    pub locale: Option<String>,
    pub sections: Vec<SectionProperties>,
    #[serde(default)]
    pub named_ranges: Vec<NamedRange>,
}

impl DocumentMetadata {
    pub fn section(&self, id: SectionId) -> Option<&SectionProperties> {
        self.sections.iter().find(|s| s.section_id == id)
    }
}

/// A dense rectangle of fetched values. `rows[r][c]` is the cell at
/// `(origin_row + r, origin_col + c)`; short rows are padded with empties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CellWindow {
    pub origin_row: u32,
    pub origin_col: u32,
    pub rows: Vec<Vec<CellValue>>,
}

impl CellWindow {
    pub fn value_at(&self, row: u32, col: u32) -> Option<&CellValue> {
        let r = row.checked_sub(self.origin_row)? as usize;
        let c = col.checked_sub(self.origin_col)? as usize;
        self.rows.get(r)?.get(c)
    }

    pub fn height(&self) -> u32 {
        self.rows.len() as u32
    }

    pub fn width(&self) -> u32 {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0) as u32
    }
}

/// Fetched state of a section: structure plus zero or more value windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SectionState {
    /// `None` when the section does not exist (deleted, or not yet created).
    pub properties: Option<SectionProperties>,
    /// The rectangle the windows were fetched for, if any.
    #[serde(default)]
    pub covered: Option<GridRange>,
    #[serde(default)]
    pub windows: Vec<CellWindow>,
}

impl SectionState {
    pub fn absent() -> Self {
        Self {
            properties: None,
            covered: None,
            windows: Vec::new(),
        }
    }

    pub fn structure_only(properties: SectionProperties) -> Self {
        Self {
            properties: Some(properties),
            covered: None,
            windows: Vec::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.properties.is_some()
    }

    /// Value at a coordinate; cells outside every window read as empty.
    pub fn value_at(&self, row: u32, col: u32) -> CellValue {
        self.windows
            .iter()
            .rev()
            .find_map(|w| w.value_at(row, col))
            .cloned()
            .unwrap_or_default()
    }

    /// Combine windows from another fetch of the same section.
    pub fn merged_with(mut self, other: SectionState) -> SectionState {
        if self.properties.is_none() {
            self.properties = other.properties;
        }
        self.covered = match (self.covered, other.covered) {
            (Some(a), Some(b)) => a.bounding(&b).or(Some(a)),
            (a, b) => a.or(b),
        };
        self.windows.extend(other.windows);
        self
    }

    /// Row-major checksum of `range`'s content, empties included, so that the
    /// result depends only on what is inside the rectangle.
    pub fn content_checksum(&self, range: &GridRange) -> String {
        let mut hasher = Sha256::new();
        hasher.update(range.rows().to_le_bytes());
        hasher.update(range.columns().to_le_bytes());
        let mut buf = Vec::with_capacity(32);
        for row in range.start_row..range.end_row {
            for col in range.start_col..range.end_col {
                buf.clear();
                self.value_at(row, col).canonical_bytes(&mut buf);
                hasher.update(&buf);
            }
        }
        hex_digest(hasher)
    }

    /// Extract a dense grid of values for `range`.
    pub fn values_in(&self, range: &GridRange) -> Vec<Vec<CellValue>> {
        (range.start_row..range.end_row)
            .map(|row| {
                (range.start_col..range.end_col)
                    .map(|col| self.value_at(row, col))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(rows: Vec<Vec<CellValue>>) -> SectionState {
        SectionState {
            properties: Some(SectionProperties::new(1, "Data", 0)),
            covered: None,
            windows: vec![CellWindow {
                origin_row: 0,
                origin_col: 0,
                rows,
            }],
        }
    }

    #[test]
    fn checksum_ignores_cells_outside_range() {
        let a = state_with(vec![vec![1.into(), 2.into()], vec![3.into(), 4.into()]]);
        let b = state_with(vec![vec![1.into(), 99.into()], vec![3.into(), 4.into()]]);
        let left_column = GridRange::new(1, 0, 2, 0, 1);
        assert_eq!(a.content_checksum(&left_column), b.content_checksum(&left_column));
        let whole = GridRange::new(1, 0, 2, 0, 2);
        assert_ne!(a.content_checksum(&whole), b.content_checksum(&whole));
    }

    #[test]
    fn structural_checksum_tracks_extents() {
        let a = SectionProperties::new(1, "Data", 0);
        let b = a.clone().with_extents(1001, 26);
        assert_ne!(a.structural_checksum(), b.structural_checksum());
    }
}
