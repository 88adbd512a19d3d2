use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Provider-assigned identifier of one section (tab/sheet) of a document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SectionId(pub u32);

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SectionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Canonical rectangle inside one section. Zero-based, end-exclusive on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct GridRange {
    pub section_id: SectionId,
    pub start_row: u32,
    pub end_row: u32,
    pub start_col: u32,
    pub end_col: u32,
}

impl GridRange {
    pub fn new(
        section_id: impl Into<SectionId>,
        start_row: u32,
        end_row: u32,
        start_col: u32,
        end_col: u32,
    ) -> Self {
        Self {
            section_id: section_id.into(),
            start_row,
            end_row,
            start_col,
            end_col,
        }
    }

    /// Single-cell range at a zero-based coordinate.
    pub fn cell(section_id: impl Into<SectionId>, row: u32, col: u32) -> Self {
        Self::new(section_id, row, row + 1, col, col + 1)
    }

    pub fn rows(&self) -> u32 {
        self.end_row.saturating_sub(self.start_row)
    }

    pub fn columns(&self) -> u32 {
        self.end_col.saturating_sub(self.start_col)
    }

    pub fn area(&self) -> u64 {
        u64::from(self.rows()) * u64::from(self.columns())
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0 || self.columns() == 0
    }

    pub fn contains_cell(&self, row: u32, col: u32) -> bool {
        row >= self.start_row && row < self.end_row && col >= self.start_col && col < self.end_col
    }

    pub fn contains(&self, other: &GridRange) -> bool {
        self.section_id == other.section_id
            && other.start_row >= self.start_row
            && other.end_row <= self.end_row
            && other.start_col >= self.start_col
            && other.end_col <= self.end_col
    }

    pub fn intersects(&self, other: &GridRange) -> bool {
        self.intersection(other).is_some()
    }

    pub fn intersection(&self, other: &GridRange) -> Option<GridRange> {
        if self.section_id != other.section_id {
            return None;
        }
        let range = GridRange {
            section_id: self.section_id,
            start_row: self.start_row.max(other.start_row),
            end_row: self.end_row.min(other.end_row),
            start_col: self.start_col.max(other.start_col),
            end_col: self.end_col.min(other.end_col),
        };
        if range.start_row < range.end_row && range.start_col < range.end_col {
            Some(range)
        } else {
            None
        }
    }

    /// Smallest rectangle covering both ranges (same section only).
    pub fn bounding(&self, other: &GridRange) -> Option<GridRange> {
        if self.section_id != other.section_id {
            return None;
        }
        Some(GridRange {
            section_id: self.section_id,
            start_row: self.start_row.min(other.start_row),
            end_row: self.end_row.max(other.end_row),
            start_col: self.start_col.min(other.start_col),
            end_col: self.end_col.max(other.end_col),
        })
    }

    /// Union of two ranges when that union is itself a rectangle: containment,
    /// or edge-adjacency/overlap along one axis with identical extent on the other.
    pub fn rectangular_union(&self, other: &GridRange) -> Option<GridRange> {
        if self.section_id != other.section_id {
            return None;
        }
        if self.contains(other) {
            return Some(*self);
        }
        if other.contains(self) {
            return Some(*other);
        }
        let same_cols = self.start_col == other.start_col && self.end_col == other.end_col;
        let same_rows = self.start_row == other.start_row && self.end_row == other.end_row;
        let rows_touch = self.start_row <= other.end_row && other.start_row <= self.end_row;
        let cols_touch = self.start_col <= other.end_col && other.start_col <= self.end_col;
        if (same_cols && rows_touch) || (same_rows && cols_touch) {
            return self.bounding(other);
        }
        None
    }

    /// Clip to a section of `rows` x `columns`.
    pub fn clipped(&self, rows: u32, columns: u32) -> GridRange {
        GridRange {
            section_id: self.section_id,
            start_row: self.start_row.min(rows),
            end_row: self.end_row.min(rows),
            start_col: self.start_col.min(columns),
            end_col: self.end_col.min(columns),
        }
    }

    /// A1 rendering of the rectangle without a sheet prefix, e.g. `B2:D10`.
    pub fn to_a1(&self) -> String {
        if self.is_empty() {
            return format!(
                "{}{}",
                column_letters(self.start_col),
                self.start_row + 1
            );
        }
        let start = format!("{}{}", column_letters(self.start_col), self.start_row + 1);
        if self.rows() == 1 && self.columns() == 1 {
            return start;
        }
        format!(
            "{start}:{}{}",
            column_letters(self.end_col - 1),
            self.end_row
        )
    }
}

impl fmt::Display for GridRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section {}!{}", self.section_id, self.to_a1())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Rows,
    Columns,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rows => "rows",
            Self::Columns => "columns",
        }
    }
}

/// Half-open band of rows or columns in one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DimensionSpan {
    pub section_id: SectionId,
    pub dimension: Dimension,
    pub start: u32,
    pub end: u32,
}

impl DimensionSpan {
    pub fn new(section_id: SectionId, dimension: Dimension, start: u32, end: u32) -> Self {
        Self {
            section_id,
            dimension,
            start,
            end,
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rectangle covered by the span given the extent of the other axis.
    pub fn as_grid(&self, cross_extent: u32) -> GridRange {
        match self.dimension {
            Dimension::Rows => GridRange::new(self.section_id, self.start, self.end, 0, cross_extent),
            Dimension::Columns => {
                GridRange::new(self.section_id, 0, cross_extent, self.start, self.end)
            }
        }
    }
}

/// Zero-based column index to letters (`0 -> A`, `26 -> AA`).
pub fn column_letters(index: u32) -> String {
    let mut n = index as u64 + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Letters to zero-based column index (`A -> 0`). Case-insensitive.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    Some(col - 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum A1Error {
    #[error("malformed A1 reference '{0}'")]
    Malformed(String),
    #[error("A1 reference '{0}' is open-ended and needs section extents")]
    NeedsExtents(String),
    #[error("A1 reference '{reference}' starts beyond the section's {extent} {dimension}")]
    OutsideExtents {
        reference: String,
        dimension: &'static str,
        extent: u32,
    },
}

/// One side of an A1 reference; either part may be absent for whole-row/column forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct A1Corner {
    col: Option<u32>,
    row: Option<u32>,
}

/// Parsed A1 reference with an optional sheet-title prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1Range {
    pub sheet: Option<String>,
    start: A1Corner,
    end: A1Corner,
    original: String,
}

static SHEET_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<sheet>'(?:[^']|'')+'|[^!']+)!)?(?P<body>[^!]+)$").expect("valid regex")
});

static CORNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$?(?P<col>[A-Za-z]{1,3})?\$?(?P<row>[0-9]{1,7})?$").expect("valid regex")
});

impl A1Range {
    pub fn parse(s: &str) -> Result<Self, A1Error> {
        let trimmed = s.trim();
        let malformed = || A1Error::Malformed(trimmed.to_string());
        let caps = SHEET_SPLIT.captures(trimmed).ok_or_else(malformed)?;

        let sheet = caps.name("sheet").map(|m| {
            let raw = m.as_str();
            if raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2 {
                raw[1..raw.len() - 1].replace("''", "'")
            } else {
                raw.to_string()
            }
        });
        let body = caps.name("body").ok_or_else(malformed)?.as_str();

        let mut parts = body.split(':');
        let first = parse_corner(parts.next().ok_or_else(malformed)?).ok_or_else(malformed)?;
        let second = match parts.next() {
            Some(part) => Some(parse_corner(part).ok_or_else(malformed)?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }

        let (start, end) = match second {
            None => {
                // A lone corner must be a full cell reference.
                if first.col.is_none() || first.row.is_none() {
                    return Err(malformed());
                }
                (first, first)
            }
            Some(second) => {
                let rows_only = first.col.is_none() && second.col.is_none();
                let cols_only = first.row.is_none() && second.row.is_none();
                if first.col.is_none() && !rows_only {
                    return Err(malformed());
                }
                if rows_only && (first.row.is_none() || second.row.is_none()) {
                    return Err(malformed());
                }
                if cols_only && (first.col.is_none() || second.col.is_none()) {
                    return Err(malformed());
                }
                (first, second)
            }
        };

        Ok(Self {
            sheet,
            start,
            end,
            original: trimmed.to_string(),
        })
    }

    /// True when some edge must come from the section's extents.
    pub fn is_open_ended(&self) -> bool {
        self.start.col.is_none()
            || self.start.row.is_none()
            || self.end.col.is_none()
            || self.end.row.is_none()
    }

    /// Resolve to a canonical range. `extents` is `(row_count, column_count)`.
    pub fn to_grid(
        &self,
        section_id: SectionId,
        extents: Option<(u32, u32)>,
    ) -> Result<GridRange, A1Error> {
        let needs = || A1Error::NeedsExtents(self.original.clone());
        let start_row = self.start.row.unwrap_or(0);
        let start_col = self.start.col.unwrap_or(0);
        let outside = |dimension, extent| A1Error::OutsideExtents {
            reference: self.original.clone(),
            dimension,
            extent,
        };
        let end_row = match self.end.row {
            Some(row) => row + 1,
            None => {
                let rows = extents.ok_or_else(needs)?.0;
                if start_row >= rows {
                    return Err(outside("rows", rows));
                }
                rows
            }
        };
        let end_col = match self.end.col {
            Some(col) => col + 1,
            None => {
                let columns = extents.ok_or_else(needs)?.1;
                if start_col >= columns {
                    return Err(outside("columns", columns));
                }
                columns
            }
        };

        // Corners may be written in either order (`B5:A1`).
        let (start_row, end_row) = if end_row <= start_row {
            (end_row.saturating_sub(1), start_row + 1)
        } else {
            (start_row, end_row)
        };
        let (start_col, end_col) = if end_col <= start_col {
            (end_col.saturating_sub(1), start_col + 1)
        } else {
            (start_col, end_col)
        };

        Ok(GridRange::new(section_id, start_row, end_row, start_col, end_col))
    }
}

fn parse_corner(s: &str) -> Option<A1Corner> {
    let caps = CORNER.captures(s.trim())?;
    let col = match caps.name("col") {
        Some(m) => Some(column_index(m.as_str())?),
        None => None,
    };
    let row = match caps.name("row") {
        Some(m) => {
            let row: u32 = m.as_str().parse().ok()?;
            if row == 0 {
                return None;
            }
            Some(row - 1)
        }
        None => None,
    };
    if col.is_none() && row.is_none() {
        return None;
    }
    Some(A1Corner { col, row })
}

/// Row-major ordering of zero-based coordinates.
pub fn row_major(a: (u32, u32), b: (u32, u32)) -> Ordering {
    match a.0.cmp(&b.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        ord => ord,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_roundtrip_edges() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_index("aa"), Some(26));
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_parse_cell_and_range() {
        let r = A1Range::parse("B2:D4").unwrap();
        assert_eq!(
            r.to_grid(SectionId(7), None).unwrap(),
            GridRange::new(7, 1, 4, 1, 4)
        );

        let r = A1Range::parse("'Q1 ''Plan'''!$C$3").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Q1 'Plan'"));
        assert_eq!(
            r.to_grid(SectionId(1), None).unwrap(),
            GridRange::cell(1, 2, 2)
        );
    }

    #[test]
    fn test_open_ended_needs_extents() {
        let cols = A1Range::parse("Data!A:C").unwrap();
        assert!(cols.is_open_ended());
        assert!(matches!(
            cols.to_grid(SectionId(0), None),
            Err(A1Error::NeedsExtents(_))
        ));
        assert_eq!(
            cols.to_grid(SectionId(0), Some((100, 26))).unwrap(),
            GridRange::new(0, 0, 100, 0, 3)
        );

        let rows = A1Range::parse("2:5").unwrap();
        assert_eq!(
            rows.to_grid(SectionId(0), Some((100, 26))).unwrap(),
            GridRange::new(0, 1, 5, 0, 26)
        );
    }

    #[test]
    fn test_open_end_before_start_is_outside() {
        let tail = A1Range::parse("A2000:B").unwrap();
        assert!(matches!(
            tail.to_grid(SectionId(0), Some((1000, 26))),
            Err(A1Error::OutsideExtents {
                dimension: "rows",
                extent: 1000,
                ..
            })
        ));
        assert_eq!(
            tail.to_grid(SectionId(0), Some((3000, 26))).unwrap(),
            GridRange::new(0, 1999, 3000, 0, 2)
        );

        let wide = A1Range::parse("AB2:3").unwrap();
        assert!(matches!(
            wide.to_grid(SectionId(0), Some((100, 26))),
            Err(A1Error::OutsideExtents {
                dimension: "columns",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(A1Range::parse("A").is_err());
        assert!(A1Range::parse("A0").is_err());
        assert!(A1Range::parse("A1:B2:C3").is_err());
        assert!(A1Range::parse("1:B").is_err());
    }

    #[test]
    fn test_rectangular_union() {
        let a = GridRange::new(0, 0, 2, 0, 3);
        let b = GridRange::new(0, 2, 4, 0, 3);
        assert_eq!(a.rectangular_union(&b), Some(GridRange::new(0, 0, 4, 0, 3)));
        let c = GridRange::new(0, 2, 4, 1, 3);
        assert_eq!(a.rectangular_union(&c), None);
        let other_section = GridRange::new(1, 0, 2, 0, 3);
        assert_eq!(a.rectangular_union(&other_section), None);
    }

    #[test]
    fn test_to_a1() {
        assert_eq!(GridRange::new(0, 1, 4, 1, 4).to_a1(), "B2:D4");
        assert_eq!(GridRange::cell(0, 0, 0).to_a1(), "A1");
    }
}
