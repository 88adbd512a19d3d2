use crate::model::{GridRange, SectionId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size of the change a batch makes. Overlapping rectangles count once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchEstimate {
    pub cells: u64,
    pub rows: u64,
    pub columns: u64,
    pub sections: usize,
    /// Largest single row deletion in the batch.
    pub max_deleted_rows: u32,
    pub max_deleted_columns: u32,
}

impl BatchEstimate {
    pub(crate) fn measure<'a>(
        footprints: impl IntoIterator<Item = &'a GridRange>,
        max_deleted_rows: u32,
        max_deleted_columns: u32,
    ) -> Self {
        let mut by_section: BTreeMap<SectionId, Vec<GridRange>> = BTreeMap::new();
        for range in footprints.into_iter().filter(|r| !r.is_empty()) {
            by_section.entry(range.section_id).or_default().push(*range);
        }

        let mut estimate = Self {
            sections: by_section.len(),
            max_deleted_rows,
            max_deleted_columns,
            ..Self::default()
        };
        for ranges in by_section.values() {
            estimate.cells += union_area(ranges);
            estimate.rows += interval_union(ranges.iter().map(|r| (r.start_row, r.end_row)));
            estimate.columns += interval_union(ranges.iter().map(|r| (r.start_col, r.end_col)));
        }
        estimate
    }
}

/// Total length covered by half-open intervals.
fn interval_union(intervals: impl Iterator<Item = (u32, u32)>) -> u64 {
    let mut intervals: Vec<_> = intervals.filter(|(s, e)| s < e).collect();
    intervals.sort_unstable();
    let mut total = 0u64;
    let mut current: Option<(u32, u32)> = None;
    for (start, end) in intervals {
        current = match current {
            Some((s, e)) if start <= e => Some((s, e.max(end))),
            Some((s, e)) => {
                total += u64::from(e - s);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some((s, e)) = current {
        total += u64::from(e - s);
    }
    total
}

/// Area of the union of rectangles in one section, by sweeping row slabs
/// between consecutive row boundaries.
fn union_area(ranges: &[GridRange]) -> u64 {
    let mut bounds: Vec<u32> = ranges
        .iter()
        .flat_map(|r| [r.start_row, r.end_row])
        .collect();
    bounds.sort_unstable();
    bounds.dedup();

    bounds
        .windows(2)
        .map(|slab| {
            let (top, bottom) = (slab[0], slab[1]);
            let width = interval_union(
                ranges
                    .iter()
                    .filter(|r| r.start_row <= top && r.end_row >= bottom)
                    .map(|r| (r.start_col, r.end_col)),
            );
            width * u64::from(bottom - top)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_rectangles_count_once() {
        let ranges = [GridRange::new(1, 0, 10, 0, 10), GridRange::new(1, 5, 15, 5, 15)];
        let estimate = BatchEstimate::measure(&ranges, 0, 0);
        assert_eq!(estimate.cells, 100 + 100 - 25);
        assert_eq!(estimate.rows, 15);
        assert_eq!(estimate.columns, 15);
        assert_eq!(estimate.sections, 1);
    }

    #[test]
    fn sections_never_overlap_each_other() {
        let ranges = [GridRange::new(1, 0, 2, 0, 2), GridRange::new(2, 0, 2, 0, 2)];
        let estimate = BatchEstimate::measure(&ranges, 0, 0);
        assert_eq!(estimate.cells, 8);
        assert_eq!(estimate.sections, 2);
    }

    #[test]
    fn disjoint_intervals_sum() {
        assert_eq!(interval_union([(0, 2), (4, 6), (5, 9)].into_iter()), 7);
    }
}
