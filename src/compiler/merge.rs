use super::request::ProviderRequest;
use tracing::debug;

/// Append `request`, folding it into an earlier compatible request when every
/// request in between commutes with it. Returns the index that now carries it.
pub(crate) fn push_merged(requests: &mut Vec<ProviderRequest>, request: ProviderRequest) -> usize {
    for index in (0..requests.len()).rev() {
        if absorb(&mut requests[index], &request) {
            debug!(request = request.name(), into = index, "merged request");
            return index;
        }
        if !requests[index].commutes_with(&request) {
            break;
        }
    }
    requests.push(request);
    requests.len() - 1
}

/// Fold `later` into `earlier` when the provider accepts the pair as one call.
fn absorb(earlier: &mut ProviderRequest, later: &ProviderRequest) -> bool {
    use ProviderRequest as R;
    match (earlier, later) {
        (
            R::UpdateValues { section_id, data },
            R::UpdateValues {
                section_id: other,
                data: more,
            },
        ) if section_id == other => {
            data.extend(more.iter().cloned());
            true
        }
        (
            R::RepeatCell {
                range,
                cell,
                fields,
            },
            R::RepeatCell {
                range: other,
                cell: patch,
                ..
            },
        ) if range == other => {
            cell.overlay(patch);
            *fields = cell.field_mask();
            true
        }
        (
            R::UpdateBorders { range, borders },
            R::UpdateBorders {
                range: other,
                borders: patch,
            },
        ) if range == other => {
            borders.overlay(patch);
            true
        }
        (
            R::UpdateDimensionProperties { span, properties },
            R::UpdateDimensionProperties {
                span: other,
                properties: patch,
            },
        ) if span == other => {
            properties.overlay(patch);
            true
        }
        (
            R::UpdateSheetProperties {
                section_id,
                properties,
            },
            R::UpdateSheetProperties {
                section_id: other,
                properties: patch,
            },
        ) if section_id == other => {
            properties.overlay(patch);
            true
        }
        (
            R::UpdateSpreadsheetProperties { properties },
            R::UpdateSpreadsheetProperties { properties: patch },
        ) => {
            properties.overlay(patch);
            true
        }
        (
            R::AppendCells { section_id, rows },
            R::AppendCells {
                section_id: other,
                rows: more,
            },
        ) if section_id == other => {
            rows.extend(more.iter().cloned());
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::request::{CellPatch, ValueRange};
    use crate::model::{Color, Dimension, DimensionSpan, GridRange, SectionId};

    fn values(range: GridRange) -> ProviderRequest {
        ProviderRequest::UpdateValues {
            section_id: range.section_id,
            data: vec![ValueRange {
                range,
                values: vec![vec!["x".into()]],
            }],
        }
    }

    #[test]
    fn same_section_value_writes_fold_together() {
        let mut requests = Vec::new();
        assert_eq!(push_merged(&mut requests, values(GridRange::cell(1, 0, 0))), 0);
        assert_eq!(push_merged(&mut requests, values(GridRange::cell(1, 5, 5))), 0);
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ProviderRequest::UpdateValues { data, .. } => assert_eq!(data.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn barrier_stops_the_backward_scan() {
        let mut requests = Vec::new();
        push_merged(&mut requests, values(GridRange::cell(1, 0, 0)));
        push_merged(
            &mut requests,
            ProviderRequest::InsertDimension {
                span: DimensionSpan::new(SectionId(1), Dimension::Rows, 0, 1),
                inherit_from_before: false,
            },
        );
        assert_eq!(push_merged(&mut requests, values(GridRange::cell(1, 0, 0))), 2);
        assert_eq!(requests.len(), 3);
    }

    #[test]
    fn same_range_patches_union_their_fields() {
        let range = GridRange::new(1, 0, 2, 0, 2);
        let mut requests = Vec::new();
        push_merged(
            &mut requests,
            ProviderRequest::repeat_cell(
                range,
                CellPatch {
                    bold: Some(true),
                    ..CellPatch::default()
                },
            ),
        );
        push_merged(
            &mut requests,
            ProviderRequest::repeat_cell(
                range,
                CellPatch {
                    background_color: Some(Color::rgb(1.0, 0.0, 0.0)),
                    ..CellPatch::default()
                },
            ),
        );
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ProviderRequest::RepeatCell { fields, .. } => assert_eq!(
                fields,
                "userEnteredFormat.backgroundColor,userEnteredFormat.textFormat.bold"
            ),
            other => panic!("unexpected {other:?}"),
        }
    }
}
