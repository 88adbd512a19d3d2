#![allow(dead_code)]
use sheetops::model::{CellValue, GridRange, NamedRange, SectionId};
use sheetops::provider::{SectionFixture, WorkbookFixture};

pub fn t(s: &str) -> CellValue {
    CellValue::text(s)
}

pub fn n(x: f64) -> CellValue {
    CellValue::Number(x)
}

pub fn row<const N: usize>(cells: [CellValue; N]) -> Vec<CellValue> {
    cells.to_vec()
}

pub struct WorkbookBuilder {
    fixture: WorkbookFixture,
}

impl WorkbookBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            fixture: WorkbookFixture {
                title: title.to_string(),
                ..WorkbookFixture::default()
            },
        }
    }

    pub fn section(mut self, section: SectionBuilder) -> Self {
        self.fixture.sections.push(section.fixture);
        self
    }

    pub fn named(mut self, name: &str, range: GridRange) -> Self {
        self.fixture.named_ranges.push(NamedRange {
            name: name.to_string(),
            range,
        });
        self
    }

    pub fn build(self) -> WorkbookFixture {
        self.fixture
    }
}

pub struct SectionBuilder {
    fixture: SectionFixture,
}

impl SectionBuilder {
    pub fn new(section_id: SectionId, title: &str) -> Self {
        Self {
            fixture: SectionFixture {
                section_id,
                title: title.to_string(),
                row_count: None,
                column_count: None,
                hidden: false,
                header_row_index: 0,
                values: Vec::new(),
            },
        }
    }

    pub fn extents(mut self, rows: u32, columns: u32) -> Self {
        self.fixture.row_count = Some(rows);
        self.fixture.column_count = Some(columns);
        self
    }

    /// Header row at row 0 followed by `rows`.
    pub fn table(mut self, headers: &[&str], rows: &[Vec<CellValue>]) -> Self {
        self.fixture.header_row_index = 0;
        self.fixture.values = std::iter::once(headers.iter().map(|h| t(h)).collect())
            .chain(rows.iter().cloned())
            .collect();
        self
    }

    pub fn values(mut self, values: Vec<Vec<CellValue>>) -> Self {
        self.fixture.values = values;
        self
    }
}
