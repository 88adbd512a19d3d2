#![allow(dead_code)]

pub mod builders;

use std::sync::Arc;

use builders::{n, row, t};

use sheetops::model::{CellValue, GridRange, SectionId};
use sheetops::provider::{MemoryProvider, WorkbookFixture};
use sheetops::{Intent, Orchestrator, OrchestratorConfig, RangeRef};

pub const SALES: SectionId = SectionId(1);
pub const NOTES: SectionId = SectionId(2);

/// Two-section workbook: a small sales table with a header row, and an
/// empty notes sheet.
pub fn sales_fixture() -> WorkbookFixture {
    builders::WorkbookBuilder::new("Quarterly")
        .section(
            builders::SectionBuilder::new(SALES, "Sales")
                .extents(100, 6)
                .table(
                    &["Region", "Amount", "Unit Price", "Qty"],
                    &[
                        row([t("North"), n(120.0), n(4.5), n(10.0)]),
                        row([t("South"), n(80.0), n(3.25), n(7.0)]),
                        row([t("East"), n(45.0), n(9.0), n(2.0)]),
                    ],
                ),
        )
        .section(builders::SectionBuilder::new(NOTES, "Notes").extents(50, 10))
        .named("sales_amounts", GridRange::new(SALES, 1, 4, 1, 2))
        .build()
}

pub fn sales_book() -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::from_fixture(sales_fixture()))
}

pub fn orchestrator(provider: &Arc<MemoryProvider>) -> Orchestrator {
    orchestrator_with(provider, |_| {})
}

pub fn orchestrator_with<F>(provider: &Arc<MemoryProvider>, f: F) -> Orchestrator
where
    F: FnOnce(&mut OrchestratorConfig),
{
    let mut config = OrchestratorConfig::default();
    f(&mut config);
    Orchestrator::new(provider.clone(), &config)
}

pub fn a1(section_id: SectionId, notation: &str) -> RangeRef {
    RangeRef::a1(section_id, notation)
}

pub fn set_values(section_id: SectionId, notation: &str, values: Vec<Vec<CellValue>>) -> Intent {
    Intent::SetValues {
        range: a1(section_id, notation),
        values,
    }
}

/// `rows` x `cols` block of distinct numbers.
pub fn numbered_block(rows: u32, cols: u32) -> Vec<Vec<CellValue>> {
    (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| CellValue::Number(f64::from(r * cols + c)))
                .collect()
        })
        .collect()
}
