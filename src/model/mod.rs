pub mod grid;
pub mod section;
pub mod value;

pub use grid::{
    A1Error, A1Range, Dimension, DimensionSpan, GridRange, SectionId, column_index,
    column_letters,
};
pub use section::{
    CellWindow, DocumentMetadata, NamedRange, SectionMetadata, SectionProperties, SectionState,
};
pub use value::{CellValue, Color};
