//! Data module - sales sheet loading and series reshaping

mod loader;
mod series;

pub use loader::{DataLoader, InputFormat, LoadError, SalesRow, SalesTable};
pub use series::{CategorySeries, SeriesBuilder, SeriesPoint};
