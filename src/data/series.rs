//! Series Builder Module
//! Reshapes a category's two year columns into one chronological long-format series.

use super::loader::{SalesRow, SalesTable};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// One observed month: first-of-month date and the sales amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl SeriesPoint {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }
}

/// Long-format history of one category, ascending by date.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySeries {
    pub category: String,
    pub points: Vec<SeriesPoint>,
}

impl CategorySeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }
}

/// Handles the wide-to-long stack operation.
pub struct SeriesBuilder;

impl SeriesBuilder {
    /// Build the series for one category.
    ///
    /// Each year column is stacked independently; rows with no value for a
    /// year contribute nothing for that year. Missing months are left as gaps.
    /// An unknown category gives an empty series.
    pub fn build(table: &SalesTable, category: &str) -> CategorySeries {
        let rows = table.rows_for(category);

        let mut points = Self::stack_year(&rows, table.year_a(), |r| r.sales_a);
        points.extend(Self::stack_year(&rows, table.year_b(), |r| r.sales_b));
        points.sort_by_key(|p| p.date);

        CategorySeries {
            category: category.to_string(),
            points,
        }
    }

    /// Series for every category, in first-appearance order.
    pub fn build_all(table: &SalesTable) -> Vec<CategorySeries> {
        table
            .categories()
            .iter()
            .map(|category| Self::build(table, category))
            .collect()
    }

    fn stack_year(
        rows: &[SalesRow],
        year: i32,
        value_of: impl Fn(&SalesRow) -> Option<f64>,
    ) -> Vec<SeriesPoint> {
        rows.iter()
            .filter_map(|row| {
                let value = value_of(row)?;
                let date = NaiveDate::from_ymd_opt(year, row.month, 1)?;
                Some(SeriesPoint { date, value })
            })
            .collect()
    }
}
