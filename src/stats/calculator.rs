//! Forecast Statistics Module
//! Totals, annualization, growth percentages and category rankings.

use crate::config::AnnualizationPolicy;
use crate::data::{SalesRow, SalesTable};
use crate::forecast::{CategoryForecast, ForecastBatch};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Forecast totals for one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub total: f64,
    pub avg_monthly: f64,
    pub lower_total: f64,
    pub upper_total: f64,
}

/// Actuals against the projection for one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRecord {
    pub category: String,
    pub actual_a: f64,
    pub observed_b: f64,
    pub observed_b_months: usize,
    pub annualized_b: f64,
    pub projected: f64,
    /// Year A actual to annualized year B.
    pub growth_a_to_b_pct: f64,
    /// Annualized year B to the projected year.
    pub growth_b_to_projected_pct: f64,
}

/// Headline figures across all categories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioOverview {
    pub actual_a: f64,
    pub annualized_b: f64,
    pub projected: f64,
    pub growth_b_to_projected_pct: f64,
}

/// Sums of the observed sales in a set of rows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActualTotals {
    pub total_a: f64,
    pub total_b: f64,
    pub months_b: usize,
}

/// Handles cross-category aggregation and comparison.
pub struct StatsCalculator;

impl StatsCalculator {
    /// `(new - old) / old * 100`, or 0 when `old` is 0.
    ///
    /// The 0 is a convention, not a measurement of "no growth".
    pub fn growth_pct(old: f64, new: f64) -> f64 {
        if old == 0.0 {
            return 0.0;
        }
        let pct = (new - old) / old * 100.0;
        if pct.is_finite() {
            pct
        } else {
            0.0
        }
    }

    /// Extend a partial-year total to twelve months by linear scaling.
    pub fn annualize(total: f64, observed_months: usize, policy: AnnualizationPolicy) -> f64 {
        let months = match policy {
            AnnualizationPolicy::ObservedMonths => observed_months,
            AnnualizationPolicy::FixedMonths(n) => n as usize,
        };
        if months == 0 {
            return 0.0;
        }
        total * 12.0 / months as f64
    }

    /// Year totals and the number of distinct year-B months carrying a value.
    pub fn actual_totals(rows: &[SalesRow]) -> ActualTotals {
        let total_a = rows.iter().filter_map(|r| r.sales_a).sum();
        let total_b = rows.iter().filter_map(|r| r.sales_b).sum();
        let months_b = rows
            .iter()
            .filter(|r| r.sales_b.is_some())
            .map(|r| r.month)
            .collect::<HashSet<_>>()
            .len();
        ActualTotals {
            total_a,
            total_b,
            months_b,
        }
    }

    pub fn summarize_one(forecast: &CategoryForecast) -> CategorySummary {
        CategorySummary {
            category: forecast.category.clone(),
            total: forecast.total(),
            avg_monthly: forecast.avg_monthly(),
            lower_total: forecast.lower_total(),
            upper_total: forecast.upper_total(),
        }
    }

    /// Summary per forecast category, largest projected total first.
    pub fn summarize(batch: &ForecastBatch) -> Vec<CategorySummary> {
        let mut summary: Vec<CategorySummary> =
            batch.forecasts.iter().map(Self::summarize_one).collect();
        summary.sort_by(|a, b| descending(a.total, b.total));
        summary
    }

    /// Compare actuals with projections for every forecast category.
    ///
    /// Skipped categories are absent. Sorted by projected total, largest
    /// first; ties keep the dataset's category order.
    pub fn compare(
        table: &SalesTable,
        batch: &ForecastBatch,
        policy: AnnualizationPolicy,
    ) -> Vec<ComparisonRecord> {
        let mut records: Vec<ComparisonRecord> = batch
            .forecasts
            .par_iter()
            .map(|forecast| {
                let actuals = Self::actual_totals(&table.rows_for(&forecast.category));
                Self::comparison_record(forecast, actuals, policy)
            })
            .collect();
        records.sort_by(|a, b| descending(a.projected, b.projected));
        records
    }

    pub fn comparison_record(
        forecast: &CategoryForecast,
        actuals: ActualTotals,
        policy: AnnualizationPolicy,
    ) -> ComparisonRecord {
        let annualized_b = Self::annualize(actuals.total_b, actuals.months_b, policy);
        let projected = forecast.total();
        ComparisonRecord {
            category: forecast.category.clone(),
            actual_a: actuals.total_a,
            observed_b: actuals.total_b,
            observed_b_months: actuals.months_b,
            annualized_b,
            projected,
            growth_a_to_b_pct: Self::growth_pct(actuals.total_a, annualized_b),
            growth_b_to_projected_pct: Self::growth_pct(annualized_b, projected),
        }
    }

    /// All-category totals: year A, annualized year B and the projection.
    pub fn overview(
        table: &SalesTable,
        batch: &ForecastBatch,
        policy: AnnualizationPolicy,
    ) -> PortfolioOverview {
        let actuals = Self::actual_totals(&table.rows());
        let annualized_b = Self::annualize(actuals.total_b, actuals.months_b, policy);
        let projected: f64 = batch.forecasts.iter().map(|f| f.total()).sum();
        PortfolioOverview {
            actual_a: actuals.total_a,
            annualized_b,
            projected,
            growth_b_to_projected_pct: Self::growth_pct(annualized_b, projected),
        }
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
