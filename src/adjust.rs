//! Adjustment Module
//! Manual growth and seasonality scaling on top of a base forecast.

use crate::data::SalesTable;
use crate::forecast::CategoryForecast;
use crate::stats::StatsCalculator;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Slider bounds the interactive shell offers. `adjust` itself accepts any value.
pub const UI_GROWTH_RANGE: RangeInclusive<f64> = -50.0..=100.0;
pub const UI_SEASONALITY_RANGE: RangeInclusive<f64> = 0.5..=2.0;

/// How a category's projection is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    /// Model output as is.
    #[default]
    Automatic,
    /// Adjustments applied to last observed actuals, no model.
    Manual,
    /// Adjustments applied to the model output.
    Hybrid,
}

impl fmt::Display for ForecastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForecastMode::Automatic => "automatic",
            ForecastMode::Manual => "manual",
            ForecastMode::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

impl FromStr for ForecastMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "automatic" | "auto" | "ml" => Ok(ForecastMode::Automatic),
            "manual" => Ok(ForecastMode::Manual),
            "hybrid" => Ok(ForecastMode::Hybrid),
            other => Err(format!(
                "unknown mode '{}', expected automatic, manual or hybrid",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdjustmentParams {
    pub growth_rate_pct: f64,
    pub seasonality_multiplier: f64,
}

impl Default for AdjustmentParams {
    fn default() -> Self {
        Self {
            growth_rate_pct: 0.0,
            seasonality_multiplier: 1.0,
        }
    }
}

impl AdjustmentParams {
    pub fn new(growth_rate_pct: f64, seasonality_multiplier: f64) -> Self {
        Self {
            growth_rate_pct,
            seasonality_multiplier,
        }
    }

    /// Combined scale `(1 + growth/100) * seasonality`.
    pub fn factor(&self) -> f64 {
        (1.0 + self.growth_rate_pct / 100.0) * self.seasonality_multiplier
    }

    /// Whether both values sit inside the shell's slider ranges.
    pub fn within_ui_bounds(&self) -> bool {
        UI_GROWTH_RANGE.contains(&self.growth_rate_pct)
            && UI_SEASONALITY_RANGE.contains(&self.seasonality_multiplier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdjustedRow {
    pub month: u32,
    pub base: f64,
    pub adjusted: f64,
}

impl AdjustedRow {
    /// Change relative to the base value, 0 when the base is 0.
    pub fn difference_pct(&self) -> f64 {
        StatsCalculator::growth_pct(self.base, self.adjusted)
    }
}

/// Point estimates after manual scaling. Interval bounds are not carried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustedForecast {
    pub category: String,
    pub target_year: i32,
    pub params: AdjustmentParams,
    pub rows: Vec<AdjustedRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdjustmentSummary {
    pub base_total: f64,
    pub adjusted_total: f64,
    pub difference: f64,
    pub difference_pct: f64,
}

impl AdjustedForecast {
    pub fn adjusted_total(&self) -> f64 {
        self.rows.iter().map(|r| r.adjusted).sum()
    }

    pub fn base_total(&self) -> f64 {
        self.rows.iter().map(|r| r.base).sum()
    }

    pub fn summary(&self) -> AdjustmentSummary {
        let base_total = self.base_total();
        let adjusted_total = self.adjusted_total();
        AdjustmentSummary {
            base_total,
            adjusted_total,
            difference: adjusted_total - base_total,
            difference_pct: StatsCalculator::growth_pct(base_total, adjusted_total),
        }
    }
}

/// Scale every point estimate by `(1 + growth/100) * seasonality`.
///
/// Values are not clamped to the slider ranges. The base forecast is untouched.
pub fn adjust(forecast: &CategoryForecast, params: AdjustmentParams) -> AdjustedForecast {
    scale(
        &forecast.category,
        forecast.target_year,
        forecast.rows.iter().map(|r| (r.month, r.forecast)),
        params,
    )
}

/// Manual-mode plan: per calendar month the most recent actual (year B,
/// else year A), scaled like [`adjust`]. Months with no actuals are absent.
pub fn manual_plan(
    table: &SalesTable,
    category: &str,
    target_year: i32,
    params: AdjustmentParams,
) -> AdjustedForecast {
    let mut baseline: BTreeMap<u32, f64> = BTreeMap::new();
    for row in table.rows_for(category) {
        if let Some(value) = row.sales_b.or(row.sales_a) {
            baseline.insert(row.month, value);
        }
    }
    scale(category, target_year, baseline.into_iter(), params)
}

fn scale(
    category: &str,
    target_year: i32,
    base: impl Iterator<Item = (u32, f64)>,
    params: AdjustmentParams,
) -> AdjustedForecast {
    let factor = params.factor();
    AdjustedForecast {
        category: category.to_string(),
        target_year,
        params,
        rows: base
            .map(|(month, base)| AdjustedRow {
                month,
                base,
                adjusted: base * factor,
            })
            .collect(),
    }
}
