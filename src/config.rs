//! Configuration Module
//! Spreadsheet layout, forecasting settings and annualization policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Where the fields of a sales sheet live.
///
/// Defaults match the known export: two metadata rows, month in column 0,
/// category in column 1, first sales year in column 4, second in column 13.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub header_rows: usize,
    pub month_column: usize,
    pub category_column: usize,
    pub year_a_column: usize,
    pub year_b_column: usize,
    pub year_a: i32,
    pub year_b: i32,
    /// Worksheet to read from workbooks; first sheet when unset.
    pub sheet: Option<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            header_rows: 2,
            month_column: 0,
            category_column: 1,
            year_a_column: 4,
            year_b_column: 13,
            year_a: 2024,
            year_b: 2025,
            sheet: None,
        }
    }
}

impl LayoutConfig {
    /// Minimum number of columns a data row block must span.
    pub fn required_columns(&self) -> usize {
        [
            self.month_column,
            self.category_column,
            self.year_a_column,
            self.year_b_column,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// How the yearly pattern combines with the trend.
///
/// Multiplicative decomposes the log of strictly positive series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalityMode {
    Additive,
    #[default]
    Multiplicative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub horizon_months: usize,
    pub target_year: i32,
    pub min_points: usize,
    pub interval_width: f64,
    /// Observations per seasonal cycle; 12 for a yearly pattern in monthly data.
    pub season_length: usize,
    pub seasonality_mode: SeasonalityMode,
    pub fit_timeout_secs: Option<u64>,
    pub parallel: bool,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            horizon_months: 12,
            target_year: 2026,
            min_points: 2,
            interval_width: 0.8,
            season_length: 12,
            seasonality_mode: SeasonalityMode::Multiplicative,
            fit_timeout_secs: Some(30),
            parallel: true,
        }
    }
}

/// Rule for extending a partial year of actuals to a full-year figure.
///
/// This is linear scaling only; it ignores seasonality on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnnualizationPolicy {
    /// Scale by 12 / (number of months with a value).
    #[default]
    ObservedMonths,
    /// Scale by 12 / n regardless of how many months carry values.
    FixedMonths(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub layout: LayoutConfig,
    pub forecast: ForecastSettings,
    pub annualization: AnnualizationPolicy,
}

impl AppConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.layout;
        let columns = [
            ("month_column", l.month_column),
            ("category_column", l.category_column),
            ("year_a_column", l.year_a_column),
            ("year_b_column", l.year_b_column),
        ];
        for (i, (name_a, a)) in columns.iter().enumerate() {
            for (name_b, b) in &columns[i + 1..] {
                if a == b {
                    return Err(ConfigError::Invalid(format!(
                        "{} and {} both point at column {}",
                        name_a, name_b, a
                    )));
                }
            }
        }
        if l.year_a == l.year_b {
            return Err(ConfigError::Invalid(
                "year_a and year_b must differ".to_string(),
            ));
        }

        let f = &self.forecast;
        if f.horizon_months == 0 {
            return Err(ConfigError::Invalid(
                "horizon_months must be at least 1".to_string(),
            ));
        }
        if !(f.interval_width > 0.0 && f.interval_width < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "interval_width must be in (0, 1), got {}",
                f.interval_width
            )));
        }
        if f.season_length < 2 {
            return Err(ConfigError::Invalid(format!(
                "season_length must be at least 2, got {}",
                f.season_length
            )));
        }
        if let AnnualizationPolicy::FixedMonths(0) = self.annualization {
            return Err(ConfigError::Invalid(
                "fixed annualization needs at least one month".to_string(),
            ));
        }
        Ok(())
    }
}
