//! Forecast Engine Module
//! Trains one model per category and keeps the target-year slice of its predictions.

use crate::config::ForecastSettings;
use crate::data::{CategorySeries, SalesTable, SeriesBuilder, SeriesPoint};
use crate::model::{EtsModel, EtsParams, ForecastModel, ModelError, Prediction};
use chrono::Datelike;
use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a category has no forecast. None of these abort a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("insufficient data: {points} points, need {required}")]
    InsufficientData { points: usize, required: usize },
    #[error("model fit failed: {0}")]
    FitFailure(String),
    #[error("model fit exceeded {seconds}s")]
    Timeout { seconds: u64 },
    #[error("no predictions fall in {year}")]
    NoTargetYearCoverage { year: i32 },
}

/// One projected month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastRow {
    pub month: u32,
    pub forecast: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Target-year projection for one category, ascending by month.
///
/// Usually twelve rows, but fewer when the model's horizon stops short of
/// the end of the target year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryForecast {
    pub category: String,
    pub target_year: i32,
    pub rows: Vec<ForecastRow>,
}

impl CategoryForecast {
    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.forecast).sum()
    }

    pub fn lower_total(&self) -> f64 {
        self.rows.iter().map(|r| r.lower).sum()
    }

    pub fn upper_total(&self) -> f64 {
        self.rows.iter().map(|r| r.upper).sum()
    }

    /// Mean over the months present; 0 when there are none.
    pub fn avg_monthly(&self) -> f64 {
        if self.rows.is_empty() {
            0.0
        } else {
            self.total() / self.rows.len() as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCategory {
    pub category: String,
    #[serde(serialize_with = "serialize_reason")]
    pub reason: SkipReason,
}

fn serialize_reason<S: serde::Serializer>(reason: &SkipReason, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&reason.to_string())
}

/// Outcome of forecasting every category of a dataset.
///
/// Both lists keep the dataset's category order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForecastBatch {
    pub forecasts: Vec<CategoryForecast>,
    pub skipped: Vec<SkippedCategory>,
}

impl ForecastBatch {
    pub fn get(&self, category: &str) -> Option<&CategoryForecast> {
        self.forecasts.iter().find(|f| f.category == category)
    }

    /// Forecast categories sorted by name, for selection lists.
    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.forecasts.iter().map(|f| f.category.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.forecasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forecasts.is_empty()
    }
}

/// Runs a [`ForecastModel`] per category.
pub struct ForecastEngine {
    model: Arc<dyn ForecastModel>,
    settings: ForecastSettings,
}

impl ForecastEngine {
    pub fn new(model: Arc<dyn ForecastModel>, settings: ForecastSettings) -> Self {
        Self { model, settings }
    }

    /// Engine backed by the built-in ETS model.
    pub fn from_settings(settings: ForecastSettings) -> Result<Self, ModelError> {
        let model = EtsModel::new(EtsParams::from(&settings))?;
        Ok(Self::new(Arc::new(model), settings))
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Forecast one series with the configured horizon and target year.
    pub fn forecast(&self, series: &CategorySeries) -> Result<CategoryForecast, SkipReason> {
        self.forecast_with(
            series,
            self.settings.horizon_months,
            self.settings.target_year,
        )
    }

    pub fn forecast_with(
        &self,
        series: &CategorySeries,
        horizon_months: usize,
        target_year: i32,
    ) -> Result<CategoryForecast, SkipReason> {
        let required = self.settings.min_points.max(2);
        if series.len() < required {
            return Err(SkipReason::InsufficientData {
                points: series.len(),
                required,
            });
        }

        let predictions = self.run_model(series.points.clone(), horizon_months)?;

        let mut rows: Vec<ForecastRow> = predictions
            .iter()
            .filter(|p| p.date.year() == target_year)
            .map(|p| ForecastRow {
                month: p.date.month(),
                forecast: p.mean,
                lower: p.lower,
                upper: p.upper,
            })
            .collect();
        rows.sort_by_key(|r| r.month);

        if rows.is_empty() {
            return Err(SkipReason::NoTargetYearCoverage { year: target_year });
        }

        Ok(CategoryForecast {
            category: series.category.clone(),
            target_year,
            rows,
        })
    }

    /// Forecast every category of a table.
    ///
    /// Failures are collected per category; the batch itself never fails.
    pub fn forecast_all(&self, table: &SalesTable) -> ForecastBatch {
        let categories = table.categories();
        info!(
            "Training {} models for {} categories",
            self.model.name(),
            categories.len()
        );

        let run = |category: &String| {
            let series = SeriesBuilder::build(table, category);
            (category.clone(), self.forecast(&series))
        };
        let outcomes: Vec<(String, Result<CategoryForecast, SkipReason>)> =
            if self.settings.parallel {
                categories.par_iter().map(run).collect()
            } else {
                categories.iter().map(run).collect()
            };

        let mut batch = ForecastBatch::default();
        for (i, (category, outcome)) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(forecast) => {
                    info!(
                        "{:>2}. {:<20} {} forecast: {:>12.0}",
                        i + 1,
                        category,
                        forecast.target_year,
                        forecast.total()
                    );
                    batch.forecasts.push(forecast);
                }
                Err(reason) => {
                    warn!("{}: skipped, {}", category, reason);
                    batch.skipped.push(SkippedCategory { category, reason });
                }
            }
        }
        batch
    }

    /// Fit and predict, on a worker thread when a timeout is configured.
    ///
    /// A panicking model becomes a `FitFailure` on either path.
    fn run_model(
        &self,
        points: Vec<SeriesPoint>,
        horizon_months: usize,
    ) -> Result<Vec<Prediction>, SkipReason> {
        let Some(seconds) = self.settings.fit_timeout_secs else {
            let model = self.model.as_ref();
            return match panic::catch_unwind(AssertUnwindSafe(|| {
                fit_predict(model, &points, horizon_months)
            })) {
                Ok(result) => result.map_err(|e| SkipReason::FitFailure(e.to_string())),
                Err(payload) => Err(SkipReason::FitFailure(panic_message(payload.as_ref()))),
            };
        };

        let (tx, rx) = channel();
        let model = Arc::clone(&self.model);
        thread::spawn(move || {
            let _ = tx.send(fit_predict(model.as_ref(), &points, horizon_months));
        });

        match rx.recv_timeout(Duration::from_secs(seconds)) {
            Ok(result) => result.map_err(|e| SkipReason::FitFailure(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Err(SkipReason::Timeout { seconds }),
            Err(RecvTimeoutError::Disconnected) => Err(SkipReason::FitFailure(
                "model worker stopped without a result".to_string(),
            )),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("model panicked: {}", detail)
}

fn fit_predict(
    model: &dyn ForecastModel,
    points: &[SeriesPoint],
    horizon_months: usize,
) -> Result<Vec<Prediction>, ModelError> {
    let fitted = model.fit(points)?;
    let predictions = fitted.predict(horizon_months)?;
    debug!("{} predictions from {} points", predictions.len(), points.len());
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SalesRow;
    use crate::model::FittedModel;
    use chrono::{Months, NaiveDate};

    /// Predicts the last observed value with a fixed ±1 band.
    struct LastValueModel;

    struct LastValueFit {
        last: SeriesPoint,
    }

    impl ForecastModel for LastValueModel {
        fn name(&self) -> &'static str {
            "last-value"
        }

        fn fit(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>, ModelError> {
            let last = *history.last().ok_or(ModelError::InsufficientData {
                required: 1,
                actual: 0,
            })?;
            Ok(Box::new(LastValueFit { last }))
        }
    }

    impl FittedModel for LastValueFit {
        fn predict(&self, horizon_months: usize) -> Result<Vec<Prediction>, ModelError> {
            Ok((1..=horizon_months as u32)
                .filter_map(|h| self.last.date.checked_add_months(Months::new(h)))
                .map(|date| Prediction {
                    date,
                    mean: self.last.value,
                    lower: self.last.value - 1.0,
                    upper: self.last.value + 1.0,
                })
                .collect())
        }
    }

    /// Fails whenever every value is identical.
    struct FussyModel;

    impl ForecastModel for FussyModel {
        fn name(&self) -> &'static str {
            "fussy"
        }

        fn fit(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>, ModelError> {
            if history.windows(2).all(|w| w[0].value == w[1].value) {
                return Err(ModelError::Fit("flat history".to_string()));
            }
            LastValueModel.fit(history)
        }
    }

    /// Stalls on series that start below zero.
    struct SleepyModel;

    impl ForecastModel for SleepyModel {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn fit(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>, ModelError> {
            if history.first().is_some_and(|p| p.value < 0.0) {
                thread::sleep(Duration::from_secs(3));
            }
            LastValueModel.fit(history)
        }
    }

    /// Panics whenever every value is identical.
    struct PanickingModel;

    impl ForecastModel for PanickingModel {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn fit(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>, ModelError> {
            if history.windows(2).all(|w| w[0].value == w[1].value) {
                panic!("flat history");
            }
            LastValueModel.fit(history)
        }
    }

    fn row(month: u32, category: &str, sales_a: Option<f64>, sales_b: Option<f64>) -> SalesRow {
        SalesRow {
            month,
            category: category.to_string(),
            sales_a,
            sales_b,
        }
    }

    /// "Flat" repeats one value; "Busy" varies.
    fn flat_and_busy() -> SalesTable {
        let rows = vec![
            row(1, "Flat", Some(3.0), Some(3.0)),
            row(2, "Flat", Some(3.0), None),
            row(1, "Busy", Some(1.0), Some(4.0)),
            row(2, "Busy", Some(2.0), Some(5.0)),
        ];
        SalesTable::from_rows(&rows, 2024, 2025).unwrap()
    }

    fn settings(parallel: bool) -> ForecastSettings {
        ForecastSettings {
            parallel,
            fit_timeout_secs: None,
            ..ForecastSettings::default()
        }
    }

    fn series(category: &str, start: (i32, u32), values: &[f64]) -> CategorySeries {
        let first = NaiveDate::from_ymd_opt(start.0, start.1, 1).unwrap();
        CategorySeries {
            category: category.to_string(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, &value)| SeriesPoint {
                    date: first.checked_add_months(Months::new(i as u32)).unwrap(),
                    value,
                })
                .collect(),
        }
    }

    #[test]
    fn test_short_series_is_skipped() {
        let engine = ForecastEngine::new(Arc::new(LastValueModel), settings(false));
        let err = engine.forecast(&series("Hats", (2025, 1), &[5.0])).unwrap_err();
        assert_eq!(
            err,
            SkipReason::InsufficientData {
                points: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_target_year_slice_is_month_ordered() {
        let engine = ForecastEngine::new(Arc::new(LastValueModel), settings(false));
        let values: Vec<f64> = (1..=21).map(f64::from).collect();
        let forecast = engine.forecast(&series("Shoes", (2024, 1), &values)).unwrap();

        // Last observation is 2025-09, so a 12 month horizon reaches 2026-09.
        let months: Vec<u32> = forecast.rows.iter().map(|r| r.month).collect();
        assert_eq!(months, (1..=9).collect::<Vec<u32>>());
        assert_eq!(forecast.target_year, 2026);
        assert_eq!(forecast.total(), 21.0 * 9.0);
        assert_eq!(forecast.lower_total(), 20.0 * 9.0);
    }

    #[test]
    fn test_horizon_short_of_target_year_is_skipped() {
        let engine = ForecastEngine::new(Arc::new(LastValueModel), settings(false));
        let short = series("Shoes", (2024, 1), &[1.0, 2.0, 3.0]);
        let result = engine.forecast_with(&short, 3, 2026);
        assert_eq!(
            result.unwrap_err(),
            SkipReason::NoTargetYearCoverage { year: 2026 }
        );
    }

    #[test]
    fn test_fit_failure_is_isolated() {
        let table = flat_and_busy();
        let engine = ForecastEngine::new(Arc::new(FussyModel), settings(true));
        let batch = engine.forecast_all(&table);

        assert_eq!(batch.len(), 1);
        assert!(batch.get("Busy").is_some());
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].category, "Flat");
        assert!(matches!(batch.skipped[0].reason, SkipReason::FitFailure(_)));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let mut rows = Vec::new();
        for (c, name) in ["Toys", "Books", "Games"].iter().enumerate() {
            for month in 1..=12 {
                let sales_b = (month <= 9).then_some((c as u32 * 20 + month) as f64);
                rows.push(row(month, name, Some((c as u32 * 10 + month) as f64), sales_b));
            }
        }
        let table = SalesTable::from_rows(&rows, 2024, 2025).unwrap();

        let seq =
            ForecastEngine::new(Arc::new(LastValueModel), settings(false)).forecast_all(&table);
        let par =
            ForecastEngine::new(Arc::new(LastValueModel), settings(true)).forecast_all(&table);
        assert_eq!(seq, par);
        let order: Vec<&str> = par.forecasts.iter().map(|f| f.category.as_str()).collect();
        assert_eq!(order, vec!["Toys", "Books", "Games"]);
        assert_eq!(par.categories(), vec!["Books", "Games", "Toys"]);
    }

    #[test]
    fn test_worker_thread_path_returns_forecast() {
        let engine = ForecastEngine::new(
            Arc::new(LastValueModel),
            ForecastSettings {
                fit_timeout_secs: Some(5),
                ..ForecastSettings::default()
            },
        );
        let values: Vec<f64> = (1..=21).map(f64::from).collect();
        assert!(engine.forecast(&series("Shoes", (2024, 1), &values)).is_ok());
    }

    #[test]
    fn test_slow_fit_times_out_without_blocking_batch() {
        let rows = vec![
            row(1, "Slow", Some(-1.0), Some(2.0)),
            row(2, "Slow", Some(3.0), Some(4.0)),
            row(1, "Quick", Some(1.0), Some(4.0)),
            row(2, "Quick", Some(2.0), Some(5.0)),
        ];
        let table = SalesTable::from_rows(&rows, 2024, 2025).unwrap();
        let engine = ForecastEngine::new(
            Arc::new(SleepyModel),
            ForecastSettings {
                fit_timeout_secs: Some(1),
                ..ForecastSettings::default()
            },
        );
        let batch = engine.forecast_all(&table);

        assert!(batch.get("Quick").is_some());
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].category, "Slow");
        assert_eq!(batch.skipped[0].reason, SkipReason::Timeout { seconds: 1 });
    }

    #[test]
    fn test_panicking_fit_is_a_fit_failure() {
        let table = flat_and_busy();
        for timeout in [None, Some(5)] {
            let engine = ForecastEngine::new(
                Arc::new(PanickingModel),
                ForecastSettings {
                    fit_timeout_secs: timeout,
                    parallel: false,
                    ..ForecastSettings::default()
                },
            );
            let batch = engine.forecast_all(&table);

            assert!(batch.get("Busy").is_some(), "timeout {:?}", timeout);
            assert_eq!(batch.skipped.len(), 1);
            assert_eq!(batch.skipped[0].category, "Flat");
            assert!(matches!(batch.skipped[0].reason, SkipReason::FitFailure(_)));
        }
    }

    #[test]
    fn test_default_engine_uses_ets() {
        let engine = ForecastEngine::from_settings(ForecastSettings::default()).unwrap();
        assert_eq!(engine.model_name(), "ets");
        let values: Vec<f64> = (0..21).map(|i| 100.0 + i as f64).collect();
        let forecast = engine.forecast(&series("Shoes", (2024, 1), &values)).unwrap();
        assert_eq!(forecast.rows.len(), 9);
    }
}
