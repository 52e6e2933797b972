//! Session Module
//! Holds the loaded dataset and memoises its forecasts.

use crate::adjust::{adjust, manual_plan, AdjustedForecast, AdjustmentParams, ForecastMode};
use crate::config::AnnualizationPolicy;
use crate::data::SalesTable;
use crate::forecast::{ForecastBatch, ForecastEngine};
use crate::stats::{ComparisonRecord, PortfolioOverview, StatsCalculator};
use tracing::{debug, info};

/// Interactive state: one dataset, its cached forecasts and the current
/// adjustment settings.
///
/// Forecasts are computed at most once per dataset fingerprint. Changing
/// the mode or the adjustment parameters never refits.
pub struct ForecastSession {
    engine: ForecastEngine,
    policy: AnnualizationPolicy,
    table: SalesTable,
    cache: Option<ForecastBatch>,
    mode: ForecastMode,
    params: AdjustmentParams,
}

impl ForecastSession {
    pub fn new(engine: ForecastEngine, policy: AnnualizationPolicy, table: SalesTable) -> Self {
        Self {
            engine,
            policy,
            table,
            cache: None,
            mode: ForecastMode::default(),
            params: AdjustmentParams::default(),
        }
    }

    /// Swap in a dataset. Returns `true` when its contents differ from the
    /// current one and the cached forecasts were dropped.
    pub fn load(&mut self, table: SalesTable) -> bool {
        if table.fingerprint() == self.table.fingerprint() {
            debug!("Dataset unchanged ({:016x}), keeping forecasts", table.fingerprint());
            return false;
        }
        info!(
            "Dataset changed ({:016x} -> {:016x}), forecasts invalidated",
            self.table.fingerprint(),
            table.fingerprint()
        );
        self.table = table;
        self.cache = None;
        true
    }

    pub fn table(&self) -> &SalesTable {
        &self.table
    }

    pub fn engine(&self) -> &ForecastEngine {
        &self.engine
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Forecasts for the current dataset, computed on first use.
    pub fn forecasts(&mut self) -> &ForecastBatch {
        if self.cache.is_some() {
            debug!("Forecast cache hit");
        }
        let engine = &self.engine;
        let table = &self.table;
        self.cache.get_or_insert_with(|| {
            debug!("Forecast cache miss, fitting models");
            engine.forecast_all(table)
        })
    }

    pub fn mode(&self) -> ForecastMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ForecastMode) {
        self.mode = mode;
    }

    pub fn params(&self) -> AdjustmentParams {
        self.params
    }

    pub fn set_params(&mut self, params: AdjustmentParams) {
        self.params = params;
    }

    /// The category's plan under the current mode.
    ///
    /// Automatic mode ignores the adjustment parameters. `None` when the
    /// category has no forecast (automatic, hybrid) or no rows (manual).
    pub fn plan(&mut self, category: &str) -> Option<AdjustedForecast> {
        let target_year = self.engine.settings().target_year;
        match self.mode {
            ForecastMode::Manual => {
                let plan = manual_plan(&self.table, category, target_year, self.params);
                (!plan.rows.is_empty()).then_some(plan)
            }
            ForecastMode::Automatic => {
                let forecast = self.forecasts().get(category)?;
                Some(adjust(forecast, AdjustmentParams::default()))
            }
            ForecastMode::Hybrid => {
                let params = self.params;
                let forecast = self.forecasts().get(category)?;
                Some(adjust(forecast, params))
            }
        }
    }

    pub fn comparison(&mut self) -> Vec<ComparisonRecord> {
        let policy = self.policy;
        self.forecasts();
        match &self.cache {
            Some(batch) => StatsCalculator::compare(&self.table, batch, policy),
            None => Vec::new(),
        }
    }

    pub fn overview(&mut self) -> PortfolioOverview {
        let policy = self.policy;
        self.forecasts();
        let empty = ForecastBatch::default();
        let batch = self.cache.as_ref().unwrap_or(&empty);
        StatsCalculator::overview(&self.table, batch, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForecastSettings;
    use crate::data::{SalesRow, SeriesPoint};
    use crate::model::{FittedModel, ForecastModel, ModelError, Prediction};
    use chrono::Months;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Flat forecast at the history mean; counts fits.
    struct CountingModel {
        fits: Arc<AtomicUsize>,
    }

    struct MeanFit {
        mean: f64,
        last: chrono::NaiveDate,
    }

    impl ForecastModel for CountingModel {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn fit(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>, ModelError> {
            self.fits.fetch_add(1, Ordering::SeqCst);
            let mean = history.iter().map(|p| p.value).sum::<f64>() / history.len() as f64;
            let last = history
                .last()
                .ok_or(ModelError::InsufficientData {
                    required: 1,
                    actual: 0,
                })?
                .date;
            Ok(Box::new(MeanFit { mean, last }))
        }
    }

    impl FittedModel for MeanFit {
        fn predict(&self, horizon_months: usize) -> Result<Vec<Prediction>, ModelError> {
            Ok((1..=horizon_months as u32)
                .filter_map(|h| self.last.checked_add_months(Months::new(h)))
                .map(|date| Prediction {
                    date,
                    mean: self.mean,
                    lower: self.mean,
                    upper: self.mean,
                })
                .collect())
        }
    }

    fn table(scale: f64) -> SalesTable {
        let rows: Vec<SalesRow> = (1..=12)
            .map(|month| SalesRow {
                month,
                category: "Shoes".to_string(),
                sales_a: Some(10.0 * scale),
                sales_b: (month <= 9).then_some(10.0 * scale),
            })
            .collect();
        SalesTable::from_rows(&rows, 2024, 2025).unwrap()
    }

    fn session(fits: &Arc<AtomicUsize>) -> ForecastSession {
        let settings = ForecastSettings {
            fit_timeout_secs: None,
            parallel: false,
            ..ForecastSettings::default()
        };
        let model = CountingModel { fits: Arc::clone(fits) };
        let engine = ForecastEngine::new(Arc::new(model), settings);
        ForecastSession::new(engine, AnnualizationPolicy::ObservedMonths, table(1.0))
    }

    #[test]
    fn test_forecasts_are_memoised() {
        let fits = Arc::new(AtomicUsize::new(0));
        let mut session = session(&fits);
        assert!(!session.is_cached());

        assert_eq!(session.forecasts().len(), 1);
        session.forecasts();
        session.set_mode(ForecastMode::Hybrid);
        session.set_params(AdjustmentParams::new(10.0, 1.2));
        session.plan("Shoes");
        session.comparison();

        assert_eq!(fits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identical_reload_keeps_cache() {
        let fits = Arc::new(AtomicUsize::new(0));
        let mut session = session(&fits);
        session.forecasts();

        assert!(!session.load(table(1.0)));
        assert!(session.is_cached());
        session.forecasts();
        assert_eq!(fits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_changed_dataset_refits() {
        let fits = Arc::new(AtomicUsize::new(0));
        let mut session = session(&fits);
        let before = session.forecasts().forecasts[0].total();

        assert!(session.load(table(2.0)));
        assert!(!session.is_cached());
        let after = session.forecasts().forecasts[0].total();

        assert_eq!(fits.load(Ordering::SeqCst), 2);
        assert_eq!(after, before * 2.0);
    }

    #[test]
    fn test_plan_follows_mode() {
        let fits = Arc::new(AtomicUsize::new(0));
        let mut session = session(&fits);
        session.set_params(AdjustmentParams::new(0.0, 2.0));

        let automatic = session.plan("Shoes").unwrap();
        assert_eq!(automatic.rows[0].adjusted, automatic.rows[0].base);

        session.set_mode(ForecastMode::Hybrid);
        let hybrid = session.plan("Shoes").unwrap();
        assert_eq!(hybrid.rows[0].adjusted, hybrid.rows[0].base * 2.0);

        session.set_mode(ForecastMode::Manual);
        let manual = session.plan("Shoes").unwrap();
        assert_eq!(manual.rows.len(), 12);
        assert_eq!(manual.rows[0].adjusted, 20.0);

        assert!(session.plan("Hats").is_none());
    }
}
