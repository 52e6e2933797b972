//! ETS Model
//! Exponential smoothing for monthly series, with a yearly seasonal
//! decomposition once the history spans two full cycles.
//!
//! Fitting walks a fixed chain and keeps the first stage that succeeds:
//! MSTL with an AutoETS trend, then non-seasonal AutoETS, then a naive
//! random walk. Multiplicative mode works on the log of strictly positive
//! series so the yearly pattern scales with the level.

use super::{FittedModel, ForecastModel, ModelError, Prediction};
use crate::config::{ForecastSettings, SeasonalityMode};
use crate::data::SeriesPoint;
use augurs_core::{Fit, Forecast, Predict};
use augurs_ets::{AutoETS, FittedAutoETS};
use augurs_mstl::{FittedMSTLModel, FittedTrendModel, MSTLModel, NaiveTrend, TrendModel};
use chrono::{Months, NaiveDate};
use tracing::debug;

/// Fewest observations any stage of the chain can work with.
const MIN_POINTS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct EtsParams {
    pub mode: SeasonalityMode,
    pub season_length: usize,
    pub interval_width: f64,
}

impl Default for EtsParams {
    fn default() -> Self {
        Self::from(&ForecastSettings::default())
    }
}

impl From<&ForecastSettings> for EtsParams {
    fn from(settings: &ForecastSettings) -> Self {
        Self {
            mode: settings.seasonality_mode,
            season_length: settings.season_length,
            interval_width: settings.interval_width,
        }
    }
}

/// Automatic exponential smoothing with seasonal decomposition.
#[derive(Debug, Clone, Default)]
pub struct EtsModel {
    params: EtsParams,
}

impl EtsModel {
    pub fn new(params: EtsParams) -> Result<Self, ModelError> {
        if !(params.interval_width > 0.0 && params.interval_width < 1.0) {
            return Err(ModelError::InvalidParameter {
                name: "interval_width".to_string(),
                reason: "must be between 0 and 1 (exclusive)".to_string(),
            });
        }
        if params.season_length < 2 {
            return Err(ModelError::InvalidParameter {
                name: "season_length".to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &EtsParams {
        &self.params
    }
}

impl ForecastModel for EtsModel {
    fn name(&self) -> &'static str {
        "ets"
    }

    fn fit(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>, ModelError> {
        Ok(Box::new(FittedEts::fit(&self.params, history)?))
    }
}

/// Which link of the chain produced the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtsStage {
    Seasonal,
    Trend,
    Naive,
}

enum Stage {
    Seasonal(FittedMSTLModel),
    Trend(FittedAutoETS),
    Naive(Box<dyn FittedTrendModel + Sync + Send>),
}

impl Stage {
    fn kind(&self) -> EtsStage {
        match self {
            Stage::Seasonal(_) => EtsStage::Seasonal,
            Stage::Trend(_) => EtsStage::Trend,
            Stage::Naive(_) => EtsStage::Naive,
        }
    }

    fn forecast(&self, horizon: usize, level: f64) -> Result<Forecast, String> {
        match self {
            Stage::Seasonal(fit) => fit.predict(horizon, level).map_err(|e| e.to_string()),
            Stage::Trend(fit) => fit.predict(horizon, level).map_err(|e| e.to_string()),
            Stage::Naive(fit) => fit.predict(horizon, Some(level)).map_err(|e| e.to_string()),
        }
    }
}

struct FittedEts {
    stage: Stage,
    log_scale: bool,
    last_date: NaiveDate,
    level: f64,
}

impl FittedEts {
    fn fit(params: &EtsParams, history: &[SeriesPoint]) -> Result<Self, ModelError> {
        if history.len() < MIN_POINTS {
            return Err(ModelError::InsufficientData {
                required: MIN_POINTS,
                actual: history.len(),
            });
        }
        if history.iter().any(|p| !p.value.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        let last_date = history.iter().map(|p| p.date).max().ok_or(
            ModelError::InsufficientData {
                required: MIN_POINTS,
                actual: 0,
            },
        )?;

        let log_scale = params.mode == SeasonalityMode::Multiplicative
            && history.iter().all(|p| p.value > 0.0);
        let y: Vec<f64> = history
            .iter()
            .map(|p| if log_scale { p.value.ln() } else { p.value })
            .collect();

        let stage = fit_chain(&y, params.season_length)?;
        debug!(
            "ETS fit on {} points via {:?} stage (log scale: {})",
            y.len(),
            stage.kind(),
            log_scale
        );
        Ok(Self {
            stage,
            log_scale,
            last_date,
            level: params.interval_width,
        })
    }
}

fn fit_chain(y: &[f64], season_length: usize) -> Result<Stage, ModelError> {
    if y.len() >= 2 * season_length {
        let model = MSTLModel::new(vec![season_length], AutoETS::non_seasonal().into_trend_model());
        match model.fit(y) {
            Ok(fit) => return Ok(Stage::Seasonal(fit)),
            Err(e) => debug!("Seasonal ETS failed, dropping seasonality: {}", e),
        }
    }

    match AutoETS::non_seasonal().fit(y) {
        Ok(fit) => return Ok(Stage::Trend(fit)),
        Err(e) => debug!("AutoETS failed, using naive trend: {}", e),
    }

    NaiveTrend::default()
        .fit(y)
        .map(Stage::Naive)
        .map_err(|e| ModelError::Fit(e.to_string()))
}

impl FittedEts {
    fn stage(&self) -> EtsStage {
        self.stage.kind()
    }

    fn to_predictions(&self, forecast: Forecast) -> Result<Vec<Prediction>, ModelError> {
        let (lower, upper) = match forecast.intervals {
            Some(intervals) => (intervals.lower, intervals.upper),
            None => (forecast.point.clone(), forecast.point.clone()),
        };
        let back = |v: f64| if self.log_scale { v.exp() } else { v };

        forecast
            .point
            .iter()
            .zip(lower.iter().zip(&upper))
            .enumerate()
            .map(|(i, (&mean, (&lo, &hi)))| {
                let date = self
                    .last_date
                    .checked_add_months(Months::new(i as u32 + 1))
                    .ok_or_else(|| ModelError::Fit("forecast date out of range".to_string()))?;
                let (mean, lo, hi) = (back(mean), back(lo), back(hi));
                if !(mean.is_finite() && lo.is_finite() && hi.is_finite()) {
                    return Err(ModelError::NonFinite);
                }
                // Simulated bounds can land on the wrong side of the point.
                Ok(Prediction {
                    date,
                    mean,
                    lower: lo.min(mean),
                    upper: hi.max(mean),
                })
            })
            .collect()
    }
}

impl FittedModel for FittedEts {
    fn predict(&self, horizon_months: usize) -> Result<Vec<Prediction>, ModelError> {
        let forecast = self
            .stage
            .forecast(horizon_months, self.level)
            .map_err(ModelError::Fit)?;
        if forecast.point.len() != horizon_months {
            return Err(ModelError::Fit(format!(
                "expected {} forecast steps, got {}",
                horizon_months,
                forecast.point.len()
            )));
        }
        self.to_predictions(forecast)
    }
}
