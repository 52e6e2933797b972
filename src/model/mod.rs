//! Model module - the forecasting capability behind a narrow interface
//!
//! Reshaping, aggregation and adjustment code only sees [`ForecastModel`]
//! and [`FittedModel`], so the statistical method can be swapped without
//! touching them.

mod ets;

pub use ets::{EtsModel, EtsParams, EtsStage};

use crate::data::SeriesPoint;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("Model fit failed: {0}")]
    Fit(String),
    #[error("Model produced non-finite values")]
    NonFinite,
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Pointwise prediction with an uncertainty interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub date: NaiveDate,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

/// A forecasting method that can be trained on one monthly history.
pub trait ForecastModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&self, history: &[SeriesPoint]) -> Result<Box<dyn FittedModel>, ModelError>;
}

/// A trained model.
pub trait FittedModel: Send {
    /// Predictions for the `horizon_months` monthly steps past the last
    /// observation, ascending by date.
    fn predict(&self, horizon_months: usize) -> Result<Vec<Prediction>, ModelError>;
}
