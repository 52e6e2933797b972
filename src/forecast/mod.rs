//! Forecast module - per-category model training and target-year extraction

mod engine;

pub use engine::{
    CategoryForecast, ForecastBatch, ForecastEngine, ForecastRow, SkipReason, SkippedCategory,
};
