//! Budget Forecaster - per-category sales forecasting from monthly sheets
//!
//! Loads a two-year monthly sales sheet, fits one seasonal model per
//! category, and projects the target year with optional manual adjustments.

pub mod adjust;
pub mod config;
pub mod data;
pub mod forecast;
pub mod model;
pub mod report;
pub mod session;
pub mod stats;
