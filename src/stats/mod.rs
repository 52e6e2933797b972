//! Stats module - forecast aggregation and comparison

mod calculator;

pub use calculator::{
    ActualTotals, CategorySummary, ComparisonRecord, PortfolioOverview, StatsCalculator,
};
