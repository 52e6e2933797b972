//! Report Generator Module
//! Writes summary, comparison, skip and per-category forecast tables as CSV,
//! and renders the same tables for the terminal.

use crate::adjust::AdjustedForecast;
use crate::config::AnnualizationPolicy;
use crate::data::SalesTable;
use crate::forecast::{CategoryForecast, ForecastBatch, SkippedCategory};
use crate::stats::{CategorySummary, ComparisonRecord, PortfolioOverview, StatsCalculator};
use polars::prelude::*;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to build table: {0}")]
    Polars(#[from] PolarsError),
}

/// Files produced by one report run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportManifest {
    pub dir: PathBuf,
    pub summary: PathBuf,
    pub comparison: PathBuf,
    pub skipped: PathBuf,
    /// Per-category forecast tables, in summary order.
    pub forecasts: Vec<PathBuf>,
}

impl ReportManifest {
    pub fn file_count(&self) -> usize {
        3 + self.forecasts.len()
    }
}

/// Report generator for batch runs
pub struct ReportGenerator;

impl ReportGenerator {
    /// Write every table for a finished batch into `dir`, creating it if needed.
    ///
    /// Skipped categories only appear in `skipped.csv`.
    pub fn write(
        dir: &Path,
        table: &SalesTable,
        batch: &ForecastBatch,
        policy: AnnualizationPolicy,
    ) -> Result<ReportManifest, ReportError> {
        fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let summary = StatsCalculator::summarize(batch);
        let comparison = StatsCalculator::compare(table, batch, policy);

        let summary_path = dir.join("summary.csv");
        Self::write_csv(&summary_path, &mut Self::summary_frame(&summary)?)?;

        let comparison_path = dir.join("comparison.csv");
        Self::write_csv(&comparison_path, &mut Self::comparison_frame(&comparison)?)?;

        let skipped_path = dir.join("skipped.csv");
        Self::write_csv(&skipped_path, &mut Self::skipped_frame(&batch.skipped)?)?;

        let mut used = HashSet::new();
        let mut forecasts = Vec::with_capacity(summary.len());
        for entry in &summary {
            let Some(forecast) = batch.get(&entry.category) else {
                continue;
            };
            let path = dir.join(format!(
                "forecast_{}.csv",
                unique_name(sanitize_file_stem(&forecast.category), &mut used)
            ));
            Self::write_csv(&path, &mut Self::forecast_frame(forecast)?)?;
            forecasts.push(path);
        }

        let manifest = ReportManifest {
            dir: dir.to_path_buf(),
            summary: summary_path,
            comparison: comparison_path,
            skipped: skipped_path,
            forecasts,
        };
        info!(
            "Wrote {} files to {}",
            manifest.file_count(),
            manifest.dir.display()
        );
        Ok(manifest)
    }

    fn write_csv(path: &Path, df: &mut DataFrame) -> Result<(), ReportError> {
        let mut file = File::create(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_float_precision(Some(2))
            .finish(df)?;
        Ok(())
    }

    pub fn summary_frame(summary: &[CategorySummary]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Column::new(
                "category".into(),
                summary.iter().map(|s| s.category.as_str()).collect::<Vec<_>>(),
            ),
            Column::new("total".into(), summary.iter().map(|s| s.total).collect::<Vec<_>>()),
            Column::new(
                "lower_total".into(),
                summary.iter().map(|s| s.lower_total).collect::<Vec<_>>(),
            ),
            Column::new(
                "upper_total".into(),
                summary.iter().map(|s| s.upper_total).collect::<Vec<_>>(),
            ),
            Column::new(
                "avg_monthly".into(),
                summary.iter().map(|s| s.avg_monthly).collect::<Vec<_>>(),
            ),
        ])
    }

    pub fn comparison_frame(records: &[ComparisonRecord]) -> PolarsResult<DataFrame> {
        let floats = |f: fn(&ComparisonRecord) -> f64| records.iter().map(f).collect::<Vec<f64>>();
        DataFrame::new(vec![
            Column::new(
                "category".into(),
                records.iter().map(|r| r.category.as_str()).collect::<Vec<_>>(),
            ),
            Column::new("actual_a".into(), floats(|r| r.actual_a)),
            Column::new("observed_b".into(), floats(|r| r.observed_b)),
            Column::new(
                "observed_b_months".into(),
                records
                    .iter()
                    .map(|r| r.observed_b_months as u32)
                    .collect::<Vec<_>>(),
            ),
            Column::new("annualized_b".into(), floats(|r| r.annualized_b)),
            Column::new("projected".into(), floats(|r| r.projected)),
            Column::new("growth_a_to_b_pct".into(), floats(|r| r.growth_a_to_b_pct)),
            Column::new(
                "growth_b_to_projected_pct".into(),
                floats(|r| r.growth_b_to_projected_pct),
            ),
        ])
    }

    pub fn skipped_frame(skipped: &[SkippedCategory]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            Column::new(
                "category".into(),
                skipped.iter().map(|s| s.category.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "reason".into(),
                skipped.iter().map(|s| s.reason.to_string()).collect::<Vec<_>>(),
            ),
        ])
    }

    pub fn forecast_frame(forecast: &CategoryForecast) -> PolarsResult<DataFrame> {
        let rows = &forecast.rows;
        DataFrame::new(vec![
            Column::new("year".into(), vec![forecast.target_year; rows.len()]),
            Column::new("month".into(), rows.iter().map(|r| r.month).collect::<Vec<_>>()),
            Column::new("forecast".into(), rows.iter().map(|r| r.forecast).collect::<Vec<_>>()),
            Column::new("lower".into(), rows.iter().map(|r| r.lower).collect::<Vec<_>>()),
            Column::new("upper".into(), rows.iter().map(|r| r.upper).collect::<Vec<_>>()),
        ])
    }

    pub fn render_summary(summary: &[CategorySummary]) -> String {
        let mut out = format!(
            "{:<4} {:<24} {:>14} {:>14} {:>14} {:>12}\n",
            "#", "Category", "Total", "Lower", "Upper", "Avg/month"
        );
        for (i, s) in summary.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:<4} {:<24} {:>14.0} {:>14.0} {:>14.0} {:>12.0}",
                i + 1,
                truncate(&s.category, 24),
                s.total,
                s.lower_total,
                s.upper_total,
                s.avg_monthly
            );
        }
        out
    }

    pub fn render_comparison(
        records: &[ComparisonRecord],
        year_a: i32,
        year_b: i32,
        target: i32,
    ) -> String {
        let mut out = format!(
            "{:<24} {:>14} {:>14} {:>14} {:>9} {:>9}\n",
            "Category",
            year_a,
            format!("{} (ann.)", year_b),
            target,
            format!("{}-{}", year_a % 100, year_b % 100),
            format!("{}-{}", year_b % 100, target % 100),
        );
        for r in records {
            let _ = writeln!(
                out,
                "{:<24} {:>14.0} {:>14.0} {:>14.0} {:>8.1}% {:>8.1}%",
                truncate(&r.category, 24),
                r.actual_a,
                r.annualized_b,
                r.projected,
                r.growth_a_to_b_pct,
                r.growth_b_to_projected_pct
            );
        }
        out
    }

    pub fn render_overview(
        overview: &PortfolioOverview,
        year_a: i32,
        year_b: i32,
        target: i32,
    ) -> String {
        format!(
            "{:<22} {:>16.0}\n{:<22} {:>16.0}\n{:<22} {:>16.0}\n{:<22} {:>15.1}%\n",
            format!("{} actual", year_a),
            overview.actual_a,
            format!("{} annualized", year_b),
            overview.annualized_b,
            format!("{} projected", target),
            overview.projected,
            "Growth",
            overview.growth_b_to_projected_pct
        )
    }

    pub fn render_forecast(forecast: &CategoryForecast) -> String {
        let mut out = format!(
            "{} {}\n{:<8} {:>14} {:>14} {:>14}\n",
            forecast.category, forecast.target_year, "Month", "Forecast", "Lower", "Upper"
        );
        for r in &forecast.rows {
            let _ = writeln!(
                out,
                "{:<8} {:>14.0} {:>14.0} {:>14.0}",
                r.month, r.forecast, r.lower, r.upper
            );
        }
        let _ = writeln!(out, "{:<8} {:>14.0}", "Total", forecast.total());
        out
    }

    pub fn render_plan(plan: &AdjustedForecast) -> String {
        let mut out = format!(
            "{} {} (growth {:+.1}%, seasonality x{:.2})\n{:<8} {:>14} {:>14} {:>9}\n",
            plan.category,
            plan.target_year,
            plan.params.growth_rate_pct,
            plan.params.seasonality_multiplier,
            "Month",
            "Base",
            "Adjusted",
            "Diff"
        );
        for r in &plan.rows {
            let _ = writeln!(
                out,
                "{:<8} {:>14.0} {:>14.0} {:>8.1}%",
                r.month,
                r.base,
                r.adjusted,
                r.difference_pct()
            );
        }
        let s = plan.summary();
        let _ = writeln!(
            out,
            "{:<8} {:>14.0} {:>14.0} {:>8.1}%  ({:+.0})",
            "Total", s.base_total, s.adjusted_total, s.difference_pct, s.difference
        );
        out
    }

    pub fn render_skipped(skipped: &[SkippedCategory]) -> String {
        skipped
            .iter()
            .map(|s| format!("{:<24} {}\n", truncate(&s.category, 24), s.reason))
            .collect()
    }
}

/// File-name-safe stem: alphanumerics, `-` and `_` kept, everything else `_`.
pub fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "category".to_string()
    } else {
        stem
    }
}

fn unique_name(stem: String, used: &mut HashSet<String>) -> String {
    if used.insert(stem.clone()) {
        return stem;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut cut: String = s.chars().take(width - 1).collect();
        cut.push('~');
        cut
    }
}
