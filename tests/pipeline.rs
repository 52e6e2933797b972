use approx::assert_relative_eq;
use budget_forecaster::adjust::{adjust, AdjustmentParams, ForecastMode};
use budget_forecaster::config::{AnnualizationPolicy, AppConfig};
use budget_forecaster::data::{DataLoader, SeriesBuilder};
use budget_forecaster::forecast::{ForecastEngine, SkipReason};
use budget_forecaster::report::ReportGenerator;
use budget_forecaster::session::ForecastSession;
use budget_forecaster::stats::StatsCalculator;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Two header rows, then month, category, year-A sales at column 4 and
/// year-B sales at column 13.
fn write_sheet(path: &Path) {
    let mut out = String::from("Budget,,,,,,,,,,,,,\nMonth,Category,,,2024,,,,,,,,,2025\n");
    for month in 1..=12u32 {
        let a = 100.0 + 10.0 * month as f64;
        let b = if month <= 9 {
            format!("{}", 130.0 + 10.0 * month as f64)
        } else {
            String::new()
        };
        out.push_str(&format!("{},Shoes,,,{},,,,,,,,,{}\n", month, a, b));
    }
    out.push_str("3,Hats,,,42,,,,,,,,,\n");

    let mut file = fs::File::create(path).unwrap();
    file.write_all(out.as_bytes()).unwrap();
}

fn engine(config: &AppConfig) -> ForecastEngine {
    ForecastEngine::from_settings(config.forecast.clone()).unwrap()
}

#[test]
fn test_sparse_category_is_skipped_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sales.csv");
    write_sheet(&input);

    let config = AppConfig::default();
    let table = DataLoader::new(config.layout.clone()).load_path(&input).unwrap();
    assert_eq!(table.categories(), vec!["Shoes", "Hats"]);
    assert_eq!(SeriesBuilder::build(&table, "Shoes").len(), 21);

    let batch = engine(&config).forecast_all(&table);
    let summary = StatsCalculator::summarize(&batch);
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].category, "Shoes");
    assert!(summary[0].total.is_finite());
    assert!(summary[0].lower_total <= summary[0].total);
    assert!(summary[0].total <= summary[0].upper_total);

    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].category, "Hats");
    assert_eq!(
        batch.skipped[0].reason,
        SkipReason::InsufficientData { points: 1, required: 2 }
    );

    let comparison = StatsCalculator::compare(&table, &batch, AnnualizationPolicy::ObservedMonths);
    assert_eq!(comparison.len(), 1);
    // 140 + 150 + ... + 220 over nine months.
    assert_relative_eq!(comparison[0].observed_b, 1620.0);
    assert_relative_eq!(comparison[0].annualized_b, 2160.0);
    assert_relative_eq!(comparison[0].actual_a, 1980.0);

    let forecast = batch.get("Shoes").unwrap();
    let months: Vec<u32> = forecast.rows.iter().map(|r| r.month).collect();
    assert_eq!(months, (1..=9).collect::<Vec<u32>>());
}

#[test]
fn test_report_writes_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sales.csv");
    write_sheet(&input);

    let config = AppConfig::default();
    let table = DataLoader::new(config.layout.clone()).load_path(&input).unwrap();
    let batch = engine(&config).forecast_all(&table);

    let out = dir.path().join("out");
    let manifest = ReportGenerator::write(&out, &table, &batch, config.annualization).unwrap();

    assert_eq!(manifest.forecasts, vec![out.join("forecast_Shoes.csv")]);
    let summary = fs::read_to_string(&manifest.summary).unwrap();
    assert_eq!(summary.lines().count(), 2);
    let skipped = fs::read_to_string(&manifest.skipped).unwrap();
    assert!(skipped.lines().nth(1).unwrap().starts_with("Hats,"));
}

#[test]
fn test_session_hybrid_adjustment_matches_direct_call() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sales.csv");
    write_sheet(&input);

    let config = AppConfig::default();
    let loader = DataLoader::new(config.layout.clone());
    let table = loader.load_path(&input).unwrap();
    let mut session = ForecastSession::new(engine(&config), config.annualization, table);

    let params = AdjustmentParams::new(10.0, 1.5);
    session.set_mode(ForecastMode::Hybrid);
    session.set_params(params);
    let plan = session.plan("Shoes").unwrap();

    let direct = adjust(session.forecasts().get("Shoes").unwrap(), params);
    assert_eq!(plan, direct);
    assert_relative_eq!(
        plan.summary().adjusted_total,
        plan.summary().base_total * 1.65,
        max_relative = 1e-12
    );

    // Reloading the same file keeps the fitted forecasts.
    assert!(!session.load(loader.load_path(&input).unwrap()));
    assert!(session.is_cached());
}
