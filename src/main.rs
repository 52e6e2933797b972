//! Budget Forecaster - batch reports and an interactive explorer
//!
//! `report` forecasts every category and writes CSV tables.
//! `explore` keeps a session open on stdin for browsing and adjusting.

use anyhow::{bail, Context, Result};
use budget_forecaster::adjust::{
    AdjustmentParams, ForecastMode, UI_GROWTH_RANGE, UI_SEASONALITY_RANGE,
};
use budget_forecaster::config::AppConfig;
use budget_forecaster::data::DataLoader;
use budget_forecaster::forecast::ForecastEngine;
use budget_forecaster::report::ReportGenerator;
use budget_forecaster::session::ForecastSession;
use budget_forecaster::stats::StatsCalculator;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "budget-forecaster")]
#[command(about = "Per-category sales budget forecasting", long_about = None)]
struct Cli {
    /// JSON config file (layout, forecast settings, annualization)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast all categories and write CSV tables
    Report {
        /// Sales sheet (xlsx, xls, ods or csv)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "forecast_output")]
        out: PathBuf,

        /// Fit categories one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Browse forecasts and try adjustments interactively
    Explore {
        /// Sales sheet (xlsx, xls, ods or csv)
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Report {
            input,
            out,
            sequential,
        } => run_report(config, &input, &out, sequential),
        Commands::Explore { input } => run_explore(config, &input),
    }
}

fn load(loader: &DataLoader, path: &Path) -> Result<budget_forecaster::data::SalesTable> {
    let table = loader
        .load_path(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    info!(
        "Loaded {} rows, {} categories from {}",
        table.len(),
        table.categories().len(),
        path.display()
    );
    Ok(table)
}

fn run_report(mut config: AppConfig, input: &Path, out: &Path, sequential: bool) -> Result<()> {
    if sequential {
        config.forecast.parallel = false;
    }
    let loader = DataLoader::new(config.layout.clone());
    let table = load(&loader, input)?;
    let engine = ForecastEngine::from_settings(config.forecast.clone())
        .context("Invalid forecast settings")?;

    let batch = engine.forecast_all(&table);
    if !batch.skipped.is_empty() {
        warn!("{} categories skipped", batch.skipped.len());
    }

    let target = config.forecast.target_year;
    let summary = StatsCalculator::summarize(&batch);
    let comparison = StatsCalculator::compare(&table, &batch, config.annualization);
    let overview = StatsCalculator::overview(&table, &batch, config.annualization);

    println!("{}", ReportGenerator::render_summary(&summary));
    println!(
        "{}",
        ReportGenerator::render_comparison(&comparison, table.year_a(), table.year_b(), target)
    );
    println!(
        "{}",
        ReportGenerator::render_overview(&overview, table.year_a(), table.year_b(), target)
    );

    let manifest = ReportGenerator::write(out, &table, &batch, config.annualization)
        .context("Failed to write report")?;
    println!(
        "{} forecasts, {} skipped, {} files in {}",
        batch.len(),
        batch.skipped.len(),
        manifest.file_count(),
        manifest.dir.display()
    );
    Ok(())
}

const HELP: &str = "\
Commands:
  list                         forecast categories
  overview                     totals across all categories
  show <category>              monthly plan under the current mode
  compare                      actuals against projections
  mode <automatic|manual|hybrid>
  adjust <growth%> <multiplier>
  load <file>                  replace the dataset
  skipped                      categories without a forecast
  help
  quit";

fn run_explore(config: AppConfig, input: &Path) -> Result<()> {
    let loader = DataLoader::new(config.layout.clone());
    let table = load(&loader, input)?;
    let engine = ForecastEngine::from_settings(config.forecast.clone())
        .context("Invalid forecast settings")?;
    let mut session = ForecastSession::new(engine, config.annualization, table);

    println!("{}", HELP);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("[{}]> ", session.mode());
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let (command, arg) = match line.trim().split_once(char::is_whitespace) {
            Some((c, rest)) => (c, rest.trim()),
            None => (line.trim(), ""),
        };

        match command {
            "" => {}
            "quit" | "exit" | "q" => break,
            "help" => println!("{}", HELP),
            other => {
                if let Err(e) = explore_command(&mut session, &loader, other, arg) {
                    println!("error: {:#}", e);
                }
            }
        }
    }
    Ok(())
}

fn explore_command(
    session: &mut ForecastSession,
    loader: &DataLoader,
    command: &str,
    arg: &str,
) -> Result<()> {
    let year_a = session.table().year_a();
    let year_b = session.table().year_b();
    let target = session.engine().settings().target_year;

    match command {
        "list" => {
            for category in session.forecasts().categories() {
                println!("{}", category);
            }
        }
        "overview" => {
            let overview = session.overview();
            println!("{}", ReportGenerator::render_overview(&overview, year_a, year_b, target));
        }
        "compare" => {
            let records = session.comparison();
            println!("{}", ReportGenerator::render_comparison(&records, year_a, year_b, target));
        }
        "skipped" => {
            let skipped = &session.forecasts().skipped;
            if skipped.is_empty() {
                println!("No skipped categories");
            } else {
                print!("{}", ReportGenerator::render_skipped(skipped));
            }
        }
        "show" => {
            if arg.is_empty() {
                bail!("usage: show <category>");
            }
            if session.mode() == ForecastMode::Automatic {
                let Some(forecast) = session.forecasts().get(arg) else {
                    bail!("no forecast for '{}'", arg);
                };
                println!("{}", ReportGenerator::render_forecast(forecast));
            } else {
                let Some(plan) = session.plan(arg) else {
                    bail!("nothing to show for '{}'", arg);
                };
                println!("{}", ReportGenerator::render_plan(&plan));
            }
        }
        "mode" => {
            let mode: ForecastMode = arg.parse().map_err(anyhow::Error::msg)?;
            session.set_mode(mode);
            println!("Mode: {}", mode);
        }
        "adjust" => {
            let params = parse_adjustment(arg)?;
            session.set_params(params);
            println!(
                "Growth {:+.1}%, seasonality x{:.2}",
                params.growth_rate_pct, params.seasonality_multiplier
            );
            if session.mode() == ForecastMode::Automatic {
                println!("Adjustments apply in manual and hybrid modes");
            }
        }
        "load" => {
            if arg.is_empty() {
                bail!("usage: load <file>");
            }
            let table = load(loader, Path::new(arg))?;
            if session.load(table) {
                println!("Dataset replaced; forecasts will be refitted");
            } else {
                println!("Dataset unchanged; keeping forecasts");
            }
        }
        other => bail!("unknown command '{}', try help", other),
    }
    Ok(())
}

/// The shell keeps adjustments within its slider ranges.
fn parse_adjustment(arg: &str) -> Result<AdjustmentParams> {
    let parts: Vec<&str> = arg.split_whitespace().collect();
    let [growth, multiplier] = parts.as_slice() else {
        bail!("usage: adjust <growth%> <multiplier>");
    };
    let growth: f64 = growth
        .trim_end_matches('%')
        .parse()
        .with_context(|| format!("invalid growth '{}'", growth))?;
    let multiplier: f64 = multiplier
        .trim_start_matches('x')
        .parse()
        .with_context(|| format!("invalid multiplier '{}'", multiplier))?;

    let params = AdjustmentParams::new(growth, multiplier);
    if !params.within_ui_bounds() {
        bail!(
            "growth must be in {:?}% and multiplier in {:?}",
            UI_GROWTH_RANGE,
            UI_SEASONALITY_RANGE
        );
    }
    Ok(params)
}
