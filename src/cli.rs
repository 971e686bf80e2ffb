//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::config::{DataSource, RunConfig};
use crate::domain::error::WfoError;
use crate::domain::market_data::MarketDataStore;
use crate::domain::schedule::{build_schedule, generate_windows};
use crate::domain::search::SearchMode;
use crate::domain::walk_forward::{RunReport, run_walk_forward};
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

const DEFAULT_OUTPUT: &str = "wfo_report.json";

#[derive(Parser, Debug)]
#[command(
    name = "wfotrader",
    about = "Walk-forward portfolio backtester and parameter optimiser"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the walk-forward optimisation and write a JSON report
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration without loading data
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show dataset coverage and the window schedule
    Info {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Run { config, output } => run_optimisation(&config, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::Info { config } => run_info(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, WfoError> {
    FileConfigAdapter::from_file(path).map_err(|reason| WfoError::ConfigParse {
        file: path.display().to_string(),
        reason,
    })
}

/// Parse and validate a run configuration. Relative data paths resolve
/// against the directory holding the config file.
pub fn load_run_config(path: &Path) -> Result<RunConfig, WfoError> {
    eprintln!("Loading config from {}", path.display());
    let adapter = load_config(path)?;
    let mut config = RunConfig::from_config(&adapter)?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    match &mut config.data.source {
        DataSource::Csv { prices, factors } => {
            *prices = resolve(base, prices);
            if let Some(f) = factors {
                *f = resolve(base, f);
            }
        }
        DataSource::Sqlite { path, .. } => *path = resolve(base, path),
    }

    Ok(config)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn build_data_port(source: &DataSource) -> Result<Box<dyn DataPort>, WfoError> {
    match source {
        DataSource::Csv { prices, factors } => {
            Ok(Box::new(CsvAdapter::new(prices.clone(), factors.clone())))
        }
        #[cfg(feature = "sqlite")]
        DataSource::Sqlite {
            path,
            pool_size,
            factor_tables,
        } => {
            use crate::adapters::sqlite_adapter::SqliteAdapter;
            Ok(Box::new(SqliteAdapter::new(
                path,
                *pool_size,
                factor_tables.clone(),
            )?))
        }
        #[cfg(not(feature = "sqlite"))]
        DataSource::Sqlite { .. } => Err(WfoError::invalid(
            "data",
            "source",
            "sqlite support was not compiled in",
        )),
    }
}

pub fn load_store(config: &RunConfig) -> Result<MarketDataStore, WfoError> {
    let port = build_data_port(&config.data.source)?;
    eprintln!(
        "Loading data {} to {} ({} warm-up days)",
        config.load_start(),
        config.end(),
        config.data.warmup_days
    );
    MarketDataStore::load(
        port.as_ref(),
        config.load_start(),
        config.end(),
        config.data.max_factor_staleness,
    )
}

fn run_optimisation(config_path: &Path, output_path: Option<&Path>) -> Result<(), WfoError> {
    let config = load_run_config(config_path)?;
    let store = load_store(&config)?;

    eprintln!(
        "Running walk-forward: {} to {}, {} candidates per window",
        config.start(),
        config.end(),
        config.candidates_per_window()
    );
    let report = run_walk_forward(&store, &config)?;
    print_summary(&report);

    let output = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
    let output = output.to_str().ok_or_else(|| WfoError::Report {
        reason: format!("output path {} is not valid UTF-8", output.display()),
    })?;
    JsonReportAdapter::new().write(&report, output)?;
    eprintln!("\nReport written to: {}", output);

    Ok(())
}

fn describe_mode(mode: SearchMode) -> String {
    match mode {
        SearchMode::Grid => "grid".to_string(),
        SearchMode::Random { samples } => format!("random ({} samples)", samples),
    }
}

pub fn print_summary(report: &RunReport) {
    eprintln!("\n=== Windows ===");
    for result in &report.windows {
        let w = &result.window;
        let p = &result.parameters;
        eprintln!(
            "  #{:<2} test {} to {}  return {:>7.2}%  max dd {:>5.1}%  \
             [pf {:.2}, stop {:.2}, hold {}, every {}d]{}",
            w.index,
            w.test_start,
            w.test_end,
            result.metrics.total_return * 100.0,
            result.metrics.max_drawdown * 100.0,
            p.position_fraction,
            p.stop_loss_fraction,
            p.holding_count,
            p.rebalance_interval_days,
            if result.partial_data { "  (partial data)" } else { "" },
        );
    }
    for dropped in &report.dropped {
        eprintln!("  dropped: {}", dropped.reason);
    }

    let agg = &report.aggregate;
    eprintln!(
        "\n=== Aggregate ({} search, seed {}) ===",
        describe_mode(report.search_mode),
        report.seed
    );
    eprintln!("Windows:          {}", agg.windows);
    eprintln!("Total Return:     {:.2}%", agg.total_return * 100.0);
    eprintln!("CAGR:             {:.2}%", agg.cagr * 100.0);
    eprintln!("Max Drawdown:     -{:.1}%", agg.max_drawdown * 100.0);
    eprintln!("Window Win Rate:  {:.1}%", agg.win_rate * 100.0);
    eprintln!("Composite Score:  {:.4}", agg.composite_score);
    if report.partial_data {
        eprintln!("warning: some windows ran with missing data; see the report's issues");
    }
}

fn run_validate(config_path: &Path) -> Result<(), WfoError> {
    let config = load_run_config(config_path)?;
    let windows = generate_windows(&config.window);

    eprintln!("Config validated successfully");
    eprintln!("\nRange:     {} to {}", config.start(), config.end());
    eprintln!(
        "Windows:   {} (train {}, test {}, roll {})",
        windows.len(),
        config.window.train,
        config.window.test,
        config.window.roll
    );
    eprintln!("Search:    {}", describe_mode(config.search.mode));
    match config.space.grid_size() {
        Some(size) => eprintln!("Grid size: {}", size),
        None => eprintln!("Grid size: continuous (range axes)"),
    }
    eprintln!("Per window: {} candidates", config.candidates_per_window());
    eprintln!(
        "Factors:   {}",
        config
            .space
            .factor_weights
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}

fn run_info(config_path: &Path) -> Result<(), WfoError> {
    let config = load_run_config(config_path)?;
    let store = load_store(&config)?;

    let (Some(first), Some(last)) = (store.first_date(), store.last_date()) else {
        return Err(WfoError::NoData {
            start: config.load_start(),
            end: config.end(),
        });
    };
    println!(
        "{} instruments, {} trading days, {} to {}",
        store.instrument_count(),
        store.calendar().len(),
        first,
        last
    );

    let schedule = build_schedule(&config.window, &store);
    for scheduled in &schedule.windows {
        let w = &scheduled.window;
        println!(
            "window {}: train {} to {} ({} days), test {} to {} ({} days)",
            w.index,
            w.train_start,
            w.train_end,
            scheduled.train_days,
            w.test_start,
            w.test_end,
            scheduled.test_days
        );
    }
    for dropped in &schedule.dropped {
        println!("dropped {}", dropped.reason);
    }

    Ok(())
}
