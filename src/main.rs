mod broker;
mod config;
mod engine;
mod indicators;
mod position;
mod risk;
mod session;
mod signals;
mod storage;
mod types;

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use broker::Broker;
use config::{load_config, BrokerCredentials, EngineConfig};
use engine::{filter_date_range, load_candles_csv, BacktestRunner, ExecutionLoop, TradingEngine};
use storage::{SqliteStore, TradeStore};

#[derive(Parser)]
#[command(name = "gold-trading-engine")]
#[command(version = "0.1.0")]
#[command(about = "Automated intraday trading engine for spot gold", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live engine until interrupted
    Live,
    /// Replay historical candles through the engine
    Backtest {
        /// Start date (YYYY-MM-DD, UTC)
        #[arg(long, default_value = "2024-06-01")]
        start: String,

        /// End date (YYYY-MM-DD, UTC)
        #[arg(long, default_value = "2024-08-31")]
        end: String,

        /// Initial equity
        #[arg(long, default_value_t = 10000.0)]
        equity: f64,

        /// Output directory for reports
        #[arg(long, default_value = "backtest_results")]
        output_dir: String,

        /// Directory containing m1.csv and m5.csv candle files
        #[arg(long, default_value = "data")]
        data_dir: String,

        /// Skip the per-trade CSV export
        #[arg(long)]
        no_csv: bool,

        /// Skip the JSON summary export
        #[arg(long)]
        no_json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Live => run_live(&cli.config).await,
        Commands::Backtest {
            start,
            end,
            equity,
            output_dir,
            data_dir,
            no_csv,
            no_json,
        } => {
            run_backtest(
                &cli.config,
                &start,
                &end,
                equity,
                &output_dir,
                &data_dir,
                no_csv,
                no_json,
            )
            .await
        }
    }
}

async fn run_live(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let credentials = BrokerCredentials::from_env()?;
    let broker = connect_venue(&config, &credentials)?;

    let store: Arc<dyn TradeStore> = Arc::new(SqliteStore::new(&config.database.url).await?);
    let engine = TradingEngine::new(config.clone(), broker, store);

    let running = Arc::new(AtomicBool::new(true));
    let stop_flag = running.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current cycle");
            stop_flag.store(false, Ordering::Release);
        }
    });

    let mut execution_loop = ExecutionLoop::new(
        engine,
        config.execution.cycle_interval_seconds,
        running,
    );
    execution_loop.initialize().await?;
    execution_loop.run().await;
    Ok(())
}

/// Resolve the live venue binding. The engine depends only on the
/// [`broker::Broker`] trait; wire your venue's implementation here.
fn connect_venue(
    _config: &EngineConfig,
    _credentials: &BrokerCredentials,
) -> Result<Arc<dyn Broker>> {
    bail!("no live venue binding is linked into this build; implement broker::Broker for your venue and register it in connect_venue")
}

#[allow(clippy::too_many_arguments)]
async fn run_backtest(
    config_path: &str,
    start: &str,
    end: &str,
    equity: f64,
    output_dir: &str,
    data_dir: &str,
    no_csv: bool,
    no_json: bool,
) -> Result<()> {
    let start_date = NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid start date {}: {} (use YYYY-MM-DD)", start, e))?;
    let end_date = NaiveDate::parse_from_str(end, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid end date {}: {} (use YYYY-MM-DD)", end, e))?;
    if start_date >= end_date {
        bail!("start date must be before end date");
    }
    let initial_equity =
        Decimal::try_from(equity).map_err(|e| anyhow!("invalid equity {}: {}", equity, e))?;

    let config = load_config(config_path)?;

    let data_dir = Path::new(data_dir);
    let m1 = filter_date_range(
        load_candles_csv(&data_dir.join("m1.csv"))?,
        start_date,
        end_date,
    );
    let m5 = filter_date_range(
        load_candles_csv(&data_dir.join("m5.csv"))?,
        start_date,
        end_date,
    );
    if m1.is_empty() || m5.is_empty() {
        bail!(
            "no candles in {} for {} to {}",
            data_dir.display(),
            start_date,
            end_date
        );
    }
    info!("loaded {} M1 and {} M5 candles", m1.len(), m5.len());

    let mut runner = BacktestRunner::new(config, m1, m5, start_date, end_date, initial_equity);
    let results = runner.run().await?;

    println!("{}", results);

    let output_dir = Path::new(output_dir);
    std::fs::create_dir_all(output_dir)?;
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");

    let report_path = output_dir.join(format!("backtest_report_{}.txt", timestamp));
    std::fs::write(&report_path, results.to_string())?;
    info!("report saved to {}", report_path.display());

    if !no_csv {
        let csv_path = output_dir.join(format!("backtest_trades_{}.csv", timestamp));
        if let Err(e) = results.export_csv(&csv_path) {
            error!("CSV export failed: {:#}", e);
        } else {
            info!("trades exported to {}", csv_path.display());
        }
    }

    if !no_json {
        let json_path = output_dir.join(format!("backtest_summary_{}.json", timestamp));
        if let Err(e) = results.export_json(&json_path) {
            error!("JSON export failed: {:#}", e);
        } else {
            info!("summary exported to {}", json_path.display());
        }
    }

    Ok(())
}
