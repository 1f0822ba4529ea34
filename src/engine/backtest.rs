use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use crate::broker::SimBroker;
use crate::config::EngineConfig;
use crate::storage::MemoryStore;
use crate::types::Candle;

use super::core::TradingEngine;
use super::results::BacktestResults;

/// Replays historical candles through the live decision logic on a
/// simulated 30-second cadence. The broker is a [`SimBroker`], the store an
/// in-memory [`MemoryStore`]; everything else is the live component set.
pub struct BacktestRunner {
    config: EngineConfig,
    engine: TradingEngine,
    sim: Arc<SimBroker>,
    store: Arc<MemoryStore>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_equity: Decimal,
}

impl BacktestRunner {
    pub fn new(
        config: EngineConfig,
        m1: Vec<Candle>,
        m5: Vec<Candle>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_equity: Decimal,
    ) -> Self {
        let sim = Arc::new(SimBroker::new(
            config.instrument.clone(),
            m1,
            m5,
            initial_equity,
            config.backtest.spread_points,
            config.execution.slippage_tolerance_points,
            config.backtest.slippage_seed,
        ));
        let store = Arc::new(MemoryStore::new());
        let engine = TradingEngine::new(config.clone(), sim.clone(), store.clone());

        Self {
            config,
            engine,
            sim,
            store,
            start_date,
            end_date,
            initial_equity,
        }
    }

    pub async fn run(&mut self) -> Result<BacktestResults> {
        info!(
            "starting backtest {} to {} with equity {:.2}",
            self.start_date, self.end_date, self.initial_equity
        );

        self.engine.initialize().await?;

        let cycle_seconds = self.config.execution.cycle_interval_seconds as i64;
        let mut last_cycle: Option<DateTime<Utc>> = None;
        let mut cycles: u64 = 0;

        loop {
            let now = match self.sim.current_time() {
                Some(t) => t,
                None => break,
            };

            if last_cycle.map_or(true, |t| (now - t).num_seconds() >= cycle_seconds) {
                if let Err(e) = self.engine.run_cycle(now).await {
                    error!("backtest cycle error at {}: {:#}", now, e);
                }
                last_cycle = Some(now);
                cycles += 1;
                if cycles % 1000 == 0 {
                    info!(
                        "processed {} cycles, {} trades so far",
                        cycles,
                        self.store.closed_trades().len()
                    );
                }
            }

            if !self.sim.advance() {
                break;
            }
        }

        // settle whatever is still open at the last price, then let the
        // position manager record those exits from the deal history
        let forced = self.sim.force_close_all();
        if !forced.is_empty() {
            info!("closed {} positions at end of data", forced.len());
        }
        if let Some(now) = self.sim.current_time() {
            self.engine.reconcile_positions(now).await?;
        }

        let halts = self
            .store
            .events()
            .iter()
            .filter(|e| e.kind == crate::risk::EventKind::Halt)
            .count();
        if halts > 0 {
            info!("circuit breaker halted trading {} times", halts);
        }

        let results = BacktestResults::compute(
            self.start_date,
            self.end_date,
            self.initial_equity,
            self.sim.equity(),
            self.store.closed_trades(),
            self.store.signal_count(),
        );
        info!(
            "backtest complete: {} trades, {:.2}% return",
            results.total_trades, results.total_return_percent
        );
        Ok(results)
    }
}

/// Load candles from a CSV file with a `time,open,high,low,close,volume`
/// header. Timestamps are RFC3339 or `YYYY-MM-DD HH:MM:SS` (taken as UTC).
pub fn load_candles_csv(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut candles = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < 6 {
            return Err(anyhow!(
                "{}: line {} has {} fields, expected 6",
                path.display(),
                line + 2,
                record.len()
            ));
        }
        candles.push(Candle {
            time: parse_candle_time(&record[0])
                .with_context(|| format!("{}: line {}", path.display(), line + 2))?,
            open: Decimal::from_str(record[1].trim())?,
            high: Decimal::from_str(record[2].trim())?,
            low: Decimal::from_str(record[3].trim())?,
            close: Decimal::from_str(record[4].trim())?,
            volume: Decimal::from_str(record[5].trim())?,
        });
    }

    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

fn parse_candle_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(t.and_utc());
    }
    Err(anyhow!("unrecognized timestamp: {}", raw))
}

/// Keep candles whose open time falls inside `[start, end]` (whole days).
pub fn filter_date_range(candles: Vec<Candle>, start: NaiveDate, end: NaiveDate) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| {
            let date = c.time.date_naive();
            date >= start && date <= end
        })
        .collect()
}
