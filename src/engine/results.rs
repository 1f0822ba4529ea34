use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::types::TradeRecord;

#[derive(Debug, Clone, Serialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResults {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub starting_equity: Decimal,
    pub final_equity: Decimal,
    pub total_return_percent: Decimal,
    pub max_drawdown_percent: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate_percent: Decimal,
    /// Gross profit over gross loss; absent with no losing trades.
    pub profit_factor: Option<Decimal>,
    pub total_signals: usize,
    pub exit_reasons: BTreeMap<String, usize>,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
}

impl BacktestResults {
    pub fn compute(
        start_date: NaiveDate,
        end_date: NaiveDate,
        starting_equity: Decimal,
        final_equity: Decimal,
        mut trades: Vec<TradeRecord>,
        total_signals: usize,
    ) -> Self {
        trades.sort_by_key(|t| t.exit_time);

        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.is_win()).count();
        let losing_trades = trades.iter().filter(|t| t.is_loss()).count();

        let win_rate_percent = if total_trades > 0 {
            Decimal::from(winning_trades as u32) / Decimal::from(total_trades as u32) * dec!(100)
        } else {
            Decimal::ZERO
        };

        let gross_profit: Decimal = trades.iter().filter(|t| t.is_win()).map(|t| t.pnl).sum();
        let gross_loss: Decimal = trades
            .iter()
            .filter(|t| t.is_loss())
            .map(|t| t.pnl.abs())
            .sum();
        let profit_factor = if gross_loss > Decimal::ZERO {
            Some(gross_profit / gross_loss)
        } else {
            None
        };

        let total_return_percent = if starting_equity > Decimal::ZERO {
            (final_equity - starting_equity) / starting_equity * dec!(100)
        } else {
            Decimal::ZERO
        };

        let mut exit_reasons: BTreeMap<String, usize> = BTreeMap::new();
        for trade in &trades {
            if let Some(reason) = &trade.exit_reason {
                *exit_reasons.entry(reason.clone()).or_default() += 1;
            }
        }

        let mut equity_curve = Vec::with_capacity(trades.len());
        let mut running = starting_equity;
        let mut peak = starting_equity;
        let mut max_drawdown_percent = Decimal::ZERO;
        for trade in &trades {
            running += trade.pnl;
            if let Some(exit_time) = trade.exit_time {
                equity_curve.push(EquityPoint {
                    time: exit_time,
                    equity: running,
                });
            }
            if running > peak {
                peak = running;
            }
            if peak > Decimal::ZERO {
                let drawdown = (peak - running) / peak * dec!(100);
                if drawdown > max_drawdown_percent {
                    max_drawdown_percent = drawdown;
                }
            }
        }

        Self {
            start_date,
            end_date,
            starting_equity,
            final_equity,
            total_return_percent,
            max_drawdown_percent,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate_percent,
            profit_factor,
            total_signals,
            exit_reasons,
            equity_curve,
            trades,
        }
    }

    /// Per-trade CSV export.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record([
            "ticket",
            "direction",
            "entry_time",
            "exit_time",
            "entry_price",
            "exit_price",
            "lot_size",
            "stop_loss",
            "take_profit",
            "pnl",
            "exit_reason",
            "hold_seconds",
        ])?;

        for trade in &self.trades {
            writer.write_record([
                trade.ticket.to_string(),
                trade.direction.to_string(),
                trade.entry_time.to_rfc3339(),
                trade
                    .exit_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                trade.entry_price.to_string(),
                trade
                    .exit_price
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                trade.lot_size.to_string(),
                trade.stop_loss.to_string(),
                trade.take_profit.to_string(),
                trade.pnl.to_string(),
                trade.exit_reason.clone().unwrap_or_default(),
                trade
                    .hold_seconds
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Summary JSON (everything but the raw trade and equity lists).
    pub fn export_json(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct Summary<'a> {
            start_date: NaiveDate,
            end_date: NaiveDate,
            starting_equity: Decimal,
            final_equity: Decimal,
            total_return_percent: Decimal,
            max_drawdown_percent: Decimal,
            total_trades: usize,
            winning_trades: usize,
            losing_trades: usize,
            win_rate_percent: Decimal,
            profit_factor: Option<Decimal>,
            total_signals: usize,
            exit_reasons: &'a BTreeMap<String, usize>,
        }

        let summary = Summary {
            start_date: self.start_date,
            end_date: self.end_date,
            starting_equity: self.starting_equity,
            final_equity: self.final_equity,
            total_return_percent: self.total_return_percent,
            max_drawdown_percent: self.max_drawdown_percent,
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            win_rate_percent: self.win_rate_percent,
            profit_factor: self.profit_factor,
            total_signals: self.total_signals,
            exit_reasons: &self.exit_reasons,
        };

        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

impl fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Results ===")?;
        writeln!(f, "Period:          {} to {}", self.start_date, self.end_date)?;
        writeln!(f, "Starting Equity: {:.2}", self.starting_equity)?;
        writeln!(f, "Final Equity:    {:.2}", self.final_equity)?;
        writeln!(f, "Total Return:    {:.2}%", self.total_return_percent)?;
        writeln!(f, "Max Drawdown:    {:.2}%", self.max_drawdown_percent)?;
        writeln!(f, "Signals:         {}", self.total_signals)?;
        writeln!(
            f,
            "Trades:          {} ({} wins / {} losses)",
            self.total_trades, self.winning_trades, self.losing_trades
        )?;
        writeln!(f, "Win Rate:        {:.1}%", self.win_rate_percent)?;
        match self.profit_factor {
            Some(pf) => writeln!(f, "Profit Factor:   {:.2}", pf)?,
            None => writeln!(f, "Profit Factor:   n/a")?,
        }
        if !self.exit_reasons.is_empty() {
            writeln!(f, "Exit Reasons:")?;
            for (reason, count) in &self.exit_reasons {
                writeln!(f, "  {:<20} {}", reason, count)?;
            }
        }
        Ok(())
    }
}
