use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::storage::TradeStore;
use crate::types::{Candle, Deal, Instrument, PartialExit, Position, Side};

use super::exit_strategy::{ExitAction, ExitReason, ExitStrategy};

#[derive(Debug, Default, Clone)]
struct PartialState {
    tier1_done: bool,
    closed_percent: Decimal,
}

/// Reconciles broker positions each cycle and dispatches exits. Owns the
/// partial-exit progress and the previous-cycle ticket set; the broker
/// remains the source of truth for open positions.
pub struct PositionManager {
    broker: Arc<dyn Broker>,
    store: Arc<dyn TradeStore>,
    exit_strategy: ExitStrategy,
    instrument: Instrument,
    partial_exits: HashMap<u64, PartialState>,
    previous_tickets: HashSet<u64>,
}

impl PositionManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn TradeStore>,
        exit_strategy: ExitStrategy,
        instrument: Instrument,
    ) -> Self {
        Self {
            broker,
            store,
            exit_strategy,
            instrument,
            partial_exits: HashMap::new(),
            previous_tickets: HashSet::new(),
        }
    }

    /// Prime the ticket set at startup so positions that were already open
    /// do not read as broker closes on the first cycle.
    pub fn seed_tickets(&mut self, positions: &[Position]) {
        self.previous_tickets = positions.iter().map(|p| p.ticket).collect();
    }

    /// One monitoring pass: reconcile broker-side closes, then evaluate and
    /// dispatch exits for each live position. Individual position failures
    /// are logged and skipped; they never abort the cycle.
    pub async fn monitor(
        &mut self,
        current_price: Decimal,
        m1_candles: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let positions = self
            .broker
            .get_open_positions(&self.instrument.symbol)
            .await?;
        let current_tickets: HashSet<u64> = positions.iter().map(|p| p.ticket).collect();

        let closed_by_broker: Vec<u64> = self
            .previous_tickets
            .difference(&current_tickets)
            .copied()
            .collect();
        for ticket in closed_by_broker {
            if let Err(e) = self.reconcile_broker_close(ticket).await {
                error!("failed to reconcile broker close for {}: {:#}", ticket, e);
            }
            self.partial_exits.remove(&ticket);
        }

        let mut still_open = current_tickets.clone();
        for position in &positions {
            match self
                .dispatch_exit(position, current_price, m1_candles, now)
                .await
            {
                Ok(closed) => {
                    if closed {
                        still_open.remove(&position.ticket);
                    }
                }
                Err(e) => {
                    error!(
                        "exit evaluation failed for ticket {}: {:#}",
                        position.ticket, e
                    );
                }
            }
        }

        self.previous_tickets = still_open;
        Ok(())
    }

    /// A ticket vanished between cycles: pull the deal history and record
    /// the exit the broker already executed.
    async fn reconcile_broker_close(&self, ticket: u64) -> Result<()> {
        let deals = self.broker.position_history(ticket).await?;
        let exits: Vec<&Deal> = deals.iter().filter(|d| d.is_exit).collect();
        let last_exit = match exits.last() {
            Some(d) => *d,
            None => {
                warn!("no exit deal found for closed ticket {}", ticket);
                return Ok(());
            }
        };

        let pnl: Decimal = exits.iter().map(|d| d.profit).sum();
        let reason = infer_exit_reason(&last_exit.comment);

        let entry_time = match self.store.trade_by_ticket(ticket).await? {
            Some(trade) => trade.entry_time,
            None => deals
                .iter()
                .find(|d| !d.is_exit)
                .map(|d| d.time)
                .unwrap_or(last_exit.time),
        };
        let hold_seconds = (last_exit.time - entry_time).num_seconds();

        info!(
            "broker closed ticket {}: {} @ {:.2}, P&L {:.2}",
            ticket, reason, last_exit.price, pnl
        );
        self.store
            .record_trade_exit(
                ticket,
                last_exit.price,
                pnl,
                hold_seconds,
                reason.as_str(),
                last_exit.time,
            )
            .await
    }

    /// Returns true when the position was fully closed.
    async fn dispatch_exit(
        &mut self,
        position: &Position,
        current_price: Decimal,
        m1_candles: &[Candle],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let entry_time = match self.store.trade_by_ticket(position.ticket).await? {
            Some(trade) => trade.entry_time,
            None => position.time,
        };

        match self
            .exit_strategy
            .evaluate(position, current_price, m1_candles, entry_time, now)
        {
            ExitAction::Close(reason) => {
                self.close_full(position, reason, entry_time, now).await?;
                return Ok(true);
            }
            ExitAction::AdjustSl { new_sl } => {
                self.broker.modify_sl(position.ticket, new_sl).await?;
                info!(
                    "moved stop to break-even for ticket {}: {:.2}",
                    position.ticket, new_sl
                );
                // one action per cycle: the partial check waits for the next
                // monitoring pass
                return Ok(false);
            }
            ExitAction::Hold => {}
        }

        let tier1_done = self
            .partial_exits
            .get(&position.ticket)
            .map(|s| s.tier1_done)
            .unwrap_or(false);
        if let Some(decision) =
            self.exit_strategy
                .check_partial_exit(position, current_price, tier1_done)
        {
            self.close_partial(position, decision.close_percent, decision.move_sl_to_entry, now)
                .await?;
        }

        Ok(false)
    }

    async fn close_full(
        &mut self,
        position: &Position,
        reason: ExitReason,
        entry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let fill_price = self.broker.close_position(position.ticket, None).await?;
        let hold_seconds = (now - entry_time).num_seconds();

        info!(
            "closed ticket {}: {} @ {:.2}, P&L {:.2}",
            position.ticket, reason, fill_price, position.profit
        );
        self.store
            .record_trade_exit(
                position.ticket,
                fill_price,
                position.profit,
                hold_seconds,
                reason.as_str(),
                now,
            )
            .await?;
        self.partial_exits.remove(&position.ticket);
        Ok(())
    }

    async fn close_partial(
        &mut self,
        position: &Position,
        close_percent: Decimal,
        move_sl_to_entry: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let close_volume = (position.volume * close_percent / dec!(100)).round_dp(2);
        if close_volume <= Decimal::ZERO {
            return Ok(());
        }

        let fill_price = self
            .broker
            .close_position(position.ticket, Some(close_volume))
            .await?;

        let state = self.partial_exits.entry(position.ticket).or_default();
        state.tier1_done = true;
        state.closed_percent += close_percent;

        self.store
            .record_partial_close(
                position.ticket,
                &PartialExit {
                    fraction_closed: close_percent / dec!(100),
                    price: fill_price,
                    time: now,
                },
            )
            .await?;

        if move_sl_to_entry {
            let buffer = self.exit_strategy.breakeven_buffer();
            let new_sl = match position.side {
                Side::Buy => position.price_open + buffer,
                Side::Sell => position.price_open - buffer,
            };
            self.broker.modify_sl(position.ticket, new_sl).await?;
        }

        info!(
            "partial close ticket {}: {}% @ {:.2} (total {}%)",
            position.ticket, close_percent, fill_price, state.closed_percent
        );
        Ok(())
    }
}

/// Broker deal comments carry the close cause; "tp"/"sl" substrings decide,
/// anything else is an unattributed broker close.
fn infer_exit_reason(comment: &str) -> ExitReason {
    let lower = comment.to_lowercase();
    if lower.contains("end_of_data") {
        ExitReason::EndOfData
    } else if lower.contains("tp") || lower.contains("take profit") {
        ExitReason::TakeProfit
    } else if lower.contains("sl") || lower.contains("stop loss") {
        ExitReason::StopLoss
    } else {
        ExitReason::BrokerAutoClose
    }
}
