use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::risk::CircuitBreakerEvent;
use crate::types::{PartialExit, Signal, TradeRecord};

use super::TradeStore;

#[derive(Default)]
struct MemoryState {
    signals: Vec<Signal>,
    trades: HashMap<u64, TradeRecord>,
    order: Vec<u64>,
    events: Vec<CircuitBreakerEvent>,
}

/// In-memory store used by the backtest driver; mirrors the SQLite store's
/// observable behavior without any I/O.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_trades(&self) -> Vec<TradeRecord> {
        let state = self.state.lock().expect("memory store poisoned");
        state
            .order
            .iter()
            .filter_map(|t| state.trades.get(t).cloned())
            .collect()
    }

    pub fn closed_trades(&self) -> Vec<TradeRecord> {
        self.all_trades()
            .into_iter()
            .filter(|t| t.exit_time.is_some())
            .collect()
    }

    pub fn signal_count(&self) -> usize {
        self.state.lock().expect("memory store poisoned").signals.len()
    }

    pub fn events(&self) -> Vec<CircuitBreakerEvent> {
        self.state.lock().expect("memory store poisoned").events.clone()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn record_signal(&self, signal: &Signal) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        state.signals.push(signal.clone());
        Ok(())
    }

    async fn record_trade_entry(&self, trade: &TradeRecord) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        if !state.trades.contains_key(&trade.ticket) {
            state.order.push(trade.ticket);
        }
        state.trades.insert(trade.ticket, trade.clone());
        Ok(())
    }

    async fn record_trade_exit(
        &self,
        ticket: u64,
        exit_price: Decimal,
        pnl: Decimal,
        hold_seconds: i64,
        exit_reason: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        if let Some(trade) = state.trades.get_mut(&ticket) {
            trade.exit_price = Some(exit_price);
            trade.exit_time = Some(exit_time);
            trade.exit_reason = Some(exit_reason.to_string());
            trade.pnl = pnl;
            trade.hold_seconds = Some(hold_seconds);
        }
        Ok(())
    }

    async fn record_partial_close(&self, ticket: u64, partial: &PartialExit) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        if let Some(trade) = state.trades.get_mut(&ticket) {
            trade.partial_exits.push(partial.clone());
        }
        Ok(())
    }

    async fn record_event(&self, event: &CircuitBreakerEvent) -> Result<()> {
        let mut state = self.state.lock().expect("memory store poisoned");
        state.events.push(event.clone());
        Ok(())
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let state = self.state.lock().expect("memory store poisoned");
        let mut closed: Vec<TradeRecord> = state
            .trades
            .values()
            .filter(|t| t.exit_time.is_some())
            .cloned()
            .collect();
        closed.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
        closed.truncate(limit);
        Ok(closed)
    }

    async fn session_pnl(&self, date: NaiveDate) -> Result<Decimal> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state
            .trades
            .values()
            .filter(|t| t.exit_time.map(|e| e.date_naive()) == Some(date))
            .map(|t| t.pnl)
            .sum())
    }

    async fn trade_by_ticket(&self, ticket: u64) -> Result<Option<TradeRecord>> {
        let state = self.state.lock().expect("memory store poisoned");
        Ok(state.trades.get(&ticket).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use crate::types::Side;

    fn trade(ticket: u64, entry_hour: u32) -> TradeRecord {
        TradeRecord {
            ticket,
            direction: Side::Buy,
            entry_price: dec!(2000),
            lot_size: dec!(0.02),
            stop_loss: dec!(1998),
            take_profit: dec!(2002.4),
            entry_time: Utc.with_ymd_and_hms(2024, 6, 3, entry_hour, 0, 0).unwrap(),
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl: Decimal::ZERO,
            hold_seconds: None,
            partial_exits: Vec::new(),
            signal_id: None,
        }
    }

    #[tokio::test]
    async fn entry_then_exit_produces_one_completed_row() {
        let store = MemoryStore::new();
        store.record_trade_entry(&trade(1, 9)).await.unwrap();
        let exit_time = Utc.with_ymd_and_hms(2024, 6, 3, 9, 10, 0).unwrap();
        store
            .record_trade_exit(1, dec!(2002.4), dec!(48), 600, "take_profit", exit_time)
            .await
            .unwrap();

        let trades = store.closed_trades();
        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.exit_price, Some(dec!(2002.4)));
        assert_eq!(t.exit_reason.as_deref(), Some("take_profit"));
        assert_eq!(t.hold_seconds, Some(600));
    }

    #[tokio::test]
    async fn re_recording_an_entry_is_idempotent() {
        let store = MemoryStore::new();
        store.record_trade_entry(&trade(1, 9)).await.unwrap();
        store.record_trade_entry(&trade(1, 9)).await.unwrap();
        assert_eq!(store.all_trades().len(), 1);
    }

    #[tokio::test]
    async fn recent_trades_returns_newest_first() {
        let store = MemoryStore::new();
        for (ticket, hour) in [(1u64, 9u32), (2, 10), (3, 11)] {
            store.record_trade_entry(&trade(ticket, hour)).await.unwrap();
            let exit = Utc.with_ymd_and_hms(2024, 6, 3, hour, 30, 0).unwrap();
            store
                .record_trade_exit(ticket, dec!(2001), dec!(10), 1800, "take_profit", exit)
                .await
                .unwrap();
        }
        let recent = store.recent_trades(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ticket, 3);
        assert_eq!(recent[1].ticket, 2);
    }

    #[tokio::test]
    async fn session_pnl_sums_only_that_date() {
        let store = MemoryStore::new();
        store.record_trade_entry(&trade(1, 9)).await.unwrap();
        store
            .record_trade_exit(
                1,
                dec!(2001),
                dec!(25),
                60,
                "take_profit",
                Utc.with_ymd_and_hms(2024, 6, 3, 9, 1, 0).unwrap(),
            )
            .await
            .unwrap();
        store.record_trade_entry(&trade(2, 9)).await.unwrap();
        store
            .record_trade_exit(
                2,
                dec!(1999),
                dec!(-15),
                60,
                "stop_loss",
                Utc.with_ymd_and_hms(2024, 6, 4, 9, 1, 0).unwrap(),
            )
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(store.session_pnl(date).await.unwrap(), dec!(25));
    }
}
