pub mod memory;
pub mod sqlite;

pub use memory::*;
pub use sqlite::*;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::risk::CircuitBreakerEvent;
use crate::types::{PartialExit, Signal, TradeRecord};

/// Persistence collaborator. Writes are idempotent upserts keyed on ticket;
/// the engine owns no SQL beyond this interface.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn record_signal(&self, signal: &Signal) -> Result<()>;
    async fn record_trade_entry(&self, trade: &TradeRecord) -> Result<()>;
    async fn record_trade_exit(
        &self,
        ticket: u64,
        exit_price: Decimal,
        pnl: Decimal,
        hold_seconds: i64,
        exit_reason: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<()>;
    async fn record_partial_close(&self, ticket: u64, partial: &PartialExit) -> Result<()>;
    async fn record_event(&self, event: &CircuitBreakerEvent) -> Result<()>;
    /// Closed trades, most recent exit first.
    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>>;
    /// Realized P&L of trades exited on the given UTC date.
    async fn session_pnl(&self, date: NaiveDate) -> Result<Decimal>;
    async fn trade_by_ticket(&self, ticket: u64) -> Result<Option<TradeRecord>>;
}
