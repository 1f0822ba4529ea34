#![allow(dead_code)]
pub mod sim;

pub use sim::*;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{AccountInfo, Candle, Deal, Position, Side, Tick};

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub deviation_points: Decimal,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub ticket: u64,
    pub fill_price: Decimal,
}

/// Narrow contract the engine depends on. The live implementation is an
/// external binding; the backtest uses [`SimBroker`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe_minutes: u32,
        count: usize,
    ) -> anyhow::Result<Vec<Candle>>;
    async fn get_tick(&self, symbol: &str) -> anyhow::Result<Tick>;
    async fn get_account(&self) -> anyhow::Result<AccountInfo>;
    async fn get_open_positions(&self, symbol: &str) -> anyhow::Result<Vec<Position>>;
    async fn place_order(&self, request: OrderRequest) -> anyhow::Result<OrderResult>;
    async fn modify_sl(&self, ticket: u64, sl: Decimal) -> anyhow::Result<()>;
    /// Close the position (fully, or partially when `volume` is given) and
    /// return the fill price.
    async fn close_position(&self, ticket: u64, volume: Option<Decimal>) -> anyhow::Result<Decimal>;
    /// Deal history for a ticket, used to reconcile broker-side closes.
    async fn position_history(&self, ticket: u64) -> anyhow::Result<Vec<Deal>>;
}
