use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Side;

/// Live view of a broker-side position. The broker is the source of truth;
/// the engine never mutates these directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub profit: Decimal,
    pub time: DateTime<Utc>,
}

impl Position {
    /// Signed unrealized return relative to entry, in percent.
    pub fn profit_percent(&self, current_price: Decimal) -> Decimal {
        if self.price_open.is_zero() {
            return Decimal::ZERO;
        }
        let favorable = match self.side {
            Side::Buy => current_price - self.price_open,
            Side::Sell => self.price_open - current_price,
        };
        favorable / self.price_open * Decimal::from(100)
    }

    pub fn stop_distance(&self) -> Decimal {
        (self.price_open - self.sl).abs()
    }
}

/// One executed leg from the broker's deal history, used to reconcile
/// positions the broker closed on its own (SL/TP server-side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub price: Decimal,
    pub profit: Decimal,
    pub comment: String,
    pub time: DateTime<Utc>,
    pub is_exit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub fraction_closed: Decimal,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// Persisted trade row. Entry fields are written at order time, exit fields
/// when the position closes (by the engine or by the broker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ticket: u64,
    pub direction: Side,
    pub entry_price: Decimal,
    pub lot_size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub pnl: Decimal,
    pub hold_seconds: Option<i64>,
    pub partial_exits: Vec<PartialExit>,
    pub signal_id: Option<Uuid>,
}

impl TradeRecord {
    pub fn is_loss(&self) -> bool {
        self.pnl < Decimal::ZERO
    }

    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }

    pub fn is_stopout(&self) -> bool {
        self.exit_reason.as_deref() == Some("stop_loss")
    }
}
