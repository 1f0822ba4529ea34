#![allow(dead_code)]
pub mod candle;
pub mod position;
pub mod signal;

pub use candle::*;
pub use position::*;
pub use signal::*;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Instrument constants. Every point/price conversion in the engine goes
/// through this type; nothing else hard-codes the point size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    /// Minimum price increment (0.01 for XAUUSD).
    pub point: Decimal,
    /// Account-currency value of a one-point move per lot ($100 for XAUUSD,
    /// where 1 lot = 100 oz).
    pub point_value_per_lot: Decimal,
}

impl Instrument {
    pub fn points_to_price(&self, points: Decimal) -> Decimal {
        points * self.point
    }

    pub fn price_to_points(&self, price_delta: Decimal) -> Decimal {
        price_delta / self.point
    }

    /// Risk amount R = stop_distance_points * point_value_per_lot * lots.
    pub fn risk_amount(&self, stop_distance_points: Decimal, lots: Decimal) -> Decimal {
        stop_distance_points * self.point_value_per_lot * lots
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            point: dec!(0.01),
            point_value_per_lot: dec!(100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: Decimal,
    pub balance: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub margin_level: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread_points: Decimal,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_opposite_roundtrips() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite().opposite(), Side::Sell);
    }

    #[test]
    fn instrument_point_conversions() {
        let inst = Instrument::default();
        assert_eq!(inst.points_to_price(dec!(30)), dec!(0.30));
        assert_eq!(inst.price_to_points(dec!(0.30)), dec!(30));
        assert_eq!(inst.risk_amount(dec!(33), dec!(0.02)), dec!(66));
    }
}
