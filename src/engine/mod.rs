pub mod backtest;
pub mod core;
pub mod executor;
pub mod live;
pub mod results;

pub use backtest::*;
pub use core::*;
pub use executor::*;
pub use live::*;
pub use results::*;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::warn;

use crate::broker::Broker;
use crate::config::{AtrSettings, StructureSettings};
use crate::indicators::{atr, atr_average, ema, rsi, swing_points, SwingPoints};
use crate::types::{clean_candles, closes, highs, lows, Candle, Instrument, Tick};

/// Candle counts fetched per cycle; enough history for EMA21 and ATR14.
const CANDLE_FETCH_COUNT: usize = 30;
/// Minimum candles per timeframe after validation.
const MIN_CANDLES: usize = 10;

/// Everything one cycle's decision logic needs, computed once. ATR crosses
/// the price/points boundary here and nowhere else.
pub struct MarketSnapshot {
    pub m1_candles: Vec<Candle>,
    pub m5_candles: Vec<Candle>,
    pub tick: Tick,
    pub current_price: Decimal,
    pub m5_ema21: Vec<Decimal>,
    pub m1_rsi: Vec<Decimal>,
    pub m5_rsi: Vec<Decimal>,
    pub atr_points: Decimal,
    pub atr_average_points: Decimal,
    pub swings: SwingPoints,
}

/// Fetch candles and tick, validate, and compute the cycle's indicators.
/// Returns `None` on data problems (too few candles after cleaning); the
/// caller skips the cycle.
pub async fn fetch_snapshot(
    broker: &dyn Broker,
    instrument: &Instrument,
    structure: &StructureSettings,
    atr_settings: &AtrSettings,
) -> Result<Option<MarketSnapshot>> {
    let m1_raw = broker
        .get_candles(&instrument.symbol, 1, CANDLE_FETCH_COUNT)
        .await?;
    let m5_raw = broker
        .get_candles(&instrument.symbol, 5, CANDLE_FETCH_COUNT)
        .await?;

    let m1_candles = clean_candles(m1_raw);
    let m5_candles = clean_candles(m5_raw);
    if m1_candles.len() < MIN_CANDLES || m5_candles.len() < MIN_CANDLES {
        warn!(
            "insufficient candles after validation: m1={} m5={}",
            m1_candles.len(),
            m5_candles.len()
        );
        return Ok(None);
    }

    let tick = broker.get_tick(&instrument.symbol).await?;

    let m5_closes = closes(&m5_candles);
    let m1_closes = closes(&m1_candles);

    let m5_ema21 = ema(&m5_closes, 21);
    let m1_rsi = rsi(&m1_closes, 14);
    let m5_rsi = rsi(&m5_closes, 14);

    let atr_series = atr(&highs(&m5_candles), &lows(&m5_candles), &m5_closes, 14);
    let atr_points_series: Vec<Decimal> = atr_series
        .iter()
        .map(|v| instrument.price_to_points(*v))
        .collect();
    let atr_points = atr_points_series.last().copied().unwrap_or(Decimal::ZERO);
    let atr_average_points = atr_average(&atr_points_series, atr_settings.average_period);

    let swings = swing_points(&m5_candles, structure.swing_point_lookback);
    let current_price = tick.mid();

    Ok(Some(MarketSnapshot {
        m1_candles,
        m5_candles,
        tick,
        current_price,
        m5_ema21,
        m1_rsi,
        m5_rsi,
        atr_points,
        atr_average_points,
        swings,
    }))
}
