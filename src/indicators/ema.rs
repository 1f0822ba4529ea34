use rust_decimal::Decimal;

use crate::types::Trend;

/// Exponential moving average series. Empty when there are fewer samples
/// than the period; the first value is the simple mean of the first
/// `period` samples, then `prev + k * (price - prev)` with
/// `k = 2 / (period + 1)`.
pub fn ema(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let k = Decimal::from(2) / Decimal::from(period as u32 + 1);
    let seed: Decimal = prices[..period].iter().sum::<Decimal>() / Decimal::from(period as u32);

    let mut values = Vec::with_capacity(prices.len() - period + 1);
    values.push(seed);

    for price in &prices[period..] {
        let prev = *values.last().expect("seeded above");
        values.push(prev + k * (*price - prev));
    }

    values
}

/// Classify the trend from the EMA slope over the trailing `lookback`
/// values. Slopes within 0.01% of the last EMA value count as neutral.
pub fn ema_trend(ema_values: &[Decimal], lookback: usize) -> Trend {
    if ema_values.len() < lookback || lookback < 2 {
        return Trend::Neutral;
    }

    let recent = &ema_values[ema_values.len() - lookback..];
    let last = recent[recent.len() - 1];
    let slope = last - recent[0];
    let threshold = last * Decimal::new(1, 4); // 0.01%

    if slope > threshold {
        Trend::Bullish
    } else if slope < -threshold {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}
