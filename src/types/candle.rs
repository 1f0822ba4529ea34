use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// OHLC integrity: low <= open,close <= high and all prices positive.
    pub fn is_valid(&self) -> bool {
        self.open > Decimal::ZERO
            && self.high > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }

    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> Decimal {
        self.high - self.close.max(self.open)
    }

    pub fn lower_wick(&self) -> Decimal {
        self.close.min(self.open) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn body_ratio(&self) -> Decimal {
        let range = self.range();
        if range.is_zero() {
            return Decimal::ZERO;
        }
        self.body_size() / range
    }

    /// Larger of the two wicks relative to total range; 1.0 means the whole
    /// range is wick.
    pub fn wick_ratio(&self) -> Decimal {
        let range = self.range();
        if range.is_zero() {
            return Decimal::ZERO;
        }
        self.upper_wick().max(self.lower_wick()) / range
    }

    /// True when the candle's range spans the level (high >= level >= low).
    pub fn touches(&self, level: Decimal) -> bool {
        self.low <= level && level <= self.high
    }
}

/// Drop candles that fail OHLC validation before they reach the indicators.
pub fn clean_candles(candles: Vec<Candle>) -> Vec<Candle> {
    candles.into_iter().filter(Candle::is_valid).collect()
}

pub fn closes(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.close).collect()
}

pub fn highs(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.high).collect()
}

pub fn lows(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.low).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            time: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(100),
        }
    }

    #[test]
    fn validates_price_relationships() {
        assert!(candle(dec!(2000), dec!(2002), dec!(1999), dec!(2001)).is_valid());
        // close above high
        assert!(!candle(dec!(2000), dec!(2002), dec!(1999), dec!(2003)).is_valid());
        // non-positive price
        assert!(!candle(dec!(0), dec!(2002), dec!(1999), dec!(2001)).is_valid());
    }

    #[test]
    fn clean_drops_invalid_candles() {
        let cleaned = clean_candles(vec![
            candle(dec!(2000), dec!(2002), dec!(1999), dec!(2001)),
            candle(dec!(2000), dec!(1999), dec!(1999), dec!(2001)),
        ]);
        assert_eq!(cleaned.len(), 1);
    }

    #[test]
    fn body_and_wick_metrics() {
        let c = candle(dec!(2000), dec!(2004), dec!(1999), dec!(2003));
        assert_eq!(c.body_size(), dec!(3));
        assert_eq!(c.range(), dec!(5));
        assert_eq!(c.upper_wick(), dec!(1));
        assert_eq!(c.lower_wick(), dec!(1));
        assert_eq!(c.body_ratio(), dec!(0.6));
        assert_eq!(c.wick_ratio(), dec!(0.2));
        assert!(c.is_bullish());
    }

    #[test]
    fn flat_candle_ratios_are_zero() {
        let c = candle(dec!(2000), dec!(2000), dec!(2000), dec!(2000));
        assert_eq!(c.body_ratio(), Decimal::ZERO);
        assert_eq!(c.wick_ratio(), Decimal::ZERO);
    }
}
