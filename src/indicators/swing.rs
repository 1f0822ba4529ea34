use rust_decimal::Decimal;

use crate::types::Candle;

/// Swing levels found in the trailing lookback window, in candle order.
#[derive(Debug, Clone, Default)]
pub struct SwingPoints {
    pub highs: Vec<Decimal>,
    pub lows: Vec<Decimal>,
}

impl SwingPoints {
    pub fn lowest_low(&self) -> Option<Decimal> {
        self.lows.iter().min().copied()
    }

    pub fn highest_low(&self) -> Option<Decimal> {
        self.lows.iter().max().copied()
    }

    pub fn lowest_high(&self) -> Option<Decimal> {
        self.highs.iter().min().copied()
    }

    pub fn highest_high(&self) -> Option<Decimal> {
        self.highs.iter().max().copied()
    }
}

/// A swing high is an interior candle whose high strictly exceeds both
/// neighbors; swing lows mirror on the lows. Only the trailing `lookback`
/// candles are scanned.
pub fn swing_points(candles: &[Candle], lookback: usize) -> SwingPoints {
    if candles.len() < lookback || lookback < 3 {
        return SwingPoints::default();
    }

    let recent = &candles[candles.len() - lookback..];
    let mut points = SwingPoints::default();

    for i in 1..recent.len() - 1 {
        if recent[i].high > recent[i - 1].high && recent[i].high > recent[i + 1].high {
            points.highs.push(recent[i].high);
        }
        if recent[i].low < recent[i - 1].low && recent[i].low < recent[i + 1].low {
            points.lows.push(recent[i].low);
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal) -> Candle {
        Candle {
            time: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            open: (high + low) / dec!(2),
            high,
            low,
            close: (high + low) / dec!(2),
            volume: dec!(10),
        }
    }

    #[test]
    fn identifies_interior_extremes() {
        let candles = vec![
            candle(dec!(2002), dec!(2000)),
            candle(dec!(2005), dec!(2001)), // swing high at 2005
            candle(dec!(2003), dec!(1999)), // swing low at 1999
            candle(dec!(2004), dec!(2000)),
        ];
        let points = swing_points(&candles, 4);
        assert_eq!(points.highs, vec![dec!(2005)]);
        assert_eq!(points.lows, vec![dec!(1999)]);
    }

    #[test]
    fn edges_are_never_swings() {
        let candles = vec![
            candle(dec!(2010), dec!(2000)),
            candle(dec!(2005), dec!(2001)),
            candle(dec!(2006), dec!(2002)),
        ];
        let points = swing_points(&candles, 3);
        assert!(points.highs.is_empty());
        assert!(points.lows.is_empty());
    }

    #[test]
    fn equal_highs_are_not_swings() {
        let candles = vec![
            candle(dec!(2005), dec!(2000)),
            candle(dec!(2005), dec!(2001)),
            candle(dec!(2003), dec!(2002)),
        ];
        let points = swing_points(&candles, 3);
        assert!(points.highs.is_empty());
    }

    #[test]
    fn empty_when_insufficient_candles() {
        let candles = vec![candle(dec!(2005), dec!(2000)); 2];
        let points = swing_points(&candles, 10);
        assert!(points.highs.is_empty() && points.lows.is_empty());
    }
}
