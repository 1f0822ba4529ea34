use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::StructureSettings;
use crate::indicators::SwingPoints;
use crate::types::{Candle, Instrument, Side, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureType {
    Uptrend,
    Downtrend,
    Pullback,
    None,
}

#[derive(Debug, Clone)]
pub struct Structure {
    pub trend: Trend,
    /// Highest swing low (nearest support from below).
    pub support: Decimal,
    /// Lowest swing high (nearest resistance from above).
    pub resistance: Decimal,
    pub structure_type: StructureType,
    pub current_price: Decimal,
    pub ema21: Decimal,
}

/// Classifies M5 market context: trend, key levels, and the price/EMA
/// relationship.
pub struct StructureAnalyzer {
    settings: StructureSettings,
    instrument: Instrument,
}

impl StructureAnalyzer {
    pub fn new(settings: StructureSettings, instrument: Instrument) -> Self {
        Self {
            settings,
            instrument,
        }
    }

    pub fn analyze(&self, m5_candles: &[Candle], ema21: &[Decimal], swings: &SwingPoints) -> Structure {
        let current_price = m5_candles.last().map(|c| c.close).unwrap_or(Decimal::ZERO);
        let current_ema = ema21.last().copied().unwrap_or(current_price);

        if m5_candles.is_empty() || ema21.is_empty() {
            return Structure {
                trend: Trend::Neutral,
                support: Decimal::ZERO,
                resistance: Decimal::ZERO,
                structure_type: StructureType::None,
                current_price,
                ema21: current_ema,
            };
        }

        let trend = crate::indicators::ema_trend(ema21, 3);
        let support = swings
            .highest_low()
            .unwrap_or(current_price * Decimal::new(999, 3));
        let resistance = swings
            .lowest_high()
            .unwrap_or(current_price * Decimal::new(1001, 3));

        let structure_type = match trend {
            Trend::Bullish => {
                if current_price > current_ema {
                    StructureType::Uptrend
                } else if self.is_pullback_to_ema(current_price, current_ema, None) {
                    StructureType::Pullback
                } else {
                    StructureType::None
                }
            }
            Trend::Bearish => {
                if current_price < current_ema {
                    StructureType::Downtrend
                } else if self.is_pullback_to_ema(current_price, current_ema, None) {
                    StructureType::Pullback
                } else {
                    StructureType::None
                }
            }
            Trend::Neutral => StructureType::None,
        };

        Structure {
            trend,
            support,
            resistance,
            structure_type,
            current_price,
            ema21: current_ema,
        }
    }

    /// Price must sit within the swing tolerance of the level; when candles
    /// are supplied, the level must also have been touched by at least
    /// `swing_min_bounces` of the trailing `swing_lookback_candles`.
    pub fn is_price_near_level(
        &self,
        price: Decimal,
        level: Decimal,
        candles: Option<&[Candle]>,
    ) -> bool {
        let tolerance = self
            .instrument
            .points_to_price(self.settings.swing_tolerance_points);
        if (price - level).abs() > tolerance {
            return false;
        }

        if let Some(candles) = candles {
            if candles.len() >= self.settings.swing_lookback_candles {
                let lookback = &candles[candles.len() - self.settings.swing_lookback_candles..];
                let bounces = lookback.iter().filter(|c| c.touches(level)).count();
                if bounces < self.settings.swing_min_bounces {
                    return false;
                }
            }
        }

        true
    }

    /// Proximity to the EMA, optionally confirmed by one of the last three
    /// M1 candles straddling it.
    pub fn is_pullback_to_ema(
        &self,
        price: Decimal,
        ema: Decimal,
        m1_candles: Option<&[Candle]>,
    ) -> bool {
        let tolerance = self
            .instrument
            .points_to_price(self.settings.ema_tolerance_points);
        if (price - ema).abs() > tolerance {
            return false;
        }

        if self.settings.ema_must_have_touched {
            if let Some(m1) = m1_candles {
                if m1.len() >= 3 {
                    let touched = m1[m1.len() - 3..].iter().any(|c| c.touches(ema));
                    if !touched {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// A bullish sweep is a wick that pierces the lowest swing low by the
    /// threshold and closes back above it; bearish mirrors on the highs.
    /// Only the last three candles are considered.
    pub fn detect_liquidity_sweep(
        &self,
        candles: &[Candle],
        swing_lows: Option<&[Decimal]>,
        swing_highs: Option<&[Decimal]>,
    ) -> bool {
        if !self.settings.liquidity_sweep_enabled || candles.len() < 3 {
            return false;
        }

        let threshold = self
            .instrument
            .points_to_price(self.settings.sweep_threshold_points);
        let recent = &candles[candles.len() - 3..];

        if let Some(lows) = swing_lows {
            if let Some(min_low) = lows.iter().min().copied() {
                let sweep_level = min_low - threshold;
                if recent
                    .iter()
                    .any(|c| c.low < sweep_level && c.close > min_low)
                {
                    return true;
                }
            }
        }

        if let Some(highs) = swing_highs {
            if let Some(max_high) = highs.iter().max().copied() {
                let sweep_level = max_high + threshold;
                if recent
                    .iter()
                    .any(|c| c.high > sweep_level && c.close < max_high)
                {
                    return true;
                }
            }
        }

        false
    }

    /// Breakout confirmation: the prior M1 candle tested the extreme swing
    /// level and the current one closes past it in the trade direction with
    /// the right color and body ratio >= 0.4. The legacy acceptance (prior
    /// close and current open both past the level) still counts.
    pub fn detect_breakout(
        &self,
        m1_candles: &[Candle],
        swing_highs: &[Decimal],
        swing_lows: &[Decimal],
        direction: Side,
    ) -> bool {
        if !self.settings.breakout_enabled || m1_candles.len() < 2 {
            return false;
        }

        let prev = &m1_candles[m1_candles.len() - 2];
        let current = &m1_candles[m1_candles.len() - 1];
        let min_body = Decimal::new(4, 1);

        match direction {
            Side::Buy => {
                let level = match swing_highs.iter().max().copied() {
                    Some(l) => l,
                    None => return false,
                };
                let confirmed = current.close > level
                    && prev.high >= level
                    && current.is_bullish()
                    && current.body_ratio() >= min_body;
                let legacy = prev.close > level && current.open > level;
                confirmed || legacy
            }
            Side::Sell => {
                let level = match swing_lows.iter().min().copied() {
                    Some(l) => l,
                    None => return false,
                };
                let confirmed = current.close < level
                    && prev.low <= level
                    && current.is_bearish()
                    && current.body_ratio() >= min_body;
                let legacy = prev.close < level && current.open < level;
                confirmed || legacy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            time: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(50),
        }
    }

    fn analyzer() -> StructureAnalyzer {
        StructureAnalyzer::new(StructureSettings::default(), Instrument::default())
    }

    #[test]
    fn uptrend_when_price_above_ema_in_bullish_trend() {
        let candles = vec![candle(dec!(2000), dec!(2005), dec!(1999), dec!(2004))];
        let ema = vec![dec!(2000), dec!(2000.5), dec!(2001)];
        let swings = SwingPoints {
            highs: vec![dec!(2006), dec!(2008)],
            lows: vec![dec!(1998), dec!(1996)],
        };
        let structure = analyzer().analyze(&candles, &ema, &swings);
        assert_eq!(structure.trend, Trend::Bullish);
        assert_eq!(structure.structure_type, StructureType::Uptrend);
        assert_eq!(structure.support, dec!(1998));
        assert_eq!(structure.resistance, dec!(2006));
    }

    #[test]
    fn pullback_when_price_sits_on_ema() {
        let candles = vec![candle(dec!(2001), dec!(2002), dec!(2000), dec!(2000.98))];
        let ema = vec![dec!(2000.5), dec!(2000.8), dec!(2001)];
        let structure = analyzer().analyze(&candles, &ema, &SwingPoints::default());
        assert_eq!(structure.structure_type, StructureType::Pullback);
    }

    #[test]
    fn near_level_respects_tolerance() {
        let a = analyzer();
        // 8 point tolerance = 0.08
        assert!(a.is_price_near_level(dec!(2000.05), dec!(2000), None));
        assert!(!a.is_price_near_level(dec!(2000.20), dec!(2000), None));
    }

    #[test]
    fn near_level_requires_bounces_when_candles_supplied() {
        let a = analyzer();
        // 15 candles that never touch the level
        let candles = vec![candle(dec!(2010), dec!(2012), dec!(2008), dec!(2011)); 15];
        assert!(!a.is_price_near_level(dec!(2000.01), dec!(2000), Some(&candles)));

        // one candle touching the level satisfies the single-bounce minimum
        let mut touched = candles.clone();
        touched[10] = candle(dec!(2001), dec!(2002), dec!(1999), dec!(2001));
        assert!(a.is_price_near_level(dec!(2000.01), dec!(2000), Some(&touched)));
    }

    #[test]
    fn pullback_needs_recent_ema_touch() {
        let a = analyzer();
        let away = vec![candle(dec!(2010), dec!(2012), dec!(2009), dec!(2011)); 3];
        assert!(!a.is_pullback_to_ema(dec!(2000.02), dec!(2000), Some(&away)));

        let mut near = away.clone();
        near[2] = candle(dec!(2000.5), dec!(2001), dec!(1999.5), dec!(2000.2));
        assert!(a.is_pullback_to_ema(dec!(2000.02), dec!(2000), Some(&near)));
    }

    #[test]
    fn bullish_sweep_pierces_and_recovers() {
        let a = analyzer();
        let candles = vec![
            candle(dec!(2001), dec!(2002), dec!(2000), dec!(2001)),
            candle(dec!(2001), dec!(2002), dec!(2000), dec!(2001)),
            // wick to 1997.90 (below 1998 - 0.02 threshold), close back above
            candle(dec!(2000), dec!(2001), dec!(1997.90), dec!(2000.5)),
        ];
        assert!(a.detect_liquidity_sweep(&candles, Some(&[dec!(1998)]), None));
        // close below the swing low is not a sweep
        let no_recovery = vec![
            candles[0].clone(),
            candles[1].clone(),
            candle(dec!(2000), dec!(2001), dec!(1997.90), dec!(1997.95)),
        ];
        assert!(!a.detect_liquidity_sweep(&no_recovery, Some(&[dec!(1998)]), None));
    }

    #[test]
    fn breakout_needs_test_and_momentum_close() {
        let a = analyzer();
        let m1 = vec![
            candle(dec!(2004), dec!(2005.1), dec!(2003), dec!(2004.8)), // tested 2005
            candle(dec!(2005), dec!(2006.5), dec!(2004.9), dec!(2006.2)), // bullish, strong body
        ];
        assert!(a.detect_breakout(&m1, &[dec!(2005)], &[], Side::Buy));

        // wick-only poke without a close above fails
        let weak = vec![
            m1[0].clone(),
            candle(dec!(2004.5), dec!(2006), dec!(2004), dec!(2004.6)),
        ];
        assert!(!a.detect_breakout(&weak, &[dec!(2005)], &[], Side::Buy));
    }

    #[test]
    fn legacy_breakout_still_accepted() {
        let a = analyzer();
        let m1 = vec![
            candle(dec!(2005.2), dec!(2005.6), dec!(2005.0), dec!(2005.5)), // closed above
            candle(dec!(2005.4), dec!(2005.6), dec!(2005.1), dec!(2005.2)), // opened above
        ];
        assert!(a.detect_breakout(&m1, &[dec!(2005)], &[], Side::Buy));
    }
}
