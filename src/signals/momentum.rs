use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::MomentumSettings;
use crate::indicators::mean;
use crate::types::{Candle, Side};

/// Outcome of the two-stage M1 momentum validation. `direction` is `None`
/// when either stage fails; the wick ratio is always populated so the
/// confidence scoring can use it.
#[derive(Debug, Clone)]
pub struct Momentum {
    pub direction: Option<Side>,
    /// Total body over total range across the scored candles.
    pub strength: Decimal,
    /// Average body ratio across the scored candles.
    pub body_ratio: Decimal,
    pub wick_ratio: Decimal,
}

impl Momentum {
    fn none(candles: &[Candle]) -> Self {
        Self {
            direction: None,
            strength: Decimal::ZERO,
            body_ratio: Decimal::ZERO,
            wick_ratio: candles
                .last()
                .map(Candle::wick_ratio)
                .unwrap_or(dec!(0.5)),
        }
    }
}

pub struct MomentumAnalyzer {
    settings: MomentumSettings,
}

impl MomentumAnalyzer {
    pub fn new(settings: MomentumSettings) -> Self {
        Self { settings }
    }

    /// Weighted two-stage validation over the last two M1 candles.
    ///
    /// Stage 1 scores each side: the current candle contributes 60% and the
    /// previous 40%, each weighted by `min(body_ratio / min_body_ratio, 1)`
    /// when the candle is the right color with a body at or above the
    /// minimum. The winning side needs its score at the threshold and
    /// strictly above the opponent. Stage 2 demands an outsized body or a
    /// volume spike against the prior five candles, unless stage 1 was
    /// strong enough to skip it.
    pub fn analyze(&self, candles: &[Candle]) -> Momentum {
        if candles.len() < 5 {
            return Momentum::none(candles);
        }

        let lookback = self.settings.stage1_lookback.max(2);
        if candles.len() < lookback {
            return Momentum::none(candles);
        }
        let scored = &candles[candles.len() - lookback..];
        let current = &scored[scored.len() - 1];
        let previous = &scored[scored.len() - 2];

        let current_weight = dec!(0.6);
        let previous_weight = dec!(0.4);

        let mut bullish = Decimal::ZERO;
        let mut bearish = Decimal::ZERO;

        for (candle, weight) in [(current, current_weight), (previous, previous_weight)] {
            let body_ratio = candle.body_ratio();
            if body_ratio < self.settings.stage1_min_body_ratio {
                continue;
            }
            let score = weight * (body_ratio / self.settings.stage1_min_body_ratio).min(Decimal::ONE);
            if candle.is_bullish() {
                bullish += score;
            } else if candle.is_bearish() {
                bearish += score;
            }
        }

        let threshold = self.settings.weighted_threshold;
        let (direction, winning) = if bullish >= threshold && bullish > bearish {
            (Side::Buy, bullish)
        } else if bearish >= threshold && bearish > bullish {
            (Side::Sell, bearish)
        } else {
            debug!(
                "momentum stage 1 below threshold {} (bullish={:.2}, bearish={:.2})",
                threshold, bullish, bearish
            );
            return Momentum::none(candles);
        };

        let skip_stage2 =
            self.settings.skip_stage2_if_strong && winning >= self.settings.stage1_strong_threshold;

        if !skip_stage2 && !self.stage2_strength(candles) {
            debug!("momentum stage 2 failed (no body expansion or volume spike)");
            return Momentum::none(candles);
        }

        let body_sum: Decimal = scored.iter().map(Candle::body_size).sum();
        let range_sum: Decimal = scored.iter().map(Candle::range).sum();
        let strength = if range_sum.is_zero() {
            Decimal::ZERO
        } else {
            body_sum / range_sum
        };
        let body_ratio = scored.iter().map(Candle::body_ratio).sum::<Decimal>()
            / Decimal::from(scored.len() as u32);

        Momentum {
            direction: Some(direction),
            strength,
            body_ratio,
            wick_ratio: current.wick_ratio(),
        }
    }

    /// Stage 2: current body >= multiplier x mean of the prior five bodies,
    /// or current volume >= multiplier x mean of the prior five volumes.
    fn stage2_strength(&self, candles: &[Candle]) -> bool {
        let current = match candles.last() {
            Some(c) => c,
            None => return false,
        };
        let prior = &candles[candles.len().saturating_sub(6)..candles.len() - 1];
        if prior.is_empty() {
            return false;
        }

        let avg_body = mean(&prior.iter().map(Candle::body_size).collect::<Vec<_>>())
            .unwrap_or(Decimal::ZERO);
        if !avg_body.is_zero()
            && current.body_size() >= avg_body * self.settings.stage2_size_multiplier
        {
            return true;
        }

        self.volume_spike(candles, self.settings.stage2_volume_multiplier)
    }

    fn volume_spike(&self, candles: &[Candle], multiplier: Decimal) -> bool {
        if candles.len() < 6 {
            return false;
        }
        let current = candles[candles.len() - 1].volume;
        let prior = &candles[candles.len() - 6..candles.len() - 1];
        let avg = mean(&prior.iter().map(|c| c.volume).collect::<Vec<_>>())
            .unwrap_or(Decimal::ZERO);
        if avg.is_zero() || current.is_zero() {
            return false;
        }
        current >= avg * multiplier
    }

    /// Strong-spike predicate used by the confidence scoring: current volume
    /// above 1.5x the trailing ten-candle average.
    pub fn check_volume_spike(&self, candles: &[Candle]) -> bool {
        let lookback = 10;
        if candles.len() < lookback + 1 {
            return false;
        }
        let recent = &candles[candles.len() - lookback..];
        let current = recent[recent.len() - 1].volume;
        let avg = mean(
            &recent[..recent.len() - 1]
                .iter()
                .map(|c| c.volume)
                .collect::<Vec<_>>(),
        )
        .unwrap_or(Decimal::ZERO);
        if avg.is_zero() {
            return false;
        }
        current > avg * dec!(1.5)
    }
}
