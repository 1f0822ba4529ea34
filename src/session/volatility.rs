use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::AtrSettings;

/// ATR admission verdict. `confidence_delta` is applied to the signal's
/// confidence by the loop when the trade is otherwise admissible.
#[derive(Debug, Clone, PartialEq)]
pub struct AtrVerdict {
    pub valid: bool,
    pub reason: String,
    pub confidence_delta: Decimal,
}

/// Admits or rejects trades on current volatility, all values in points.
pub struct VolatilityFilter {
    settings: AtrSettings,
}

impl VolatilityFilter {
    pub fn new(settings: AtrSettings) -> Self {
        Self { settings }
    }

    pub fn validate(&self, atr_points: Decimal, atr_average_points: Decimal) -> AtrVerdict {
        let s = &self.settings;

        if atr_points < s.min_points {
            return AtrVerdict {
                valid: false,
                reason: format!(
                    "ATR {:.2} below minimum {:.2} (market too choppy)",
                    atr_points, s.min_points
                ),
                confidence_delta: Decimal::ZERO,
            };
        }

        if atr_points > s.max_points {
            return AtrVerdict {
                valid: false,
                reason: format!(
                    "ATR {:.2} above maximum {:.2} (too volatile)",
                    atr_points, s.max_points
                ),
                confidence_delta: Decimal::ZERO,
            };
        }

        if atr_average_points > Decimal::ZERO
            && atr_points > atr_average_points * s.spike_multiplier
        {
            return AtrVerdict {
                valid: false,
                reason: format!(
                    "ATR spike: {:.2} > {:.2}",
                    atr_points,
                    atr_average_points * s.spike_multiplier
                ),
                confidence_delta: Decimal::ZERO,
            };
        }

        if atr_points >= s.optimal_min && atr_points <= s.optimal_max {
            return AtrVerdict {
                valid: true,
                reason: format!("ATR {:.2} in optimal range", atr_points),
                confidence_delta: Decimal::ZERO,
            };
        }

        AtrVerdict {
            valid: true,
            reason: format!("ATR {:.2} acceptable but suboptimal", atr_points),
            confidence_delta: dec!(-10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> VolatilityFilter {
        VolatilityFilter::new(AtrSettings::default())
    }

    #[test]
    fn optimal_band_passes_cleanly() {
        let verdict = filter().validate(dec!(9), dec!(9));
        assert!(verdict.valid);
        assert_eq!(verdict.confidence_delta, Decimal::ZERO);
    }

    #[test]
    fn suboptimal_band_costs_confidence() {
        let verdict = filter().validate(dec!(7), dec!(9));
        assert!(verdict.valid);
        assert_eq!(verdict.confidence_delta, dec!(-10));
    }

    #[test]
    fn choppy_market_rejected() {
        let verdict = filter().validate(dec!(4), dec!(9));
        assert!(!verdict.valid);
        assert!(verdict.reason.contains("below minimum"));
    }

    #[test]
    fn excess_volatility_rejected() {
        let verdict = filter().validate(dec!(15), dec!(9));
        assert!(!verdict.valid);
        assert!(verdict.reason.contains("above maximum"));
    }

    #[test]
    fn spike_within_bounds_rejected() {
        // 11.9 is inside [6, 12] but above 1.8 x 6.0
        let verdict = filter().validate(dec!(11.9), dec!(6));
        assert!(!verdict.valid);
        assert!(verdict.reason.contains("spike"));
    }
}
