use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, warn};

use crate::config::RiskSettings;
use crate::types::Instrument;

/// Absolute ceiling on per-trade risk, independent of configuration.
const MAX_RISK_PERCENT: Decimal = dec!(2.0);
/// Absolute lot ceiling, applied before the configured max.
const HARD_MAX_LOT: Decimal = dec!(0.10);

/// Converts a risk budget into a lot size with hard safety caps.
pub struct PositionSizer {
    settings: RiskSettings,
    instrument: Instrument,
}

impl PositionSizer {
    pub fn new(settings: RiskSettings, instrument: Instrument) -> Self {
        Self {
            settings,
            instrument,
        }
    }

    /// `lots = (equity * risk_percent / 100) / (stop_distance_points *
    /// point_value_per_lot)`, clamped into `[min_lot, min(max_lot, 0.10)]`
    /// and rounded to the lot precision. If the rounded size still risks
    /// more than 2% of equity, the size is recomputed from the 2% budget.
    pub fn lot_size(
        &self,
        equity: Decimal,
        risk_percent: Decimal,
        stop_distance_points: Decimal,
    ) -> Decimal {
        if equity <= Decimal::ZERO
            || risk_percent <= Decimal::ZERO
            || stop_distance_points <= Decimal::ZERO
        {
            warn!("invalid sizing inputs, falling back to minimum lot");
            return self.settings.min_lot_size;
        }

        let risk_amount = equity * risk_percent / dec!(100);
        let denominator = stop_distance_points * self.instrument.point_value_per_lot;
        let mut lots = risk_amount / denominator;

        if lots > HARD_MAX_LOT {
            warn!(
                "calculated lot size {:.3} above hard cap {}, capping",
                lots, HARD_MAX_LOT
            );
            lots = HARD_MAX_LOT;
        }

        lots = self.clamp_and_round(lots);

        let actual_risk_percent =
            self.instrument.risk_amount(stop_distance_points, lots) / equity * dec!(100);
        debug!(
            "sizing: lots={:.3} equity={:.2} stop={:.1}pts target={:.2}% actual={:.2}%",
            lots, equity, stop_distance_points, risk_percent, actual_risk_percent
        );

        if actual_risk_percent > MAX_RISK_PERCENT {
            error!(
                "actual risk {:.2}% exceeds {}% ceiling, resizing down",
                actual_risk_percent, MAX_RISK_PERCENT
            );
            let max_risk_amount = equity * MAX_RISK_PERCENT / dec!(100);
            lots = self.clamp_and_round(max_risk_amount / denominator);
        }

        lots
    }

    fn clamp_and_round(&self, lots: Decimal) -> Decimal {
        let upper = self.settings.max_lot_size.min(HARD_MAX_LOT);
        let clamped = lots.clamp(self.settings.min_lot_size, upper.max(self.settings.min_lot_size));
        let precision = if self.settings.min_lot_size < dec!(0.01) {
            3
        } else {
            2
        };
        clamped
            .round_dp(precision)
            .max(self.settings.min_lot_size)
    }

    /// Convert a configured stop value into a point distance. The config
    /// stores points divided by 100 (0.30 means 30 points); a 3-point buffer
    /// is added on top.
    pub fn stop_distance_points(&self, stop_percent: Decimal) -> Decimal {
        stop_percent * dec!(100) + dec!(3)
    }

    pub fn preferred_stop_percent(&self) -> Decimal {
        self.settings.stop_loss_range.preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(RiskSettings::default(), Instrument::default())
    }

    #[test]
    fn stop_distance_is_points_times_hundred_plus_buffer() {
        assert_eq!(sizer().stop_distance_points(dec!(0.30)), dec!(33));
        assert_eq!(sizer().stop_distance_points(dec!(0.25)), dec!(28));
    }

    #[test]
    fn reference_sizing_example() {
        // 10_000 equity, 0.5% risk, 33-point stop: raw 50/3300 = 0.0151...,
        // rounds up to 0.02 after the min-lot clamp
        let lots = sizer().lot_size(dec!(10000), dec!(0.5), dec!(33));
        assert_eq!(lots, dec!(0.02));
        // actual risk stays under the ceiling
        let actual = Instrument::default().risk_amount(dec!(33), lots) / dec!(10000) * dec!(100);
        assert!(actual <= dec!(2.0));
    }

    #[test]
    fn hard_cap_limits_oversized_requests() {
        // tiny stop distance would otherwise size huge
        let lots = sizer().lot_size(dec!(100000), dec!(2.0), dec!(5));
        assert_eq!(lots, dec!(0.10));
    }

    #[test]
    fn never_below_minimum_lot() {
        let lots = sizer().lot_size(dec!(100), dec!(0.1), dec!(50));
        assert_eq!(lots, dec!(0.01));
    }

    #[test]
    fn invalid_inputs_fall_back_to_minimum() {
        let s = sizer();
        assert_eq!(s.lot_size(Decimal::ZERO, dec!(0.5), dec!(33)), dec!(0.01));
        assert_eq!(s.lot_size(dec!(10000), Decimal::ZERO, dec!(33)), dec!(0.01));
        assert_eq!(s.lot_size(dec!(10000), dec!(0.5), Decimal::ZERO), dec!(0.01));
    }

    #[test]
    fn micro_lot_accounts_round_to_three_decimals() {
        let settings = RiskSettings {
            min_lot_size: dec!(0.001),
            ..RiskSettings::default()
        };
        let sizer = PositionSizer::new(settings, Instrument::default());
        let lots = sizer.lot_size(dec!(1000), dec!(0.5), dec!(33));
        // 5 / 3300 = 0.001515... -> 0.002 at 3 decimals
        assert_eq!(lots, dec!(0.002));
    }

    #[test]
    fn sized_orders_respect_the_two_percent_invariant() {
        let s = sizer();
        let instrument = Instrument::default();
        let cases = [
            (dec!(500), dec!(0.5), dec!(33)),
            (dec!(2000), dec!(1.5), dec!(20)),
            (dec!(10000), dec!(2.0), dec!(33)),
            (dec!(50000), dec!(0.3), dec!(40)),
        ];
        for (equity, risk, stop) in cases {
            let lots = s.lot_size(equity, risk, stop);
            let actual = instrument.risk_amount(stop, lots) / equity * dec!(100);
            // the minimum lot on a tiny account may exceed the target, but
            // the sizer must keep the 2% ceiling whenever it can clamp down
            if lots > s.settings.min_lot_size {
                assert!(actual <= dec!(2.0), "{}% risk at {} lots", actual, lots);
            }
            assert!(lots >= dec!(0.01) && lots <= dec!(0.10));
        }
    }
}
