use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::config::{AtrSettings, ExecutionSettings, SpreadSettings};
use crate::session::SessionType;
use crate::types::AccountInfo;

/// A pre-trade gate declined the order. These are normal policy outcomes,
/// not errors; the reason text is surfaced in the cycle status line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeRejection {
    #[error("spread {spread:.2} exceeds limit {limit:.2} for {session} session")]
    SpreadTooWide {
        spread: Decimal,
        limit: Decimal,
        session: SessionType,
    },
    #[error("extreme ATR spike: {atr:.2} > {limit:.2} (likely news event)")]
    ExtremeAtrSpike { atr: Decimal, limit: Decimal },
    #[error("invalid equity")]
    InvalidEquity,
    #[error("maximum positions ({max}) already open")]
    MaxPositionsOpen { max: usize },
    #[error("stop distance zero")]
    StopDistanceZero,
    #[error("stop loss on wrong side of entry")]
    StopOnWrongSide,
    #[error("take profit on wrong side of entry")]
    TakeProfitOnWrongSide,
    #[error("risk/reward {actual:.2} below minimum {min:.2}")]
    RiskRewardTooLow { actual: Decimal, min: Decimal },
}

/// Sequential pre-trade checks: spread, extreme volatility, equity,
/// concurrency. The softer ATR conditions are scoring concerns and live in
/// the volatility filter.
pub struct RiskValidator {
    spread: SpreadSettings,
    atr: AtrSettings,
    execution: ExecutionSettings,
}

impl RiskValidator {
    pub fn new(spread: SpreadSettings, atr: AtrSettings, execution: ExecutionSettings) -> Self {
        Self {
            spread,
            atr,
            execution,
        }
    }

    pub fn validate(
        &self,
        spread_points: Decimal,
        atr_points: Decimal,
        atr_average_points: Decimal,
        account: &AccountInfo,
        open_positions: usize,
        session: SessionType,
    ) -> Result<(), TradeRejection> {
        self.check_spread(spread_points, session)?;

        let extreme_limit = atr_average_points * self.atr.extreme_spike_multiplier;
        if atr_average_points > Decimal::ZERO && atr_points > extreme_limit {
            return Err(TradeRejection::ExtremeAtrSpike {
                atr: atr_points,
                limit: extreme_limit,
            });
        }

        if account.equity <= Decimal::ZERO {
            return Err(TradeRejection::InvalidEquity);
        }

        if open_positions >= self.execution.max_concurrent_positions {
            return Err(TradeRejection::MaxPositionsOpen {
                max: self.execution.max_concurrent_positions,
            });
        }

        Ok(())
    }

    pub fn check_spread(
        &self,
        spread_points: Decimal,
        session: SessionType,
    ) -> Result<(), TradeRejection> {
        let limit = match session {
            SessionType::Prime => self.spread.prime_max,
            SessionType::Acceptable => self.spread.acceptable_max,
            SessionType::Closed => self.spread.default_max,
        };
        debug!(
            "spread check: {:.2} points vs limit {:.2} ({} session)",
            spread_points, limit, session
        );
        if spread_points > limit {
            return Err(TradeRejection::SpreadTooWide {
                spread: spread_points,
                limit,
                session,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AtrSettings, ExecutionSettings, SpreadSettings};
    use rust_decimal_macros::dec;

    fn account(equity: Decimal) -> AccountInfo {
        AccountInfo {
            equity,
            balance: equity,
            margin: Decimal::ZERO,
            free_margin: equity,
            margin_level: Decimal::ZERO,
            currency: "USD".to_string(),
        }
    }

    fn validator() -> RiskValidator {
        RiskValidator::new(
            SpreadSettings::default(),
            AtrSettings::default(),
            ExecutionSettings::default(),
        )
    }

    #[test]
    fn passes_under_normal_conditions() {
        let result = validator().validate(
            dec!(10),
            dec!(9),
            dec!(9),
            &account(dec!(10000)),
            0,
            SessionType::Prime,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn spread_limits_are_session_specific() {
        let v = validator();
        // 30 points passes the acceptable limit (35) but not prime (25)
        assert!(v.check_spread(dec!(30), SessionType::Acceptable).is_ok());
        assert!(matches!(
            v.check_spread(dec!(30), SessionType::Prime),
            Err(TradeRejection::SpreadTooWide { .. })
        ));
    }

    #[test]
    fn extreme_atr_spike_rejects() {
        let result = validator().validate(
            dec!(10),
            dec!(25), // > 2.5 x 9
            dec!(9),
            &account(dec!(10000)),
            0,
            SessionType::Prime,
        );
        assert!(matches!(result, Err(TradeRejection::ExtremeAtrSpike { .. })));
    }

    #[test]
    fn zero_equity_rejects() {
        let result = validator().validate(
            dec!(10),
            dec!(9),
            dec!(9),
            &account(Decimal::ZERO),
            0,
            SessionType::Prime,
        );
        assert_eq!(result, Err(TradeRejection::InvalidEquity));
    }

    #[test]
    fn concurrency_saturation_rejects() {
        let result = validator().validate(
            dec!(10),
            dec!(9),
            dec!(9),
            &account(dec!(10000)),
            1, // default max is 1
            SessionType::Prime,
        );
        assert_eq!(result, Err(TradeRejection::MaxPositionsOpen { max: 1 }));
    }
}
