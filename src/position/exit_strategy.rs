use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ExitSettings;
use crate::types::{Candle, Instrument, Position, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    TimeLimit,
    StopLoss,
    MomentumReversal,
    BrokerAutoClose,
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TimeLimit => "time_limit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::MomentumReversal => "momentum_reversal",
            ExitReason::BrokerAutoClose => "broker_auto_close",
            ExitReason::EndOfData => "end_of_data",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// First matching rule wins; `AdjustSl` is a protective action, not an exit.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    Close(ExitReason),
    AdjustSl { new_sl: Decimal },
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialExitDecision {
    /// Percent of the current volume to close (50 = half).
    pub close_percent: Decimal,
    pub move_sl_to_entry: bool,
    pub tier: u8,
}

/// Prioritized exit evaluation: take profit, time limit, stop-loss safety
/// net, momentum reversal, then break-even protection. Partial exits are
/// checked separately so the caller can interleave them with full closes.
pub struct ExitStrategy {
    settings: ExitSettings,
    risk_reward_ratio: Decimal,
    instrument: Instrument,
}

impl ExitStrategy {
    pub fn new(settings: ExitSettings, risk_reward_ratio: Decimal, instrument: Instrument) -> Self {
        Self {
            settings,
            risk_reward_ratio,
            instrument,
        }
    }

    pub fn evaluate(
        &self,
        position: &Position,
        current_price: Decimal,
        m1_candles: &[Candle],
        entry_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ExitAction {
        // 1. take profit at entry +/- stop_distance * R:R
        let tp_distance = position.stop_distance() * self.risk_reward_ratio;
        let tp_hit = match position.side {
            Side::Buy => current_price >= position.price_open + tp_distance,
            Side::Sell => current_price <= position.price_open - tp_distance,
        };
        if tp_hit {
            return ExitAction::Close(ExitReason::TakeProfit);
        }

        // 2. time limit
        let hold_minutes = (now - entry_time).num_seconds() / 60;
        if hold_minutes >= self.settings.time_limit_minutes {
            return ExitAction::Close(ExitReason::TimeLimit);
        }

        // 3. stop loss; the broker holds the real stop, this is the safety net
        let sl_hit = match position.side {
            Side::Buy => current_price <= position.sl,
            Side::Sell => current_price >= position.sl,
        };
        if sl_hit {
            return ExitAction::Close(ExitReason::StopLoss);
        }

        // 4. momentum reversal: three M1 candles against the position
        if m1_candles.len() >= 3 {
            let recent = &m1_candles[m1_candles.len() - 3..];
            let reversed = match position.side {
                Side::Buy => recent.iter().all(Candle::is_bearish),
                Side::Sell => recent.iter().all(Candle::is_bullish),
            };
            if reversed {
                return ExitAction::Close(ExitReason::MomentumReversal);
            }
        }

        // 5. break-even protection
        let profit_percent = position.profit_percent(current_price);
        if profit_percent >= self.settings.breakeven_profit_percent {
            let buffer = self
                .instrument
                .points_to_price(self.settings.breakeven_buffer_points);
            match position.side {
                Side::Buy => {
                    let new_sl = position.price_open + buffer;
                    if position.sl < new_sl {
                        return ExitAction::AdjustSl { new_sl };
                    }
                }
                Side::Sell => {
                    let new_sl = position.price_open - buffer;
                    if position.sl > new_sl {
                        return ExitAction::AdjustSl { new_sl };
                    }
                }
            }
        }

        ExitAction::Hold
    }

    /// Tier 1 fires once at the first profit threshold and moves the stop to
    /// entry; tier 2 only after tier 1 has executed.
    pub fn check_partial_exit(
        &self,
        position: &Position,
        current_price: Decimal,
        tier1_done: bool,
    ) -> Option<PartialExitDecision> {
        let profit_percent = position.profit_percent(current_price);

        if !tier1_done && profit_percent >= self.settings.partial_exit_1_percent {
            return Some(PartialExitDecision {
                close_percent: self.settings.partial_exit_1_close_percent,
                move_sl_to_entry: true,
                tier: 1,
            });
        }

        if tier1_done && profit_percent >= self.settings.partial_exit_2_percent {
            return Some(PartialExitDecision {
                close_percent: self.settings.partial_exit_2_close_percent,
                move_sl_to_entry: false,
                tier: 2,
            });
        }

        None
    }

    pub fn breakeven_buffer(&self) -> Decimal {
        self.instrument
            .points_to_price(self.settings.breakeven_buffer_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn position(side: Side) -> Position {
        // 20-point stop, R:R 1.2 puts the TP at 2002.40 for longs
        Position {
            ticket: 1,
            side,
            volume: dec!(0.02),
            price_open: dec!(2000),
            sl: match side {
                Side::Buy => dec!(1998),
                Side::Sell => dec!(2002),
            },
            tp: match side {
                Side::Buy => dec!(2002.40),
                Side::Sell => dec!(1997.60),
            },
            profit: Decimal::ZERO,
            time: entry(),
        }
    }

    fn entry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    fn minutes_later(m: i64) -> DateTime<Utc> {
        entry() + chrono::Duration::minutes(m)
    }

    fn bearish_candle() -> Candle {
        Candle {
            time: entry(),
            open: dec!(2001),
            high: dec!(2001.2),
            low: dec!(2000.3),
            close: dec!(2000.4),
            volume: dec!(50),
        }
    }

    fn bullish_candle() -> Candle {
        Candle {
            time: entry(),
            open: dec!(2000.4),
            high: dec!(2001.2),
            low: dec!(2000.3),
            close: dec!(2001),
            volume: dec!(50),
        }
    }

    fn strategy() -> ExitStrategy {
        ExitStrategy::new(ExitSettings::default(), dec!(1.2), Instrument::default())
    }

    #[test]
    fn take_profit_fires_first() {
        let action = strategy().evaluate(
            &position(Side::Buy),
            dec!(2002.40),
            &[],
            entry(),
            minutes_later(1),
        );
        assert_eq!(action, ExitAction::Close(ExitReason::TakeProfit));
    }

    #[test]
    fn sell_take_profit_is_mirrored() {
        let action = strategy().evaluate(
            &position(Side::Sell),
            dec!(1997.60),
            &[],
            entry(),
            minutes_later(1),
        );
        assert_eq!(action, ExitAction::Close(ExitReason::TakeProfit));
    }

    #[test]
    fn time_limit_closes_stale_positions() {
        let action = strategy().evaluate(
            &position(Side::Buy),
            dec!(2000.10),
            &[],
            entry(),
            minutes_later(15),
        );
        assert_eq!(action, ExitAction::Close(ExitReason::TimeLimit));
    }

    #[test]
    fn stop_loss_safety_net() {
        let action = strategy().evaluate(
            &position(Side::Buy),
            dec!(1997.90),
            &[],
            entry(),
            minutes_later(1),
        );
        assert_eq!(action, ExitAction::Close(ExitReason::StopLoss));
    }

    #[test]
    fn momentum_reversal_beats_breakeven_and_tp_checks_later_in_priority() {
        // three bearish M1 candles against an open long, price below TP
        let candles = vec![bearish_candle(), bearish_candle(), bearish_candle()];
        let action = strategy().evaluate(
            &position(Side::Buy),
            dec!(2001),
            &candles,
            entry(),
            minutes_later(2),
        );
        assert_eq!(action, ExitAction::Close(ExitReason::MomentumReversal));
    }

    #[test]
    fn sell_reversal_needs_bullish_candles() {
        let candles = vec![bullish_candle(), bullish_candle(), bullish_candle()];
        let action = strategy().evaluate(
            &position(Side::Sell),
            dec!(1999),
            &candles,
            entry(),
            minutes_later(2),
        );
        assert_eq!(action, ExitAction::Close(ExitReason::MomentumReversal));
    }

    #[test]
    fn breakeven_moves_stop_to_entry_plus_buffer() {
        // wide stop keeps the TP (entry + 1.2 x stop distance) out of reach;
        // 0.15% of 2000 = 3.00, so price 2003 arms the protection
        let mut pos = position(Side::Buy);
        pos.sl = dec!(1990);
        let action = strategy().evaluate(&pos, dec!(2003), &[], entry(), minutes_later(2));
        assert_eq!(
            action,
            ExitAction::AdjustSl {
                new_sl: dec!(2000.02)
            }
        );
    }

    #[test]
    fn partial_exit_ladder() {
        let s = strategy();
        let pos = position(Side::Buy);

        // 0.20% of 2000 = 4.00 -> tier 1 at 2004
        let tier1 = s.check_partial_exit(&pos, dec!(2004), false).unwrap();
        assert_eq!(tier1.tier, 1);
        assert_eq!(tier1.close_percent, dec!(50));
        assert!(tier1.move_sl_to_entry);

        // below tier 2 threshold nothing more fires once tier 1 is done
        assert!(s.check_partial_exit(&pos, dec!(2004), true).is_none());

        // 0.35% of 2000 = 7.00 -> tier 2 at 2007, only after tier 1
        let tier2 = s.check_partial_exit(&pos, dec!(2007), true).unwrap();
        assert_eq!(tier2.tier, 2);
        assert_eq!(tier2.close_percent, dec!(30));
        assert!(!tier2.move_sl_to_entry);

        // tier 2 threshold without tier 1 done fires tier 1 instead
        let out_of_order = s.check_partial_exit(&pos, dec!(2007), false).unwrap();
        assert_eq!(out_of_order.tier, 1);
    }

    #[test]
    fn hold_when_nothing_applies() {
        let action = strategy().evaluate(
            &position(Side::Buy),
            dec!(2000.50),
            &[],
            entry(),
            minutes_later(2),
        );
        assert_eq!(action, ExitAction::Hold);
    }
}
