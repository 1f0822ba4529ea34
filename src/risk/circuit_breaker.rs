use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::CircuitBreakerSettings;
use crate::types::{Instrument, Side, TradeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    ConsecutiveLosses,
    LossesInWindow,
    DailyDrawdown,
    StopoutCluster,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::ConsecutiveLosses => "3_consecutive_losses",
            HaltReason::LossesInWindow => "5_losses_in_7_trades",
            HaltReason::DailyDrawdown => "daily_drawdown_3pct",
            HaltReason::StopoutCluster => "4_stopouts_in_5_trades",
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Halt,
    Reset,
    RiskAdjustment,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Halt => "halt",
            EventKind::Reset => "reset",
            EventKind::RiskAdjustment => "risk_adjustment",
        }
    }
}

/// One-shot record handed to the persistence collaborator at each
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub kind: EventKind,
    pub reason: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub loss_count: usize,
    pub daily_pnl: Decimal,
}

/// Immutable per-cycle view of the breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub halted: bool,
    pub reason: Option<HaltReason>,
    pub halt_start: Option<DateTime<Utc>>,
    pub adjusted_risk_percent: Decimal,
    pub adjusted_confidence_threshold: Decimal,
    pub recent_loss_count: usize,
}

#[derive(Debug, Clone)]
pub struct HaltCheck {
    pub halted: bool,
    pub reason: Option<HaltReason>,
    pub remaining_minutes: i64,
    pub events: Vec<CircuitBreakerEvent>,
}

struct Halt {
    reason: HaltReason,
    start: DateTime<Utc>,
}

/// Halt state machine with graduated pre-halt tightening. Trade history is
/// passed most-recent-first, as the store returns it.
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    instrument: Instrument,
    default_risk_percent: Decimal,
    default_confidence_threshold: Decimal,
    halt: Option<Halt>,
    adjusted_risk_percent: Decimal,
    adjusted_confidence_threshold: Decimal,
    recent_loss_count: usize,
    adjustment_level: u8,
}

impl CircuitBreaker {
    pub fn new(
        settings: CircuitBreakerSettings,
        instrument: Instrument,
        default_risk_percent: Decimal,
        default_confidence_threshold: Decimal,
    ) -> Self {
        Self {
            settings,
            instrument,
            default_risk_percent,
            default_confidence_threshold,
            halt: None,
            adjusted_risk_percent: default_risk_percent,
            adjusted_confidence_threshold: default_confidence_threshold,
            recent_loss_count: 0,
            adjustment_level: 0,
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            halted: self.halt.is_some(),
            reason: self.halt.as_ref().map(|h| h.reason),
            halt_start: self.halt.as_ref().map(|h| h.start),
            adjusted_risk_percent: self.adjusted_risk_percent,
            adjusted_confidence_threshold: self.adjusted_confidence_threshold,
            recent_loss_count: self.recent_loss_count,
        }
    }

    /// Evaluate the breaker for this cycle. While halted the caller must
    /// keep monitoring positions but dispatch no new orders.
    pub fn evaluate(
        &mut self,
        history: &[TradeRecord],
        daily_pnl: Decimal,
        starting_equity: Decimal,
        now: DateTime<Utc>,
    ) -> HaltCheck {
        let mut events = Vec::new();

        if let Some(halt) = &self.halt {
            let reason = halt.reason;
            let elapsed_minutes = (now - halt.start).num_seconds() / 60;
            let remaining = self.settings.halt_duration_minutes - elapsed_minutes;

            if remaining > 0 {
                return HaltCheck {
                    halted: true,
                    reason: Some(reason),
                    remaining_minutes: remaining,
                    events,
                };
            }

            if self.reset_conditions_met(history) {
                self.reset(now, &mut events);
                info!("circuit breaker reset after {} halt", reason);
                // fresh defaults apply from this cycle; graduated response
                // resumes next cycle
                return HaltCheck {
                    halted: false,
                    reason: None,
                    remaining_minutes: 0,
                    events,
                };
            }

            // expired without a qualifying recovery; stay halted and keep
            // re-checking reset each cycle
            return HaltCheck {
                halted: true,
                reason: Some(reason),
                remaining_minutes: 0,
                events,
            };
        }

        self.apply_graduated_response(history, daily_pnl, &mut events);

        if let Some(reason) = self.halt_predicate(history, daily_pnl, starting_equity) {
            warn!("circuit breaker triggered: {}", reason);
            self.halt = Some(Halt { reason, start: now });
            events.push(CircuitBreakerEvent {
                kind: EventKind::Halt,
                reason: reason.as_str().to_string(),
                start_time: Some(now),
                end_time: None,
                loss_count: self.recent_loss_count,
                daily_pnl,
            });
            return HaltCheck {
                halted: true,
                reason: Some(reason),
                remaining_minutes: self.settings.halt_duration_minutes,
                events,
            };
        }

        HaltCheck {
            halted: false,
            reason: None,
            remaining_minutes: 0,
            events,
        }
    }

    /// First satisfied predicate wins.
    fn halt_predicate(
        &self,
        history: &[TradeRecord],
        daily_pnl: Decimal,
        starting_equity: Decimal,
    ) -> Option<HaltReason> {
        let s = &self.settings;

        if history.len() >= s.consecutive_losses
            && history[..s.consecutive_losses].iter().all(|t| t.is_loss())
        {
            return Some(HaltReason::ConsecutiveLosses);
        }

        if history.len() >= s.window_size {
            let losses = history[..s.window_size].iter().filter(|t| t.is_loss()).count();
            if losses >= s.losses_in_window {
                return Some(HaltReason::LossesInWindow);
            }
        }

        if starting_equity > Decimal::ZERO {
            let drawdown_percent = daily_pnl / starting_equity * dec!(100);
            if drawdown_percent <= -s.daily_drawdown_percent {
                return Some(HaltReason::DailyDrawdown);
            }
        }

        if history.len() >= s.stopout_window_size {
            let stopouts = history[..s.stopout_window_size]
                .iter()
                .filter(|t| t.is_stopout())
                .count();
            if stopouts >= s.stopouts_in_window {
                return Some(HaltReason::StopoutCluster);
            }
        }

        None
    }

    /// Tighten risk and confidence after recent losses; relax back to the
    /// defaults once the losses age out of the last-3 window.
    fn apply_graduated_response(
        &mut self,
        history: &[TradeRecord],
        daily_pnl: Decimal,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        let recent_losses = history.iter().take(3).filter(|t| t.is_loss()).count();
        self.recent_loss_count = recent_losses;

        let g = &self.settings.graduated_response;
        let (level, risk, confidence) = match recent_losses {
            0 => (0, self.default_risk_percent, self.default_confidence_threshold),
            1 => (
                1,
                self.default_risk_percent,
                g.after_1_loss_confidence_threshold,
            ),
            _ => (
                2,
                g.after_2_losses_risk_percent,
                g.after_2_losses_confidence_threshold,
            ),
        };

        self.adjusted_risk_percent = risk;
        self.adjusted_confidence_threshold = confidence;

        if level != self.adjustment_level {
            if level > 0 {
                info!(
                    "graduated response level {}: risk {}%, confidence threshold {}%",
                    level, risk, confidence
                );
            }
            events.push(CircuitBreakerEvent {
                kind: EventKind::RiskAdjustment,
                reason: format!("{} recent losses", recent_losses),
                start_time: None,
                end_time: None,
                loss_count: recent_losses,
                daily_pnl,
            });
            self.adjustment_level = level;
        }
    }

    /// Two consecutive wins, or a single most-recent win worth at least
    /// 1.5R, where R is the risk the trade put on at entry.
    fn reset_conditions_met(&self, history: &[TradeRecord]) -> bool {
        if history.len() >= 2 && history[..2].iter().all(|t| t.is_win()) {
            return true;
        }

        let last = match history.first() {
            Some(t) => t,
            None => return false,
        };
        if !last.is_win() {
            return false;
        }

        let stop_distance_price = match last.direction {
            Side::Buy => last.entry_price - last.stop_loss,
            Side::Sell => last.stop_loss - last.entry_price,
        };
        if stop_distance_price <= Decimal::ZERO || last.lot_size <= Decimal::ZERO {
            return false;
        }

        let stop_distance_points = self.instrument.price_to_points(stop_distance_price);
        let risk = self.instrument.risk_amount(stop_distance_points, last.lot_size);
        risk > Decimal::ZERO && last.pnl >= risk * dec!(1.5)
    }

    fn reset(&mut self, now: DateTime<Utc>, events: &mut Vec<CircuitBreakerEvent>) {
        self.halt = None;
        self.adjusted_risk_percent = self.default_risk_percent;
        self.adjusted_confidence_threshold = self.default_confidence_threshold;
        self.recent_loss_count = 0;
        self.adjustment_level = 0;
        events.push(CircuitBreakerEvent {
            kind: EventKind::Reset,
            reason: "reset to default parameters".to_string(),
            start_time: None,
            end_time: Some(now),
            loss_count: 0,
            daily_pnl: Decimal::ZERO,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerSettings::default(),
            Instrument::default(),
            dec!(0.5),
            dec!(60),
        )
    }

    fn trade(pnl: Decimal, exit_reason: &str) -> TradeRecord {
        TradeRecord {
            ticket: 1,
            direction: Side::Buy,
            entry_price: dec!(2000),
            lot_size: dec!(0.02),
            stop_loss: dec!(1999.67), // 33 points
            take_profit: dec!(2000.40),
            entry_time: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            exit_price: None,
            exit_time: None,
            exit_reason: Some(exit_reason.to_string()),
            pnl,
            hold_seconds: None,
            partial_exits: Vec::new(),
            signal_id: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
    }

    #[test]
    fn three_consecutive_losses_halt() {
        let mut cb = breaker();
        let history = vec![
            trade(dec!(-10), "stop_loss"),
            trade(dec!(-12), "time_limit"),
            trade(dec!(-8), "momentum_reversal"),
        ];
        let check = cb.evaluate(&history, dec!(-30), dec!(10000), now());
        assert!(check.halted);
        assert_eq!(check.reason, Some(HaltReason::ConsecutiveLosses));
        assert!(check
            .events
            .iter()
            .any(|e| e.kind == EventKind::Halt && e.reason == "3_consecutive_losses"));
        assert!(cb.snapshot().halted);
    }

    #[test]
    fn five_losses_in_seven_halt() {
        let mut cb = breaker();
        let mut history = vec![
            trade(dec!(5), "take_profit"),
            trade(dec!(-5), "stop_loss"),
            trade(dec!(4), "take_profit"),
        ];
        for _ in 0..4 {
            history.push(trade(dec!(-5), "time_limit"));
        }
        let check = cb.evaluate(&history, dec!(-10), dec!(10000), now());
        assert!(check.halted);
        assert_eq!(check.reason, Some(HaltReason::LossesInWindow));
    }

    #[test]
    fn daily_drawdown_halt() {
        let mut cb = breaker();
        let check = cb.evaluate(&[], dec!(-300), dec!(10000), now());
        assert!(check.halted);
        assert_eq!(check.reason, Some(HaltReason::DailyDrawdown));
    }

    #[test]
    fn stopout_cluster_halt() {
        let mut cb = breaker();
        let mut history = vec![trade(dec!(6), "take_profit")];
        for _ in 0..4 {
            history.push(trade(dec!(-5), "stop_loss"));
        }
        // one win then four stopouts: not three consecutive losses, not five
        // losses in seven, but four stopouts in the last five
        let check = cb.evaluate(&history, dec!(-14), dec!(10000), now());
        assert!(check.halted);
        assert_eq!(check.reason, Some(HaltReason::StopoutCluster));
    }

    #[test]
    fn halt_persists_until_duration_expires() {
        let mut cb = breaker();
        let losses = vec![trade(dec!(-5), "stop_loss"); 3];
        cb.evaluate(&losses, dec!(-15), dec!(10000), now());

        let later = now() + Duration::minutes(30);
        let check = cb.evaluate(&losses, dec!(-15), dec!(10000), later);
        assert!(check.halted);
        assert_eq!(check.remaining_minutes, 30);
        assert!(check.events.is_empty());
    }

    #[test]
    fn reset_after_expiry_and_two_wins() {
        let mut cb = breaker();
        let losses = vec![trade(dec!(-5), "stop_loss"); 3];
        cb.evaluate(&losses, dec!(-15), dec!(10000), now());

        // duration elapsed, last two trades are winners
        let history = vec![
            trade(dec!(8), "take_profit"),
            trade(dec!(6), "take_profit"),
            trade(dec!(-5), "stop_loss"),
        ];
        let later = now() + Duration::minutes(61);
        let check = cb.evaluate(&history, dec!(9), dec!(10000), later);
        assert!(!check.halted);
        assert!(check.events.iter().any(|e| e.kind == EventKind::Reset));
        let state = cb.snapshot();
        assert_eq!(state.adjusted_risk_percent, dec!(0.5));
        assert_eq!(state.adjusted_confidence_threshold, dec!(60));
    }

    #[test]
    fn expiry_without_recovery_stays_halted() {
        let mut cb = breaker();
        let losses = vec![trade(dec!(-5), "stop_loss"); 3];
        cb.evaluate(&losses, dec!(-15), dec!(10000), now());

        let later = now() + Duration::minutes(61);
        let check = cb.evaluate(&losses, dec!(-15), dec!(10000), later);
        assert!(check.halted);
        assert_eq!(check.remaining_minutes, 0);
    }

    #[test]
    fn single_big_win_resets() {
        let mut cb = breaker();
        let losses = vec![trade(dec!(-5), "stop_loss"); 3];
        cb.evaluate(&losses, dec!(-15), dec!(10000), now());

        // 33 points * $100/lot * 0.02 lots = $66 risk; 1.5R = $99
        let history = vec![trade(dec!(100), "take_profit"), trade(dec!(-5), "stop_loss")];
        let later = now() + Duration::minutes(61);
        let check = cb.evaluate(&history, dec!(95), dec!(10000), later);
        assert!(!check.halted);
    }

    #[test]
    fn graduated_response_tightens_then_relaxes() {
        let mut cb = breaker();

        // history [+, -, -] newest-first is [-, -, +]
        let history = vec![
            trade(dec!(-5), "stop_loss"),
            trade(dec!(-5), "stop_loss"),
            trade(dec!(7), "take_profit"),
        ];
        let check = cb.evaluate(&history, dec!(-3), dec!(10000), now());
        assert!(!check.halted);
        let state = cb.snapshot();
        assert_eq!(state.adjusted_risk_percent, dec!(0.3));
        assert_eq!(state.adjusted_confidence_threshold, dec!(75));
        assert!(check
            .events
            .iter()
            .any(|e| e.kind == EventKind::RiskAdjustment));

        // one loss only
        let history = vec![
            trade(dec!(-5), "stop_loss"),
            trade(dec!(7), "take_profit"),
            trade(dec!(6), "take_profit"),
        ];
        cb.evaluate(&history, dec!(8), dec!(10000), now());
        let state = cb.snapshot();
        assert_eq!(state.adjusted_risk_percent, dec!(0.5));
        assert_eq!(state.adjusted_confidence_threshold, dec!(70));

        // losses aged out entirely
        let history = vec![trade(dec!(7), "take_profit"); 3];
        cb.evaluate(&history, dec!(21), dec!(10000), now());
        let state = cb.snapshot();
        assert_eq!(state.adjusted_confidence_threshold, dec!(60));
        assert_eq!(state.adjusted_risk_percent, dec!(0.5));
    }

    #[test]
    fn halted_state_implies_a_satisfied_predicate() {
        let mut cb = breaker();
        let history = vec![
            trade(dec!(-1), "time_limit"),
            trade(dec!(-1), "time_limit"),
            trade(dec!(-1), "time_limit"),
        ];
        let check = cb.evaluate(&history, dec!(-3), dec!(10000), now());
        assert!(check.halted);
        // the predicate that justified the halt must hold on the same history
        assert!(history[..3].iter().all(|t| t.is_loss()));
    }
}
