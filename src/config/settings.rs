use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Instrument;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub instrument: Instrument,
    pub risk: RiskSettings,
    pub signals: SignalSettings,
    pub structure: StructureSettings,
    pub sessions: SessionSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub execution: ExecutionSettings,
    pub spread: SpreadSettings,
    pub atr: AtrSettings,
    pub exit: ExitSettings,
    pub database: DatabaseSettings,
    pub backtest: BacktestSettings,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.risk.risk_per_trade <= Decimal::ZERO || self.risk.risk_per_trade > dec!(10) {
            errors.push("risk.risk_per_trade must be between 0 and 10%".to_string());
        }
        if self.risk.min_lot_size <= Decimal::ZERO {
            errors.push("risk.min_lot_size must be > 0".to_string());
        }
        if self.risk.max_lot_size < self.risk.min_lot_size {
            errors.push("risk.max_lot_size must be >= min_lot_size".to_string());
        }
        if self.risk.risk_reward_ratio.preferred < self.risk.risk_reward_ratio.min {
            errors.push("risk.risk_reward_ratio.preferred must be >= min".to_string());
        }
        if self.risk.stop_loss_range.preferred <= Decimal::ZERO {
            errors.push("risk.stop_loss_range.preferred must be > 0".to_string());
        }

        if self.signals.min_confidence < Decimal::ZERO || self.signals.min_confidence > dec!(100) {
            errors.push("signals.min_confidence must be between 0 and 100".to_string());
        }
        if self.signals.momentum.weighted_threshold <= Decimal::ZERO
            || self.signals.momentum.weighted_threshold > Decimal::ONE
        {
            errors.push("signals.momentum.weighted_threshold must be in (0, 1]".to_string());
        }

        if self.execution.cycle_interval_seconds == 0 {
            errors.push("execution.cycle_interval_seconds must be > 0".to_string());
        }
        if self.execution.max_concurrent_positions == 0 {
            errors.push("execution.max_concurrent_positions must be > 0".to_string());
        }

        if self.atr.min_points > self.atr.max_points {
            errors.push("atr.min_points must be <= max_points".to_string());
        }
        if self.circuit_breaker.window_size < self.circuit_breaker.losses_in_window {
            errors.push("circuit_breaker.window_size must be >= losses_in_window".to_string());
        }

        for window in self
            .sessions
            .prime
            .iter()
            .chain(self.sessions.acceptable.iter())
        {
            if window.parse_times().is_none() {
                errors.push(format!(
                    "sessions: invalid window {}-{} (expected HH:MM)",
                    window.start, window.end
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Percent of equity risked per trade (0.5 = 0.5%).
    pub risk_per_trade: Decimal,
    pub stop_loss_range: StopLossRange,
    pub risk_reward_ratio: RiskRewardRatio,
    pub min_lot_size: Decimal,
    pub max_lot_size: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_per_trade: dec!(0.5),
            stop_loss_range: StopLossRange::default(),
            risk_reward_ratio: RiskRewardRatio::default(),
            min_lot_size: dec!(0.01),
            max_lot_size: dec!(0.30),
        }
    }
}

/// Stop values are points divided by 100: preferred = 0.30 means a 30-point
/// stop, not 0.30% of price. The sizer multiplies by 100 and adds a 3-point
/// buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopLossRange {
    pub min: Decimal,
    pub preferred: Decimal,
    pub max: Decimal,
}

impl Default for StopLossRange {
    fn default() -> Self {
        Self {
            min: dec!(0.25),
            preferred: dec!(0.30),
            max: dec!(0.40),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskRewardRatio {
    pub min: Decimal,
    pub preferred: Decimal,
}

impl Default for RiskRewardRatio {
    fn default() -> Self {
        Self {
            min: dec!(1.0),
            preferred: dec!(1.2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub min_confidence: Decimal,
    /// Added to sell-signal confidence (usually zero or negative).
    pub sell_confidence_penalty: Decimal,
    pub rsi_oversold: Decimal,
    pub rsi_overbought: Decimal,
    pub min_body_ratio: Decimal,
    pub strong_body_ratio: Decimal,
    /// Legacy gate: when true, a signal without any entry trigger (swing
    /// level, EMA pullback, sweep, breakout) is rejected. Scalping mode
    /// leaves this off and uses triggers for entry typing only.
    pub require_entry_trigger: bool,
    pub momentum: MomentumSettings,
    pub trend_alignment: TrendAlignmentSettings,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            min_confidence: dec!(55),
            sell_confidence_penalty: Decimal::ZERO,
            rsi_oversold: dec!(30),
            rsi_overbought: dec!(70),
            min_body_ratio: dec!(0.35),
            strong_body_ratio: dec!(0.70),
            require_entry_trigger: false,
            momentum: MomentumSettings::default(),
            trend_alignment: TrendAlignmentSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumSettings {
    /// Candles scored in stage 1 (current + previous).
    pub stage1_lookback: usize,
    pub stage1_min_body_ratio: Decimal,
    pub weighted_threshold: Decimal,
    /// Stage 2: current body must reach this multiple of the prior-5 mean.
    pub stage2_size_multiplier: Decimal,
    /// Stage 2 alternative: volume at this multiple of the prior-5 mean.
    pub stage2_volume_multiplier: Decimal,
    pub skip_stage2_if_strong: bool,
    pub stage1_strong_threshold: Decimal,
    pub max_wick_ratio: Decimal,
}

impl Default for MomentumSettings {
    fn default() -> Self {
        Self {
            stage1_lookback: 2,
            stage1_min_body_ratio: dec!(0.55),
            weighted_threshold: dec!(0.5),
            stage2_size_multiplier: dec!(1.2),
            stage2_volume_multiplier: dec!(1.3),
            skip_stage2_if_strong: true,
            stage1_strong_threshold: dec!(0.7),
            max_wick_ratio: dec!(0.40),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendAlignmentSettings {
    pub scoring: AlignmentScoring,
    pub neutral_trend: NeutralTrendRules,
}

impl Default for TrendAlignmentSettings {
    fn default() -> Self {
        Self {
            scoring: AlignmentScoring::default(),
            neutral_trend: NeutralTrendRules::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentScoring {
    pub both_bullish: Decimal,
    pub both_bearish: Decimal,
    pub m5_bullish_m1_neutral: Decimal,
    pub m5_neutral_m1_bullish: Decimal,
    pub m5_bearish_m1_neutral: Decimal,
    pub m5_neutral_m1_bearish: Decimal,
    /// Score applied when M5 and M1 directly conflict; leave unset to reject
    /// those signals outright.
    pub conflicting: Option<Decimal>,
}

impl Default for AlignmentScoring {
    fn default() -> Self {
        Self {
            both_bullish: dec!(15),
            both_bearish: dec!(15),
            m5_bullish_m1_neutral: dec!(5),
            m5_neutral_m1_bullish: Decimal::ZERO,
            m5_bearish_m1_neutral: dec!(5),
            m5_neutral_m1_bearish: Decimal::ZERO,
            conflicting: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeutralTrendRules {
    pub allow_trades: bool,
    pub reduce_position_size: Decimal,
    /// Stop value (points / 100) used instead of the preferred stop.
    pub tighter_stop: Decimal,
}

impl Default for NeutralTrendRules {
    fn default() -> Self {
        Self {
            allow_trades: true,
            reduce_position_size: dec!(0.7),
            tighter_stop: dec!(0.25),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureSettings {
    /// Candles scanned for swing highs/lows each cycle.
    pub swing_point_lookback: usize,
    pub swing_tolerance_points: Decimal,
    pub swing_lookback_candles: usize,
    pub swing_min_bounces: usize,
    pub ema_tolerance_points: Decimal,
    pub ema_must_have_touched: bool,
    pub liquidity_sweep_enabled: bool,
    pub sweep_threshold_points: Decimal,
    pub breakout_enabled: bool,
}

impl Default for StructureSettings {
    fn default() -> Self {
        Self {
            swing_point_lookback: 10,
            swing_tolerance_points: dec!(8),
            swing_lookback_candles: 15,
            swing_min_bounces: 1,
            ema_tolerance_points: dec!(6),
            ema_must_have_touched: true,
            liquidity_sweep_enabled: true,
            sweep_threshold_points: dec!(2),
            breakout_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionWindow {
    pub start: String,
    pub end: String,
    pub enabled: bool,
}

impl Default for SessionWindow {
    fn default() -> Self {
        Self {
            start: "08:00".to_string(),
            end: "11:30".to_string(),
            enabled: true,
        }
    }
}

impl SessionWindow {
    pub fn parse_times(&self) -> Option<(chrono::NaiveTime, chrono::NaiveTime)> {
        let start = chrono::NaiveTime::parse_from_str(&self.start, "%H:%M").ok()?;
        let end = chrono::NaiveTime::parse_from_str(&self.end, "%H:%M").ok()?;
        Some((start, end))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub prime: Vec<SessionWindow>,
    pub acceptable: Vec<SessionWindow>,
    pub risk_multiplier: SessionMultipliers,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            prime: vec![
                SessionWindow {
                    start: "08:00".to_string(),
                    end: "11:30".to_string(),
                    enabled: true,
                },
                SessionWindow {
                    start: "13:30".to_string(),
                    end: "16:00".to_string(),
                    enabled: true,
                },
            ],
            acceptable: vec![SessionWindow {
                start: "16:00".to_string(),
                end: "18:00".to_string(),
                enabled: true,
            }],
            risk_multiplier: SessionMultipliers::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMultipliers {
    pub prime: Decimal,
    pub acceptable: Decimal,
}

impl Default for SessionMultipliers {
    fn default() -> Self {
        Self {
            prime: dec!(1.0),
            acceptable: dec!(0.75),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub consecutive_losses: usize,
    pub losses_in_window: usize,
    pub window_size: usize,
    pub daily_drawdown_percent: Decimal,
    pub stopouts_in_window: usize,
    pub stopout_window_size: usize,
    pub halt_duration_minutes: i64,
    pub graduated_response: GraduatedResponse,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            consecutive_losses: 3,
            losses_in_window: 5,
            window_size: 7,
            daily_drawdown_percent: dec!(3.0),
            stopouts_in_window: 4,
            stopout_window_size: 5,
            halt_duration_minutes: 60,
            graduated_response: GraduatedResponse::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraduatedResponse {
    pub after_1_loss_confidence_threshold: Decimal,
    pub after_2_losses_risk_percent: Decimal,
    pub after_2_losses_confidence_threshold: Decimal,
}

impl Default for GraduatedResponse {
    fn default() -> Self {
        Self {
            after_1_loss_confidence_threshold: dec!(70),
            after_2_losses_risk_percent: dec!(0.3),
            after_2_losses_confidence_threshold: dec!(75),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub cycle_interval_seconds: u64,
    pub max_concurrent_positions: usize,
    pub slippage_tolerance_points: Decimal,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: 30,
            max_concurrent_positions: 1,
            slippage_tolerance_points: dec!(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadSettings {
    pub prime_max: Decimal,
    pub acceptable_max: Decimal,
    pub default_max: Decimal,
}

impl Default for SpreadSettings {
    fn default() -> Self {
        Self {
            prime_max: dec!(25),
            acceptable_max: dec!(35),
            default_max: dec!(30),
        }
    }
}

/// All ATR bounds are in points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrSettings {
    pub min_points: Decimal,
    pub max_points: Decimal,
    pub optimal_min: Decimal,
    pub optimal_max: Decimal,
    pub spike_multiplier: Decimal,
    /// Above this multiple of the ATR average the pre-trade validator
    /// rejects outright (news event).
    pub extreme_spike_multiplier: Decimal,
    pub average_period: usize,
}

impl Default for AtrSettings {
    fn default() -> Self {
        Self {
            min_points: dec!(6),
            max_points: dec!(12),
            optimal_min: dec!(8),
            optimal_max: dec!(11),
            spike_multiplier: dec!(1.8),
            extreme_spike_multiplier: dec!(2.5),
            average_period: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitSettings {
    pub time_limit_minutes: i64,
    /// Unrealized return (percent of entry) that arms break-even protection.
    pub breakeven_profit_percent: Decimal,
    pub breakeven_buffer_points: Decimal,
    pub partial_exit_1_percent: Decimal,
    pub partial_exit_1_close_percent: Decimal,
    pub partial_exit_2_percent: Decimal,
    pub partial_exit_2_close_percent: Decimal,
}

impl Default for ExitSettings {
    fn default() -> Self {
        Self {
            time_limit_minutes: 15,
            breakeven_profit_percent: dec!(0.15),
            breakeven_buffer_points: dec!(2),
            partial_exit_1_percent: dec!(0.20),
            partial_exit_1_close_percent: dec!(50),
            partial_exit_2_percent: dec!(0.35),
            partial_exit_2_close_percent: dec!(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://gold_engine.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// Synthetic spread applied around the M1 close, in points.
    pub spread_points: Decimal,
    /// Seed for the slippage generator so replays are reproducible.
    pub slippage_seed: u64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            spread_points: dec!(0.3),
            slippage_seed: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_risk_percent_is_rejected() {
        let mut config = EngineConfig::default();
        config.risk.risk_per_trade = dec!(0);
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("risk_per_trade")));
    }

    #[test]
    fn bad_session_window_is_rejected() {
        let mut config = EngineConfig::default();
        config.sessions.prime.push(SessionWindow {
            start: "25:99".to_string(),
            end: "11:00".to_string(),
            enabled: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [risk]
            risk_per_trade = 1.0

            [signals]
            min_confidence = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.risk.risk_per_trade, dec!(1.0));
        assert_eq!(config.signals.min_confidence, dec!(60));
        // untouched sections keep defaults
        assert_eq!(config.exit.time_limit_minutes, 15);
        assert_eq!(config.execution.cycle_interval_seconds, 30);
    }
}
