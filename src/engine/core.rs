use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::EngineConfig;
use crate::position::{ExitStrategy, PositionManager};
use crate::risk::{CircuitBreaker, PositionSizer, RiskValidator};
use crate::session::{SessionManager, VolatilityFilter};
use crate::signals::{SignalContext, SignalGenerator};
use crate::storage::TradeStore;
use crate::types::{Side, Signal, TradeRecord};

use super::executor::OrderExecutor;
use super::{fetch_snapshot, MarketSnapshot};

/// What happened to the last signal, for the cycle status line.
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    NoneYet,
    NoSignal { reason: String },
    Rejected { stage: &'static str, reason: String },
    Executed { ticket: u64, summary: String },
    ExecutionFailed { error: String },
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalOutcome::NoneYet => write!(f, "no signal activity yet"),
            SignalOutcome::NoSignal { reason } => write!(f, "no signal - {}", reason),
            SignalOutcome::Rejected { stage, reason } => {
                write!(f, "rejected at {} - {}", stage, reason)
            }
            SignalOutcome::Executed { ticket, summary } => {
                write!(f, "executed {} (ticket {})", summary, ticket)
            }
            SignalOutcome::ExecutionFailed { error } => {
                write!(f, "execution failed - {}", error)
            }
        }
    }
}

/// One engine instance: all decision components wired over a broker and a
/// store. The live loop and the backtest driver both drive this through
/// [`TradingEngine::run_cycle`], differing only in their clocks.
pub struct TradingEngine {
    config: EngineConfig,
    broker: Arc<dyn Broker>,
    store: Arc<dyn TradeStore>,
    signal_generator: SignalGenerator,
    position_sizer: PositionSizer,
    risk_validator: RiskValidator,
    circuit_breaker: CircuitBreaker,
    session_manager: SessionManager,
    volatility_filter: VolatilityFilter,
    position_manager: PositionManager,
    executor: OrderExecutor,
    starting_equity: Decimal,
    last_outcome: SignalOutcome,
}

impl TradingEngine {
    pub fn new(config: EngineConfig, broker: Arc<dyn Broker>, store: Arc<dyn TradeStore>) -> Self {
        let instrument = config.instrument.clone();

        let signal_generator = SignalGenerator::new(
            config.signals.clone(),
            config.structure.clone(),
            config.atr.clone(),
            instrument.clone(),
        );
        let position_sizer = PositionSizer::new(config.risk.clone(), instrument.clone());
        let risk_validator = RiskValidator::new(
            config.spread.clone(),
            config.atr.clone(),
            config.execution.clone(),
        );
        let circuit_breaker = CircuitBreaker::new(
            config.circuit_breaker.clone(),
            instrument.clone(),
            config.risk.risk_per_trade,
            config.signals.min_confidence,
        );
        let session_manager = SessionManager::new(config.sessions.clone());
        let volatility_filter = VolatilityFilter::new(config.atr.clone());
        let exit_strategy = ExitStrategy::new(
            config.exit.clone(),
            config.risk.risk_reward_ratio.preferred,
            instrument.clone(),
        );
        let position_manager = PositionManager::new(
            broker.clone(),
            store.clone(),
            exit_strategy,
            instrument.clone(),
        );
        let executor = OrderExecutor::new(
            broker.clone(),
            instrument,
            config.risk.risk_reward_ratio.min,
            config.execution.slippage_tolerance_points,
        );

        Self {
            config,
            broker,
            store,
            signal_generator,
            position_sizer,
            risk_validator,
            circuit_breaker,
            session_manager,
            volatility_filter,
            position_manager,
            executor,
            starting_equity: Decimal::ZERO,
            last_outcome: SignalOutcome::NoneYet,
        }
    }

    /// Connect the broker, capture starting equity, and seed the ticket set
    /// so pre-existing positions are not misread as broker closes.
    pub async fn initialize(&mut self) -> Result<()> {
        self.broker.connect().await?;

        let account = self.broker.get_account().await?;
        self.starting_equity = account.equity;
        info!("starting equity: {:.2}", self.starting_equity);

        let open = self
            .broker
            .get_open_positions(&self.config.instrument.symbol)
            .await?;
        if !open.is_empty() {
            info!("tracking {} pre-existing open positions", open.len());
        }
        self.position_manager.seed_tickets(&open);
        Ok(())
    }

    /// One decision cycle. Every phase converts its own failures into a
    /// transient/policy outcome; the loop never sees a panic-worthy error.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<()> {
        let session = self.session_manager.current_session(now);

        let snapshot = match fetch_snapshot(
            self.broker.as_ref(),
            &self.config.instrument,
            &self.config.structure,
            &self.config.atr,
        )
        .await
        {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(()), // data problem already logged
            Err(e) => {
                warn!("market data fetch failed, retrying next cycle: {:#}", e);
                return Ok(());
            }
        };

        // positions are managed every cycle, including outside trading hours
        // and while halted
        if let Err(e) = self
            .position_manager
            .monitor(snapshot.current_price, &snapshot.m1_candles, now)
            .await
        {
            error!("position monitoring failed: {:#}", e);
        }

        if !session.active {
            debug!("not in trading window: {}", session.reason);
            return Ok(());
        }

        let history = match self.store.recent_trades(10).await {
            Ok(h) => h,
            Err(e) => {
                warn!("trade history unavailable: {:#}", e);
                Vec::new()
            }
        };
        let daily_pnl = self
            .store
            .session_pnl(now.date_naive())
            .await
            .unwrap_or(Decimal::ZERO);

        let halt_check =
            self.circuit_breaker
                .evaluate(&history, daily_pnl, self.starting_equity, now);
        for event in &halt_check.events {
            if let Err(e) = self.store.record_event(event).await {
                error!("failed to persist circuit breaker event: {:#}", e);
            }
        }
        if halt_check.halted {
            let reason = halt_check
                .reason
                .map(|r| r.as_str().to_string())
                .unwrap_or_default();
            debug!("trading halted: {} ({}m left)", reason, halt_check.remaining_minutes);
            self.last_outcome = SignalOutcome::Rejected {
                stage: "circuit_breaker_halt",
                reason,
            };
            return Ok(());
        }

        let open_positions = self
            .broker
            .get_open_positions(&self.config.instrument.symbol)
            .await?;
        if open_positions.len() >= self.config.execution.max_concurrent_positions {
            debug!("maximum positions already open");
            return Ok(());
        }

        let signal = match self.generate_signal(&snapshot, now) {
            Some(signal) => signal,
            None => {
                self.last_outcome = SignalOutcome::NoSignal {
                    reason: "market conditions not met".to_string(),
                };
                return Ok(());
            }
        };
        if let Err(e) = self.store.record_signal(&signal).await {
            error!("failed to persist signal: {:#}", e);
        }

        self.evaluate_and_execute(signal, &snapshot, open_positions.len(), &session, now)
            .await
    }

    fn generate_signal(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Option<Signal> {
        self.signal_generator.generate(&SignalContext {
            m5_candles: &snapshot.m5_candles,
            m1_candles: &snapshot.m1_candles,
            m5_ema21: &snapshot.m5_ema21,
            m1_rsi: &snapshot.m1_rsi,
            swings: &snapshot.swings,
            atr_points: snapshot.atr_points,
            atr_average_points: snapshot.atr_average_points,
            now,
        })
    }

    async fn evaluate_and_execute(
        &mut self,
        signal: Signal,
        snapshot: &MarketSnapshot,
        open_count: usize,
        session: &crate::session::SessionInfo,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let summary = format!("{} {}", signal.direction, signal.entry_type);
        let cb_state = self.circuit_breaker.snapshot();
        let min_confidence = cb_state.adjusted_confidence_threshold;

        if signal.confidence < min_confidence {
            info!(
                "trade rejected: confidence {:.1}% below circuit breaker threshold {:.1}%",
                signal.confidence, min_confidence
            );
            self.last_outcome = SignalOutcome::Rejected {
                stage: "circuit_breaker_threshold",
                reason: format!(
                    "confidence {:.1}% < {:.1}%",
                    signal.confidence, min_confidence
                ),
            };
            return Ok(());
        }

        let account = match self.broker.get_account().await {
            Ok(a) => a,
            Err(e) => {
                warn!("account info unavailable: {:#}", e);
                self.last_outcome = SignalOutcome::Rejected {
                    stage: "account_info",
                    reason: "account info unavailable".to_string(),
                };
                return Ok(());
            }
        };

        // ATR admission plus its confidence haircut
        let verdict = self
            .volatility_filter
            .validate(snapshot.atr_points, snapshot.atr_average_points);
        if !verdict.valid {
            info!("trade rejected: {}", verdict.reason);
            self.last_outcome = SignalOutcome::Rejected {
                stage: "atr_validation",
                reason: verdict.reason,
            };
            return Ok(());
        }
        let adjusted_confidence = signal.confidence + verdict.confidence_delta;
        if verdict.confidence_delta < Decimal::ZERO && adjusted_confidence < min_confidence {
            info!(
                "trade rejected: ATR-adjusted confidence {:.1}% below threshold {:.1}%",
                adjusted_confidence, min_confidence
            );
            self.last_outcome = SignalOutcome::Rejected {
                stage: "atr_adjusted_confidence",
                reason: format!("{:.1}% < {:.1}%", adjusted_confidence, min_confidence),
            };
            return Ok(());
        }

        if let Err(rejection) = self.risk_validator.validate(
            snapshot.tick.spread_points,
            snapshot.atr_points,
            snapshot.atr_average_points,
            &account,
            open_count,
            session.session_type,
        ) {
            info!("trade rejected: {}", rejection);
            self.last_outcome = SignalOutcome::Rejected {
                stage: "risk_validation",
                reason: rejection.to_string(),
            };
            return Ok(());
        }

        // neutral-trend entries run with a tighter stop and reduced size
        let neutral = &self.config.signals.trend_alignment.neutral_trend;
        let (stop_percent, size_multiplier) = if signal.alignment.neutral_trend {
            (neutral.tighter_stop, neutral.reduce_position_size)
        } else {
            (self.position_sizer.preferred_stop_percent(), Decimal::ONE)
        };

        let stop_distance_points = self.position_sizer.stop_distance_points(stop_percent);
        let risk_percent =
            cb_state.adjusted_risk_percent * session.risk_multiplier * size_multiplier;
        let lot_size =
            self.position_sizer
                .lot_size(account.equity, risk_percent, stop_distance_points);

        let stop_distance = self
            .config
            .instrument
            .points_to_price(stop_distance_points);
        let stop_loss = match signal.direction {
            Side::Buy => signal.price - stop_distance,
            Side::Sell => signal.price + stop_distance,
        };
        let take_profit = self.executor.take_profit(
            signal.price,
            stop_loss,
            self.config.risk.risk_reward_ratio.preferred,
            signal.direction,
        );

        if let Err(rejection) = self.executor.validate_order(
            signal.direction,
            signal.price,
            stop_loss,
            take_profit,
            account.equity,
        ) {
            info!("trade rejected: {}", rejection);
            self.last_outcome = SignalOutcome::Rejected {
                stage: "order_validation",
                reason: rejection.to_string(),
            };
            return Ok(());
        }

        info!(
            "executing {}: {:.3} lots @ ~{:.2}, sl {:.2}, tp {:.2}, risk {:.2}%",
            summary, lot_size, signal.price, stop_loss, take_profit, risk_percent
        );

        match self
            .executor
            .place(&signal, lot_size, stop_loss, take_profit, &account)
            .await
        {
            Ok(placed) => {
                let record = TradeRecord {
                    ticket: placed.ticket,
                    direction: signal.direction,
                    entry_price: placed.fill_price,
                    lot_size,
                    stop_loss: placed.stop_loss,
                    take_profit: placed.take_profit,
                    entry_time: now,
                    exit_price: None,
                    exit_time: None,
                    exit_reason: None,
                    pnl: Decimal::ZERO,
                    hold_seconds: None,
                    partial_exits: Vec::new(),
                    signal_id: Some(signal.id),
                };
                if let Err(e) = self.store.record_trade_entry(&record).await {
                    error!("failed to persist trade entry: {:#}", e);
                }
                self.last_outcome = SignalOutcome::Executed {
                    ticket: placed.ticket,
                    summary,
                };
            }
            Err(e) => {
                warn!("order execution failed: {:#}", e);
                self.last_outcome = SignalOutcome::ExecutionFailed {
                    error: format!("{:#}", e),
                };
            }
        }

        Ok(())
    }

    /// Run only the position-management half of a cycle. The backtest
    /// driver uses this after forcing closes at the end of the data.
    pub async fn reconcile_positions(&mut self, now: DateTime<Utc>) -> Result<()> {
        let snapshot = match fetch_snapshot(
            self.broker.as_ref(),
            &self.config.instrument,
            &self.config.structure,
            &self.config.atr,
        )
        .await?
        {
            Some(s) => s,
            None => return Ok(()),
        };
        self.position_manager
            .monitor(snapshot.current_price, &snapshot.m1_candles, now)
            .await
    }

    /// One status line per cycle: equity, positions, session, breaker, and
    /// the last signal outcome.
    pub async fn status_line(&self, now: DateTime<Utc>) -> String {
        let equity = self
            .broker
            .get_account()
            .await
            .map(|a| a.equity)
            .unwrap_or(Decimal::ZERO);
        let open = self
            .broker
            .get_open_positions(&self.config.instrument.symbol)
            .await
            .map(|p| p.len())
            .unwrap_or(0);
        let session = self.session_manager.current_session(now);
        let cb = self.circuit_breaker.snapshot();
        let breaker = if cb.halted {
            format!(
                "HALTED ({})",
                cb.reason.map(|r| r.as_str()).unwrap_or("unknown")
            )
        } else {
            format!(
                "active (risk {}%, confidence {}%)",
                cb.adjusted_risk_percent, cb.adjusted_confidence_threshold
            )
        };

        format!(
            "equity {:.2} | open {} | session {} | breaker {} | last: {}",
            equity, open, session.session_type, breaker, self.last_outcome
        )
    }
}
