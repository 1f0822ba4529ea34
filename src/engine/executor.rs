use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{Broker, OrderRequest, OrderResult};
use crate::risk::TradeRejection;
use crate::types::{AccountInfo, Instrument, Side, Signal};

/// Final order parameters after the fill-price re-anchor.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub ticket: u64,
    pub fill_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Thin dispatch layer over the broker: parameter validation, take-profit
/// derivation, and SL/TP re-anchoring against the actual fill.
pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    instrument: Instrument,
    min_risk_reward: Decimal,
    slippage_tolerance_points: Decimal,
}

impl OrderExecutor {
    pub fn new(
        broker: Arc<dyn Broker>,
        instrument: Instrument,
        min_risk_reward: Decimal,
        slippage_tolerance_points: Decimal,
    ) -> Self {
        Self {
            broker,
            instrument,
            min_risk_reward,
            slippage_tolerance_points,
        }
    }

    pub fn take_profit(
        &self,
        entry_price: Decimal,
        stop_loss: Decimal,
        risk_reward_ratio: Decimal,
        side: Side,
    ) -> Decimal {
        let tp_distance = (entry_price - stop_loss).abs() * risk_reward_ratio;
        let tp = match side {
            Side::Buy => entry_price + tp_distance,
            Side::Sell => entry_price - tp_distance,
        };
        tp.round_dp(2)
    }

    /// Order-parameter invariants: positive stop distance, positive equity,
    /// SL on the loss side, TP on the profit side, R:R at the minimum.
    pub fn validate_order(
        &self,
        side: Side,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        equity: Decimal,
    ) -> Result<(), TradeRejection> {
        if equity <= Decimal::ZERO {
            return Err(TradeRejection::InvalidEquity);
        }

        let stop_distance = (entry_price - stop_loss).abs();
        if stop_distance.is_zero() {
            return Err(TradeRejection::StopDistanceZero);
        }

        let sl_ok = match side {
            Side::Buy => stop_loss < entry_price,
            Side::Sell => stop_loss > entry_price,
        };
        if !sl_ok {
            return Err(TradeRejection::StopOnWrongSide);
        }

        let tp_ok = match side {
            Side::Buy => take_profit > entry_price,
            Side::Sell => take_profit < entry_price,
        };
        if !tp_ok {
            return Err(TradeRejection::TakeProfitOnWrongSide);
        }

        let rr = (take_profit - entry_price).abs() / stop_distance;
        if rr < self.min_risk_reward {
            return Err(TradeRejection::RiskRewardTooLow {
                actual: rr,
                min: self.min_risk_reward,
            });
        }

        Ok(())
    }

    /// Place the order at the venue's bid/ask. SL and TP were computed from
    /// the signal price; the distances are preserved and re-anchored to the
    /// actual fill before dispatch.
    pub async fn place(
        &self,
        signal: &Signal,
        lot_size: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        account: &AccountInfo,
    ) -> Result<PlacedOrder> {
        let tick = self.broker.get_tick(&self.instrument.symbol).await?;
        let expected_entry = match signal.direction {
            Side::Buy => tick.ask,
            Side::Sell => tick.bid,
        };

        let stop_distance = (signal.price - stop_loss).abs();
        let tp_distance = (take_profit - signal.price).abs();
        let (stop_loss, take_profit) = match signal.direction {
            Side::Buy => (expected_entry - stop_distance, expected_entry + tp_distance),
            Side::Sell => (expected_entry + stop_distance, expected_entry - tp_distance),
        };

        self.validate_order(
            signal.direction,
            expected_entry,
            stop_loss,
            take_profit,
            account.equity,
        )
        .map_err(|r| anyhow::anyhow!(r))?;

        let result: OrderResult = self
            .broker
            .place_order(OrderRequest {
                symbol: self.instrument.symbol.clone(),
                side: signal.direction,
                volume: lot_size,
                price: expected_entry,
                sl: stop_loss,
                tp: take_profit,
                deviation_points: self.slippage_tolerance_points,
                comment: format!("{}_{:.0}", signal.entry_type, signal.confidence),
            })
            .await?;

        let slippage_points = self
            .instrument
            .price_to_points((result.fill_price - expected_entry).abs());
        if slippage_points > self.slippage_tolerance_points {
            warn!(
                "slippage {:.2} points exceeds tolerance {}",
                slippage_points, self.slippage_tolerance_points
            );
        }

        info!(
            "order executed: ticket={} {} {} @ {:.2} sl={:.2} tp={:.2}",
            result.ticket,
            signal.direction,
            lot_size,
            result.fill_price,
            stop_loss,
            take_profit
        );

        Ok(PlacedOrder {
            ticket: result.ticket,
            fill_price: result.fill_price,
            stop_loss,
            take_profit,
        })
    }
}
