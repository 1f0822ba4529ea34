use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::types::{AccountInfo, Candle, Deal, Instrument, Position, Side, Tick};

use super::{Broker, OrderRequest, OrderResult};

struct SimState {
    index: usize,
    equity: Decimal,
    balance: Decimal,
    positions: HashMap<u64, Position>,
    deals: HashMap<u64, Vec<Deal>>,
    next_ticket: u64,
    rng: StdRng,
}

/// Deterministic broker replacement for backtests. Serves candles up to a
/// monotonically advancing M1 index, fills market orders at bid/ask with
/// seeded bounded slippage, and closes positions whose SL/TP the current
/// candle crosses. Within one candle SL wins over TP (adverse first).
pub struct SimBroker {
    instrument: Instrument,
    m1: Vec<Candle>,
    m5: Vec<Candle>,
    spread_points: Decimal,
    slippage_tolerance_points: Decimal,
    state: Mutex<SimState>,
}

impl SimBroker {
    pub fn new(
        instrument: Instrument,
        mut m1: Vec<Candle>,
        mut m5: Vec<Candle>,
        initial_equity: Decimal,
        spread_points: Decimal,
        slippage_tolerance_points: Decimal,
        seed: u64,
    ) -> Self {
        m1.sort_by_key(|c| c.time);
        m5.sort_by_key(|c| c.time);
        Self {
            instrument,
            m1,
            m5,
            spread_points,
            slippage_tolerance_points,
            state: Mutex::new(SimState {
                index: 0,
                equity: initial_equity,
                balance: initial_equity,
                positions: HashMap::new(),
                deals: HashMap::new(),
                next_ticket: 1000,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().expect("sim state poisoned");
        self.m1.get(state.index).map(|c| c.time)
    }

    pub fn equity(&self) -> Decimal {
        self.state.lock().expect("sim state poisoned").equity
    }

    fn current_candle(&self, index: usize) -> Option<&Candle> {
        self.m1.get(index)
    }

    fn tick_at(&self, index: usize) -> Option<Tick> {
        let candle = self.current_candle(index)?;
        let half_spread = self.instrument.points_to_price(self.spread_points) / Decimal::from(2);
        Some(Tick {
            bid: candle.close - half_spread,
            ask: candle.close + half_spread,
            spread_points: self.spread_points,
            time: candle.time,
        })
    }

    fn pnl(&self, position: &Position, exit_price: Decimal) -> Decimal {
        let favorable = match position.side {
            Side::Buy => exit_price - position.price_open,
            Side::Sell => position.price_open - exit_price,
        };
        self.instrument
            .risk_amount(self.instrument.price_to_points(favorable), position.volume)
    }

    fn record_close(
        state: &mut SimState,
        pnl: Decimal,
        ticket: u64,
        price: Decimal,
        comment: &str,
        time: DateTime<Utc>,
    ) {
        state.equity += pnl;
        if state.equity > state.balance {
            state.balance = state.equity;
        }
        state.deals.entry(ticket).or_default().push(Deal {
            ticket,
            price,
            profit: pnl,
            comment: comment.to_string(),
            time,
            is_exit: true,
        });
    }

    /// Advance the simulation clock one M1 candle and settle SL/TP crossings
    /// against the new candle. Returns false at the end of data.
    pub fn advance(&self) -> bool {
        let mut state = self.state.lock().expect("sim state poisoned");
        if state.index + 1 >= self.m1.len() {
            return false;
        }
        state.index += 1;
        let candle = self.m1[state.index].clone();

        let tickets: Vec<u64> = state.positions.keys().copied().collect();
        for ticket in tickets {
            let position = state.positions[&ticket].clone();
            // SL before TP when one candle spans both
            let (hit_price, comment) = match position.side {
                Side::Buy => {
                    if candle.low <= position.sl {
                        (Some(position.sl), "sl")
                    } else if candle.high >= position.tp {
                        (Some(position.tp), "tp")
                    } else {
                        (None, "")
                    }
                }
                Side::Sell => {
                    if candle.high >= position.sl {
                        (Some(position.sl), "sl")
                    } else if candle.low <= position.tp {
                        (Some(position.tp), "tp")
                    } else {
                        (None, "")
                    }
                }
            };

            if let Some(price) = hit_price {
                let pnl = self.pnl(&position, price);
                state.positions.remove(&ticket);
                Self::record_close(&mut state, pnl, ticket, price, comment, candle.time);
                debug!(
                    "Sim close: ticket={} {} @ {:.2} pnl={:.2}",
                    ticket, comment, price, pnl
                );
            } else if let Some(open) = state.positions.get_mut(&ticket) {
                let favorable = match open.side {
                    Side::Buy => candle.close - open.price_open,
                    Side::Sell => open.price_open - candle.close,
                };
                open.profit = self
                    .instrument
                    .risk_amount(self.instrument.price_to_points(favorable), open.volume);
            }
        }

        true
    }

    /// Close everything at the current price; used at the end of the data.
    pub fn force_close_all(&self) -> Vec<u64> {
        let mut state = self.state.lock().expect("sim state poisoned");
        let index = state.index;
        let tick = match self.tick_at(index) {
            Some(t) => t,
            None => return Vec::new(),
        };

        let tickets: Vec<u64> = state.positions.keys().copied().collect();
        for &ticket in &tickets {
            let position = state.positions.remove(&ticket).expect("listed above");
            let price = match position.side {
                Side::Buy => tick.bid,
                Side::Sell => tick.ask,
            };
            let pnl = self.pnl(&position, price);
            Self::record_close(&mut state, pnl, ticket, price, "end_of_data", tick.time);
        }
        tickets
    }
}

#[async_trait]
impl Broker for SimBroker {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn get_candles(
        &self,
        _symbol: &str,
        timeframe_minutes: u32,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let state = self.state.lock().expect("sim state poisoned");
        let index = state.index;
        drop(state);

        let current_time = match self.current_candle(index) {
            Some(c) => c.time,
            None => return Ok(Vec::new()),
        };

        match timeframe_minutes {
            1 => {
                let available = &self.m1[..=index];
                Ok(available[available.len().saturating_sub(count)..].to_vec())
            }
            5 => {
                let upper = self.m5.partition_point(|c| c.time <= current_time);
                let available = &self.m5[..upper];
                Ok(available[available.len().saturating_sub(count)..].to_vec())
            }
            other => Err(anyhow!("unsupported timeframe: M{}", other)),
        }
    }

    async fn get_tick(&self, _symbol: &str) -> Result<Tick> {
        let state = self.state.lock().expect("sim state poisoned");
        let index = state.index;
        drop(state);
        self.tick_at(index).ok_or_else(|| anyhow!("no data left"))
    }

    async fn get_account(&self) -> Result<AccountInfo> {
        let state = self.state.lock().expect("sim state poisoned");
        Ok(AccountInfo {
            equity: state.equity,
            balance: state.balance,
            margin: Decimal::ZERO,
            free_margin: state.equity,
            margin_level: Decimal::ZERO,
            currency: "USD".to_string(),
        })
    }

    async fn get_open_positions(&self, _symbol: &str) -> Result<Vec<Position>> {
        let state = self.state.lock().expect("sim state poisoned");
        let mut positions: Vec<Position> = state.positions.values().cloned().collect();
        positions.sort_by_key(|p| p.ticket);
        Ok(positions)
    }

    async fn place_order(&self, request: OrderRequest) -> Result<OrderResult> {
        let mut state = self.state.lock().expect("sim state poisoned");
        let index = state.index;
        let tick = self
            .tick_at(index)
            .ok_or_else(|| anyhow!("no data left"))?;

        let tolerance = self
            .slippage_tolerance_points
            .to_f64()
            .unwrap_or(0.0)
            .max(0.0);
        let slippage_points = Decimal::try_from(state.rng.gen_range(0.0..=tolerance))
            .unwrap_or(Decimal::ZERO);
        let slippage = self.instrument.points_to_price(slippage_points);

        let fill_price = match request.side {
            Side::Buy => tick.ask + slippage,
            Side::Sell => tick.bid - slippage,
        };

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        state.positions.insert(
            ticket,
            Position {
                ticket,
                side: request.side,
                volume: request.volume,
                price_open: fill_price,
                sl: request.sl,
                tp: request.tp,
                profit: Decimal::ZERO,
                time: tick.time,
            },
        );
        state.deals.entry(ticket).or_default().push(Deal {
            ticket,
            price: fill_price,
            profit: Decimal::ZERO,
            comment: request.comment,
            time: tick.time,
            is_exit: false,
        });

        debug!(
            "Sim fill: ticket={} {} {} @ {:.2}",
            ticket, request.side, request.volume, fill_price
        );

        Ok(OrderResult { ticket, fill_price })
    }

    async fn modify_sl(&self, ticket: u64, sl: Decimal) -> Result<()> {
        let mut state = self.state.lock().expect("sim state poisoned");
        let position = state
            .positions
            .get_mut(&ticket)
            .ok_or_else(|| anyhow!("position {} not found", ticket))?;
        position.sl = sl;
        Ok(())
    }

    async fn close_position(&self, ticket: u64, volume: Option<Decimal>) -> Result<Decimal> {
        let mut state = self.state.lock().expect("sim state poisoned");
        let index = state.index;
        let tick = self
            .tick_at(index)
            .ok_or_else(|| anyhow!("no data left"))?;

        let position = state
            .positions
            .get(&ticket)
            .cloned()
            .ok_or_else(|| anyhow!("position {} not found", ticket))?;

        let price = match position.side {
            Side::Buy => tick.bid,
            Side::Sell => tick.ask,
        };

        let close_volume = volume.unwrap_or(position.volume).min(position.volume);
        let closed_part = Position {
            volume: close_volume,
            ..position.clone()
        };
        let pnl = self.pnl(&closed_part, price);

        let remaining = position.volume - close_volume;
        if remaining > Decimal::ZERO {
            if let Some(open) = state.positions.get_mut(&ticket) {
                open.volume = remaining;
            }
        } else {
            state.positions.remove(&ticket);
        }
        Self::record_close(&mut state, pnl, ticket, price, "engine_close", tick.time);

        Ok(price)
    }

    async fn position_history(&self, ticket: u64) -> Result<Vec<Deal>> {
        let state = self.state.lock().expect("sim state poisoned");
        Ok(state.deals.get(&ticket).cloned().unwrap_or_default())
    }
}
