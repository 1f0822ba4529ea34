use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

use super::core::TradingEngine;

/// Fixed-cadence orchestrator for live trading. Runs one cycle, prints the
/// status line, then sleeps out the remainder of the interval. An external
/// interrupt clears the flag and the loop finishes its current cycle.
pub struct ExecutionLoop {
    engine: TradingEngine,
    cycle_interval: Duration,
    running: Arc<AtomicBool>,
}

impl ExecutionLoop {
    pub fn new(engine: TradingEngine, cycle_interval_seconds: u64, running: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            cycle_interval: Duration::from_secs(cycle_interval_seconds),
            running,
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        self.engine.initialize().await
    }

    pub async fn run(&mut self) {
        info!(
            "starting execution loop ({}s cycle)",
            self.cycle_interval.as_secs()
        );

        while self.running.load(Ordering::Acquire) {
            let cycle_start = Instant::now();
            let now = Utc::now();

            if let Err(e) = self.engine.run_cycle(now).await {
                // a component leaked an error past its own handling; the
                // loop absorbs it and keeps running
                error!("cycle error: {:#}", e);
            }

            info!("{}", self.engine.status_line(now).await);

            let elapsed = cycle_start.elapsed();
            let sleep_for = self.cycle_interval.saturating_sub(elapsed);
            if sleep_for > Duration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = wait_for_stop(self.running.clone()) => {}
                }
            }
        }

        info!("execution loop stopped");
    }
}

async fn wait_for_stop(running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
