use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::risk::CircuitBreakerEvent;
use crate::types::{PartialExit, Side, Signal, TradeRecord};

use super::TradeStore;

/// SQLite-backed store for the live engine.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_url: &str) -> Result<Self> {
        info!("Initializing SQLite store at {}", db_url);

        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        // a pooled :memory: database would be one database per connection
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                time TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                confidence TEXT NOT NULL,
                price TEXT NOT NULL,
                reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                ticket INTEGER PRIMARY KEY,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                lot_size TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_price TEXT,
                exit_time TEXT,
                exit_reason TEXT,
                pnl TEXT NOT NULL DEFAULT '0',
                hold_seconds INTEGER,
                signal_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_exit_time ON trades(exit_time)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partial_exits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket INTEGER NOT NULL,
                fraction_closed TEXT NOT NULL,
                price TEXT NOT NULL,
                time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS circuit_breaker_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                reason TEXT NOT NULL,
                start_time TEXT,
                end_time TEXT,
                loss_count INTEGER NOT NULL,
                daily_pnl TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn partials_for(&self, ticket: u64) -> Result<Vec<PartialExit>> {
        let rows = sqlx::query(
            "SELECT fraction_closed, price, time FROM partial_exits WHERE ticket = ? ORDER BY id",
        )
        .bind(ticket as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut partials = Vec::with_capacity(rows.len());
        for row in rows {
            partials.push(PartialExit {
                fraction_closed: parse_decimal(row.try_get("fraction_closed")?)?,
                price: parse_decimal(row.try_get("price")?)?,
                time: parse_time(row.try_get("time")?)?,
            });
        }
        Ok(partials)
    }

    async fn trade_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<TradeRecord> {
        let ticket = row.try_get::<i64, _>("ticket")? as u64;
        let direction: String = row.try_get("direction")?;
        let exit_price: Option<String> = row.try_get("exit_price")?;
        let exit_time: Option<String> = row.try_get("exit_time")?;
        let signal_id: Option<String> = row.try_get("signal_id")?;

        Ok(TradeRecord {
            ticket,
            direction: Side::parse(&direction).unwrap_or(Side::Buy),
            entry_price: parse_decimal(row.try_get("entry_price")?)?,
            lot_size: parse_decimal(row.try_get("lot_size")?)?,
            stop_loss: parse_decimal(row.try_get("stop_loss")?)?,
            take_profit: parse_decimal(row.try_get("take_profit")?)?,
            entry_time: parse_time(row.try_get("entry_time")?)?,
            exit_price: exit_price.map(parse_decimal).transpose()?,
            exit_time: exit_time.map(parse_time).transpose()?,
            exit_reason: row.try_get("exit_reason")?,
            pnl: parse_decimal(row.try_get("pnl")?)?,
            hold_seconds: row.try_get("hold_seconds")?,
            partial_exits: self.partials_for(ticket).await?,
            signal_id: signal_id.and_then(|s| uuid::Uuid::parse_str(&s).ok()),
        })
    }
}

fn parse_decimal(raw: String) -> Result<Decimal> {
    Ok(Decimal::from_str(&raw)?)
}

fn parse_time(raw: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

#[async_trait]
impl TradeStore for SqliteStore {
    async fn record_signal(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO signals (id, time, direction, entry_type, confidence, price, reason)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(signal.id.to_string())
        .bind(signal.time.to_rfc3339())
        .bind(signal.direction.as_str())
        .bind(signal.entry_type.as_str())
        .bind(signal.confidence.to_string())
        .bind(signal.price.to_string())
        .bind(&signal.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_trade_entry(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (ticket, direction, entry_price, lot_size, stop_loss,
                                take_profit, entry_time, pnl, signal_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticket) DO UPDATE SET
                direction = excluded.direction,
                entry_price = excluded.entry_price,
                lot_size = excluded.lot_size,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                entry_time = excluded.entry_time,
                signal_id = excluded.signal_id
            "#,
        )
        .bind(trade.ticket as i64)
        .bind(trade.direction.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.lot_size.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit.to_string())
        .bind(trade.entry_time.to_rfc3339())
        .bind(trade.pnl.to_string())
        .bind(trade.signal_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_trade_exit(
        &self,
        ticket: u64,
        exit_price: Decimal,
        pnl: Decimal,
        hold_seconds: i64,
        exit_reason: &str,
        exit_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET exit_price = ?, exit_time = ?, exit_reason = ?, pnl = ?, hold_seconds = ?
            WHERE ticket = ?
            "#,
        )
        .bind(exit_price.to_string())
        .bind(exit_time.to_rfc3339())
        .bind(exit_reason)
        .bind(pnl.to_string())
        .bind(hold_seconds)
        .bind(ticket as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_partial_close(&self, ticket: u64, partial: &PartialExit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partial_exits (ticket, fraction_closed, price, time)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(ticket as i64)
        .bind(partial.fraction_closed.to_string())
        .bind(partial.price.to_string())
        .bind(partial.time.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_event(&self, event: &CircuitBreakerEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_events (kind, reason, start_time, end_time, loss_count, daily_pnl)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.kind.as_str())
        .bind(&event.reason)
        .bind(event.start_time.map(|t| t.to_rfc3339()))
        .bind(event.end_time.map(|t| t.to_rfc3339()))
        .bind(event.loss_count as i64)
        .bind(event.daily_pnl.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE exit_time IS NOT NULL
            ORDER BY exit_time DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in &rows {
            trades.push(self.trade_from_row(row).await?);
        }
        Ok(trades)
    }

    async fn session_pnl(&self, date: NaiveDate) -> Result<Decimal> {
        let rows = sqlx::query(
            r#"
            SELECT pnl FROM trades
            WHERE exit_time IS NOT NULL AND date(exit_time) = ?
            "#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut total = Decimal::ZERO;
        for row in rows {
            total += parse_decimal(row.try_get("pnl")?)?;
        }
        Ok(total)
    }

    async fn trade_by_ticket(&self, ticket: u64) -> Result<Option<TradeRecord>> {
        let row = sqlx::query("SELECT * FROM trades WHERE ticket = ?")
            .bind(ticket as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.trade_from_row(&row).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn trade(ticket: u64) -> TradeRecord {
        TradeRecord {
            ticket,
            direction: Side::Buy,
            entry_price: dec!(2000),
            lot_size: dec!(0.02),
            stop_loss: dec!(1998),
            take_profit: dec!(2002.4),
            entry_time: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            pnl: Decimal::ZERO,
            hold_seconds: None,
            partial_exits: Vec::new(),
            signal_id: None,
        }
    }

    #[tokio::test]
    async fn entry_exit_round_trip() {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        store.record_trade_entry(&trade(42)).await.unwrap();
        // re-recording the same entry keeps one row
        store.record_trade_entry(&trade(42)).await.unwrap();

        let exit_time = Utc.with_ymd_and_hms(2024, 6, 3, 9, 12, 0).unwrap();
        store
            .record_trade_exit(42, dec!(2002.4), dec!(48), 720, "take_profit", exit_time)
            .await
            .unwrap();

        let trades = store.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].ticket, 42);
        assert_eq!(trades[0].exit_price, Some(dec!(2002.4)));
        assert_eq!(trades[0].exit_reason.as_deref(), Some("take_profit"));

        let by_ticket = store.trade_by_ticket(42).await.unwrap().unwrap();
        assert_eq!(by_ticket.pnl, dec!(48));

        let pnl = store
            .session_pnl(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(pnl, dec!(48));
    }

    #[tokio::test]
    async fn partial_closes_attach_to_the_trade() {
        let store = SqliteStore::new("sqlite::memory:").await.unwrap();
        store.record_trade_entry(&trade(7)).await.unwrap();
        store
            .record_partial_close(
                7,
                &PartialExit {
                    fraction_closed: dec!(0.5),
                    price: dec!(2004),
                    time: Utc.with_ymd_and_hms(2024, 6, 3, 9, 5, 0).unwrap(),
                },
            )
            .await
            .unwrap();

        let loaded = store.trade_by_ticket(7).await.unwrap().unwrap();
        assert_eq!(loaded.partial_exits.len(), 1);
        assert_eq!(loaded.partial_exits[0].fraction_closed, dec!(0.5));
    }
}
