use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use common::clock::to_chrono;
use common::{
    Clock, ClosedTrade, CooldownMark, Error, Position, PositionStatus, PositionStore, Result,
    StrategyParameters, SystemClock,
};

use crate::{validate_transition, StoreSettings};

const PARAMETERS_KEY: &str = "parameters";
const PAUSED_KEY: &str = "paused";

/// Durable store on SQLite.
///
/// Each position transition is a single conditional statement (or a short
/// transaction), so SQLite's write serialization makes compare-and-set atomic
/// across every connection and process using the same database file.
pub struct SqliteStore {
    pool: SqlitePool,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Connect and run the embedded migrations.
    pub async fn connect(url: &str, settings: StoreSettings) -> Result<Self> {
        Self::connect_with_clock(url, settings, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(
        url: &str,
        settings: StoreSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        // Every connection to `:memory:` is a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!(url, "Position store ready");

        Ok(Self {
            pool,
            settings,
            clock,
        })
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    async fn read_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<String, _>("value")?),
            None => None,
        })
    }

    async fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
    let payload: String = row.try_get("payload")?;
    Ok(serde_json::from_str(&payload)?)
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn compare_and_set_position(
        &self,
        market: &str,
        expected: Option<PositionStatus>,
        new: Option<&Position>,
    ) -> Result<bool> {
        validate_transition(market, expected, new)?;

        let result = match (expected, new) {
            (None, Some(position)) => {
                let payload = serde_json::to_string(position)?;
                sqlx::query(
                    r#"
                    INSERT INTO positions (market, status, payload)
                    SELECT ?1, ?2, ?3
                    WHERE NOT EXISTS (SELECT 1 FROM positions WHERE market = ?1)
                      AND (SELECT COUNT(*) FROM positions) < ?4
                      AND NOT EXISTS (
                          SELECT 1 FROM cooldowns WHERE market = ?1 AND expires_at_ms > ?5
                      )
                    "#,
                )
                .bind(market)
                .bind(position.status.as_str())
                .bind(payload)
                .bind(self.settings.max_open_positions as i64)
                .bind(self.now_ms())
                .execute(&self.pool)
                .await?
            }
            (Some(from), Some(position)) => {
                let payload = serde_json::to_string(position)?;
                sqlx::query(
                    "UPDATE positions SET status = ?1, payload = ?2 WHERE market = ?3 AND status = ?4",
                )
                .bind(position.status.as_str())
                .bind(payload)
                .bind(market)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
            }
            (Some(from), None) => {
                sqlx::query("DELETE FROM positions WHERE market = ?1 AND status = ?2")
                    .bind(market)
                    .bind(from.as_str())
                    .execute(&self.pool)
                    .await?
            }
            (None, None) => return Err(Error::InvalidTransition { from: None, to: None }),
        };

        let swapped = result.rows_affected() == 1;
        if !swapped {
            debug!(market, ?expected, "CAS comparison failed");
        }
        Ok(swapped)
    }

    async fn release_with_cooldown(
        &self,
        market: &str,
        expected: PositionStatus,
        ttl: Duration,
    ) -> Result<bool> {
        validate_transition(market, Some(expected), None)?;
        let expires_at_ms = (self.clock.now() + to_chrono(ttl)).timestamp_millis();

        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM positions WHERE market = ?1 AND status = ?2")
            .bind(market)
            .bind(expected.as_str())
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            INSERT INTO cooldowns (market, expires_at_ms) VALUES (?1, ?2)
            ON CONFLICT(market) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
            "#,
        )
        .bind(market)
        .bind(expires_at_ms)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn position(&self, market: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT payload FROM positions WHERE market = ?1")
            .bind(market)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_position).transpose()
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT payload FROM positions ORDER BY market")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_position).collect()
    }

    async fn clear_all_positions(&self) -> Result<Vec<Position>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT payload FROM positions ORDER BY market")
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM positions").execute(&mut *tx).await?;
        tx.commit().await?;
        rows.iter().map(decode_position).collect()
    }

    async fn set_cooldown(&self, market: &str, ttl: Duration) -> Result<()> {
        let now_ms = self.now_ms();
        let expires_at_ms = (self.clock.now() + to_chrono(ttl)).timestamp_millis();

        sqlx::query("DELETE FROM cooldowns WHERE expires_at_ms <= ?1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO cooldowns (market, expires_at_ms)
            SELECT ?1, ?2
            WHERE NOT EXISTS (SELECT 1 FROM positions WHERE market = ?1)
            ON CONFLICT(market) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
            "#,
        )
        .bind(market)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(Error::Other(format!(
                "cannot cool down '{market}' while it holds a position"
            )));
        }
        Ok(())
    }

    async fn is_cooling_down(&self, market: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM cooldowns WHERE market = ?1 AND expires_at_ms > ?2")
            .bind(market)
            .bind(self.now_ms())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn active_cooldowns(&self) -> Result<Vec<CooldownMark>> {
        let rows = sqlx::query(
            "SELECT market, expires_at_ms FROM cooldowns WHERE expires_at_ms > ?1 ORDER BY market",
        )
        .bind(self.now_ms())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let market: String = row.try_get("market")?;
                let expires_ms: i64 = row.try_get("expires_at_ms")?;
                let expires_at = Utc
                    .timestamp_millis_opt(expires_ms)
                    .single()
                    .ok_or_else(|| Error::Other(format!("bad cooldown expiry {expires_ms}")))?;
                Ok(CooldownMark { market, expires_at })
            })
            .collect()
    }

    async fn append_closed_trade(&self, trade: &ClosedTrade) -> Result<()> {
        let payload = serde_json::to_string(trade)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO closed_trades (market, outcome, change_pct, closed_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&trade.market)
        .bind(trade.outcome.to_string())
        .bind(trade.change_pct)
        .bind(trade.closed_at.to_rfc3339())
        .bind(payload)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM closed_trades WHERE id <= (SELECT MAX(id) FROM closed_trades) - ?1",
        )
        .bind(self.settings.closed_trade_capacity as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn closed_trades(&self, limit: usize) -> Result<Vec<ClosedTrade>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM (
                SELECT id, payload FROM closed_trades ORDER BY id DESC LIMIT ?1
            ) ORDER BY id ASC
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    async fn parameters(&self) -> Result<StrategyParameters> {
        let params = match self.read_setting(PARAMETERS_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => self.settings.initial_parameters,
        };
        // Bounds may have been narrowed since the value was written.
        Ok(params.clamped(&self.settings.bounds))
    }

    async fn set_parameters(&self, params: &StrategyParameters) -> Result<StrategyParameters> {
        let clamped = params.clamped(&self.settings.bounds);
        self.write_setting(PARAMETERS_KEY, &serde_json::to_string(&clamped)?)
            .await?;
        Ok(clamped)
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.read_setting(PAUSED_KEY).await?.as_deref() == Some("true"))
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        self.write_setting(PAUSED_KEY, if paused { "true" } else { "false" })
            .await
    }
}
