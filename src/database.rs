use crate::models::*;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const IN_MEMORY_DATABASE_URL: &str = "sqlite::memory:";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tickers (
    ticker TEXT PRIMARY KEY,
    company TEXT NOT NULL DEFAULT '',
    market TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS best_strategy_params (
    ticker TEXT NOT NULL,
    strategy_name TEXT NOT NULL,
    params_json TEXT NOT NULL,
    score REAL NOT NULL,
    train_window_start TEXT NOT NULL,
    train_window_end TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (ticker, strategy_name)
);

CREATE TABLE IF NOT EXISTS strategy_validation (
    ticker TEXT NOT NULL,
    strategy_name TEXT NOT NULL,
    params_json TEXT NOT NULL,
    is_valid INTEGER NOT NULL,
    reason TEXT NOT NULL,
    validation_window_start TEXT NOT NULL,
    validation_window_end TEXT NOT NULL,
    metrics_json TEXT NOT NULL DEFAULT '{}',
    validated_at TEXT NOT NULL,
    PRIMARY KEY (ticker, strategy_name, validation_window_start)
);

CREATE TABLE IF NOT EXISTS settings (
    setting_key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQLite store for reference tickers, optimizer winners and validation verdicts.
///
/// Writes to one key are serialized through a per-key async mutex and run in a
/// transaction with a native upsert, so concurrent writers never duplicate rows.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Database {
    /// Accepts a `sqlite:` URL or a plain file path (created when missing).
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().trim();
        let in_memory = database_url == IN_MEMORY_DATABASE_URL || database_url == ":memory:";
        let url = if in_memory {
            IN_MEMORY_DATABASE_URL.to_string()
        } else if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite:{}?mode=rwc", database_url)
        };

        // An in-memory database lives and dies with its single connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect(&url)
            .await
            .with_context(|| format!("Failed to connect to SQLite database at {}", url))?;

        if !in_memory {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&pool)
                .await
                .context("Failed to enable WAL mode")?;
        }
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&pool)
            .await
            .context("Failed to set busy timeout")?;

        let db = Self {
            pool,
            write_locks: Arc::new(DashMap::new()),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .context("Failed to create schema")?;
        Ok(())
    }

    fn key_lock(&self, key: String) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get_all_settings(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT setting_key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;
        let mut settings = HashMap::with_capacity(rows.len());
        for row in rows {
            settings.insert(row.try_get("setting_key")?, row.try_get("value")?);
        }
        Ok(settings)
    }

    pub async fn upsert_setting(&self, setting_key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, value) VALUES (?, ?)
            ON CONFLICT (setting_key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(setting_key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_ticker(&self, ticker: &TickerInfo) -> Result<()> {
        let symbol = ticker.ticker.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(anyhow!("Ticker symbol must not be empty"));
        }
        sqlx::query(
            r#"
            INSERT INTO tickers (ticker, company, market) VALUES (?, ?, ?)
            ON CONFLICT (ticker) DO UPDATE SET
                company = excluded.company,
                market = excluded.market
            "#,
        )
        .bind(&symbol)
        .bind(&ticker.company)
        .bind(&ticker.market)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_ticker(&self, ticker: &str) -> Result<Option<TickerInfo>> {
        let row = sqlx::query("SELECT ticker, company, market FROM tickers WHERE ticker = ?")
            .bind(ticker.trim().to_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_ticker(&row)).transpose()
    }

    pub async fn list_tickers(&self) -> Result<Vec<TickerInfo>> {
        let rows = sqlx::query("SELECT ticker, company, market FROM tickers ORDER BY ticker")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_ticker).collect()
    }

    /// Replace the stored winner for `(ticker, strategy_name)`.
    ///
    /// `updated_at` only moves when the stored contents change, so repeating
    /// an identical optimization leaves the row untouched.
    pub async fn upsert_best_strategy_params(&self, best: &BestStrategyParams) -> Result<()> {
        if !best.score.is_finite() {
            return Err(anyhow!(
                "Refusing to store non-finite score {} for {} {}",
                best.score,
                best.ticker,
                best.strategy_name
            ));
        }
        let lock = self.key_lock(format!("best:{}:{}", best.ticker, best.strategy_name));
        let _guard = lock.lock().await;

        let params_json = parameter_set_to_json(&best.params);
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO best_strategy_params
                (ticker, strategy_name, params_json, score, train_window_start, train_window_end, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ticker, strategy_name) DO UPDATE SET
                updated_at = CASE
                    WHEN best_strategy_params.params_json = excluded.params_json
                     AND best_strategy_params.score = excluded.score
                     AND best_strategy_params.train_window_start = excluded.train_window_start
                     AND best_strategy_params.train_window_end = excluded.train_window_end
                    THEN best_strategy_params.updated_at
                    ELSE excluded.updated_at
                END,
                params_json = excluded.params_json,
                score = excluded.score,
                train_window_start = excluded.train_window_start,
                train_window_end = excluded.train_window_end
            "#,
        )
        .bind(&best.ticker)
        .bind(&best.strategy_name)
        .bind(&params_json)
        .bind(best.score)
        .bind(best.train_window.start)
        .bind(best.train_window.end)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(
            "Stored best params for {} {}: {}",
            best.ticker, best.strategy_name, params_json
        );
        Ok(())
    }

    pub async fn get_best_strategy_params(
        &self,
        ticker: &str,
        strategy_name: &str,
    ) -> Result<Option<BestStrategyParams>> {
        let row = sqlx::query(
            r#"
            SELECT ticker, strategy_name, params_json, score, train_window_start, train_window_end
            FROM best_strategy_params
            WHERE ticker = ? AND strategy_name = ?
            "#,
        )
        .bind(ticker)
        .bind(strategy_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_best_params(&row)).transpose()
    }

    pub async fn get_best_strategy_params_updated_at(
        &self,
        ticker: &str,
        strategy_name: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT updated_at FROM best_strategy_params WHERE ticker = ? AND strategy_name = ?",
        )
        .bind(ticker)
        .bind(strategy_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row.try_get("updated_at").map_err(Into::into))
            .transpose()
    }

    pub async fn list_best_strategy_params(&self) -> Result<Vec<BestStrategyParams>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, strategy_name, params_json, score, train_window_start, train_window_end
            FROM best_strategy_params
            ORDER BY ticker, strategy_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_best_params).collect()
    }

    pub async fn upsert_strategy_validation(&self, validation: &StrategyValidation) -> Result<()> {
        let lock = self.key_lock(format!(
            "validation:{}:{}:{}",
            validation.ticker,
            validation.strategy_name,
            validation.validation_window.start.to_rfc3339()
        ));
        let _guard = lock.lock().await;

        let params_json = parameter_set_to_json(&validation.params);
        let metrics_json = serde_json::to_string(&validation.metrics)
            .context("Failed to serialize validation metrics")?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO strategy_validation
                (ticker, strategy_name, params_json, is_valid, reason,
                 validation_window_start, validation_window_end, metrics_json, validated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ticker, strategy_name, validation_window_start) DO UPDATE SET
                validated_at = CASE
                    WHEN strategy_validation.params_json = excluded.params_json
                     AND strategy_validation.is_valid = excluded.is_valid
                     AND strategy_validation.reason = excluded.reason
                     AND strategy_validation.validation_window_end = excluded.validation_window_end
                     AND strategy_validation.metrics_json = excluded.metrics_json
                    THEN strategy_validation.validated_at
                    ELSE excluded.validated_at
                END,
                params_json = excluded.params_json,
                is_valid = excluded.is_valid,
                reason = excluded.reason,
                validation_window_end = excluded.validation_window_end,
                metrics_json = excluded.metrics_json
            "#,
        )
        .bind(&validation.ticker)
        .bind(&validation.strategy_name)
        .bind(&params_json)
        .bind(validation.is_valid)
        .bind(&validation.reason)
        .bind(validation.validation_window.start)
        .bind(validation.validation_window.end)
        .bind(&metrics_json)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_strategy_validation(
        &self,
        ticker: &str,
        strategy_name: &str,
        validation_window_start: DateTime<Utc>,
    ) -> Result<Option<StrategyValidation>> {
        let row = sqlx::query(
            r#"
            SELECT ticker, strategy_name, params_json, is_valid, reason,
                   validation_window_start, validation_window_end, metrics_json
            FROM strategy_validation
            WHERE ticker = ? AND strategy_name = ? AND validation_window_start = ?
            "#,
        )
        .bind(ticker)
        .bind(strategy_name)
        .bind(validation_window_start)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_validation(&row)).transpose()
    }

    pub async fn list_strategy_validations(
        &self,
        ticker: Option<&str>,
    ) -> Result<Vec<StrategyValidation>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, strategy_name, params_json, is_valid, reason,
                   validation_window_start, validation_window_end, metrics_json
            FROM strategy_validation
            WHERE (?1 IS NULL OR ticker = ?1)
            ORDER BY ticker, strategy_name, validation_window_start
            "#,
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_validation).collect()
    }
}

fn row_to_ticker(row: &SqliteRow) -> Result<TickerInfo> {
    Ok(TickerInfo {
        ticker: row.try_get("ticker")?,
        company: row.try_get("company")?,
        market: row.try_get("market")?,
    })
}

fn row_to_best_params(row: &SqliteRow) -> Result<BestStrategyParams> {
    let ticker: String = row.try_get("ticker")?;
    let params_json: String = row.try_get("params_json")?;
    let params = parse_parameter_set_from_json(&params_json)
        .with_context(|| format!("Invalid params_json stored for {}", ticker))?;
    Ok(BestStrategyParams {
        strategy_name: row.try_get("strategy_name")?,
        params,
        score: row.try_get("score")?,
        train_window: DateWindow::new(
            row.try_get("train_window_start")?,
            row.try_get("train_window_end")?,
        )?,
        ticker,
    })
}

fn row_to_validation(row: &SqliteRow) -> Result<StrategyValidation> {
    let ticker: String = row.try_get("ticker")?;
    let params_json: String = row.try_get("params_json")?;
    let metrics_json: String = row.try_get("metrics_json")?;
    let params = parse_parameter_set_from_json(&params_json)
        .with_context(|| format!("Invalid params_json stored for {}", ticker))?;
    let metrics: PerformanceMetrics = serde_json::from_str(&metrics_json)
        .with_context(|| format!("Invalid metrics_json stored for {}", ticker))?;
    Ok(StrategyValidation {
        strategy_name: row.try_get("strategy_name")?,
        params,
        is_valid: row.try_get("is_valid")?,
        reason: row.try_get("reason")?,
        validation_window: DateWindow::new(
            row.try_get("validation_window_start")?,
            row.try_get("validation_window_end")?,
        )?,
        metrics,
        ticker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn best(score: f64) -> BestStrategyParams {
        BestStrategyParams {
            ticker: "AAPL".to_string(),
            strategy_name: "classical".to_string(),
            params: [("rsi_window".to_string(), 14.0), ("rsi_buy".to_string(), 30.0)].into(),
            score,
            train_window: DateWindow::new(day(1), day(20)).unwrap(),
        }
    }

    fn validation(is_valid: bool, reason: &str) -> StrategyValidation {
        StrategyValidation {
            ticker: "AAPL".to_string(),
            strategy_name: "classical".to_string(),
            params: best(1.0).params,
            is_valid,
            reason: reason.to_string(),
            validation_window: DateWindow::new(day(21), day(31)).unwrap(),
            metrics: PerformanceMetrics {
                total_return: 0.05,
                trade_count: 3,
                ..Default::default()
            },
        }
    }

    async fn memory_db() -> Database {
        Database::new(IN_MEMORY_DATABASE_URL).await.unwrap()
    }

    #[tokio::test]
    async fn best_params_upsert_never_duplicates() {
        let db = memory_db().await;
        db.upsert_best_strategy_params(&best(1.5)).await.unwrap();
        db.upsert_best_strategy_params(&best(1.5)).await.unwrap();
        db.upsert_best_strategy_params(&best(2.5)).await.unwrap();

        let rows = db.list_best_strategy_params().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 2.5);
        assert_eq!(rows[0], best(2.5));
    }

    #[tokio::test]
    async fn identical_upsert_keeps_timestamp() {
        let db = memory_db().await;
        db.upsert_best_strategy_params(&best(1.5)).await.unwrap();
        let first = db
            .get_best_strategy_params_updated_at("AAPL", "classical")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.upsert_best_strategy_params(&best(1.5)).await.unwrap();
        let second = db
            .get_best_strategy_params_updated_at("AAPL", "classical")
            .await
            .unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_upserts_leave_one_row() {
        let db = memory_db().await;
        let mut handles = Vec::new();
        for i in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.upsert_best_strategy_params(&best(i as f64)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(db.list_best_strategy_params().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_non_finite_score() {
        let db = memory_db().await;
        assert!(db.upsert_best_strategy_params(&best(f64::NAN)).await.is_err());
        assert!(db.get_best_strategy_params("AAPL", "classical").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn validation_round_trip_and_overwrite() {
        let db = memory_db().await;
        db.upsert_strategy_validation(&validation(false, "Not enough trades"))
            .await
            .unwrap();
        db.upsert_strategy_validation(&validation(true, "OK"))
            .await
            .unwrap();

        let stored = db
            .get_strategy_validation("AAPL", "classical", day(21))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, validation(true, "OK"));
        assert_eq!(db.list_strategy_validations(Some("AAPL")).await.unwrap().len(), 1);
        assert!(db.list_strategy_validations(Some("MSFT")).await.unwrap().is_empty());
        assert_eq!(db.list_strategy_validations(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tickers_and_settings() {
        let db = memory_db().await;
        db.upsert_ticker(&TickerInfo {
            ticker: "msft".to_string(),
            company: "Microsoft".to_string(),
            market: "NASDAQ".to_string(),
        })
        .await
        .unwrap();
        let ticker = db.get_ticker("MSFT").await.unwrap().unwrap();
        assert_eq!(ticker.company, "Microsoft");
        assert_eq!(db.list_tickers().await.unwrap().len(), 1);

        db.upsert_setting("TRANSACTION_FEE_RATE", "0.002").await.unwrap();
        db.upsert_setting("TRANSACTION_FEE_RATE", "0.003").await.unwrap();
        let settings = db.get_all_settings().await.unwrap();
        assert_eq!(settings.get("TRANSACTION_FEE_RATE").map(String::as_str), Some("0.003"));
    }
}
