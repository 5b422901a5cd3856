use chrono::{DateTime, Utc};
use engine_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::models::{BacktestRun, TradeRecord, TradeSide};

/// Lightweight run listing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub strategy_name: String,
    pub ticker: String,
    pub created_at: DateTime<Utc>,
    pub final_equity: f64,
}

/// SQLite-backed run store. Runs are written whole inside one transaction;
/// `client_request_id` makes a save idempotent across retries.
#[derive(Clone)]
pub struct BacktestStore {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Internal(format!("backtest store: {e}"))
}

impl BacktestStore {
    pub async fn new(database_url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> EngineResult<()> {
        let schema = include_str!("schema.sql");
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a run and its trades atomically. When `client_request_id` is
    /// supplied and a run with that id already exists, the existing run id
    /// is returned and nothing is written.
    pub async fn save_run(
        &self,
        run: &BacktestRun,
        client_request_id: Option<&str>,
    ) -> EngineResult<String> {
        if let Some(req_id) = client_request_id {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT id FROM backtest_runs WHERE client_request_id = ?")
                    .bind(req_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
            if let Some((id,)) = existing {
                tracing::debug!("save_run replay for request {req_id}, returning {id}");
                return Ok(id);
            }
        }

        let params_json = serde_json::to_string(&run.params)
            .map_err(|e| EngineError::Internal(format!("encode params: {e}")))?;
        let metrics_json = serde_json::to_string(&run.metrics)
            .map_err(|e| EngineError::Internal(format!("encode metrics: {e}")))?;
        let curve_json = serde_json::to_string(&run.equity_curve)
            .map_err(|e| EngineError::Internal(format!("encode equity curve: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            r#"
            INSERT INTO backtest_runs
                (id, client_request_id, strategy_name, ticker, params_json,
                 start_date, end_date, created_at, initial_capital,
                 final_equity, metrics_json, equity_curve_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(client_request_id)
        .bind(&run.strategy_name)
        .bind(&run.ticker)
        .bind(&params_json)
        .bind(run.start_date.to_rfc3339())
        .bind(run.end_date.to_rfc3339())
        .bind(run.created_at.to_rfc3339())
        .bind(run.initial_capital)
        .bind(run.final_equity)
        .bind(&metrics_json)
        .bind(&curve_json)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for trade in &run.trades {
            insert_trade(&mut tx, &run.id, trade).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(run.id.clone())
    }

    /// Append one trade to an existing run.
    pub async fn append_trade(&self, run_id: &str, trade: &TradeRecord) -> EngineResult<()> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM backtest_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(EngineError::NotFound(format!("run {run_id}")));
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        insert_trade(&mut tx, run_id, trade).await?;
        tx.commit().await.map_err(db_err)
    }

    pub async fn load_run(&self, run_id: &str) -> EngineResult<BacktestRun> {
        let row = sqlx::query("SELECT * FROM backtest_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| EngineError::NotFound(format!("run {run_id}")))?;

        let parse_ts = |s: String| -> EngineResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| EngineError::Internal(format!("stored timestamp {s:?}: {e}")))
        };

        let trade_rows = sqlx::query(
            "SELECT * FROM backtest_trades WHERE run_id = ? ORDER BY entry_time, id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut trades = Vec::with_capacity(trade_rows.len());
        for t in trade_rows {
            let side: String = t.get("side");
            trades.push(TradeRecord {
                run_id: Some(run_id.to_string()),
                entry_time: parse_ts(t.get("entry_time"))?,
                exit_time: t
                    .get::<Option<String>, _>("exit_time")
                    .map(parse_ts)
                    .transpose()?,
                side: if side == "short" {
                    TradeSide::Short
                } else {
                    TradeSide::Long
                },
                qty: t.get("qty"),
                entry_price: t.get("entry_price"),
                exit_price: t.get("exit_price"),
                pnl: t.get("pnl"),
                return_pct: t.get("return_pct"),
                exit_reason: t.get("exit_reason"),
                holding_bars: t.get::<Option<i64>, _>("holding_bars").map(|v| v as u32),
            });
        }

        let decode = |field: &str, json: String| -> EngineResult<serde_json::Value> {
            serde_json::from_str(&json)
                .map_err(|e| EngineError::Internal(format!("stored {field}: {e}")))
        };
        let params = serde_json::from_value(decode("params", row.get("params_json"))?)
            .map_err(|e| EngineError::Internal(format!("stored params: {e}")))?;
        let metrics = serde_json::from_value(decode("metrics", row.get("metrics_json"))?)
            .map_err(|e| EngineError::Internal(format!("stored metrics: {e}")))?;
        let equity_curve =
            serde_json::from_value(decode("equity curve", row.get("equity_curve_json"))?)
                .map_err(|e| EngineError::Internal(format!("stored equity curve: {e}")))?;

        Ok(BacktestRun {
            id: row.get("id"),
            strategy_name: row.get("strategy_name"),
            ticker: row.get("ticker"),
            params,
            start_date: parse_ts(row.get("start_date"))?,
            end_date: parse_ts(row.get("end_date"))?,
            created_at: parse_ts(row.get("created_at"))?,
            initial_capital: row.get("initial_capital"),
            final_equity: row.get("final_equity"),
            trades,
            equity_curve,
            metrics,
        })
    }

    pub async fn list_runs(
        &self,
        strategy: Option<&str>,
        ticker: Option<&str>,
        limit: i64,
    ) -> EngineResult<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, strategy_name, ticker, created_at, final_equity
            FROM backtest_runs
            WHERE (?1 IS NULL OR strategy_name = ?1)
              AND (?2 IS NULL OR ticker = ?2)
            ORDER BY created_at DESC
            LIMIT ?3
            "#,
        )
        .bind(strategy)
        .bind(ticker)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let created: String = row.get("created_at");
                Ok(RunSummary {
                    id: row.get("id"),
                    strategy_name: row.get("strategy_name"),
                    ticker: row.get("ticker"),
                    created_at: DateTime::parse_from_rfc3339(&created)
                        .map(|d| d.with_timezone(&Utc))
                        .map_err(|e| {
                            EngineError::Internal(format!("stored created_at {created:?}: {e}"))
                        })?,
                    final_equity: row.get("final_equity"),
                })
            })
            .collect()
    }
}

async fn insert_trade(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    run_id: &str,
    trade: &TradeRecord,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO backtest_trades
            (run_id, entry_time, exit_time, side, qty, entry_price,
             exit_price, pnl, return_pct, exit_reason, holding_bars)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id)
    .bind(trade.entry_time.to_rfc3339())
    .bind(trade.exit_time.map(|t| t.to_rfc3339()))
    .bind(match trade.side {
        TradeSide::Long => "long",
        TradeSide::Short => "short",
    })
    .bind(trade.qty)
    .bind(trade.entry_price)
    .bind(trade.exit_price)
    .bind(trade.pnl)
    .bind(trade.return_pct)
    .bind(&trade.exit_reason)
    .bind(trade.holding_bars.map(|v| v as i64))
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}
