use chrono::{DateTime, Utc};
use engine_core::{EngineError, EngineResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{
    EquitySnapshot, PaperTrade, PortfolioRecord, PortfolioState, PositionRecord, RebalanceReport,
};

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Internal(format!("paper store: {e}"))
}

fn parse_ts(s: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| EngineError::Internal(format!("stored timestamp {s:?}: {e}")))
}

/// SQLite-backed portfolio store. All mutations of one rebalance land in a
/// single transaction, so a crash mid-rebalance leaves the pre-rebalance
/// state.
#[derive(Clone)]
pub struct PaperStore {
    pool: SqlitePool,
}

impl PaperStore {
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

    pub async fn create_portfolio(
        &self,
        name: &str,
        initial_cash: f64,
    ) -> EngineResult<PortfolioRecord> {
        if initial_cash <= 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "initial cash must be positive, got {initial_cash}"
            )));
        }
        let record = PortfolioRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            initial_cash,
            cash: initial_cash,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO portfolios (id, name, initial_cash, cash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.initial_cash)
        .bind(record.cash)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record)
    }

    pub async fn load_portfolio(&self, id: &str) -> EngineResult<PortfolioState> {
        let row = sqlx::query("SELECT * FROM portfolios WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| EngineError::NotFound(format!("portfolio {id}")))?;

        let created: String = row.get("created_at");
        let portfolio = PortfolioRecord {
            id: row.get("id"),
            name: row.get("name"),
            initial_cash: row.get("initial_cash"),
            cash: row.get("cash"),
            created_at: parse_ts(&created)?,
        };

        let position_rows =
            sqlx::query("SELECT * FROM positions WHERE portfolio_id = ? ORDER BY ticker")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        let positions = position_rows
            .into_iter()
            .map(|r| PositionRecord {
                portfolio_id: r.get("portfolio_id"),
                ticker: r.get("ticker"),
                qty: r.get("qty"),
                avg_cost: r.get("avg_cost"),
                pyramid_count: r.get::<i64, _>("pyramid_count") as u32,
            })
            .collect();

        Ok(PortfolioState {
            portfolio,
            positions,
        })
    }

    /// Replay guard: a rebalance report already stored under this request id.
    pub async fn replayed_rebalance(
        &self,
        client_request_id: &str,
    ) -> EngineResult<Option<RebalanceReport>> {
        let row = sqlx::query("SELECT report_json FROM rebalance_log WHERE client_request_id = ?")
            .bind(client_request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => {
                let json: String = r.get("report_json");
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| EngineError::Internal(format!("stored rebalance report: {e}")))
            }
            None => Ok(None),
        }
    }

    /// Apply a finished rebalance atomically: new cash, the full surviving
    /// position set, the trade log entries and the equity snapshot.
    pub async fn commit_rebalance(
        &self,
        state: &PortfolioState,
        trades: &[PaperTrade],
        snapshot: &EquitySnapshot,
        report: &RebalanceReport,
        client_request_id: Option<&str>,
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE portfolios SET cash = ? WHERE id = ?")
            .bind(state.portfolio.cash)
            .bind(&state.portfolio.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM positions WHERE portfolio_id = ?")
            .bind(&state.portfolio.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for pos in &state.positions {
            sqlx::query(
                "INSERT INTO positions (portfolio_id, ticker, qty, avg_cost, pyramid_count) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&pos.portfolio_id)
            .bind(&pos.ticker)
            .bind(pos.qty)
            .bind(pos.avg_cost)
            .bind(i64::from(pos.pyramid_count))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        for trade in trades {
            sqlx::query(
                r#"
                INSERT INTO paper_trades
                    (portfolio_id, ticker, action, qty, price, commission,
                     reason, realized_pnl, executed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&trade.portfolio_id)
            .bind(&trade.ticker)
            .bind(&trade.action)
            .bind(trade.qty)
            .bind(trade.price)
            .bind(trade.commission)
            .bind(&trade.reason)
            .bind(trade.realized_pnl)
            .bind(trade.executed_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query(
            "INSERT INTO equity_snapshots (portfolio_id, timestamp, equity, cash) VALUES (?, ?, ?, ?)",
        )
        .bind(&snapshot.portfolio_id)
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(snapshot.equity)
        .bind(snapshot.cash)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(req_id) = client_request_id {
            let report_json = serde_json::to_string(report)
                .map_err(|e| EngineError::Internal(format!("encode rebalance report: {e}")))?;
            sqlx::query(
                "INSERT INTO rebalance_log (client_request_id, portfolio_id, report_json, executed_at) VALUES (?, ?, ?, ?)",
            )
            .bind(req_id)
            .bind(&state.portfolio.id)
            .bind(&report_json)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)
    }

    pub async fn trade_log(&self, portfolio_id: &str) -> EngineResult<Vec<PaperTrade>> {
        let rows = sqlx::query(
            "SELECT * FROM paper_trades WHERE portfolio_id = ? ORDER BY executed_at, id",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                let executed: String = r.get("executed_at");
                Ok(PaperTrade {
                    portfolio_id: r.get("portfolio_id"),
                    ticker: r.get("ticker"),
                    action: r.get("action"),
                    qty: r.get("qty"),
                    price: r.get("price"),
                    commission: r.get("commission"),
                    reason: r.get("reason"),
                    realized_pnl: r.get("realized_pnl"),
                    executed_at: parse_ts(&executed)?,
                })
            })
            .collect()
    }

    pub async fn equity_history(&self, portfolio_id: &str) -> EngineResult<Vec<EquitySnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM equity_snapshots WHERE portfolio_id = ? ORDER BY timestamp, id",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|r| {
                let ts: String = r.get("timestamp");
                Ok(EquitySnapshot {
                    portfolio_id: r.get("portfolio_id"),
                    timestamp: parse_ts(&ts)?,
                    equity: r.get("equity"),
                    cash: r.get("cash"),
                })
            })
            .collect()
    }
}
