//! Read-only view over the engine's trade ledger.
//!
//! The engine records fills into a sqlite file it owns exclusively. The
//! relay never writes to it; it polls with a monotonically advancing id
//! watermark so every trade is forwarded at most once.

use std::path::Path;

use messaging::TradeEvent;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::RelayError;

#[derive(Debug, sqlx::FromRow)]
struct TradeRow {
    id: i64,
    market: String,
    symbol: String,
    trade_type: String,
    price: f64,
    amount: f64,
    timestamp: i64,
}

impl From<TradeRow> for TradeEvent {
    fn from(row: TradeRow) -> Self {
        TradeEvent {
            id: row.id,
            market: row.market,
            symbol: row.symbol,
            side: row.trade_type,
            price: row.price,
            amount: row.amount,
            timestamp: row.timestamp,
        }
    }
}

pub struct TradeLedger {
    pool: SqlitePool,
}

impl TradeLedger {
    /// Open the ledger file read-only. Fails if the file does not exist
    /// yet, so callers should gate on existence and retry later.
    pub async fn open(path: &Path) -> Result<Self, RelayError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Fetch all trades with an id strictly above the watermark, in id
    /// order.
    pub async fn fetch_newer_than(&self, last_id: i64) -> Result<Vec<TradeEvent>, RelayError> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            "SELECT id, market, symbol, trade_type, price, amount, timestamp \
             FROM trades WHERE id > ? ORDER BY id ASC",
        )
        .bind(last_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TradeEvent::from).collect())
    }
}
