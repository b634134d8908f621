//! Embedded position/order store (SQLite).
//!
//! One connection behind a mutex: callers are effectively single-threaded
//! (the orchestrator's drain task), the lock is the serialization point
//! for anything else. Schema is created idempotently on open.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::types::{ExecutionResult, Order, OrderStatus, Position, PositionSide};
use crate::util::now_ts;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL,
    client_order_id TEXT,
    token_id TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity REAL NOT NULL,
    price REAL NOT NULL,
    fees REAL DEFAULT 0,
    executed_at REAL NOT NULL,
    created_at REAL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS positions (
    token_id TEXT PRIMARY KEY,
    side TEXT NOT NULL,
    quantity REAL NOT NULL,
    avg_entry_price REAL NOT NULL,
    current_price REAL NOT NULL,
    opened_at REAL NOT NULL,
    updated_at REAL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS orders (
    client_order_id TEXT PRIMARY KEY,
    token_id TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity REAL NOT NULL,
    order_type TEXT NOT NULL,
    limit_price REAL,
    time_in_force TEXT NOT NULL,
    status TEXT NOT NULL,
    exchange_order_id TEXT,
    reason TEXT,
    created_at REAL NOT NULL,
    updated_at REAL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_trades_token ON trades(token_id);
CREATE INDEX IF NOT EXISTS idx_trades_time ON trades(executed_at);
CREATE INDEX IF NOT EXISTS idx_orders_token ON orders(token_id);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
";

/// Trade row as stored.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub id: i64,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub token_id: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub fees: f64,
    pub executed_at: f64,
}

/// Order row as stored.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub client_order_id: String,
    pub token_id: String,
    pub side: String,
    pub quantity: f64,
    pub order_type: String,
    pub limit_price: Option<f64>,
    pub time_in_force: String,
    pub status: String,
    pub exchange_order_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating parent directories) and apply the schema.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute_batch(SCHEMA_SQL)?;
        debug!("💾 Database opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ─────────────────────────────────────────────────
    // Trades
    // ─────────────────────────────────────────────────

    pub fn insert_trade(&self, order: &Order, result: &ExecutionResult) -> anyhow::Result<()> {
        let quantity = if result.filled_size > 0.0 {
            result.filled_size
        } else {
            order.quantity
        };
        self.conn.lock().execute(
            "INSERT INTO trades (order_id, client_order_id, token_id, side, quantity, price, fees, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.order_id,
                order.client_order_id,
                order.token_id,
                order.side.as_str(),
                quantity,
                result.filled_price,
                result.fees_paid,
                result.executed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_trades(&self, token_id: Option<&str>, limit: Option<usize>) -> anyhow::Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, order_id, client_order_id, token_id, side, quantity, price, fees, executed_at FROM trades",
        );
        if token_id.is_some() {
            sql.push_str(" WHERE token_id = ?1");
        }
        sql.push_str(" ORDER BY executed_at DESC");
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<TradeRecord> {
            Ok(TradeRecord {
                id: row.get(0)?,
                order_id: row.get(1)?,
                client_order_id: row.get(2)?,
                token_id: row.get(3)?,
                side: row.get(4)?,
                quantity: row.get(5)?,
                price: row.get(6)?,
                fees: row.get(7)?,
                executed_at: row.get(8)?,
            })
        };

        let mut stmt = conn.prepare(&sql)?;
        let rows = match token_id {
            Some(t) => stmt.query_map(params![t], map_row)?,
            None => stmt.query_map([], map_row)?,
        };
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ─────────────────────────────────────────────────
    // Positions
    // ─────────────────────────────────────────────────

    pub fn upsert_position(&self, position: &Position) -> anyhow::Result<()> {
        self.conn.lock().execute(
            "INSERT INTO positions (token_id, side, quantity, avg_entry_price, current_price, opened_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(token_id) DO UPDATE SET
                side = excluded.side,
                quantity = excluded.quantity,
                avg_entry_price = excluded.avg_entry_price,
                current_price = excluded.current_price,
                updated_at = excluded.updated_at",
            params![
                position.token_id,
                position.side.as_str(),
                position.quantity,
                position.avg_entry_price,
                position.current_price,
                position.opened_at,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub fn get_position(&self, token_id: &str) -> anyhow::Result<Option<Position>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT token_id, side, quantity, avg_entry_price, current_price, opened_at
                 FROM positions WHERE token_id = ?1",
                params![token_id],
                Self::map_position,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_all_positions(&self) -> anyhow::Result<Vec<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT token_id, side, quantity, avg_entry_price, current_price, opened_at FROM positions",
        )?;
        let rows = stmt.query_map([], Self::map_position)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_position(&self, token_id: &str) -> anyhow::Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM positions WHERE token_id = ?1", params![token_id])?;
        Ok(())
    }

    fn map_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
        let side: String = row.get(1)?;
        Ok(Position {
            token_id: row.get(0)?,
            side: PositionSide::parse(&side).unwrap_or(PositionSide::Flat),
            quantity: row.get(2)?,
            avg_entry_price: row.get(3)?,
            current_price: row.get(4)?,
            opened_at: row.get(5)?,
        })
    }

    // ─────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────

    pub fn insert_order(&self, order: &Order, status: OrderStatus) -> anyhow::Result<()> {
        self.conn.lock().execute(
            "INSERT INTO orders (client_order_id, token_id, side, quantity, order_type, limit_price,
                                 time_in_force, status, reason, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                order.client_order_id,
                order.token_id,
                order.side.as_str(),
                order.quantity,
                order.order_type.as_str(),
                order.limit_price,
                order.time_in_force.as_str(),
                status.as_str(),
                order.reason,
                order.created_at,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub fn update_order_status(
        &self,
        client_order_id: &str,
        status: OrderStatus,
        exchange_order_id: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        match exchange_order_id {
            Some(ex) => conn.execute(
                "UPDATE orders SET status = ?1, exchange_order_id = ?2, updated_at = ?3
                 WHERE client_order_id = ?4",
                params![status.as_str(), ex, now_ts(), client_order_id],
            )?,
            None => conn.execute(
                "UPDATE orders SET status = ?1, updated_at = ?2 WHERE client_order_id = ?3",
                params![status.as_str(), now_ts(), client_order_id],
            )?,
        };
        Ok(())
    }

    pub fn get_order(&self, client_order_id: &str) -> anyhow::Result<Option<OrderRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT client_order_id, token_id, side, quantity, order_type, limit_price,
                        time_in_force, status, exchange_order_id, reason
                 FROM orders WHERE client_order_id = ?1",
                params![client_order_id],
                |row| {
                    Ok(OrderRecord {
                        client_order_id: row.get(0)?,
                        token_id: row.get(1)?,
                        side: row.get(2)?,
                        quantity: row.get(3)?,
                        order_type: row.get(4)?,
                        limit_price: row.get(5)?,
                        time_in_force: row.get(6)?,
                        status: row.get(7)?,
                        exchange_order_id: row.get(8)?,
                        reason: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
