//! Portfolio state: cash, positions, pre-trade validation, fill
//! application.
//!
//! The in-memory map is authoritative during a run; the store is the
//! crash-recovery copy, written in the same logical step as every fill
//! mutation. Cash comes from the exchange at load time and is adjusted
//! locally per fill afterwards.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::executor::TradeExecutor;
use crate::store::Database;
use crate::types::{ExecutionResult, Order, Position, PositionSide, Side};
use crate::util::now_ts;

pub struct PortfolioManager {
    store: Database,
    max_positions: usize,
    cash_balance: f64,
    positions: HashMap<String, Position>,
}

impl PortfolioManager {
    pub fn new(store: Database, max_positions: usize) -> Self {
        Self {
            store,
            max_positions,
            cash_balance: 0.0,
            positions: HashMap::new(),
        }
    }

    pub fn cash_balance(&self) -> f64 {
        self.cash_balance
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.values().map(Position::unrealized_pnl).sum()
    }

    pub fn total_market_value(&self) -> f64 {
        self.positions.values().map(Position::market_value).sum()
    }

    /// Blocking precondition of accepting orders: cash from the exchange,
    /// positions from the store.
    pub async fn load_state(&mut self, executor: &mut dyn TradeExecutor) -> anyhow::Result<()> {
        self.cash_balance = executor.get_balance().await?;
        info!("💼 Loaded cash balance: {:.2} USDC", self.cash_balance);

        let positions = self.store.get_all_positions()?;
        self.positions = positions.into_iter().map(|p| (p.token_id.clone(), p)).collect();
        info!("💼 Loaded {} positions from store", self.positions.len());
        Ok(())
    }

    /// Validate an order against cash and position constraints.
    pub fn check_order(&self, order: &Order) -> (bool, String) {
        match order.side {
            Side::Buy => {
                // Worst case when the price is unknown: the full 1.0.
                let price = order.limit_price.unwrap_or(1.0);
                let cost = order.quantity * price;
                if cost > self.cash_balance {
                    return (
                        false,
                        format!("insufficient cash: {cost:.2} > {:.2}", self.cash_balance),
                    );
                }
                if !self.positions.contains_key(&order.token_id)
                    && self.positions.len() >= self.max_positions
                {
                    return (false, format!("max positions reached: {}", self.max_positions));
                }
            }
            Side::Sell => {
                let available = self
                    .positions
                    .get(&order.token_id)
                    .map(|p| p.quantity)
                    .unwrap_or(0.0);
                if available < order.quantity {
                    return (
                        false,
                        format!(
                            "insufficient position for sell: {} > {available}",
                            order.quantity
                        ),
                    );
                }
            }
        }
        (true, String::new())
    }

    /// Apply a fill: position VWAP/close plus cash adjustment, persisted
    /// in the same step.
    pub fn on_fill(&mut self, order: &Order, result: &ExecutionResult) -> anyhow::Result<()> {
        let filled_size = if result.filled_size > 0.0 {
            result.filled_size
        } else {
            order.quantity
        };
        let filled_price = result.filled_price;

        match order.side {
            Side::Buy => {
                self.apply_buy(&order.token_id, filled_size, filled_price)?;
                self.cash_balance -= filled_size * filled_price + result.fees_paid;
            }
            Side::Sell => {
                self.apply_sell(&order.token_id, filled_size, filled_price)?;
                self.cash_balance += filled_size * filled_price - result.fees_paid;
            }
        }
        Ok(())
    }

    fn apply_buy(&mut self, token_id: &str, quantity: f64, price: f64) -> anyhow::Result<()> {
        let new_pos = match self.positions.get(token_id) {
            Some(old) => {
                let new_quantity = old.quantity + quantity;
                let total_cost = old.quantity * old.avg_entry_price + quantity * price;
                Position {
                    token_id: token_id.to_string(),
                    side: PositionSide::Long,
                    quantity: new_quantity,
                    avg_entry_price: total_cost / new_quantity,
                    current_price: price,
                    opened_at: old.opened_at,
                }
            }
            None => Position {
                token_id: token_id.to_string(),
                side: PositionSide::Long,
                quantity,
                avg_entry_price: price,
                current_price: price,
                opened_at: now_ts(),
            },
        };

        debug!(
            "💼 Position updated: {}… {:.2} @ {:.4}",
            &token_id[..8.min(token_id.len())],
            new_pos.quantity,
            new_pos.avg_entry_price,
        );
        self.store.upsert_position(&new_pos)?;
        self.positions.insert(token_id.to_string(), new_pos);
        Ok(())
    }

    fn apply_sell(&mut self, token_id: &str, quantity: f64, price: f64) -> anyhow::Result<()> {
        let old = match self.positions.get(token_id) {
            Some(p) => p.clone(),
            None => {
                warn!("💼 Sell fill for unknown position: {token_id}");
                return Ok(());
            }
        };

        let new_quantity = old.quantity - quantity;
        if new_quantity <= 0.0 {
            self.positions.remove(token_id);
            self.store.delete_position(token_id)?;
            debug!("💼 Position closed: {}…", &token_id[..8.min(token_id.len())]);
        } else {
            // avg_entry_price is preserved on sells.
            let new_pos = Position {
                quantity: new_quantity,
                current_price: price,
                ..old
            };
            self.store.upsert_position(&new_pos)?;
            self.positions.insert(token_id.to_string(), new_pos);
            debug!(
                "💼 Position reduced: {}… to {:.2}",
                &token_id[..8.min(token_id.len())],
                new_quantity,
            );
        }
        Ok(())
    }

    /// Mark-to-market: replace the held position with a copy at the new
    /// price. Unknown tokens are no-ops.
    pub fn on_price_update(&mut self, token_id: &str, price: f64) {
        if let Some(pos) = self.positions.get_mut(token_id) {
            let marked = pos.with_current_price(price);
            *pos = marked;
        }
    }
}
