//! Risk-gated order executor.
//!
//! `execute` runs a fixed gauntlet before anything touches the wire:
//! position-size cap → dry-run short-circuit → rate-limit spacing →
//! aggressive price derivation from the live book → price sanity →
//! quantity derivation → FOK submission. Any failed gate aborts the order
//! with a typed error and no submission.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clob::{ClobApi, FokOrder};
use crate::error::ExecError;
use crate::types::{ExecutionResult, OrderStatus, Side, TradeSignal};
use crate::util::{f64_field, now_ts, unix_millis};

// Aggressive crossing: pay 1% over the ask / accept 1% under the bid.
const SPREAD_CROSS_MULTIPLIER: f64 = 1.01;
const SPREAD_CROSS_DIVISOR: f64 = 0.99;
// Spread wider than this reads as an illiquid market.
const MAX_SPREAD_PERCENT: f64 = 0.50;
const MIN_VALID_PRICE: f64 = 0.01;
const MAX_VALID_PRICE: f64 = 0.99;
// Minimum spacing between outbound requests.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
const DRY_RUN_BALANCE: f64 = 10_000.0;
const DRY_RUN_FILL_PRICE: f64 = 0.50;

#[async_trait]
pub trait TradeExecutor: Send {
    /// Prepare credentials/connection. Must precede `execute`.
    async fn setup(&mut self) -> Result<(), ExecError>;

    async fn execute(&mut self, signal: &TradeSignal) -> Result<ExecutionResult, ExecError>;

    /// Available cash in USDC. Synthetic constant in dry-run.
    async fn get_balance(&mut self) -> Result<f64, ExecError>;
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub dry_run: bool,
    pub max_position_size: f64,
}

pub struct ClobExecutor {
    cfg: ExecutorConfig,
    client: Arc<dyn ClobApi>,
    last_request: Option<Instant>,
}

impl ClobExecutor {
    pub fn new(cfg: ExecutorConfig, client: Arc<dyn ClobApi>) -> Self {
        Self {
            cfg,
            client,
            last_request: None,
        }
    }

    fn validate_position_size(&self, size_usdc: f64) -> Result<(), ExecError> {
        if size_usdc > self.cfg.max_position_size {
            return Err(ExecError::PositionSize {
                size: size_usdc,
                max: self.cfg.max_position_size,
            });
        }
        Ok(())
    }

    async fn throttle(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn execute_dry_run(&self, signal: &TradeSignal) -> ExecutionResult {
        warn!(
            "📝 DRY RUN | token={}… side={} size={:.2} reason={}",
            &signal.token_id[..8.min(signal.token_id.len())],
            signal.side.as_str(),
            signal.size_usdc,
            signal.reason,
        );
        let suffix = hex::encode(rand::random::<[u8; 4]>());
        ExecutionResult {
            order_id: format!("dry_run_{suffix}"),
            status: OrderStatus::Filled,
            filled_price: DRY_RUN_FILL_PRICE,
            filled_size: signal.size_usdc / DRY_RUN_FILL_PRICE,
            fees_paid: 0.0,
            executed_at: now_ts(),
            error_message: None,
        }
    }

    fn validate_spread(best_bid: f64, best_ask: f64) -> Result<(), ExecError> {
        if best_bid <= 0.0 || best_ask <= 0.0 {
            return Ok(());
        }
        let spread = (best_ask - best_bid) / best_ask;
        if spread > MAX_SPREAD_PERCENT {
            return Err(ExecError::PriceValidation(format!(
                "spread too wide: {:.1}% (max {:.0}%), market may be illiquid",
                spread * 100.0,
                MAX_SPREAD_PERCENT * 100.0,
            )));
        }
        Ok(())
    }

    /// Cross the spread aggressively: 1% past the touch, clamped to the
    /// valid band.
    async fn calculate_price(&mut self, token_id: &str, side: Side) -> Result<f64, ExecError> {
        self.throttle().await;
        let book = self
            .client
            .get_order_book(token_id)
            .await
            .map_err(|e| ExecError::OrderBook(format!("book fetch for {token_id}: {e}")))?;

        match side {
            Side::Buy => {
                let best_ask = book
                    .best_ask()
                    .ok_or_else(|| ExecError::OrderBook(format!("no asks available for {token_id}")))?;
                if let Some(best_bid) = book.best_bid() {
                    Self::validate_spread(best_bid, best_ask)?;
                }
                Ok((best_ask * SPREAD_CROSS_MULTIPLIER).min(MAX_VALID_PRICE))
            }
            Side::Sell => {
                let best_bid = book
                    .best_bid()
                    .ok_or_else(|| ExecError::OrderBook(format!("no bids available for {token_id}")))?;
                if let Some(best_ask) = book.best_ask() {
                    Self::validate_spread(best_bid, best_ask)?;
                }
                Ok((best_bid * SPREAD_CROSS_DIVISOR).max(MIN_VALID_PRICE))
            }
        }
    }

    fn validate_price(price: f64) -> Result<(), ExecError> {
        if !(MIN_VALID_PRICE..=MAX_VALID_PRICE).contains(&price) {
            return Err(ExecError::PriceValidation(format!(
                "price {price:.4} outside [{MIN_VALID_PRICE}, {MAX_VALID_PRICE}]"
            )));
        }
        Ok(())
    }

    /// Normalize the vendor response, tolerating missing fields: the
    /// submitted price/size back-fill filled orders, unknown statuses map
    /// to pending.
    fn parse_order_response(response: &Value, expected_price: f64, expected_size: f64) -> ExecutionResult {
        let order_id = response
            .get("orderID")
            .or_else(|| response.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("unknown_{}", hex::encode(rand::random::<[u8; 4]>())));

        let status = response
            .get("status")
            .and_then(Value::as_str)
            .map(|s| match s.to_ascii_uppercase().as_str() {
                "FILLED" | "MATCHED" => OrderStatus::Filled,
                "PARTIAL" => OrderStatus::Partial,
                "CANCELLED" => OrderStatus::Cancelled,
                "REJECTED" => OrderStatus::Rejected,
                _ => OrderStatus::Pending,
            })
            .unwrap_or(OrderStatus::Pending);

        let filled_price = f64_field(response, "price")
            .filter(|p| *p > 0.0)
            .unwrap_or(expected_price);
        let filled_size = f64_field(response, "size")
            .filter(|s| *s > 0.0)
            .unwrap_or(if status == OrderStatus::Filled { expected_size } else { 0.0 });
        let fees_paid = f64_field(response, "fee").filter(|f| *f > 0.0).unwrap_or(0.0);

        let error_message = if status.is_terminal_failure() {
            Some(
                response
                    .get("error")
                    .or_else(|| response.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
            )
        } else {
            None
        };

        ExecutionResult {
            order_id,
            status,
            filled_price,
            filled_size,
            fees_paid,
            executed_at: now_ts(),
            error_message,
        }
    }

    async fn execute_live(&mut self, signal: &TradeSignal) -> Result<ExecutionResult, ExecError> {
        info!(
            "⚡ Executing live order | token={}… side={} size={:.2}",
            &signal.token_id[..8.min(signal.token_id.len())],
            signal.side.as_str(),
            signal.size_usdc,
        );

        let price = self.calculate_price(&signal.token_id, signal.side).await?;
        Self::validate_price(price)?;
        let size = signal.size_usdc / price;

        let order = FokOrder::new(signal.token_id.clone(), signal.side, price, size, unix_millis());

        self.throttle().await;
        let response = self
            .client
            .submit_fok_order(&order)
            .await
            .map_err(|e| ExecError::Execution(format!("order submission: {e}")))?;

        let result = Self::parse_order_response(&response, price, size);
        info!(
            "⚡ Order executed | order_id={} status={} price={:.4}",
            result.order_id,
            result.status.as_str(),
            result.filled_price,
        );
        Ok(result)
    }
}

#[async_trait]
impl TradeExecutor for ClobExecutor {
    async fn setup(&mut self) -> Result<(), ExecError> {
        if self.cfg.dry_run {
            info!("📝 Executor in DRY-RUN mode — no orders will reach the venue");
            return Ok(());
        }
        // Round-trip the balance endpoint once to surface bad credentials
        // before the pipeline starts trading.
        self.throttle().await;
        self.client
            .get_balance_allowance()
            .await
            .map_err(|e| ExecError::Authentication(format!("balance check: {e}")))?;
        info!("⚡ Executor ready (live)");
        Ok(())
    }

    async fn execute(&mut self, signal: &TradeSignal) -> Result<ExecutionResult, ExecError> {
        // Position-size guard applies in dry-run too.
        self.validate_position_size(signal.size_usdc)?;

        if self.cfg.dry_run {
            return Ok(self.execute_dry_run(signal));
        }
        self.execute_live(signal).await
    }

    async fn get_balance(&mut self) -> Result<f64, ExecError> {
        if self.cfg.dry_run {
            debug!("📝 Dry-run: returning synthetic balance {DRY_RUN_BALANCE}");
            return Ok(DRY_RUN_BALANCE);
        }
        self.throttle().await;
        let response = self
            .client
            .get_balance_allowance()
            .await
            .map_err(|e| ExecError::Authentication(format!("balance fetch: {e}")))?;
        Ok(f64_field(&response, "balance").unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::clob::BookSnapshot;

    #[derive(Default)]
    struct MockClob {
        book: parking_lot::Mutex<Value>,
        order_response: parking_lot::Mutex<Value>,
        book_calls: AtomicUsize,
        submit_calls: AtomicUsize,
        balance_calls: AtomicUsize,
    }

    #[async_trait]
    impl ClobApi for MockClob {
        async fn get_order_book(&self, _token_id: &str) -> anyhow::Result<BookSnapshot> {
            self.book_calls.fetch_add(1, Ordering::SeqCst);
            Ok(BookSnapshot::from_value(&self.book.lock()))
        }

        async fn submit_fok_order(&self, _order: &FokOrder) -> anyhow::Result<Value> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.order_response.lock().clone())
        }

        async fn get_balance_allowance(&self) -> anyhow::Result<Value> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"balance": "2500.50"}))
        }
    }

    fn executor(dry_run: bool, mock: Arc<MockClob>) -> ClobExecutor {
        ClobExecutor::new(
            ExecutorConfig {
                dry_run,
                max_position_size: 1000.0,
            },
            mock,
        )
    }

    fn signal(size: f64) -> TradeSignal {
        TradeSignal::new("token-a", Side::Buy, size, "test")
    }

    #[tokio::test]
    async fn test_dry_run_no_network_and_prefixed_id() {
        let mock = Arc::new(MockClob::default());
        let mut exec = executor(true, mock.clone());
        exec.setup().await.unwrap();

        let result = exec.execute(&signal(100.0)).await.unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        assert!(result.order_id.starts_with("dry_run_"));
        assert!((result.filled_price - 0.50).abs() < 1e-9);
        assert!((result.filled_size - 200.0).abs() < 1e-9);
        assert_eq!(result.fees_paid, 0.0);

        // No network I/O at all.
        assert_eq!(mock.book_calls.load(Ordering::SeqCst), 0);
        assert_eq!(mock.submit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(mock.balance_calls.load(Ordering::SeqCst), 0);

        assert!((exec.get_balance().await.unwrap() - DRY_RUN_BALANCE).abs() < 1e-9);
        assert_eq!(mock.balance_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_position_size_guard_in_both_modes() {
        for dry_run in [true, false] {
            let mut exec = executor(dry_run, Arc::new(MockClob::default()));
            let err = exec.execute(&signal(1500.0)).await.unwrap_err();
            assert!(matches!(err, ExecError::PositionSize { .. }), "dry_run={dry_run}");
        }
    }

    #[tokio::test]
    async fn test_live_buy_crosses_spread() {
        let mock = Arc::new(MockClob::default());
        *mock.book.lock() = json!({
            "bids": [{"price": "0.48"}],
            "asks": [{"price": "0.50"}]
        });
        *mock.order_response.lock() = json!({"orderID": "ox-1", "status": "matched"});

        let mut exec = executor(false, mock.clone());
        let result = exec.execute(&signal(101.0)).await.unwrap();

        assert_eq!(result.order_id, "ox-1");
        assert_eq!(result.status, OrderStatus::Filled);
        // price = min(0.50 * 1.01, 0.99) = 0.505; size backfilled from
        // the submission: 101 / 0.505 = 200.
        assert!((result.filled_price - 0.505).abs() < 1e-9);
        assert!((result.filled_size - 200.0).abs() < 1e-6);
        assert_eq!(mock.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_live_buy_price_capped_at_099() {
        let mock = Arc::new(MockClob::default());
        *mock.book.lock() = json!({"asks": [{"price": "0.985"}]});
        *mock.order_response.lock() = json!({"orderID": "ox", "status": "FILLED"});

        let mut exec = executor(false, mock);
        let result = exec.execute(&signal(10.0)).await.unwrap();
        assert!((result.filled_price - 0.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_sell_floors_at_001() {
        let mock = Arc::new(MockClob::default());
        *mock.book.lock() = json!({"bids": [{"price": "0.005"}]});
        *mock.order_response.lock() = json!({"orderID": "ox", "status": "FILLED"});

        let mut exec = executor(false, mock);
        let sig = TradeSignal::new("token-a", Side::Sell, 10.0, "t");
        let result = exec.execute(&sig).await.unwrap();
        assert!((result.filled_price - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_asks_rejects_buy() {
        let mock = Arc::new(MockClob::default());
        *mock.book.lock() = json!({"bids": [{"price": "0.40"}]});

        let mut exec = executor(false, mock.clone());
        let err = exec.execute(&signal(10.0)).await.unwrap_err();
        assert!(matches!(err, ExecError::OrderBook(_)));
        assert_eq!(mock.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wide_spread_rejected_as_illiquid() {
        let mock = Arc::new(MockClob::default());
        // spread = (0.80 - 0.20) / 0.80 = 75% > 50%
        *mock.book.lock() = json!({
            "bids": [{"price": "0.20"}],
            "asks": [{"price": "0.80"}]
        });

        let mut exec = executor(false, mock.clone());
        let err = exec.execute(&signal(10.0)).await.unwrap_err();
        match err {
            ExecError::PriceValidation(msg) => assert!(msg.contains("spread too wide")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mock.submit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_response_carries_error_message() {
        let mock = Arc::new(MockClob::default());
        *mock.book.lock() = json!({"bids": [{"price": "0.48"}], "asks": [{"price": "0.50"}]});
        *mock.order_response.lock() = json!({"id": "ox-2", "status": "rejected", "error": "not enough balance"});

        let mut exec = executor(false, mock);
        let result = exec.execute(&signal(10.0)).await.unwrap();
        assert_eq!(result.status, OrderStatus::Rejected);
        assert_eq!(result.order_id, "ox-2");
        assert_eq!(result.filled_size, 0.0);
        assert_eq!(result.error_message.as_deref(), Some("not enough balance"));
    }

    #[tokio::test]
    async fn test_unknown_status_maps_to_pending() {
        let mock = Arc::new(MockClob::default());
        *mock.book.lock() = json!({"asks": [{"price": "0.50"}]});
        *mock.order_response.lock() = json!({"orderID": "ox-3", "status": "live"});

        let mut exec = executor(false, mock);
        let result = exec.execute(&signal(10.0)).await.unwrap();
        assert_eq!(result.status, OrderStatus::Pending);
        assert_eq!(result.filled_size, 0.0);
    }

    #[tokio::test]
    async fn test_live_balance_parses_vendor_string() {
        let mock = Arc::new(MockClob::default());
        let mut exec = executor(false, mock.clone());
        assert!((exec.get_balance().await.unwrap() - 2500.50).abs() < 1e-9);
        assert_eq!(mock.balance_calls.load(Ordering::SeqCst), 1);
    }
}
