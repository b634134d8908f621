//! Orchestrator — wires ingest, parsing, risk, execution, and persistence.
//!
//! Architecture:
//!   sources ──fan-in──→ bounded queue ──drain──→ parsers → portfolio check
//!     → executor → portfolio fill → store / journal → observers
//!
//! One supervisor task owns the queue and the shutdown token. Every ingest
//! source is an independent producer task; parsers, portfolio mutations,
//! and store writes all run on the drain task, so per-event ordering needs
//! no locks. Each event is processed under a guard: failures are counted,
//! published, and never escape the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::MarketEvent;
use crate::executor::TradeExecutor;
use crate::ingest::IngestSource;
use crate::journal::TradeLogger;
use crate::observer::{Observer, PipelineMetrics};
use crate::parsers::Parser;
use crate::portfolio::PortfolioManager;
use crate::store::Database;
use crate::types::{Order, OrderStatus, TradeSignal};

/// Queue bound: sized to absorb a burst from all sources combined.
const EVENT_QUEUE_CAPACITY: usize = 1024;
/// Short poll so the shutdown flag is checked frequently.
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Requests shutdown from outside the drain loop (signal handler,
/// operator command).
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Orchestrator {
    sources: Vec<Box<dyn IngestSource>>,
    parsers: Vec<Box<dyn Parser>>,
    executor: Box<dyn TradeExecutor>,
    portfolio: Option<PortfolioManager>,
    store: Option<Database>,
    journal: Option<TradeLogger>,
    observers: Vec<Box<dyn Observer>>,
    metrics: PipelineMetrics,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Box<dyn IngestSource>>,
        parsers: Vec<Box<dyn Parser>>,
        executor: Box<dyn TradeExecutor>,
        portfolio: Option<PortfolioManager>,
        store: Option<Database>,
        journal: Option<TradeLogger>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            sources,
            parsers,
            executor,
            portfolio,
            store,
            journal,
            observers: Vec::new(),
            metrics: PipelineMetrics::default(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn register_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics
    }

    /// Run the pipeline to completion: until shutdown is requested or
    /// every producer has finished (plus a residual drain).
    pub async fn start(&mut self) -> anyhow::Result<()> {
        info!(
            "🚀 Starting orchestrator | sources={} parsers={} portfolio={}",
            self.sources.len(),
            self.parsers.len(),
            self.portfolio.is_some(),
        );

        self.executor.setup().await?;

        for i in 0..self.sources.len() {
            if let Err(e) = self.sources[i].connect().await {
                // Unwind the sources that did connect before bubbling up.
                for connected in &mut self.sources[..i] {
                    connected.disconnect().await;
                }
                return Err(e.into());
            }
        }

        let (tx, mut rx) = mpsc::channel::<MarketEvent>(EVENT_QUEUE_CAPACITY);
        let mut producers: Vec<JoinHandle<()>> = Vec::new();
        for mut source in self.sources.drain(..) {
            let tx = tx.clone();
            let shutdown = self.shutdown_rx.clone();
            producers.push(tokio::spawn(async move {
                let name = source.name();
                if let Err(e) = source.run(tx, shutdown).await {
                    error!("🛑 Source '{name}' terminated: {e}");
                }
            }));
        }
        // The queue closes when the last producer drops its sender.
        drop(tx);

        loop {
            match tokio::time::timeout(QUEUE_POLL_TIMEOUT, rx.recv()).await {
                Ok(Some(event)) => self.process_event(event).await,
                // Closed and empty: every producer is done.
                Ok(None) => break,
                Err(_) => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Residual drain after a shutdown request.
        while let Ok(event) = rx.try_recv() {
            self.process_event(event).await;
        }

        self.stop(producers).await;
        Ok(())
    }

    async fn stop(&mut self, producers: Vec<JoinHandle<()>>) {
        info!("🛑 Stopping orchestrator");
        let _ = self.shutdown_tx.send(true);
        for handle in producers {
            let _ = handle.await;
        }

        let m = self.metrics;
        emit(&mut self.observers, |o| o.on_metrics_updated(m));
        info!(
            "🛑 Final metrics | events={} signals={} trades={} errors={}",
            m.events_processed, m.signals_generated, m.trades_executed, m.errors_encountered,
        );
    }

    async fn process_event(&mut self, event: MarketEvent) {
        self.metrics.events_processed += 1;

        // Mark-to-market before any rule fires on this event.
        if let Some(portfolio) = &mut self.portfolio {
            if let (Some(token), Some(price)) = (event.token_id.as_deref(), event.last_price) {
                portfolio.on_price_update(token, price);
            }
        }

        // Parsers run in registration order; a signal executes before the
        // next parser sees the same event.
        for i in 0..self.parsers.len() {
            if let Some(signal) = self.parsers[i].evaluate(&event) {
                self.metrics.signals_generated += 1;
                info!(
                    "📶 Signal | token={}… side={} size={:.2}",
                    &signal.token_id[..8.min(signal.token_id.len())],
                    signal.side.as_str(),
                    signal.size_usdc,
                );
                emit(&mut self.observers, |o| o.on_signal_generated(&signal));
                self.handle_signal(signal).await;
            }
        }

        let m = self.metrics;
        emit(&mut self.observers, |o| o.on_metrics_updated(m));
    }

    async fn handle_signal(&mut self, signal: TradeSignal) {
        let order = Order::from_signal(&signal);

        if let Some(portfolio) = &self.portfolio {
            let (ok, reason) = portfolio.check_order(&order);
            if !ok {
                warn!("🚫 Order rejected: {reason}");
                emit(&mut self.observers, |o| o.on_error("check_order", &reason));
                return;
            }
        }

        let inserted = self
            .store
            .as_ref()
            .map(|s| s.insert_order(&order, OrderStatus::Pending));
        if let Some(Err(e)) = inserted {
            self.record_error("store.insert_order", &e.to_string());
        }

        let result = match self.executor.execute(&signal).await {
            Ok(result) => result,
            Err(e) => {
                self.record_error("executor", &e.to_string());
                return;
            }
        };

        self.metrics.trades_executed += 1;
        info!(
            "✅ Trade executed | order_id={} status={} price={:.4}",
            result.order_id,
            result.status.as_str(),
            result.filled_price,
        );
        emit(&mut self.observers, |o| o.on_trade_executed(&signal, &result));

        let updated = self.store.as_ref().map(|s| {
            s.update_order_status(&order.client_order_id, result.status, Some(&result.order_id))
        });
        if let Some(Err(e)) = updated {
            self.record_error("store.update_order", &e.to_string());
        }

        // Economic effects only on fill-bearing results; a rejected FOK
        // changes nothing.
        if !matches!(result.status, OrderStatus::Filled | OrderStatus::Partial) {
            warn!(
                "⚠️ Order {} ended {} — no fill applied",
                result.order_id,
                result.status.as_str(),
            );
            return;
        }

        let filled = self.portfolio.as_mut().map(|p| p.on_fill(&order, &result));
        if let Some(Err(e)) = filled {
            self.record_error("portfolio.on_fill", &e.to_string());
        }

        let recorded = self.store.as_ref().map(|s| s.insert_trade(&order, &result));
        if let Some(Err(e)) = recorded {
            self.record_error("store.insert_trade", &e.to_string());
        }
        if let Some(journal) = &self.journal {
            // Journal failures are swallowed inside the logger.
            journal.log_execution(&signal, &result);
        }
    }

    fn record_error(&mut self, context: &str, message: &str) {
        self.metrics.errors_encountered += 1;
        error!("❌ {context}: {message}");
        emit(&mut self.observers, |o| o.on_error(context, message));
    }
}

/// Invoke one callback on every observer, logging and discarding errors.
fn emit<F>(observers: &mut [Box<dyn Observer>], mut call: F)
where
    F: FnMut(&mut dyn Observer) -> anyhow::Result<()>,
{
    for observer in observers {
        if let Err(e) = call(observer.as_mut()) {
            debug!("👁️ Observer callback error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use chrono::Local;
    use serde_json::Value;

    use crate::clob::{BookSnapshot, ClobApi, FokOrder};
    use crate::events::EventKind;
    use crate::executor::{ClobExecutor, ExecutorConfig};
    use crate::parsers::{Comparison, KeywordParser, KeywordRule, ThresholdParser, ThresholdRule};
    use crate::types::Side;

    // ── Test doubles ──

    struct NullClob;

    #[async_trait]
    impl ClobApi for NullClob {
        async fn get_order_book(&self, _: &str) -> anyhow::Result<BookSnapshot> {
            anyhow::bail!("no network in tests")
        }
        async fn submit_fok_order(&self, _: &FokOrder) -> anyhow::Result<Value> {
            anyhow::bail!("no network in tests")
        }
        async fn get_balance_allowance(&self) -> anyhow::Result<Value> {
            anyhow::bail!("no network in tests")
        }
    }

    /// Replays a fixed script of events, then ends its stream.
    struct ScriptedSource {
        events: Vec<MarketEvent>,
        connected: bool,
    }

    impl ScriptedSource {
        fn new(events: Vec<MarketEvent>) -> Self {
            Self {
                events,
                connected: false,
            }
        }
    }

    #[async_trait]
    impl IngestSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }
        async fn connect(&mut self) -> Result<(), crate::error::IngestError> {
            self.connected = true;
            Ok(())
        }
        async fn run(
            &mut self,
            out: mpsc::Sender<MarketEvent>,
            _shutdown: watch::Receiver<bool>,
        ) -> Result<(), crate::error::IngestError> {
            for event in self.events.drain(..) {
                if out.send(event).await.is_err() {
                    break;
                }
            }
            self.disconnect().await;
            Ok(())
        }
        async fn disconnect(&mut self) {
            self.connected = false;
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        signals: Arc<AtomicU64>,
        trades: Arc<AtomicU64>,
    }

    impl Observer for CountingObserver {
        fn on_signal_generated(&mut self, _: &TradeSignal) -> anyhow::Result<()> {
            self.signals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_trade_executed(
            &mut self,
            _: &TradeSignal,
            _: &crate::types::ExecutionResult,
        ) -> anyhow::Result<()> {
            self.trades.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails every callback — must not affect the pipeline.
    struct FailingObserver;

    impl Observer for FailingObserver {
        fn on_signal_generated(&mut self, _: &TradeSignal) -> anyhow::Result<()> {
            anyhow::bail!("observer down")
        }
        fn on_trade_executed(
            &mut self,
            _: &TradeSignal,
            _: &crate::types::ExecutionResult,
        ) -> anyhow::Result<()> {
            anyhow::bail!("observer down")
        }
        fn on_error(&mut self, _: &str, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("observer down")
        }
        fn on_metrics_updated(&mut self, _: PipelineMetrics) -> anyhow::Result<()> {
            anyhow::bail!("observer down")
        }
    }

    // ── Builders ──

    fn dry_executor(max_position_size: f64) -> ClobExecutor {
        ClobExecutor::new(
            ExecutorConfig {
                dry_run: true,
                max_position_size,
            },
            Arc::new(NullClob),
        )
    }

    fn dip_rule(token: &str, size: f64) -> ThresholdRule {
        ThresholdRule {
            token_id: token.into(),
            trigger_side: Side::Buy,
            threshold: 0.30,
            comparison: Comparison::Below,
            size_usdc: size,
            reason_template: "dip {comparison} {threshold}".into(),
            cooldown: Duration::ZERO,
        }
    }

    fn price_script(token: &str, prices: &[f64]) -> Vec<MarketEvent> {
        prices.iter().map(|p| MarketEvent::last_trade(token, *p, None)).collect()
    }

    async fn loaded_portfolio(store: &Database, max_positions: usize) -> PortfolioManager {
        let mut executor = dry_executor(1000.0);
        let mut pm = PortfolioManager::new(store.clone(), max_positions);
        pm.load_state(&mut executor).await.unwrap();
        pm
    }

    // ── Scenarios ──

    #[tokio::test]
    async fn test_threshold_crossing_end_to_end() {
        let store = Database::open_in_memory().unwrap();
        let journal_dir = tempfile::tempdir().unwrap();
        let portfolio = loaded_portfolio(&store, 10).await;

        let parser = ThresholdParser::new(vec![dip_rule("T", 100.0)]);
        let source = ScriptedSource::new(price_script("T", &[0.35, 0.33, 0.25, 0.24, 0.31, 0.29]));

        let mut orch = Orchestrator::new(
            vec![Box::new(source)],
            vec![Box::new(parser)],
            Box::new(dry_executor(1000.0)),
            Some(portfolio),
            Some(store.clone()),
            Some(TradeLogger::new(journal_dir.path())),
        );
        orch.start().await.unwrap();

        let m = orch.metrics();
        assert_eq!(m.events_processed, 6);
        assert_eq!(m.signals_generated, 2);
        assert_eq!(m.trades_executed, 2);
        assert_eq!(m.errors_encountered, 0);

        // Journal: exactly two parseable lines carrying signal + result.
        let journal_file = journal_dir
            .path()
            .join(format!("trades_{}.jsonl", Local::now().format("%Y-%m-%d")));
        let content = std::fs::read_to_string(journal_file).unwrap();
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            let v: Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["signal"]["token_id"], "T");
            assert!(v["result"]["order_id"].as_str().unwrap().starts_with("dry_run_"));
        }

        // Store: two trades, one position (two dry fills of 200 @ 0.50),
        // and both order rows promoted to FILLED.
        assert_eq!(store.get_trades(None, None).unwrap().len(), 2);
        let positions = store.get_all_positions().unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].quantity - 400.0).abs() < 1e-9);
        assert!((positions[0].avg_entry_price - 0.50).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_keyword_news_to_trade() {
        let parser = KeywordParser::new(vec![KeywordRule {
            keyword: "FED HIKE".into(),
            token_id: "U".into(),
            trigger_side: Side::Buy,
            size_usdc: 100.0,
            reason_template: "'{keyword}'".into(),
            case_sensitive: false,
            cooldown: Duration::ZERO,
        }]);
        let source = ScriptedSource::new(vec![
            MarketEvent::news("Breaking: FED HIKE of 25bp", "wire"),
            MarketEvent::news("Weather sunny", "wire"),
        ]);

        let mut orch = Orchestrator::new(
            vec![Box::new(source)],
            vec![Box::new(parser)],
            Box::new(dry_executor(1000.0)),
            None,
            None,
            None,
        );
        orch.start().await.unwrap();

        let m = orch.metrics();
        assert_eq!(m.events_processed, 2);
        assert_eq!(m.signals_generated, 1);
        assert_eq!(m.trades_executed, 1);
    }

    #[tokio::test]
    async fn test_portfolio_reject_drops_order() {
        let store = Database::open_in_memory().unwrap();
        // max_positions = 0: every new BUY is rejected pre-trade.
        let portfolio = loaded_portfolio(&store, 0).await;
        let journal_dir = tempfile::tempdir().unwrap();

        let parser = ThresholdParser::new(vec![dip_rule("T", 100.0)]);
        let source = ScriptedSource::new(price_script("T", &[0.25]));

        let mut orch = Orchestrator::new(
            vec![Box::new(source)],
            vec![Box::new(parser)],
            Box::new(dry_executor(1000.0)),
            Some(portfolio),
            Some(store.clone()),
            Some(TradeLogger::new(journal_dir.path())),
        );
        orch.start().await.unwrap();

        let m = orch.metrics();
        assert_eq!(m.signals_generated, 1);
        assert_eq!(m.trades_executed, 0);
        // Rejection is not an error, and nothing reached the journal.
        assert_eq!(m.errors_encountered, 0);
        assert_eq!(store.get_trades(None, None).unwrap().len(), 0);
        let journal_file = journal_dir
            .path()
            .join(format!("trades_{}.jsonl", Local::now().format("%Y-%m-%d")));
        assert!(!journal_file.exists());
    }

    #[tokio::test]
    async fn test_executor_error_counted_not_fatal() {
        // Rule size 100 > cap 10: every execution fails the size gate.
        let parser = ThresholdParser::new(vec![dip_rule("T", 100.0)]);
        let source = ScriptedSource::new(price_script("T", &[0.35, 0.25, 0.31, 0.29]));

        let mut orch = Orchestrator::new(
            vec![Box::new(source)],
            vec![Box::new(parser)],
            Box::new(dry_executor(10.0)),
            None,
            None,
            None,
        );
        orch.start().await.unwrap();

        let m = orch.metrics();
        assert_eq!(m.events_processed, 4);
        assert_eq!(m.signals_generated, 2);
        assert_eq!(m.trades_executed, 0);
        assert_eq!(m.errors_encountered, 2);
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_change_metrics() {
        let run = |with_failing: bool| async move {
            let parser = ThresholdParser::new(vec![dip_rule("T", 100.0)]);
            let source =
                ScriptedSource::new(price_script("T", &[0.35, 0.33, 0.25, 0.24, 0.31, 0.29]));
            let mut orch = Orchestrator::new(
                vec![Box::new(source) as Box<dyn IngestSource>],
                vec![Box::new(parser) as Box<dyn Parser>],
                Box::new(dry_executor(1000.0)),
                None,
                None,
                None,
            );
            if with_failing {
                orch.register_observer(Box::new(FailingObserver));
            }
            orch.start().await.unwrap();
            orch.metrics()
        };

        let clean = run(false).await;
        let with_failing = run(true).await;
        assert_eq!(clean, with_failing);
        assert_eq!(clean.signals_generated, 2);
        assert_eq!(clean.trades_executed, 2);
    }

    #[tokio::test]
    async fn test_observers_receive_pipeline_events() {
        let signals = Arc::new(AtomicU64::new(0));
        let trades = Arc::new(AtomicU64::new(0));
        let observer = CountingObserver {
            signals: signals.clone(),
            trades: trades.clone(),
        };

        let parser = ThresholdParser::new(vec![dip_rule("T", 100.0)]);
        let source = ScriptedSource::new(price_script("T", &[0.35, 0.25]));
        let mut orch = Orchestrator::new(
            vec![Box::new(source)],
            vec![Box::new(parser)],
            Box::new(dry_executor(1000.0)),
            None,
            None,
            None,
        );
        orch.register_observer(Box::new(observer));
        orch.start().await.unwrap();

        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert_eq!(trades.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_multiple_sources_fan_in() {
        let threshold = ThresholdParser::new(vec![dip_rule("T", 100.0)]);
        let keyword = KeywordParser::new(vec![KeywordRule {
            keyword: "HIKE".into(),
            token_id: "U".into(),
            trigger_side: Side::Buy,
            size_usdc: 50.0,
            reason_template: "kw".into(),
            case_sensitive: false,
            cooldown: Duration::ZERO,
        }]);

        let market = ScriptedSource::new(price_script("T", &[0.35, 0.25]));
        let news = ScriptedSource::new(vec![MarketEvent::news("HIKE!", "wire")]);

        let mut orch = Orchestrator::new(
            vec![Box::new(market), Box::new(news)],
            vec![Box::new(threshold), Box::new(keyword)],
            Box::new(dry_executor(1000.0)),
            None,
            None,
            None,
        );
        orch.start().await.unwrap();

        let m = orch.metrics();
        assert_eq!(m.events_processed, 3);
        assert_eq!(m.signals_generated, 2);
        assert_eq!(m.trades_executed, 2);
    }

    #[tokio::test]
    async fn test_mark_to_market_flows_from_events() {
        let store = Database::open_in_memory().unwrap();
        let portfolio = loaded_portfolio(&store, 10).await;

        // First event opens the position (dip buy fills at 0.50), second
        // re-marks it at 0.60 without triggering anything.
        let parser = ThresholdParser::new(vec![dip_rule("T", 100.0)]);
        let source = ScriptedSource::new(price_script("T", &[0.25, 0.60]));

        let mut orch = Orchestrator::new(
            vec![Box::new(source)],
            vec![Box::new(parser)],
            Box::new(dry_executor(1000.0)),
            Some(portfolio),
            Some(store),
            None,
        );
        orch.start().await.unwrap();

        let portfolio = orch.portfolio.as_ref().unwrap();
        let pos = &portfolio.positions()["T"];
        assert!((pos.current_price - 0.60).abs() < 1e-9);
        // 200 shares bought at 0.50, marked at 0.60.
        assert!((portfolio.total_unrealized_pnl() - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_shutdown_handle_stops_idle_pipeline() {
        // A source that produces nothing and waits for shutdown.
        struct IdleSource;
        #[async_trait]
        impl IngestSource for IdleSource {
            fn name(&self) -> &'static str {
                "idle"
            }
            async fn connect(&mut self) -> Result<(), crate::error::IngestError> {
                Ok(())
            }
            async fn run(
                &mut self,
                _out: mpsc::Sender<MarketEvent>,
                mut shutdown: watch::Receiver<bool>,
            ) -> Result<(), crate::error::IngestError> {
                let _ = shutdown.changed().await;
                Ok(())
            }
            async fn disconnect(&mut self) {}
            fn is_connected(&self) -> bool {
                true
            }
        }

        let mut orch = Orchestrator::new(
            vec![Box::new(IdleSource)],
            vec![],
            Box::new(dry_executor(1000.0)),
            None,
            None,
            None,
        );
        let handle = orch.shutdown_handle();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            handle.shutdown();
        });

        tokio::time::timeout(Duration::from_secs(5), orch.start())
            .await
            .expect("pipeline must stop on shutdown")
            .unwrap();
        stopper.await.unwrap();
    }
}
