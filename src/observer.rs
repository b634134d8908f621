//! Observer surface for pipeline events.
//!
//! Callbacks are best-effort: a returned error is logged and discarded by
//! the orchestrator. An observer can never stall or crash the trading
//! loop.

use crate::types::{ExecutionResult, TradeSignal};

/// Counters published to observers after every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub events_processed: u64,
    pub signals_generated: u64,
    pub trades_executed: u64,
    pub errors_encountered: u64,
}

#[allow(unused_variables)]
pub trait Observer: Send {
    fn on_signal_generated(&mut self, signal: &TradeSignal) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_trade_executed(
        &mut self,
        signal: &TradeSignal,
        result: &ExecutionResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_error(&mut self, context: &str, message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_metrics_updated(&mut self, metrics: PipelineMetrics) -> anyhow::Result<()> {
        Ok(())
    }
}
