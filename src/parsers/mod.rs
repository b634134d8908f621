//! Rule engines: stateful evaluators turning market events into trade
//! signals.
//!
//! Parsers are pure state machines — no I/O, no blocking, no panics. Any
//! condition a parser cannot handle yields `None`.

pub mod keyword;
pub mod threshold;

pub use keyword::{KeywordParser, KeywordRule};
pub use threshold::{Comparison, RuleTable, ThresholdParser, ThresholdRule};

use crate::events::MarketEvent;
use crate::types::TradeSignal;

pub trait Parser: Send {
    fn name(&self) -> &'static str;

    /// Evaluate one event against this parser's rules.
    ///
    /// Returns at most one signal per event (first matching rule in
    /// install order wins; later rules stay eligible for future events).
    fn evaluate(&mut self, event: &MarketEvent) -> Option<TradeSignal>;

    /// Clear cooldowns and tracking state.
    fn reset(&mut self);
}
