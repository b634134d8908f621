//! Market events — the single message type every ingest source produces
//! and every parser consumes.

use serde_json::Value;

use crate::util::now_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BookUpdate,
    PriceChange,
    LastTrade,
    TickSizeChange,
    News,
    Social,
}

impl EventKind {
    /// Market-flavored kinds carry a token id; external kinds carry content.
    pub fn is_market(&self) -> bool {
        matches!(
            self,
            EventKind::BookUpdate
                | EventKind::PriceChange
                | EventKind::LastTrade
                | EventKind::TickSizeChange
        )
    }

    pub fn is_external(&self) -> bool {
        matches!(self, EventKind::News | EventKind::Social)
    }
}

/// One event flowing through the shared queue.
///
/// Invariants (enforced at the ingest boundary, checked by consumers):
/// market kinds have a non-empty `token_id`; external kinds have non-empty
/// `content`. `raw` keeps the original wire payload for forensic logging.
#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub kind: EventKind,
    /// Monotonic-enough ingest stamp (unix seconds).
    pub timestamp: f64,
    pub token_id: Option<String>,
    pub market_id: Option<String>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub last_price: Option<f64>,
    pub last_size: Option<f64>,
    pub content: Option<String>,
    pub source: Option<String>,
    pub raw: Option<Value>,
}

impl MarketEvent {
    fn blank(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: now_ts(),
            token_id: None,
            market_id: None,
            best_bid: None,
            best_ask: None,
            last_price: None,
            last_size: None,
            content: None,
            source: None,
            raw: None,
        }
    }

    /// Bare market event of the given kind; callers fill the price fields.
    pub fn market(kind: EventKind, token_id: impl Into<String>) -> Self {
        Self {
            token_id: Some(token_id.into()),
            ..Self::blank(kind)
        }
    }

    pub fn price_change(token_id: impl Into<String>, best_bid: Option<f64>, best_ask: Option<f64>) -> Self {
        Self {
            token_id: Some(token_id.into()),
            best_bid,
            best_ask,
            ..Self::blank(EventKind::PriceChange)
        }
    }

    pub fn last_trade(token_id: impl Into<String>, price: f64, size: Option<f64>) -> Self {
        Self {
            token_id: Some(token_id.into()),
            last_price: Some(price),
            last_size: size,
            ..Self::blank(EventKind::LastTrade)
        }
    }

    pub fn news(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            source: Some(source.into()),
            ..Self::blank(EventKind::News)
        }
    }

    pub fn social(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            source: Some(source.into()),
            ..Self::blank(EventKind::Social)
        }
    }

    /// Market event with a usable (non-empty) token id.
    pub fn is_market_event(&self) -> bool {
        self.kind.is_market()
            && self
                .token_id
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_event_requires_token() {
        let ev = MarketEvent::price_change("tok", Some(0.4), Some(0.5));
        assert!(ev.is_market_event());

        let mut anon = ev.clone();
        anon.token_id = Some(String::new());
        assert!(!anon.is_market_event());
        anon.token_id = None;
        assert!(!anon.is_market_event());
    }

    #[test]
    fn test_news_is_not_market() {
        let ev = MarketEvent::news("headline", "feed");
        assert!(!ev.is_market_event());
        assert!(ev.kind.is_external());
        assert_eq!(ev.content.as_deref(), Some("headline"));
    }
}
