//! Keyword parser — news/social substring matching with cooldowns.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;

use crate::events::MarketEvent;
use crate::parsers::Parser;
use crate::types::{Side, TradeSignal};

#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub keyword: String,
    pub token_id: String,
    pub trigger_side: Side,
    pub size_usdc: f64,
    pub reason_template: String,
    pub case_sensitive: bool,
    pub cooldown: Duration,
}

impl KeywordRule {
    fn render_reason(&self, event: &MarketEvent) -> String {
        let content = event.content.as_deref().unwrap_or("");
        let prefix: String = content.chars().take(50).collect();
        self.reason_template
            .replace("{keyword}", &self.keyword)
            .replace("{source}", event.source.as_deref().unwrap_or("unknown"))
            .replace("{content}", &prefix)
    }
}

pub struct KeywordParser {
    rules: Vec<KeywordRule>,
    /// keyword → last trigger, for cooldown enforcement.
    last_trigger: HashMap<String, Instant>,
}

impl KeywordParser {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        info!("🔤 KeywordParser initialized with {} rules", rules.len());
        Self {
            rules,
            last_trigger: HashMap::new(),
        }
    }

    fn matches(rule: &KeywordRule, content: &str) -> bool {
        if rule.case_sensitive {
            content.contains(&rule.keyword)
        } else {
            content.to_lowercase().contains(&rule.keyword.to_lowercase())
        }
    }
}

impl Parser for KeywordParser {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn evaluate(&mut self, event: &MarketEvent) -> Option<TradeSignal> {
        if !event.kind.is_external() {
            return None;
        }
        let content = event.content.as_deref()?;

        // First match in install order wins.
        let hit = self.rules.iter().find(|rule| {
            let cooled = self
                .last_trigger
                .get(&rule.keyword)
                .map(|t| t.elapsed() >= rule.cooldown)
                .unwrap_or(true);
            cooled && Self::matches(rule, content)
        })?;

        self.last_trigger.insert(hit.keyword.clone(), Instant::now());

        info!(
            "🔤 Keyword triggered | keyword='{}' token={}… side={} source={}",
            hit.keyword,
            &hit.token_id[..8.min(hit.token_id.len())],
            hit.trigger_side.as_str(),
            event.source.as_deref().unwrap_or("unknown"),
        );

        Some(TradeSignal::new(
            hit.token_id.clone(),
            hit.trigger_side,
            hit.size_usdc,
            hit.render_reason(event),
        ))
    }

    fn reset(&mut self) {
        self.last_trigger.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keyword: &str, cooldown: Duration) -> KeywordRule {
        KeywordRule {
            keyword: keyword.into(),
            token_id: "U".into(),
            trigger_side: Side::Buy,
            size_usdc: 100.0,
            reason_template: "'{keyword}' seen in {source}: {content}".into(),
            case_sensitive: false,
            cooldown,
        }
    }

    #[test]
    fn test_news_keyword_to_signal() {
        let mut parser = KeywordParser::new(vec![rule("FED HIKE", Duration::ZERO)]);

        let signal = parser
            .evaluate(&MarketEvent::news("Breaking: FED HIKE of 25bp", "wire"))
            .expect("keyword should match");
        assert_eq!(signal.token_id, "U");
        assert_eq!(signal.side, Side::Buy);
        assert!(signal.reason.contains("FED HIKE"));
        assert!(signal.reason.contains("wire"));

        assert!(parser.evaluate(&MarketEvent::news("Weather sunny", "wire")).is_none());
    }

    #[test]
    fn test_case_insensitive_by_default() {
        let mut parser = KeywordParser::new(vec![rule("fed hike", Duration::ZERO)]);
        assert!(parser.evaluate(&MarketEvent::news("FED Hike incoming", "x")).is_some());
    }

    #[test]
    fn test_case_sensitive_requires_exact() {
        let mut r = rule("FED", Duration::ZERO);
        r.case_sensitive = true;
        let mut parser = KeywordParser::new(vec![r]);
        assert!(parser.evaluate(&MarketEvent::news("fed cut", "x")).is_none());
        assert!(parser.evaluate(&MarketEvent::news("FED cut", "x")).is_some());
    }

    #[test]
    fn test_cooldown_suppresses_refire() {
        let mut parser = KeywordParser::new(vec![rule("FED", Duration::from_secs(60))]);
        assert!(parser.evaluate(&MarketEvent::news("FED news", "x")).is_some());
        assert!(parser.evaluate(&MarketEvent::news("FED again", "x")).is_none());
    }

    #[test]
    fn test_cooled_rule_does_not_block_later_rules() {
        let mut hot = rule("FED", Duration::from_secs(60));
        hot.token_id = "A".into();
        let mut other = rule("HIKE", Duration::ZERO);
        other.token_id = "B".into();
        let mut parser = KeywordParser::new(vec![hot, other]);

        assert_eq!(parser.evaluate(&MarketEvent::news("FED", "x")).unwrap().token_id, "A");
        // FED is cooling down; HIKE still matches the same content.
        assert_eq!(
            parser.evaluate(&MarketEvent::news("FED HIKE", "x")).unwrap().token_id,
            "B"
        );
    }

    #[test]
    fn test_reset_clears_cooldowns() {
        let mut parser = KeywordParser::new(vec![rule("FED", Duration::from_secs(600))]);
        assert!(parser.evaluate(&MarketEvent::news("FED", "x")).is_some());
        assert!(parser.evaluate(&MarketEvent::news("FED", "x")).is_none());
        parser.reset();
        assert!(parser.evaluate(&MarketEvent::news("FED", "x")).is_some());
    }

    #[test]
    fn test_market_events_are_ignored() {
        let mut parser = KeywordParser::new(vec![rule("0.5", Duration::ZERO)]);
        assert!(parser.evaluate(&MarketEvent::last_trade("T", 0.5, None)).is_none());
    }

    #[test]
    fn test_social_events_are_evaluated() {
        let mut parser = KeywordParser::new(vec![rule("FED", Duration::ZERO)]);
        assert!(parser.evaluate(&MarketEvent::social("FED post", "feed-x")).is_some());
    }
}
