//! Price-threshold parser — edge-triggered crossing detection.
//!
//! A rule fires only on the transition across its threshold, never on
//! levels: for `below`, the previous observation must be at or above the
//! threshold and the current strictly under it (symmetric for `above`).
//! The first observation for a token has no previous price and fires on a
//! bare compare. Cooldown suppression still consumes the crossing — the
//! price memory advances regardless, so the next tick can't re-trigger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::events::MarketEvent;
use crate::parsers::Parser;
use crate::types::{Side, TradeSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Above,
    Below,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Above => "above",
            Comparison::Below => "below",
        }
    }
}

/// Immutable threshold rule. Installed at startup, by discovery, or by
/// operator command; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub token_id: String,
    pub trigger_side: Side,
    /// Probability threshold in (0, 1).
    pub threshold: f64,
    pub comparison: Comparison,
    pub size_usdc: f64,
    pub reason_template: String,
    pub cooldown: Duration,
}

impl ThresholdRule {
    fn render_reason(&self, current_price: f64) -> String {
        self.reason_template
            .replace("{comparison}", self.comparison.as_str())
            .replace("{threshold}", &self.threshold.to_string())
            .replace("{current_price}", &format!("{current_price:.4}"))
            .replace("{token_id}", &self.token_id)
            .replace("{token}", &self.token_id)
    }
}

// ─────────────────────────────────────────────────────────
// Shared rule table
// ─────────────────────────────────────────────────────────

/// Rules indexed by token, shared between the parser and the discovery
/// manager. This is the only parser state with two writers; price memory
/// and cooldowns stay owned by the parser.
#[derive(Clone, Default)]
pub struct RuleTable {
    inner: Arc<Mutex<HashMap<String, Vec<ThresholdRule>>>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a rule. Takes effect from the next evaluation.
    pub fn add(&self, rule: ThresholdRule) {
        info!(
            "📐 Rule installed | token={}… {} {:.4} side={} size={:.2}",
            &rule.token_id[..8.min(rule.token_id.len())],
            rule.comparison.as_str(),
            rule.threshold,
            rule.trigger_side.as_str(),
            rule.size_usdc,
        );
        self.inner.lock().entry(rule.token_id.clone()).or_default().push(rule);
    }

    pub fn has_token(&self, token_id: &str) -> bool {
        self.inner.lock().contains_key(token_id)
    }

    pub fn rule_count(&self) -> usize {
        self.inner.lock().values().map(Vec::len).sum()
    }

    fn rules_for(&self, token_id: &str) -> Vec<ThresholdRule> {
        self.inner.lock().get(token_id).cloned().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────

pub struct ThresholdParser {
    rules: RuleTable,
    /// (token, threshold-bits) → last trigger, for cooldown enforcement.
    last_trigger: HashMap<(String, u64), Instant>,
    /// token → last extracted price, for crossing detection.
    last_price: HashMap<String, f64>,
}

impl ThresholdParser {
    pub fn new(initial_rules: Vec<ThresholdRule>) -> Self {
        let rules = RuleTable::new();
        for rule in initial_rules {
            rules.add(rule);
        }
        Self {
            rules,
            last_trigger: HashMap::new(),
            last_price: HashMap::new(),
        }
    }

    /// Handle for runtime rule installation (discovery manager).
    pub fn rule_table(&self) -> RuleTable {
        self.rules.clone()
    }

    /// Price extraction precedence: mid if both sides present, then last
    /// trade, then ask, then bid.
    fn extract_price(event: &MarketEvent) -> Option<f64> {
        match (event.best_bid, event.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => event
                .last_price
                .or(event.best_ask)
                .or(event.best_bid),
        }
    }

    fn crossed(rule: &ThresholdRule, current: f64, prev: Option<f64>) -> bool {
        match (rule.comparison, prev) {
            // Was at/below, now strictly above.
            (Comparison::Above, Some(p)) => p <= rule.threshold && current > rule.threshold,
            (Comparison::Above, None) => current > rule.threshold,
            // Was at/above, now strictly below.
            (Comparison::Below, Some(p)) => p >= rule.threshold && current < rule.threshold,
            (Comparison::Below, None) => current < rule.threshold,
        }
    }

    fn evaluate_rule(&mut self, rule: &ThresholdRule, current: f64, prev: Option<f64>) -> Option<TradeSignal> {
        let key = (rule.token_id.clone(), rule.threshold.to_bits());
        if let Some(last) = self.last_trigger.get(&key) {
            if last.elapsed() < rule.cooldown {
                return None;
            }
        }

        if !Self::crossed(rule, current, prev) {
            return None;
        }

        self.last_trigger.insert(key, Instant::now());

        info!(
            "🎯 Threshold triggered | token={}… price={:.4} threshold={:.4} side={}",
            &rule.token_id[..8.min(rule.token_id.len())],
            current,
            rule.threshold,
            rule.trigger_side.as_str(),
        );

        Some(TradeSignal::new(
            rule.token_id.clone(),
            rule.trigger_side,
            rule.size_usdc,
            rule.render_reason(current),
        ))
    }
}

impl Parser for ThresholdParser {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn evaluate(&mut self, event: &MarketEvent) -> Option<TradeSignal> {
        if !event.is_market_event() {
            return None;
        }
        let token_id = event.token_id.as_deref()?;

        let rules = self.rules.rules_for(token_id);
        if rules.is_empty() {
            return None;
        }

        let current = Self::extract_price(event)?;
        let prev = self.last_price.get(token_id).copied();

        // Advance the memory before rule evaluation so a suppressed
        // crossing is consumed, not replayed on the next tick.
        self.last_price.insert(token_id.to_string(), current);

        rules
            .iter()
            .find_map(|rule| self.evaluate_rule(rule, current, prev))
    }

    fn reset(&mut self) {
        self.last_trigger.clear();
        self.last_price.clear();
    }
}
