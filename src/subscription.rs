//! Subscription manager — bridges discovery to the live pipeline.
//!
//! Runs strategies in order, subscribing the market stream and installing
//! a threshold rule for each net-new discovered token, under a shared
//! global cap. Re-entrant: repeated runs add only markets not already
//! subscribed or ruled.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::discovery::{DiscoveryResult, DiscoveryStrategy, MarketDiscovery};
use crate::error::IngestError;
use crate::parsers::{RuleTable, ThresholdRule};

/// Market-data subscription surface the manager drives. Implemented by the
/// CLOB stream's subscription handle and by test fakes.
pub trait SubscribeSink: Send + Sync {
    fn subscribe(&self, token_ids: &[String]) -> Result<(), IngestError>;
    fn is_subscribed(&self, token_id: &str) -> bool;
}

pub struct SubscriptionManager {
    client: Arc<dyn MarketDiscovery>,
    sink: Arc<dyn SubscribeSink>,
    rules: RuleTable,
    global_limit: usize,
    subscribed_count: usize,
}

impl SubscriptionManager {
    pub fn new(
        client: Arc<dyn MarketDiscovery>,
        sink: Arc<dyn SubscribeSink>,
        rules: RuleTable,
        global_limit: usize,
    ) -> Self {
        Self {
            client,
            sink,
            rules,
            global_limit,
            subscribed_count: 0,
        }
    }

    /// Run all strategies. Returns the number of markets added this run.
    pub async fn execute_strategies(&mut self, strategies: &[DiscoveryStrategy]) -> usize {
        let mut total_added = 0;

        for strategy in strategies {
            if self.subscribed_count >= self.global_limit {
                warn!(
                    "🔍 Global limit reached ({}/{}), skipping remaining strategies",
                    self.subscribed_count, self.global_limit,
                );
                break;
            }
            total_added += self.execute_strategy(strategy).await;
        }

        info!(
            "🔍 Discovery complete | added={} total_subscribed={}",
            total_added, self.subscribed_count,
        );
        total_added
    }

    async fn execute_strategy(&mut self, strategy: &DiscoveryStrategy) -> usize {
        let remaining = self.global_limit - self.subscribed_count;
        let limit = strategy.max_markets.min(remaining);
        if limit == 0 {
            return 0;
        }

        info!("🔍 Executing strategy '{}' | limit={}", strategy.name, limit);

        let results = match self.client.discover(&strategy.criteria, Some(limit)).await {
            Ok(r) => r,
            Err(e) => {
                error!("🔍 Discovery failed for strategy '{}': {e}", strategy.name);
                return 0;
            }
        };

        let discovered = results.len();
        let mut added = 0;
        for result in results {
            if self.subscribed_count >= self.global_limit {
                break;
            }
            if self.is_duplicate(&result.token_id) {
                debug!(
                    "🔍 Skipping duplicate token {}… ({})",
                    &result.token_id[..8.min(result.token_id.len())],
                    result.title.chars().take(30).collect::<String>(),
                );
                continue;
            }
            if self.add_market(&result, strategy) {
                added += 1;
                self.subscribed_count += 1;
            }
        }

        info!(
            "🔍 Strategy '{}' complete | added={} discovered={}",
            strategy.name, added, discovered,
        );
        added
    }

    fn is_duplicate(&self, token_id: &str) -> bool {
        self.sink.is_subscribed(token_id) || self.rules.has_token(token_id)
    }

    /// Pair-operation: subscribe first, install the rule only on success.
    /// A subscription that lands without its rule (rule install failing) is
    /// tolerated: the orphaned market data is ignored downstream.
    fn add_market(&mut self, result: &DiscoveryResult, strategy: &DiscoveryStrategy) -> bool {
        if let Err(e) = self.sink.subscribe(std::slice::from_ref(&result.token_id)) {
            error!(
                "🔍 Subscription failed for {}… ({}): {e}",
                &result.token_id[..8.min(result.token_id.len())],
                result.title.chars().take(30).collect::<String>(),
            );
            return false;
        }

        let rule = self.create_rule(result, strategy);
        self.rules.add(rule);

        info!(
            "🔍 Added market | token={}… title='{}' threshold={:.2}",
            &result.token_id[..8.min(result.token_id.len())],
            result.title.chars().take(40).collect::<String>(),
            strategy.rule_template.threshold,
        );
        true
    }

    fn create_rule(&self, result: &DiscoveryResult, strategy: &DiscoveryStrategy) -> ThresholdRule {
        let template = &strategy.rule_template;
        let title: String = result.title.chars().take(50).collect();
        ThresholdRule {
            token_id: result.token_id.clone(),
            trigger_side: template.trigger_side,
            threshold: template.threshold,
            comparison: template.comparison,
            size_usdc: template.size_usdc,
            reason_template: format!("[{}] {} | {{comparison}} {{threshold}}", strategy.name, title),
            cooldown: template.cooldown,
        }
    }
}
