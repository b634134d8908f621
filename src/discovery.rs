//! Market discovery over the external catalog HTTP API.
//!
//! Tag and active filters are applied server-side; volume, liquidity, and
//! keyword filters run client-side because server support is partial.
//! Responses come in two shapes: a bare array (no pagination) or an
//! envelope `{data, next_cursor}` that pages while the cursor is non-empty.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DiscoveryError;
use crate::types::Side;
use crate::util::{now_ts, safe_f64};

// ─────────────────────────────────────────────────────────
// Criteria / results / strategies
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MarketCriteria {
    /// Tag slugs, e.g. "crypto", "politics". Sent server-side.
    pub tags: Vec<String>,
    pub min_volume: Option<f64>,
    pub min_liquidity: Option<f64>,
    /// Title keyword whitelist, case-insensitive.
    pub keywords: Vec<String>,
    pub active_only: bool,
}

impl MarketCriteria {
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.tags.is_empty() {
            params.push(("tag_slug".into(), self.tags.join(",")));
        }
        if self.active_only {
            params.push(("active".into(), "true".into()));
        }
        params
    }

    fn matches(&self, result: &DiscoveryResult) -> bool {
        if let Some(min) = self.min_volume {
            if result.volume < min {
                return false;
            }
        }
        if let Some(min) = self.min_liquidity {
            if result.liquidity < min {
                return false;
            }
        }
        if !self.keywords.is_empty() {
            let title = result.title.to_lowercase();
            if !self.keywords.iter().any(|kw| title.contains(&kw.to_lowercase())) {
                return false;
            }
        }
        true
    }
}

/// Normalized market from the catalog. `market_id` and `token_id` are
/// always non-empty; markets missing either are dropped at parse time.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub market_id: String,
    /// First CLOB token id — the YES outcome.
    pub token_id: String,
    pub title: String,
    pub volume: f64,
    pub liquidity: f64,
    pub end_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub discovered_at: f64,
}

/// Threshold recipe without a token; the token comes from discovery.
#[derive(Debug, Clone)]
pub struct RuleTemplate {
    pub trigger_side: Side,
    pub threshold: f64,
    pub comparison: crate::parsers::Comparison,
    pub size_usdc: f64,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct DiscoveryStrategy {
    pub name: String,
    pub criteria: MarketCriteria,
    pub rule_template: RuleTemplate,
    pub max_markets: usize,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[async_trait]
pub trait MarketDiscovery: Send + Sync {
    async fn discover(
        &self,
        criteria: &MarketCriteria,
        limit: Option<usize>,
    ) -> Result<Vec<DiscoveryResult>, DiscoveryError>;
}

pub struct GammaClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    /// 100ms spacing between outgoing requests.
    min_request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl GammaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            min_request_interval: Duration::from_millis(100),
            last_request: Mutex::new(None),
        }
    }

    async fn throttle(&self) {
        let wait = {
            let last = self.last_request.lock();
            last.map(|t| self.min_request_interval.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        *self.last_request.lock() = Some(Instant::now());
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let delay = self.initial_backoff.as_secs_f64() * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    /// GET with retry: 429 honors Retry-After (else backoff), 5xx and
    /// transport errors back off, other 4xx fail immediately.
    async fn request_with_retry(
        &self,
        params: &[(String, String)],
    ) -> Result<Value, DiscoveryError> {
        let url = format!("{}/events", self.base_url);
        let mut last_err = DiscoveryError::Transport("no attempts made".into());

        for attempt in 0..self.max_retries {
            self.throttle().await;

            let resp = match self.http.get(&url).query(params).send().await {
                Ok(r) => r,
                Err(e) => {
                    let backoff = self.backoff_for(attempt);
                    warn!("🔍 Discovery transport error: {e} — retry in {:.1}s", backoff.as_secs_f64());
                    last_err = DiscoveryError::Transport(e.to_string());
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = resp.status();
            if status.is_success() {
                return resp
                    .json::<Value>()
                    .await
                    .map_err(|e| DiscoveryError::Transport(e.to_string()));
            }

            if status.as_u16() == 429 {
                let retry_after = resp
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or_else(|| self.backoff_for(attempt).as_secs_f64());
                warn!("🔍 Discovery rate limited — retry in {retry_after:.1}s");
                last_err = DiscoveryError::RateLimit { retry_after };
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
            } else if status.is_server_error() {
                let backoff = self.backoff_for(attempt);
                warn!("🔍 Discovery server error {status} — retry in {:.1}s", backoff.as_secs_f64());
                last_err = DiscoveryError::Server { status: status.as_u16() };
                tokio::time::sleep(backoff).await;
            } else {
                let message = resp.text().await.unwrap_or_default();
                let mut short: String = message.chars().take(200).collect();
                if short.is_empty() {
                    short = "no body".into();
                }
                return Err(DiscoveryError::Api {
                    status: status.as_u16(),
                    message: short,
                });
            }
        }

        Err(last_err)
    }
}

/// Split a response body into its event objects and pagination cursor.
/// Bare arrays have no next page.
fn split_page(body: &Value) -> (Vec<Value>, Option<String>) {
    if let Some(events) = body.as_array() {
        return (events.clone(), None);
    }
    let events = body
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let cursor = body
        .get("next_cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    (events, cursor)
}

/// One catalog event → zero or more results (one per market carrying a
/// non-empty id and at least one CLOB token).
fn parse_event(event: &Value) -> Vec<DiscoveryResult> {
    let title = event.get("title").and_then(Value::as_str).unwrap_or("").to_string();
    let tags: Vec<String> = event
        .get("tags")
        .and_then(Value::as_array)
        .map(|ts| {
            ts.iter()
                .filter_map(|t| t.get("slug").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let end_date = event
        .get("endDate")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    let markets = match event.get("markets").and_then(Value::as_array) {
        Some(m) => m,
        None => return Vec::new(),
    };

    markets
        .iter()
        .filter_map(|market| {
            let market_id = market.get("id").and_then(Value::as_str).unwrap_or("");
            if market_id.is_empty() {
                debug!("🔍 Skipping market without id");
                return None;
            }
            // clobTokenIds arrives either as an array or as a JSON-encoded
            // string of one. First element is the YES outcome.
            let token_id = market
                .get("clobTokenIds")
                .and_then(|v| match v {
                    Value::Array(a) => a.first().and_then(Value::as_str).map(str::to_string),
                    Value::String(s) => serde_json::from_str::<Vec<String>>(s)
                        .ok()
                        .and_then(|ids| ids.into_iter().next()),
                    _ => None,
                })
                .filter(|t| !t.is_empty())?;

            Some(DiscoveryResult {
                market_id: market_id.to_string(),
                token_id,
                title: title.clone(),
                volume: market.get("volume").and_then(safe_f64).unwrap_or(0.0),
                liquidity: market.get("liquidity").and_then(safe_f64).unwrap_or(0.0),
                end_date,
                tags: tags.clone(),
                discovered_at: now_ts(),
            })
        })
        .collect()
}

#[async_trait]
impl MarketDiscovery for GammaClient {
    async fn discover(
        &self,
        criteria: &MarketCriteria,
        limit: Option<usize>,
    ) -> Result<Vec<DiscoveryResult>, DiscoveryError> {
        let base_params = criteria.to_query_params();
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = base_params.clone();
            if let Some(c) = &cursor {
                params.push(("cursor".into(), c.clone()));
            }

            let body = self.request_with_retry(&params).await?;
            let (events, next_cursor) = split_page(&body);

            for event in &events {
                for result in parse_event(event) {
                    if !criteria.matches(&result) {
                        continue;
                    }
                    results.push(result);
                    if let Some(max) = limit {
                        if results.len() >= max {
                            return Ok(results);
                        }
                    }
                }
            }

            match next_cursor {
                Some(c) => {
                    debug!("🔍 Next discovery page, cursor={c}");
                    cursor = Some(c);
                }
                None => break,
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog_event() -> Value {
        json!({
            "id": "ev1",
            "title": "Will BTC reach $100k?",
            "endDate": "2026-12-31T00:00:00Z",
            "tags": [{"slug": "crypto"}, {"slug": "bitcoin"}],
            "markets": [
                {"id": "m1", "clobTokenIds": ["yes-1", "no-1"], "volume": "150000", "liquidity": "9000"},
                {"id": "m2", "clobTokenIds": "[\"yes-2\", \"no-2\"]", "volume": "500", "liquidity": "10"},
                {"id": "", "clobTokenIds": ["orphan"]},
                {"id": "m4", "clobTokenIds": []}
            ]
        })
    }

    #[test]
    fn test_parse_event_adopts_first_token_and_drops_invalid() {
        let results = parse_event(&catalog_event());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].token_id, "yes-1");
        assert_eq!(results[1].token_id, "yes-2");
        assert!((results[0].volume - 150000.0).abs() < 1e-9);
        assert_eq!(results[0].tags, vec!["crypto", "bitcoin"]);
        assert!(results[0].end_date.is_some());
    }

    #[test]
    fn test_parse_event_tolerates_garbage_numbers() {
        let mut ev = catalog_event();
        ev["markets"][0]["volume"] = json!("not-a-number");
        let results = parse_event(&ev);
        assert_eq!(results[0].volume, 0.0);
    }

    #[test]
    fn test_split_page_bare_array_has_no_cursor() {
        let (events, cursor) = split_page(&json!([{"id": "a"}, {"id": "b"}]));
        assert_eq!(events.len(), 2);
        assert!(cursor.is_none());
    }

    #[test]
    fn test_split_page_envelope_carries_cursor() {
        let (events, cursor) = split_page(&json!({"data": [{"id": "a"}], "next_cursor": "abc"}));
        assert_eq!(events.len(), 1);
        assert_eq!(cursor.as_deref(), Some("abc"));

        let (_, done) = split_page(&json!({"data": [], "next_cursor": ""}));
        assert!(done.is_none());
    }

    #[test]
    fn test_criteria_filters_client_side() {
        let results = parse_event(&catalog_event());
        let criteria = MarketCriteria {
            min_volume: Some(1000.0),
            ..Default::default()
        };
        assert!(criteria.matches(&results[0]));
        assert!(!criteria.matches(&results[1]));

        let kw = MarketCriteria {
            keywords: vec!["btc".into()],
            ..Default::default()
        };
        assert!(kw.matches(&results[0]));

        let miss = MarketCriteria {
            keywords: vec!["election".into()],
            ..Default::default()
        };
        assert!(!miss.matches(&results[0]));
    }

    #[test]
    fn test_query_params_server_side_only() {
        let criteria = MarketCriteria {
            tags: vec!["crypto".into(), "politics".into()],
            active_only: true,
            min_volume: Some(100.0),
            ..Default::default()
        };
        let params = criteria.to_query_params();
        assert!(params.contains(&("tag_slug".into(), "crypto,politics".into())));
        assert!(params.contains(&("active".into(), "true".into())));
        // volume stays client-side
        assert_eq!(params.len(), 2);
    }
}
