//! Venue CLOB adapter.
//!
//! The executor only sees the `ClobApi` trait: order book fetch, FOK
//! submission, balance query. Responses stay as `serde_json::Value` so the
//! executor's normalizer owns all tolerant-parsing decisions. The HTTP
//! implementation signs requests with L2 API headers when credentials are
//! configured.

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;

use crate::config::ClobConfig;
use crate::types::Side;
use crate::util::{f64_field, now_ts, safe_f64};

// ─────────────────────────────────────────────────────────
// Book snapshot
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl BookSnapshot {
    /// Highest bid. Does not assume the vendor array is sorted.
    pub fn best_bid(&self) -> Option<f64> {
        self.bids
            .iter()
            .map(|l| l.price)
            .filter(|p| *p > 0.0)
            .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
    }

    /// Lowest ask. Does not assume the vendor array is sorted.
    pub fn best_ask(&self) -> Option<f64> {
        self.asks
            .iter()
            .map(|l| l.price)
            .filter(|p| *p > 0.0)
            .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
    }

    /// Decode a vendor book payload. Accepts `bids`/`asks` and the
    /// `buys`/`sells` aliases some channels use.
    pub fn from_value(v: &Value) -> BookSnapshot {
        let parse_side = |keys: [&str; 2]| -> Vec<BookLevel> {
            keys.iter()
                .find_map(|k| v.get(*k).and_then(Value::as_array))
                .map(|levels| {
                    levels
                        .iter()
                        .filter_map(|lvl| {
                            let price = lvl.get("price").and_then(safe_f64)?;
                            let size = f64_field(lvl, "size").unwrap_or(0.0);
                            Some(BookLevel { price, size })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        BookSnapshot {
            bids: parse_side(["bids", "buys"]),
            asks: parse_side(["asks", "sells"]),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Submission request
// ─────────────────────────────────────────────────────────

/// Fill-or-kill order as the venue wants it.
#[derive(Debug, Clone, Serialize)]
pub struct FokOrder {
    #[serde(rename = "tokenID")]
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub nonce: u64,
    #[serde(rename = "orderType")]
    pub order_type: &'static str,
}

impl FokOrder {
    pub fn new(token_id: impl Into<String>, side: Side, price: f64, size: f64, nonce: u64) -> Self {
        Self {
            token_id: token_id.into(),
            side,
            price,
            size,
            nonce,
            order_type: "FOK",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Adapter trait
// ─────────────────────────────────────────────────────────

#[async_trait]
pub trait ClobApi: Send + Sync {
    async fn get_order_book(&self, token_id: &str) -> anyhow::Result<BookSnapshot>;
    /// Submit and return the raw response body; the executor normalizes it.
    async fn submit_fok_order(&self, order: &FokOrder) -> anyhow::Result<Value>;
    async fn get_balance_allowance(&self) -> anyhow::Result<Value>;
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct HttpClobClient {
    http: reqwest::Client,
    cfg: ClobConfig,
}

impl HttpClobClient {
    pub fn new(cfg: ClobConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    /// L2 header signature: HMAC-SHA256 over `timestamp + method + path + body`
    /// with the base64-decoded API secret, base64url-encoded.
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Option<String> {
        let secret = base64::engine::general_purpose::URL_SAFE
            .decode(&self.cfg.api_secret)
            .ok()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&secret).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Some(base64::engine::general_purpose::URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(
        &self,
        req: reqwest::RequestBuilder,
        method: &str,
        path: &str,
        body: &str,
    ) -> reqwest::RequestBuilder {
        if !self.cfg.has_credentials() {
            return req;
        }
        let ts = format!("{}", now_ts() as u64);
        let sig = self.sign(&ts, method, path, body).unwrap_or_default();
        req.header("POLY-API-KEY", &self.cfg.api_key)
            .header("POLY-PASSPHRASE", &self.cfg.api_passphrase)
            .header("POLY-TIMESTAMP", ts)
            .header("POLY-SIGNATURE", sig)
    }
}

#[async_trait]
impl ClobApi for HttpClobClient {
    async fn get_order_book(&self, token_id: &str) -> anyhow::Result<BookSnapshot> {
        let url = format!("{}/book?token_id={}", self.cfg.rest_url, token_id);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("book request failed: {}", resp.status());
        }
        let body: Value = resp.json().await?;
        Ok(BookSnapshot::from_value(&body))
    }

    async fn submit_fok_order(&self, order: &FokOrder) -> anyhow::Result<Value> {
        let path = "/order";
        let body = serde_json::to_string(order)?;
        let req = self
            .http
            .post(format!("{}{}", self.cfg.rest_url, path))
            .header("content-type", "application/json")
            .body(body.clone());
        let resp = self.auth_headers(req, "POST", path, &body).send().await?;
        let status = resp.status();
        let value: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            anyhow::bail!("order submission failed: {} {}", status, value);
        }
        Ok(value)
    }

    async fn get_balance_allowance(&self) -> anyhow::Result<Value> {
        let path = "/balance-allowance";
        let req = self.http.get(format!("{}{}", self.cfg.rest_url, path));
        let resp = self.auth_headers(req, "GET", path, "").send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("balance request failed: {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_book_from_value_bids_asks() {
        let v = json!({
            "bids": [{"price": "0.40", "size": "100"}, {"price": 0.42, "size": 50}],
            "asks": [{"price": "0.47", "size": "20"}, {"price": "0.45", "size": "10"}]
        });
        let book = BookSnapshot::from_value(&v);
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.best_bid(), Some(0.42));
        assert_eq!(book.best_ask(), Some(0.45));
    }

    #[test]
    fn test_book_from_value_buys_sells_alias() {
        let v = json!({
            "buys": [{"price": "0.30"}],
            "sells": [{"price": "0.35"}]
        });
        let book = BookSnapshot::from_value(&v);
        assert_eq!(book.best_bid(), Some(0.30));
        assert_eq!(book.best_ask(), Some(0.35));
    }

    #[test]
    fn test_book_empty_sides() {
        let book = BookSnapshot::from_value(&json!({}));
        assert!(book.best_bid().is_none());
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn test_fok_order_serializes_vendor_names() {
        let order = FokOrder::new("tok", Side::Buy, 0.51, 196.0, 1234);
        let v = serde_json::to_value(&order).unwrap();
        assert_eq!(v["tokenID"], "tok");
        assert_eq!(v["side"], "BUY");
        assert_eq!(v["orderType"], "FOK");
    }
}
