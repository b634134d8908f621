//! Runtime configuration.
//!
//! Built once at startup from the environment (plus `.env` via dotenv in
//! main) and passed into the pipeline by value. Nothing here is read
//! lazily after startup.

use std::time::Duration;

// ─────────────────────────────────────────────────────────
// Bot
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Short-circuit the executor: no network I/O, synthetic fills.
    pub dry_run: bool,
    /// Hard cap per order, USDC. Applies in dry-run too.
    pub max_position_size: f64,
    /// Maximum concurrent positions in the portfolio.
    pub max_positions: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            max_position_size: 1000.0,
            max_positions: 10,
        }
    }
}

impl BotConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("BOT_DRY_RUN") {
            c.dry_run = v != "0" && v.to_lowercase() != "false";
        }
        if let Ok(v) = std::env::var("BOT_MAX_POSITION_SIZE") {
            if let Ok(f) = v.parse() {
                c.max_position_size = f;
            }
        }
        if let Ok(v) = std::env::var("BOT_MAX_POSITIONS") {
            if let Ok(n) = v.parse() {
                c.max_positions = n;
            }
        }
        c
    }
}

// ─────────────────────────────────────────────────────────
// Ingest
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Reconnect cap per source before the source fails terminally.
    pub reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Socket keepalive ping interval.
    pub heartbeat_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("INGEST_RECONNECT_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                c.reconnect_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("INGEST_INITIAL_BACKOFF_SECS") {
            if let Ok(f) = v.parse::<f64>() {
                c.initial_backoff = Duration::from_secs_f64(f);
            }
        }
        if let Ok(v) = std::env::var("INGEST_MAX_BACKOFF_SECS") {
            if let Ok(f) = v.parse::<f64>() {
                c.max_backoff = Duration::from_secs_f64(f);
            }
        }
        if let Ok(v) = std::env::var("INGEST_HEARTBEAT_SECS") {
            if let Ok(f) = v.parse::<f64>() {
                c.heartbeat_interval = Duration::from_secs_f64(f);
            }
        }
        c
    }

    /// Exponential backoff for `attempt` (0-based), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64();
        let delay = base * 2f64.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

// ─────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Fallback cooldown for rules that don't set one.
    pub default_cooldown: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_cooldown: Duration::from_secs(60),
        }
    }
}

impl ParserConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("PARSER_DEFAULT_COOLDOWN_SECS") {
            if let Ok(f) = v.parse::<f64>() {
                c.default_cooldown = Duration::from_secs_f64(f);
            }
        }
        c
    }
}

// ─────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Total auto-subscriptions across all strategies.
    pub global_limit: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { global_limit: 50 }
    }
}

impl DiscoveryConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("DISCOVERY_GLOBAL_LIMIT") {
            if let Ok(n) = v.parse() {
                c.global_limit = n;
            }
        }
        c
    }
}

// ─────────────────────────────────────────────────────────
// CLOB endpoints / credentials
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClobConfig {
    pub rest_url: String,
    pub ws_url: String,
    pub gamma_url: String,
    /// L2 API credentials. Empty in dry-run.
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://clob.polymarket.com".into(),
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".into(),
            gamma_url: "https://gamma-api.polymarket.com".into(),
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
        }
    }
}

impl ClobConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("CLOB_REST_URL") {
            c.rest_url = v;
        }
        if let Ok(v) = std::env::var("CLOB_WS_URL") {
            c.ws_url = v;
        }
        if let Ok(v) = std::env::var("CLOB_GAMMA_URL") {
            c.gamma_url = v;
        }
        if let Ok(v) = std::env::var("CLOB_API_KEY") {
            c.api_key = v;
        }
        if let Ok(v) = std::env::var("CLOB_API_SECRET") {
            c.api_secret = v;
        }
        if let Ok(v) = std::env::var("CLOB_API_PASSPHRASE") {
            c.api_passphrase = v;
        }
        c
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

// ─────────────────────────────────────────────────────────
// Root settings
// ─────────────────────────────────────────────────────────

/// Root settings aggregating all sections. Frozen after startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub bot: BotConfig,
    pub ingest: IngestConfig,
    pub parser: ParserConfig,
    pub discovery: DiscoveryConfig,
    pub clob: ClobConfig,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            bot: BotConfig::from_env(),
            ingest: IngestConfig::from_env(),
            parser: ParserConfig::from_env(),
            discovery: DiscoveryConfig::from_env(),
            clob: ClobConfig::from_env(),
        }
    }
}
