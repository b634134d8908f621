//! Event sniper entry point.
//!
//! Wires the full pipeline from environment configuration: market WS +
//! RSS ingest, threshold/keyword parsers, startup discovery, risk-gated
//! executor, portfolio, SQLite store, and the daily trade journal.
//!
//! Rule formats (semicolon-separated entries):
//!   THRESHOLD_RULES  token,side,comparison,threshold,size[,cooldown_secs]
//!   KEYWORD_RULES    keyword,token,side,size[,cooldown_secs]
//!   RSS_FEEDS        url,url,...
//!   DISCOVERY_TAGS   tag,tag  (enables the startup discovery strategy)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use event_sniper::clob::HttpClobClient;
use event_sniper::config::Settings;
use event_sniper::discovery::{DiscoveryStrategy, GammaClient, MarketCriteria, RuleTemplate};
use event_sniper::executor::{ClobExecutor, ExecutorConfig};
use event_sniper::ingest::{ClobMarketStream, IngestSource, RssPoller};
use event_sniper::journal::TradeLogger;
use event_sniper::orchestrator::Orchestrator;
use event_sniper::parsers::{
    Comparison, KeywordParser, KeywordRule, Parser, ThresholdParser, ThresholdRule,
};
use event_sniper::portfolio::PortfolioManager;
use event_sniper::store::Database;
use event_sniper::subscription::{SubscribeSink, SubscriptionManager};
use event_sniper::types::Side;

// ─────────────────────────────────────────────────────────
// Rule loading
// ─────────────────────────────────────────────────────────

fn parse_threshold_rule(entry: &str, default_cooldown: Duration) -> Option<ThresholdRule> {
    let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
    if parts.len() < 5 {
        return None;
    }
    let comparison = match parts[2].to_ascii_lowercase().as_str() {
        "above" => Comparison::Above,
        "below" => Comparison::Below,
        _ => return None,
    };
    Some(ThresholdRule {
        token_id: parts[0].to_string(),
        trigger_side: Side::parse(parts[1])?,
        comparison,
        threshold: parts[3].parse().ok().filter(|t| (0.0..1.0).contains(t) && *t > 0.0)?,
        size_usdc: parts[4].parse().ok().filter(|s| *s > 0.0)?,
        reason_template: "price {comparison} {threshold} at {current_price}".to_string(),
        cooldown: parts
            .get(5)
            .and_then(|c| c.parse::<f64>().ok())
            .map(Duration::from_secs_f64)
            .unwrap_or(default_cooldown),
    })
}

fn parse_keyword_rule(entry: &str, default_cooldown: Duration) -> Option<KeywordRule> {
    let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
    if parts.len() < 4 {
        return None;
    }
    Some(KeywordRule {
        keyword: parts[0].to_string(),
        token_id: parts[1].to_string(),
        trigger_side: Side::parse(parts[2])?,
        size_usdc: parts[3].parse().ok().filter(|s| *s > 0.0)?,
        reason_template: "keyword '{keyword}' from {source}: {content}".to_string(),
        case_sensitive: false,
        cooldown: parts
            .get(4)
            .and_then(|c| c.parse::<f64>().ok())
            .map(Duration::from_secs_f64)
            .unwrap_or(default_cooldown),
    })
}

fn load_rules<T>(var: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    let raw = match std::env::var(var) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    raw.split(';')
        .filter(|e| !e.trim().is_empty())
        .filter_map(|entry| {
            let parsed = parse(entry);
            if parsed.is_none() {
                warn!("Ignoring malformed {var} entry: {entry}");
            }
            parsed
        })
        .collect()
}

fn load_rss_feeds() -> Vec<String> {
    std::env::var("RSS_FEEDS")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// One dip-buying strategy over the configured tags, if any.
fn load_discovery_strategies() -> Vec<DiscoveryStrategy> {
    let tags: Vec<String> = match std::env::var("DISCOVERY_TAGS") {
        Ok(v) => v
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => return Vec::new(),
    };
    if tags.is_empty() {
        return Vec::new();
    }

    let read_f64 = |var: &str, default: f64| {
        std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
    };

    vec![DiscoveryStrategy {
        name: std::env::var("DISCOVERY_STRATEGY_NAME").unwrap_or_else(|_| "auto-dip".into()),
        criteria: MarketCriteria {
            tags,
            min_volume: Some(read_f64("DISCOVERY_MIN_VOLUME", 10_000.0)),
            min_liquidity: Some(read_f64("DISCOVERY_MIN_LIQUIDITY", 1_000.0)),
            keywords: Vec::new(),
            active_only: true,
        },
        rule_template: RuleTemplate {
            trigger_side: Side::Buy,
            threshold: read_f64("DISCOVERY_THRESHOLD", 0.10),
            comparison: Comparison::Below,
            size_usdc: read_f64("DISCOVERY_SIZE_USDC", 10.0),
            cooldown: Duration::from_secs_f64(read_f64("DISCOVERY_COOLDOWN_SECS", 300.0)),
        },
        max_markets: read_f64("DISCOVERY_MAX_MARKETS", 10.0) as usize,
    }]
}

// ─────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let file_appender = tracing_appender::rolling::daily("logs", "sniper.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    info!("═══════════════════════════════════════════════════");
    info!("  Event Sniper — CLOB event trading engine");
    info!("═══════════════════════════════════════════════════");

    let settings = Settings::from_env();
    info!(
        "📊 Config | dry_run={} max_position={:.0} max_positions={} discovery_limit={}",
        settings.bot.dry_run,
        settings.bot.max_position_size,
        settings.bot.max_positions,
        settings.discovery.global_limit,
    );
    if !settings.bot.dry_run && !settings.clob.has_credentials() {
        anyhow::bail!(
            "live mode requires CLOB_API_KEY / CLOB_API_SECRET / CLOB_API_PASSPHRASE; \
             set BOT_DRY_RUN=true to paper-trade"
        );
    }

    // ── Persistence ──
    let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));
    let store = Database::open(&data_dir.join("trading.db"))?;
    let journal = TradeLogger::new(&data_dir);

    // ── Rules and parsers ──
    let default_cooldown = settings.parser.default_cooldown;
    let threshold_rules = load_rules("THRESHOLD_RULES", |e| parse_threshold_rule(e, default_cooldown));
    let keyword_rules = load_rules("KEYWORD_RULES", |e| parse_keyword_rule(e, default_cooldown));
    info!(
        "📐 Loaded {} threshold rules, {} keyword rules",
        threshold_rules.len(),
        keyword_rules.len(),
    );

    let initial_tokens: Vec<String> =
        threshold_rules.iter().map(|r| r.token_id.clone()).collect();
    let threshold_parser = ThresholdParser::new(threshold_rules);
    let rule_table = threshold_parser.rule_table();
    let keyword_parser = KeywordParser::new(keyword_rules);

    // ── Ingest sources ──
    let market_stream = ClobMarketStream::new(settings.clob.ws_url.clone(), settings.ingest.clone());
    let subscriptions = market_stream.subscription_handle();
    if !initial_tokens.is_empty() {
        subscriptions.subscribe(&initial_tokens)?;
    }

    let mut sources: Vec<Box<dyn IngestSource>> = vec![Box::new(market_stream)];
    let feeds = load_rss_feeds();
    if !feeds.is_empty() {
        info!("📰 Monitoring {} RSS feeds", feeds.len());
        sources.push(Box::new(RssPoller::new(feeds, Duration::from_secs(60))));
    }

    // ── Startup discovery ──
    let strategies = load_discovery_strategies();
    if !strategies.is_empty() {
        let gamma = Arc::new(GammaClient::new(settings.clob.gamma_url.clone()));
        let mut manager = SubscriptionManager::new(
            gamma,
            Arc::new(subscriptions.clone()),
            rule_table.clone(),
            settings.discovery.global_limit,
        );
        let added = manager.execute_strategies(&strategies).await;
        info!("🔍 Startup discovery installed {added} markets");
    }

    // ── Executor and portfolio ──
    let clob = Arc::new(HttpClobClient::new(settings.clob.clone()));
    let mut executor = ClobExecutor::new(
        ExecutorConfig {
            dry_run: settings.bot.dry_run,
            max_position_size: settings.bot.max_position_size,
        },
        clob,
    );

    let mut portfolio = PortfolioManager::new(store.clone(), settings.bot.max_positions);
    portfolio.load_state(&mut executor).await?;

    // ── Orchestrate ──
    let parsers: Vec<Box<dyn Parser>> = vec![Box::new(threshold_parser), Box::new(keyword_parser)];
    let mut orchestrator = Orchestrator::new(
        sources,
        parsers,
        Box::new(executor),
        Some(portfolio),
        Some(store),
        Some(journal),
    );

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Interrupt received — shutting down");
            shutdown.shutdown();
        }
    });

    orchestrator.start().await
}
