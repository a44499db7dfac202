//! Environment-driven configuration.
//!
//! Every knob has a default so the process comes up with no .env at all;
//! malformed values fall back rather than abort.

use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Settings {
    // Polymarket CLOB (order-book) mode
    pub polymarket_ws_url: String,
    pub polymarket_markets_url: String,
    pub polymarket_markets_params: HashMap<String, String>,
    pub polymarket_top_n: usize,
    pub polymarket_market_ids: Vec<String>,
    pub polymarket_channel: String,
    pub polymarket_subscribe_mode: String,
    // Polymarket stream selection + RTDS mode
    pub polymarket_stream_mode: String,
    pub polymarket_rtds_url: String,
    pub polymarket_rtds_topic: String,
    pub polymarket_rtds_type: String,
    pub polymarket_rtds_event_slugs: Vec<String>,
    pub polymarket_rtds_wildcard: bool,
    pub polymarket_rtds_chunk_size: usize,
    pub polymarket_rtds_subscribe_pause: f64,
    pub polymarket_rtds_subscribe_mode: String,
    // Polymarket events catalog
    pub polymarket_events_url: String,
    pub polymarket_events_limit: usize,
    pub polymarket_events_max_pages: usize,
    pub polymarket_events_params: HashMap<String, String>,
    pub polymarket_event_keywords: Vec<String>,
    pub polymarket_event_exclude_keywords: Vec<String>,
    pub polymarket_event_categories: Vec<String>,
    pub polymarket_event_subcategories: Vec<String>,
    pub polymarket_event_tags: Vec<String>,
    pub polymarket_event_companies: Vec<String>,
    // Polymarket L2 request signing
    pub polymarket_l2_enabled: bool,
    pub polymarket_l2_api_key: String,
    pub polymarket_l2_api_secret: String,
    pub polymarket_l2_passphrase: String,
    pub polymarket_l2_request_path: String,
    // Websocket keepalive / reconnect
    pub polymarket_ping_interval: f64,
    pub polymarket_ping_timeout: f64,
    pub polymarket_reconnect_min: f64,
    pub polymarket_reconnect_max: f64,
    // Kalshi
    pub kalshi_trades_url: String,
    pub kalshi_ws_url: String,
    pub kalshi_ws_path: String,
    pub kalshi_ws_enabled: bool,
    pub kalshi_poll_enabled: bool,
    pub kalshi_ws_channels: Vec<String>,
    pub kalshi_market_tickers: Vec<String>,
    pub kalshi_markets_url: String,
    pub kalshi_markets_limit: usize,
    pub kalshi_markets_max_pages: usize,
    pub kalshi_markets_params: HashMap<String, String>,
    pub kalshi_market_keywords: Vec<String>,
    pub kalshi_market_exclude_keywords: Vec<String>,
    pub kalshi_market_categories: Vec<String>,
    pub kalshi_market_subcategories: Vec<String>,
    pub kalshi_market_tags: Vec<String>,
    pub kalshi_market_companies: Vec<String>,
    pub kalshi_access_key: String,
    pub kalshi_private_key: String,
    pub kalshi_signing_algo: String,
    pub kalshi_poll_seconds: f64,
    pub kalshi_reconnect_min: f64,
    pub kalshi_reconnect_max: f64,
    // HTTP
    pub http_timeout_seconds: f64,
    // Detector thresholds and windows
    pub polymarket_whale_threshold_usd: f64,
    pub polymarket_whale_window_seconds: u64,
    pub kalshi_yes_threshold_usd: f64,
    pub kalshi_yes_window_seconds: u64,
    pub zscore_window_seconds: u64,
    pub zscore_threshold: f64,
    pub zscore_min_samples: usize,
    pub zscore_cooldown_seconds: f64,
    pub sweep_window_ms: u64,
    pub sweep_min_trades: usize,
    pub sweep_cooldown_seconds: f64,
    // Clustering
    pub cluster_match_threshold: f64,
    // Store
    pub trade_db_path: String,
    pub persist_trades: bool,
    pub dash_feed_mode: String,
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_database: String,
    // Feed selection
    pub enable_polymarket: bool,
    pub enable_kalshi: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            polymarket_ws_url: env_str(
                "POLYMARKET_WS_URL",
                "wss://ws-subscriptions-clob.polymarket.com/ws/market",
            ),
            polymarket_markets_url: env_str(
                "POLYMARKET_MARKETS_URL",
                "https://gamma-api.polymarket.com/markets",
            ),
            polymarket_markets_params: parse_query_params(&env_str("POLYMARKET_MARKETS_PARAMS", "")),
            polymarket_top_n: env_usize("POLYMARKET_TOP_N", 50),
            polymarket_market_ids: parse_csv_env(&env_str("POLYMARKET_MARKET_IDS", "")),
            polymarket_channel: env_str("POLYMARKET_WS_CHANNEL", "trades"),
            polymarket_subscribe_mode: env_str("POLYMARKET_SUBSCRIBE_MODE", "bulk"),
            polymarket_stream_mode: env_str("POLYMARKET_STREAM_MODE", "rtds"),
            polymarket_rtds_url: env_str("POLYMARKET_RTDS_URL", "wss://ws-live-data.polymarket.com"),
            polymarket_rtds_topic: env_str("POLYMARKET_RTDS_TOPIC", "activity"),
            polymarket_rtds_type: env_str("POLYMARKET_RTDS_TYPE", "trades"),
            polymarket_rtds_event_slugs: parse_csv_env(&env_str("POLYMARKET_RTDS_EVENT_SLUGS", "")),
            polymarket_rtds_wildcard: env_bool("POLYMARKET_RTDS_WILDCARD", true),
            polymarket_rtds_chunk_size: env_usize("POLYMARKET_RTDS_CHUNK_SIZE", 500),
            polymarket_rtds_subscribe_pause: env_f64("POLYMARKET_RTDS_SUBSCRIBE_PAUSE", 0.01),
            polymarket_rtds_subscribe_mode: env_str("POLYMARKET_RTDS_SUBSCRIBE_MODE", "simple"),
            polymarket_events_url: env_str(
                "POLYMARKET_EVENTS_URL",
                "https://gamma-api.polymarket.com/events",
            ),
            polymarket_events_limit: env_usize("POLYMARKET_EVENTS_LIMIT", 100),
            polymarket_events_max_pages: env_usize("POLYMARKET_EVENTS_MAX_PAGES", 50),
            polymarket_events_params: parse_query_params(&env_str("POLYMARKET_EVENTS_PARAMS", "")),
            polymarket_event_keywords: parse_csv_env(&env_str("POLYMARKET_EVENT_KEYWORDS", "")),
            polymarket_event_exclude_keywords: parse_csv_env(&env_str(
                "POLYMARKET_EVENT_EXCLUDE_KEYWORDS",
                "",
            )),
            polymarket_event_categories: parse_csv_env(&env_str("POLYMARKET_EVENT_CATEGORIES", "")),
            polymarket_event_subcategories: parse_csv_env(&env_str(
                "POLYMARKET_EVENT_SUBCATEGORIES",
                "",
            )),
            polymarket_event_tags: parse_csv_env(&env_str("POLYMARKET_EVENT_TAGS", "")),
            polymarket_event_companies: parse_csv_env(&env_str("POLYMARKET_EVENT_COMPANIES", "")),
            polymarket_l2_enabled: env_bool("POLYMARKET_L2_ENABLED", false),
            polymarket_l2_api_key: env_str("POLYMARKET_API_KEY", ""),
            polymarket_l2_api_secret: env_str("POLYMARKET_API_SECRET", ""),
            polymarket_l2_passphrase: env_str("POLYMARKET_API_PASSPHRASE", ""),
            polymarket_l2_request_path: env_str("POLYMARKET_L2_REQUEST_PATH", "/"),
            polymarket_ping_interval: env_f64("POLYMARKET_PING_INTERVAL", 20.0),
            polymarket_ping_timeout: env_f64("POLYMARKET_PING_TIMEOUT", 20.0),
            polymarket_reconnect_min: env_f64("POLYMARKET_RECONNECT_MIN", 2.0),
            polymarket_reconnect_max: env_f64("POLYMARKET_RECONNECT_MAX", 60.0),
            kalshi_trades_url: env_str(
                "KALSHI_TRADES_URL",
                "https://api.elections.kalshi.com/trade-api/v2/markets/trades",
            ),
            kalshi_ws_url: env_str("KALSHI_WS_URL", "wss://api.elections.kalshi.com/trade-api/ws/v2"),
            kalshi_ws_path: env_str("KALSHI_WS_PATH", "/trade-api/ws/v2"),
            kalshi_ws_enabled: env_bool("KALSHI_WS_ENABLED", true),
            kalshi_poll_enabled: env_bool("KALSHI_POLL_ENABLED", false),
            kalshi_ws_channels: parse_csv_env(&env_str("KALSHI_WS_CHANNELS", "trade")),
            kalshi_market_tickers: parse_csv_env(&env_str("KALSHI_MARKET_TICKERS", "")),
            kalshi_markets_url: env_str(
                "KALSHI_MARKETS_URL",
                "https://api.elections.kalshi.com/trade-api/v2/markets",
            ),
            kalshi_markets_limit: env_usize("KALSHI_MARKETS_LIMIT", 200),
            kalshi_markets_max_pages: env_usize("KALSHI_MARKETS_MAX_PAGES", 50),
            kalshi_markets_params: parse_query_params(&env_str("KALSHI_MARKETS_PARAMS", "")),
            kalshi_market_keywords: parse_csv_env(&env_str("KALSHI_MARKET_KEYWORDS", "")),
            kalshi_market_exclude_keywords: parse_csv_env(&env_str(
                "KALSHI_MARKET_EXCLUDE_KEYWORDS",
                "",
            )),
            kalshi_market_categories: parse_csv_env(&env_str("KALSHI_MARKET_CATEGORIES", "")),
            kalshi_market_subcategories: parse_csv_env(&env_str("KALSHI_MARKET_SUBCATEGORIES", "")),
            kalshi_market_tags: parse_csv_env(&env_str("KALSHI_MARKET_TAGS", "")),
            kalshi_market_companies: parse_csv_env(&env_str("KALSHI_MARKET_COMPANIES", "")),
            kalshi_access_key: env_str("KALSHI_ACCESS_KEY", ""),
            kalshi_private_key: env_str("KALSHI_PRIVATE_KEY", ""),
            kalshi_signing_algo: env_str("KALSHI_SIGNING_ALGO", "ed25519"),
            kalshi_poll_seconds: env_f64("KALSHI_POLL_SECONDS", 2.0),
            kalshi_reconnect_min: env_f64("KALSHI_RECONNECT_MIN", 2.0),
            kalshi_reconnect_max: env_f64("KALSHI_RECONNECT_MAX", 60.0),
            http_timeout_seconds: env_f64("HTTP_TIMEOUT_SECONDS", 15.0),
            polymarket_whale_threshold_usd: env_f64("POLYMARKET_WHALE_THRESHOLD_USD", 10_000.0),
            polymarket_whale_window_seconds: env_u64("POLYMARKET_WHALE_WINDOW_SECONDS", 21_600),
            kalshi_yes_threshold_usd: env_f64("KALSHI_YES_THRESHOLD_USD", 50_000.0),
            kalshi_yes_window_seconds: env_u64("KALSHI_YES_WINDOW_SECONDS", 3_600),
            zscore_window_seconds: env_u64("ZSCORE_WINDOW_SECONDS", 3_600),
            zscore_threshold: env_f64("ZSCORE_THRESHOLD", 3.0),
            zscore_min_samples: env_usize("ZSCORE_MIN_SAMPLES", 30),
            zscore_cooldown_seconds: env_f64("ZSCORE_COOLDOWN_SECONDS", 30.0),
            sweep_window_ms: env_u64("SWEEP_WINDOW_MS", 50),
            sweep_min_trades: env_usize("SWEEP_MIN_TRADES", 5),
            sweep_cooldown_seconds: env_f64("SWEEP_COOLDOWN_SECONDS", 1.0),
            cluster_match_threshold: env_f64("CLUSTER_MATCH_THRESHOLD", 87.0),
            trade_db_path: env_str("TRADE_DB_PATH", "data/trades.db"),
            persist_trades: env_bool("PERSIST_TRADES", true),
            dash_feed_mode: env_str("DASH_FEED_MODE", "db"),
            postgres_host: env_str("POSTGRES_HOST", "localhost"),
            postgres_port: env_str("POSTGRES_PORT", "5432").parse().unwrap_or(5432),
            postgres_user: env_str("POSTGRES_USER", "whale"),
            postgres_password: env_str("POSTGRES_PASSWORD", "hunter"),
            postgres_database: env_str("POSTGRES_DATABASE", "trades"),
            enable_polymarket: env_bool("ENABLE_POLYMARKET", true),
            enable_kalshi: env_bool("ENABLE_KALSHI", true),
        }
    }
}

/// Load .env from the working directory and, as a fallback, from the crate
/// root (common when running with --manifest-path from elsewhere).
pub fn load_env() {
    let _ = dotenv::dotenv();
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => parse_bool_env(&v),
        Err(_) => default,
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

pub fn parse_csv_env(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

pub fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Extra query parameters, given either as a JSON object or as
/// `key=value&key2=value2`.
pub fn parse_query_params(value: &str) -> HashMap<String, String> {
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return HashMap::new();
    }
    if cleaned.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(cleaned) {
            return map
                .into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect();
        }
        return HashMap::new();
    }
    cleaned
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
