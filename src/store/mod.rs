//! Trade persistence and the query surface the dashboard consumes.
//!
//! Three interchangeable backends: a bounded in-memory ring, an embedded
//! SQLite file, and a Postgres server. All three answer the same queries
//! with the same semantics; the coordinator picks one at startup from
//! `DASH_FEED_MODE`.

pub mod memory;
pub mod postgres;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Settings;
use crate::models::Trade;

pub use memory::InMemoryTradeStore;
pub use postgres::PostgresTradeStore;
pub use sqlite::SqliteTradeStore;

/// Trades below this notional never reach a store.
pub const MIN_TRADE_SIZE_USD: f64 = 100.0;

/// Default lookback for windowed stats queries when `since_ts` is omitted.
pub const DEFAULT_LOOKBACK_SECONDS: f64 = 86_400.0;

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Distinct non-empty actors over the last 24h.
    pub wallets: u64,
    /// Trades over the last 24h.
    pub trades: u64,
    /// Trades over the last 60s, rendered as "<count>/min".
    pub flow: String,
    /// Timestamp of the most recent row, if any.
    pub last: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub address: String,
    pub volume: f64,
    /// "YES" when yes-side volume >= no-side, "NO" otherwise, "N/A" when
    /// the wallet has no sided volume at all.
    pub position: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletSummary {
    pub trades: u64,
    pub volume: f64,
    pub yes_volume: f64,
    pub no_volume: f64,
    pub last_ts: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletOverview {
    pub address: String,
    pub volume: f64,
    pub trades: u64,
    pub last_ts: f64,
    /// Category with the largest cumulative volume; "Mixed" when unknown.
    pub top_category: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryStats {
    pub volume: f64,
    pub trades: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WalletAnalytics {
    pub categories: BTreeMap<String, CategoryStats>,
    pub diversity_score: usize,
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Insert one trade. Rejects notionals under [`MIN_TRADE_SIZE_USD`];
    /// duplicate `(platform, trade_id)` pairs are silently ignored.
    async fn add_trade(&self, trade: &Trade) -> Result<()>;

    /// Newest-first trades passing all provided filters. `since_ts: None`
    /// means no cutoff.
    async fn recent_trades(
        &self,
        min_size_usd: f64,
        limit: usize,
        since_ts: Option<f64>,
        platforms: Option<&[String]>,
        wallet: Option<&str>,
    ) -> Result<Vec<Trade>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn leaderboard(&self, limit: usize, since_ts: Option<f64>)
        -> Result<Vec<LeaderboardRow>>;

    async fn wallet_summary(
        &self,
        wallet: &str,
        since_ts: Option<f64>,
    ) -> Result<Option<WalletSummary>>;

    async fn all_wallets(&self, limit: usize, since_ts: Option<f64>)
        -> Result<Vec<WalletOverview>>;

    async fn wallet_analytics(&self, wallet: &str, since_ts: Option<f64>)
        -> Result<WalletAnalytics>;
}

/// Leaderboard side buckets: buy-ish terms count toward yes exposure,
/// sell-ish toward no.
pub(crate) fn is_yes_side(side: &str) -> bool {
    matches!(side.to_lowercase().as_str(), "yes" | "buy")
}

pub(crate) fn is_no_side(side: &str) -> bool {
    matches!(side.to_lowercase().as_str(), "no" | "sell")
}

pub(crate) fn position_label(yes_volume: f64, no_volume: f64) -> String {
    if yes_volume == 0.0 && no_volume == 0.0 {
        "N/A".to_string()
    } else if yes_volume >= no_volume {
        "YES".to_string()
    } else {
        "NO".to_string()
    }
}

/// Backend selection: `mock` runs against the in-memory ring (the mock
/// generator itself lives outside this crate), `db` opens the embedded
/// SQLite file, `postgres` connects to the configured server.
pub async fn select_store(settings: &Settings) -> Result<Arc<dyn TradeStore>> {
    match settings.dash_feed_mode.trim().to_lowercase().as_str() {
        "mock" | "memory" => Ok(Arc::new(InMemoryTradeStore::new(2000))),
        "postgres" => Ok(Arc::new(
            PostgresTradeStore::connect(
                &settings.postgres_host,
                settings.postgres_port,
                &settings.postgres_user,
                &settings.postgres_password,
                &settings.postgres_database,
            )
            .await?,
        )),
        _ => Ok(Arc::new(SqliteTradeStore::open(&settings.trade_db_path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_label_rules() {
        assert_eq!(position_label(0.0, 0.0), "N/A");
        assert_eq!(position_label(10.0, 10.0), "YES");
        assert_eq!(position_label(5.0, 10.0), "NO");
        assert_eq!(position_label(10.0, 5.0), "YES");
    }

    #[test]
    fn side_buckets() {
        assert!(is_yes_side("yes"));
        assert!(is_yes_side("BUY"));
        assert!(is_no_side("no"));
        assert!(is_no_side("Sell"));
        assert!(!is_yes_side("no"));
        assert!(!is_no_side(""));
    }
}
