//! Bounded in-memory trade store, used for local development and as the
//! fallback when no database is configured.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{
    is_no_side, is_yes_side, position_label, CategoryStats, LeaderboardRow, StoreStats, TradeStore,
    WalletAnalytics, WalletOverview, WalletSummary, DEFAULT_LOOKBACK_SECONDS, MIN_TRADE_SIZE_USD,
};
use crate::models::Trade;
use crate::normalize::now_ts;

pub struct InMemoryTradeStore {
    maxlen: usize,
    trades: Mutex<Vec<Trade>>,
}

impl InMemoryTradeStore {
    pub fn new(maxlen: usize) -> Self {
        Self {
            maxlen,
            trades: Mutex::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> Vec<Trade> {
        self.trades.lock().clone()
    }

    fn cutoff(since_ts: Option<f64>) -> f64 {
        since_ts.unwrap_or_else(|| now_ts() - DEFAULT_LOOKBACK_SECONDS)
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn add_trade(&self, trade: &Trade) -> Result<()> {
        if trade.size_usd < MIN_TRADE_SIZE_USD {
            return Ok(());
        }
        let mut trades = self.trades.lock();
        if let Some(trade_id) = trade.trade_id.as_deref() {
            let duplicate = trades.iter().any(|t| {
                t.platform == trade.platform && t.trade_id.as_deref() == Some(trade_id)
            });
            if duplicate {
                return Ok(());
            }
        }
        trades.push(trade.clone());
        if trades.len() > self.maxlen {
            let excess = trades.len() - self.maxlen;
            trades.drain(..excess);
        }
        Ok(())
    }

    async fn recent_trades(
        &self,
        min_size_usd: f64,
        limit: usize,
        since_ts: Option<f64>,
        platforms: Option<&[String]>,
        wallet: Option<&str>,
    ) -> Result<Vec<Trade>> {
        let allowed: Option<Vec<String>> =
            platforms.map(|ps| ps.iter().map(|p| p.to_lowercase()).collect());
        let mut trades: Vec<Trade> = self
            .snapshot()
            .into_iter()
            .filter(|t| t.size_usd >= min_size_usd)
            .filter(|t| since_ts.map(|cutoff| t.timestamp >= cutoff).unwrap_or(true))
            .filter(|t| {
                allowed
                    .as_ref()
                    .map(|allowed| allowed.contains(&t.platform.to_lowercase()))
                    .unwrap_or(true)
            })
            .filter(|t| {
                wallet
                    .map(|w| t.actor_address.as_deref() == Some(w))
                    .unwrap_or(true)
            })
            .collect();
        trades.reverse();
        trades.truncate(limit);
        Ok(trades)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let now = now_ts();
        let cutoff_24h = now - 86_400.0;
        let cutoff_minute = now - 60.0;
        let trades = self.snapshot();
        let trades_24h = trades.iter().filter(|t| t.timestamp >= cutoff_24h).count() as u64;
        let trades_minute = trades
            .iter()
            .filter(|t| t.timestamp >= cutoff_minute)
            .count() as u64;
        let wallets = trades
            .iter()
            .filter(|t| t.timestamp >= cutoff_24h)
            .filter_map(|t| t.actor_address.as_deref())
            .filter(|w| !w.is_empty())
            .collect::<std::collections::HashSet<_>>()
            .len() as u64;
        let last = trades
            .iter()
            .map(|t| t.timestamp)
            .fold(None, |acc: Option<f64>, ts| {
                Some(acc.map_or(ts, |prev| prev.max(ts)))
            });
        Ok(StoreStats {
            wallets,
            trades: trades_24h,
            flow: format!("{trades_minute}/min"),
            last,
        })
    }

    async fn leaderboard(
        &self,
        limit: usize,
        since_ts: Option<f64>,
    ) -> Result<Vec<LeaderboardRow>> {
        let cutoff = Self::cutoff(since_ts);
        let mut totals: HashMap<String, (f64, f64, f64)> = HashMap::new();
        for trade in self.snapshot() {
            let Some(wallet) = trade.actor_address.as_deref().filter(|w| !w.is_empty()) else {
                continue;
            };
            if trade.timestamp < cutoff {
                continue;
            }
            let entry = totals.entry(wallet.to_string()).or_default();
            entry.0 += trade.size_usd;
            if is_yes_side(&trade.side) {
                entry.1 += trade.size_usd;
            } else if is_no_side(&trade.side) {
                entry.2 += trade.size_usd;
            }
        }
        let mut ranked: Vec<(String, (f64, f64, f64))> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.partial_cmp(&a.1 .0).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        Ok(ranked
            .into_iter()
            .map(|(address, (volume, yes, no))| LeaderboardRow {
                address,
                volume,
                position: position_label(yes, no),
            })
            .collect())
    }

    async fn wallet_summary(
        &self,
        wallet: &str,
        since_ts: Option<f64>,
    ) -> Result<Option<WalletSummary>> {
        if wallet.is_empty() {
            return Ok(None);
        }
        let cutoff = Self::cutoff(since_ts);
        let trades: Vec<Trade> = self
            .snapshot()
            .into_iter()
            .filter(|t| t.actor_address.as_deref() == Some(wallet))
            .filter(|t| t.timestamp >= cutoff)
            .collect();
        if trades.is_empty() {
            return Ok(None);
        }
        let volume = trades.iter().map(|t| t.size_usd).sum();
        let yes_volume = trades
            .iter()
            .filter(|t| is_yes_side(&t.side))
            .map(|t| t.size_usd)
            .sum();
        let no_volume = trades
            .iter()
            .filter(|t| is_no_side(&t.side))
            .map(|t| t.size_usd)
            .sum();
        let last_ts = trades.iter().map(|t| t.timestamp).fold(0.0, f64::max);
        Ok(Some(WalletSummary {
            trades: trades.len() as u64,
            volume,
            yes_volume,
            no_volume,
            last_ts,
        }))
    }

    async fn all_wallets(
        &self,
        limit: usize,
        since_ts: Option<f64>,
    ) -> Result<Vec<WalletOverview>> {
        let cutoff = Self::cutoff(since_ts);
        struct Acc {
            volume: f64,
            trades: u64,
            last_ts: f64,
            by_category: HashMap<String, f64>,
        }
        let mut wallets: HashMap<String, Acc> = HashMap::new();
        for trade in self.snapshot() {
            let Some(wallet) = trade.actor_address.as_deref().filter(|w| !w.is_empty()) else {
                continue;
            };
            if trade.timestamp < cutoff {
                continue;
            }
            let acc = wallets.entry(wallet.to_string()).or_insert_with(|| Acc {
                volume: 0.0,
                trades: 0,
                last_ts: 0.0,
                by_category: HashMap::new(),
            });
            acc.volume += trade.size_usd;
            acc.trades += 1;
            acc.last_ts = acc.last_ts.max(trade.timestamp);
            if let Some(category) = trade.market_category.as_deref().filter(|c| !c.is_empty()) {
                *acc.by_category.entry(category.to_string()).or_default() += trade.size_usd;
            }
        }
        let mut ranked: Vec<(String, Acc)> = wallets.into_iter().collect();
        ranked.sort_by(|a, b| b.1.volume.partial_cmp(&a.1.volume).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        Ok(ranked
            .into_iter()
            .map(|(address, acc)| {
                let top_category = acc
                    .by_category
                    .iter()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(category, _)| category.clone())
                    .unwrap_or_else(|| "Mixed".to_string());
                WalletOverview {
                    address,
                    volume: acc.volume,
                    trades: acc.trades,
                    last_ts: acc.last_ts,
                    top_category,
                }
            })
            .collect())
    }

    async fn wallet_analytics(
        &self,
        wallet: &str,
        since_ts: Option<f64>,
    ) -> Result<WalletAnalytics> {
        let cutoff = Self::cutoff(since_ts);
        let mut analytics = WalletAnalytics::default();
        for trade in self.snapshot() {
            if trade.actor_address.as_deref() != Some(wallet) || trade.timestamp < cutoff {
                continue;
            }
            let category = trade
                .market_category
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "Other".to_string());
            let stats = analytics
                .categories
                .entry(category)
                .or_insert_with(CategoryStats::default);
            stats.volume += trade.size_usd;
            stats.trades += 1;
        }
        analytics.diversity_score = analytics.categories.len();
        Ok(analytics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::now_ts;

    fn trade(ts: f64, size: f64, side: &str, wallet: Option<&str>) -> Trade {
        Trade {
            timestamp: ts,
            platform: "polymarket".to_string(),
            market: "m".to_string(),
            market_label: None,
            size_usd: size,
            side: side.to_string(),
            actor_address: wallet.map(str::to_string),
            price: None,
            quantity: None,
            trade_id: None,
            market_is_niche: None,
            market_is_stock: None,
            market_volume: None,
            cluster_id: None,
            market_category: None,
        }
    }

    #[tokio::test]
    async fn size_gate_rejects_small_trades() {
        let store = InMemoryTradeStore::new(10);
        store.add_trade(&trade(now_ts(), 99.0, "yes", None)).await.unwrap();
        assert_eq!(store.stats().await.unwrap().trades, 0);
        store.add_trade(&trade(now_ts(), 100.0, "yes", None)).await.unwrap();
        assert_eq!(store.stats().await.unwrap().trades, 1);
    }

    #[tokio::test]
    async fn dedup_on_platform_trade_id() {
        let store = InMemoryTradeStore::new(10);
        let mut t = trade(now_ts(), 500.0, "yes", Some("0xaaa"));
        t.trade_id = Some("K-1".to_string());
        store.add_trade(&t).await.unwrap();
        store.add_trade(&t).await.unwrap();
        let trades = store.recent_trades(0.0, 10, None, None, None).await.unwrap();
        assert_eq!(trades.len(), 1);
    }

    #[tokio::test]
    async fn overflow_trims_to_newest() {
        let store = InMemoryTradeStore::new(3);
        let base = now_ts();
        for i in 0..5 {
            store
                .add_trade(&trade(base + i as f64, 200.0 + i as f64, "yes", None))
                .await
                .unwrap();
        }
        let trades = store.recent_trades(0.0, 10, None, None, None).await.unwrap();
        assert_eq!(trades.len(), 3);
        // Newest first, oldest two dropped.
        assert_eq!(trades[0].size_usd, 204.0);
        assert_eq!(trades[2].size_usd, 202.0);
    }

    #[tokio::test]
    async fn recent_trades_filters_compose() {
        let store = InMemoryTradeStore::new(100);
        let base = now_ts();
        store.add_trade(&trade(base, 200.0, "yes", Some("0xaaa"))).await.unwrap();
        let mut kalshi = trade(base + 1.0, 300.0, "no", None);
        kalshi.platform = "kalshi".to_string();
        store.add_trade(&kalshi).await.unwrap();
        store.add_trade(&trade(base + 2.0, 5_000.0, "yes", Some("0xbbb"))).await.unwrap();

        let platforms = vec!["polymarket".to_string()];
        let trades = store
            .recent_trades(0.0, 10, None, Some(&platforms), None)
            .await
            .unwrap();
        assert_eq!(trades.len(), 2);

        let trades = store
            .recent_trades(1_000.0, 10, None, None, None)
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);

        let trades = store
            .recent_trades(0.0, 10, None, None, Some("0xaaa"))
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].size_usd, 200.0);
    }

    #[tokio::test]
    async fn leaderboard_position_and_order() {
        let store = InMemoryTradeStore::new(100);
        let base = now_ts();
        store.add_trade(&trade(base, 1_000.0, "yes", Some("0xaaa"))).await.unwrap();
        store.add_trade(&trade(base, 400.0, "no", Some("0xaaa"))).await.unwrap();
        store.add_trade(&trade(base, 5_000.0, "sell", Some("0xbbb"))).await.unwrap();

        let board = store.leaderboard(10, None).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].address, "0xbbb");
        assert_eq!(board[0].position, "NO");
        assert_eq!(board[1].address, "0xaaa");
        assert_eq!(board[1].position, "YES");
    }

    #[tokio::test]
    async fn wallet_summary_none_when_no_rows() {
        let store = InMemoryTradeStore::new(100);
        assert!(store.wallet_summary("0xzzz", None).await.unwrap().is_none());

        let base = now_ts();
        store.add_trade(&trade(base, 1_000.0, "yes", Some("0xaaa"))).await.unwrap();
        let summary = store.wallet_summary("0xaaa", None).await.unwrap().unwrap();
        assert_eq!(summary.trades, 1);
        assert_eq!(summary.yes_volume, 1_000.0);
        assert_eq!(summary.no_volume, 0.0);
    }

    #[tokio::test]
    async fn wallet_analytics_groups_categories() {
        let store = InMemoryTradeStore::new(100);
        let base = now_ts();
        let mut t = trade(base, 1_000.0, "yes", Some("0xaaa"));
        t.market_category = Some("Politics".to_string());
        store.add_trade(&t).await.unwrap();
        let mut t = trade(base, 2_000.0, "yes", Some("0xaaa"));
        t.market_category = None;
        store.add_trade(&t).await.unwrap();

        let analytics = store.wallet_analytics("0xaaa", None).await.unwrap();
        assert_eq!(analytics.diversity_score, 2);
        assert_eq!(analytics.categories["Politics"].volume, 1_000.0);
        assert_eq!(analytics.categories["Other"].trades, 1);

        let overview = store.all_wallets(10, None).await.unwrap();
        assert_eq!(overview[0].top_category, "Other");
    }
}
