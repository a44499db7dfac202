//! Postgres backend for multi-process deployments.
//!
//! Same `whale_flows` surface as the embedded backend, with native
//! booleans, a serial id, and `ON CONFLICT DO NOTHING` on the
//! `(platform, trade_id)` uniqueness constraint. Each call runs over a
//! short-lived connection so writers never hold server state between
//! queries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{info, warn};

use super::{
    position_label, CategoryStats, LeaderboardRow, StoreStats, TradeStore, WalletAnalytics,
    WalletOverview, WalletSummary, DEFAULT_LOOKBACK_SECONDS, MIN_TRADE_SIZE_USD,
};
use crate::models::Trade;
use crate::normalize::now_ts;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS whale_flows (
    id SERIAL PRIMARY KEY,
    timestamp DOUBLE PRECISION NOT NULL,
    platform TEXT NOT NULL,
    market TEXT,
    market_label TEXT,
    size_usd DOUBLE PRECISION NOT NULL,
    side TEXT,
    actor_address TEXT,
    price DOUBLE PRECISION,
    quantity DOUBLE PRECISION,
    trade_id TEXT,
    market_is_niche BOOLEAN,
    market_is_stock BOOLEAN,
    market_volume DOUBLE PRECISION,
    cluster_id TEXT,
    market_category TEXT,
    UNIQUE(platform, trade_id)
);
CREATE INDEX IF NOT EXISTS idx_whale_flows_ts ON whale_flows(timestamp);
CREATE INDEX IF NOT EXISTS idx_whale_flows_actor ON whale_flows(actor_address);
";

const TRADE_COLUMNS: &str = "timestamp, platform, market, market_label, size_usd, side, \
     actor_address, price, quantity, trade_id, market_is_niche, market_is_stock, \
     market_volume, cluster_id, market_category";

pub struct PostgresTradeStore {
    config: tokio_postgres::Config,
}

impl PostgresTradeStore {
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(host)
            .port(port)
            .user(user)
            .password(password)
            .dbname(database);
        let store = Self { config };
        let client = store.client().await?;
        client
            .batch_execute(SCHEMA_SQL)
            .await
            .context("initialize postgres schema")?;
        info!(host = %host, database = %database, "postgres trade store ready");
        Ok(store)
    }

    /// One connection per call; the driver task is dropped with the client.
    async fn client(&self) -> Result<Client> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .context("postgres connect")?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection task ended");
            }
        });
        Ok(client)
    }

    fn cutoff(since_ts: Option<f64>) -> f64 {
        since_ts.unwrap_or_else(|| now_ts() - DEFAULT_LOOKBACK_SECONDS)
    }

    fn row_to_trade(row: &Row) -> Trade {
        Trade {
            timestamp: row.get(0),
            platform: row.get(1),
            market: row.get::<_, Option<String>>(2).unwrap_or_default(),
            market_label: row.get(3),
            size_usd: row.get(4),
            side: row.get::<_, Option<String>>(5).unwrap_or_default(),
            actor_address: row.get(6),
            price: row.get(7),
            quantity: row.get(8),
            trade_id: row.get(9),
            market_is_niche: row.get(10),
            market_is_stock: row.get(11),
            market_volume: row.get(12),
            cluster_id: row.get(13),
            market_category: row.get(14),
        }
    }
}

#[async_trait]
impl TradeStore for PostgresTradeStore {
    async fn add_trade(&self, trade: &Trade) -> Result<()> {
        if trade.size_usd < MIN_TRADE_SIZE_USD {
            return Ok(());
        }
        let client = self.client().await?;
        let insert = format!(
            "INSERT INTO whale_flows ({TRADE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT DO NOTHING"
        );
        client
            .execute(
                insert.as_str(),
                &[
                    &trade.timestamp,
                    &trade.platform,
                    &trade.market,
                    &trade.market_label,
                    &trade.size_usd,
                    &trade.side,
                    &trade.actor_address,
                    &trade.price,
                    &trade.quantity,
                    &trade.trade_id,
                    &trade.market_is_niche,
                    &trade.market_is_stock,
                    &trade.market_volume,
                    &trade.cluster_id,
                    &trade.market_category,
                ],
            )
            .await
            .context("insert trade")?;
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
        let mut clauses = vec!["size_usd >= $1".to_string()];
        let mut values: Vec<Box<dyn ToSql + Sync + Send>> = vec![Box::new(min_size_usd)];
        if let Some(since_ts) = since_ts {
            values.push(Box::new(since_ts));
            clauses.push(format!("timestamp >= ${}", values.len()));
        }
        let lowered: Option<Vec<String>> =
            platforms.map(|ps| ps.iter().map(|p| p.to_lowercase()).collect());
        if let Some(lowered) = lowered.filter(|p| !p.is_empty()) {
            values.push(Box::new(lowered));
            clauses.push(format!("lower(platform) = ANY(${})", values.len()));
        }
        if let Some(wallet) = wallet {
            values.push(Box::new(wallet.to_string()));
            clauses.push(format!("actor_address = ${}", values.len()));
        }
        values.push(Box::new(limit as i64));
        let query = format!(
            "SELECT {TRADE_COLUMNS} FROM whale_flows WHERE {} \
             ORDER BY timestamp DESC LIMIT ${}",
            clauses.join(" AND "),
            values.len()
        );

        let client = self.client().await?;
        let params: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|v| -> &(dyn ToSql + Sync) { v.as_ref() })
            .collect();
        let rows = client
            .query(query.as_str(), &params)
            .await
            .context("recent trades")?;
        Ok(rows.iter().map(Self::row_to_trade).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let now = now_ts();
        let cutoff_24h = now - 86_400.0;
        let cutoff_minute = now - 60.0;
        let client = self.client().await?;
        let trades_24h: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM whale_flows WHERE timestamp >= $1",
                &[&cutoff_24h],
            )
            .await?
            .get(0);
        let trades_minute: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM whale_flows WHERE timestamp >= $1",
                &[&cutoff_minute],
            )
            .await?
            .get(0);
        let wallets: i64 = client
            .query_one(
                "SELECT COUNT(DISTINCT actor_address) FROM whale_flows \
                 WHERE timestamp >= $1 AND actor_address IS NOT NULL AND actor_address != ''",
                &[&cutoff_24h],
            )
            .await?
            .get(0);
        let last: Option<f64> = client
            .query_one("SELECT MAX(timestamp) FROM whale_flows", &[])
            .await?
            .get(0);
        Ok(StoreStats {
            wallets: wallets as u64,
            trades: trades_24h as u64,
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
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT actor_address,
                        SUM(size_usd) AS volume,
                        SUM(CASE WHEN lower(side) IN ('yes', 'buy') THEN size_usd ELSE 0 END) AS yes_volume,
                        SUM(CASE WHEN lower(side) IN ('no', 'sell') THEN size_usd ELSE 0 END) AS no_volume
                 FROM whale_flows
                 WHERE timestamp >= $1 AND actor_address IS NOT NULL AND actor_address != ''
                 GROUP BY actor_address
                 ORDER BY volume DESC
                 LIMIT $2",
                &[&cutoff, &(limit as i64)],
            )
            .await
            .context("leaderboard")?;
        Ok(rows
            .iter()
            .map(|row| {
                let yes_volume: f64 = row.get::<_, Option<f64>>(2).unwrap_or(0.0);
                let no_volume: f64 = row.get::<_, Option<f64>>(3).unwrap_or(0.0);
                LeaderboardRow {
                    address: row.get(0),
                    volume: row.get::<_, Option<f64>>(1).unwrap_or(0.0),
                    position: position_label(yes_volume, no_volume),
                }
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
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS trades,
                        SUM(size_usd) AS volume,
                        SUM(CASE WHEN lower(side) IN ('yes', 'buy') THEN size_usd ELSE 0 END) AS yes_volume,
                        SUM(CASE WHEN lower(side) IN ('no', 'sell') THEN size_usd ELSE 0 END) AS no_volume,
                        MAX(timestamp) AS last_ts
                 FROM whale_flows
                 WHERE actor_address = $1 AND timestamp >= $2",
                &[&wallet, &cutoff],
            )
            .await
            .context("wallet summary")?;
        let trades: i64 = row.get(0);
        if trades == 0 {
            return Ok(None);
        }
        Ok(Some(WalletSummary {
            trades: trades as u64,
            volume: row.get::<_, Option<f64>>(1).unwrap_or(0.0),
            yes_volume: row.get::<_, Option<f64>>(2).unwrap_or(0.0),
            no_volume: row.get::<_, Option<f64>>(3).unwrap_or(0.0),
            last_ts: row.get::<_, Option<f64>>(4).unwrap_or(0.0),
        }))
    }

    async fn all_wallets(
        &self,
        limit: usize,
        since_ts: Option<f64>,
    ) -> Result<Vec<WalletOverview>> {
        let cutoff = Self::cutoff(since_ts);
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT actor_address,
                        SUM(size_usd) AS volume,
                        COUNT(*) AS trades,
                        MAX(timestamp) AS last_ts,
                        (
                            SELECT market_category
                            FROM whale_flows w2
                            WHERE w2.actor_address = w1.actor_address
                            GROUP BY market_category
                            ORDER BY SUM(size_usd) DESC
                            LIMIT 1
                        ) AS top_category
                 FROM whale_flows w1
                 WHERE timestamp >= $1 AND actor_address IS NOT NULL AND actor_address != ''
                 GROUP BY actor_address
                 ORDER BY volume DESC
                 LIMIT $2",
                &[&cutoff, &(limit as i64)],
            )
            .await
            .context("all wallets")?;
        Ok(rows
            .iter()
            .map(|row| WalletOverview {
                address: row.get(0),
                volume: row.get::<_, Option<f64>>(1).unwrap_or(0.0),
                trades: row.get::<_, i64>(2) as u64,
                last_ts: row.get::<_, Option<f64>>(3).unwrap_or(0.0),
                top_category: row
                    .get::<_, Option<String>>(4)
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| "Mixed".to_string()),
            })
            .collect())
    }

    async fn wallet_analytics(
        &self,
        wallet: &str,
        since_ts: Option<f64>,
    ) -> Result<WalletAnalytics> {
        let cutoff = Self::cutoff(since_ts);
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT COALESCE(NULLIF(market_category, ''), 'Other') AS category,
                        SUM(size_usd) AS volume,
                        COUNT(*) AS trades
                 FROM whale_flows
                 WHERE actor_address = $1 AND timestamp >= $2
                 GROUP BY category
                 ORDER BY volume DESC",
                &[&wallet, &cutoff],
            )
            .await
            .context("wallet analytics")?;
        let mut analytics = WalletAnalytics::default();
        for row in rows {
            analytics.categories.insert(
                row.get(0),
                CategoryStats {
                    volume: row.get::<_, Option<f64>>(1).unwrap_or(0.0),
                    trades: row.get::<_, i64>(2) as u64,
                },
            );
        }
        analytics.diversity_score = analytics.categories.len();
        Ok(analytics)
    }
}
