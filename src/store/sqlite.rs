//! Embedded SQLite backend.
//!
//! One `whale_flows` table mirroring the canonical trade record. WAL
//! journaling keeps readers unblocked during writes; schema evolution adds
//! any column missing from an older database file, never dropping or
//! rewriting. Booleans are stored as 0/1.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    position_label, CategoryStats, LeaderboardRow, StoreStats, TradeStore, WalletAnalytics,
    WalletOverview, WalletSummary, DEFAULT_LOOKBACK_SECONDS, MIN_TRADE_SIZE_USD,
};
use crate::models::Trade;
use crate::normalize::now_ts;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS whale_flows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp REAL NOT NULL,
    platform TEXT NOT NULL,
    market TEXT,
    market_label TEXT,
    size_usd REAL NOT NULL,
    side TEXT,
    actor_address TEXT,
    price REAL,
    quantity REAL,
    trade_id TEXT,
    market_is_niche INTEGER,
    market_is_stock INTEGER,
    market_volume REAL,
    cluster_id TEXT,
    market_category TEXT,
    UNIQUE(platform, trade_id) ON CONFLICT IGNORE
);

CREATE INDEX IF NOT EXISTS idx_whale_flows_ts ON whale_flows(timestamp);
CREATE INDEX IF NOT EXISTS idx_whale_flows_actor ON whale_flows(actor_address);
"#;

/// Columns that older database files may be missing.
const EVOLVED_COLUMNS: &[(&str, &str)] = &[
    ("market_label", "TEXT"),
    ("market_is_niche", "INTEGER"),
    ("market_is_stock", "INTEGER"),
    ("market_volume", "REAL"),
    ("cluster_id", "TEXT"),
    ("market_category", "TEXT"),
];

pub struct SqliteTradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTradeStore {
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create db directory {}", parent.display()))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("open database at {db_path}"))?;

        conn.execute_batch(SCHEMA_SQL).context("initialize schema")?;
        Self::evolve_schema(&conn)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!(journal_mode = %journal_mode, "WAL mode not active");
        }

        info!(path = %db_path, "trade database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn evolve_schema(conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare("PRAGMA table_info(whale_flows)")?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();
        for (name, ddl) in EVOLVED_COLUMNS {
            if !existing.iter().any(|c| c == name) {
                conn.execute(
                    &format!("ALTER TABLE whale_flows ADD COLUMN {name} {ddl}"),
                    [],
                )?;
                info!(column = %name, "added missing whale_flows column");
            }
        }
        Ok(())
    }

    fn bool_to_int(value: Option<bool>) -> Option<i64> {
        value.map(|v| if v { 1 } else { 0 })
    }

    fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<Trade> {
        Ok(Trade {
            timestamp: row.get(0)?,
            platform: row.get(1)?,
            market: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            market_label: row.get(3)?,
            size_usd: row.get(4)?,
            side: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            actor_address: row.get(6)?,
            price: row.get(7)?,
            quantity: row.get(8)?,
            trade_id: row.get(9)?,
            market_is_niche: row.get::<_, Option<i64>>(10)?.map(|v| v != 0),
            market_is_stock: row.get::<_, Option<i64>>(11)?.map(|v| v != 0),
            market_volume: row.get(12)?,
            cluster_id: row.get(13)?,
            market_category: row.get(14)?,
        })
    }

    fn cutoff(since_ts: Option<f64>) -> f64 {
        since_ts.unwrap_or_else(|| now_ts() - DEFAULT_LOOKBACK_SECONDS)
    }
}

const TRADE_COLUMNS: &str = "timestamp, platform, market, market_label, size_usd, side, \
     actor_address, price, quantity, trade_id, market_is_niche, market_is_stock, \
     market_volume, cluster_id, market_category";

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn add_trade(&self, trade: &Trade) -> Result<()> {
        if trade.size_usd < MIN_TRADE_SIZE_USD {
            return Ok(());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO whale_flows ({TRADE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ))?;
        stmt.execute(params![
            trade.timestamp,
            trade.platform,
            trade.market,
            trade.market_label,
            trade.size_usd,
            trade.side,
            trade.actor_address,
            trade.price,
            trade.quantity,
            trade.trade_id,
            Self::bool_to_int(trade.market_is_niche),
            Self::bool_to_int(trade.market_is_stock),
            trade.market_volume,
            trade.cluster_id,
            trade.market_category,
        ])?;
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
        let mut clauses = vec!["size_usd >= ?".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(min_size_usd)];
        if let Some(since_ts) = since_ts {
            clauses.push("timestamp >= ?".to_string());
            values.push(Box::new(since_ts));
        }
        if let Some(platforms) = platforms.filter(|p| !p.is_empty()) {
            let placeholders = vec!["?"; platforms.len()].join(", ");
            clauses.push(format!("lower(platform) IN ({placeholders})"));
            for platform in platforms {
                values.push(Box::new(platform.to_lowercase()));
            }
        }
        if let Some(wallet) = wallet {
            clauses.push("actor_address = ?".to_string());
            values.push(Box::new(wallet.to_string()));
        }
        values.push(Box::new(limit as i64));

        let query = format!(
            "SELECT {TRADE_COLUMNS} FROM whale_flows WHERE {} \
             ORDER BY timestamp DESC LIMIT ?",
            clauses.join(" AND ")
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&query)?;
        let trades = stmt
            .query_map(
                params_from_iter(values.iter().map(|v| v.as_ref())),
                Self::row_to_trade,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let now = now_ts();
        let cutoff_24h = now - 86_400.0;
        let cutoff_minute = now - 60.0;
        let conn = self.conn.lock();
        let trades_24h: i64 = conn.query_row(
            "SELECT COUNT(*) FROM whale_flows WHERE timestamp >= ?1",
            params![cutoff_24h],
            |row| row.get(0),
        )?;
        let trades_minute: i64 = conn.query_row(
            "SELECT COUNT(*) FROM whale_flows WHERE timestamp >= ?1",
            params![cutoff_minute],
            |row| row.get(0),
        )?;
        let wallets: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT actor_address) FROM whale_flows \
             WHERE timestamp >= ?1 AND actor_address IS NOT NULL AND actor_address != ''",
            params![cutoff_24h],
            |row| row.get(0),
        )?;
        let last: Option<f64> = conn.query_row(
            "SELECT MAX(timestamp) FROM whale_flows",
            [],
            |row| row.get(0),
        )?;
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
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT actor_address,
                    SUM(size_usd) AS volume,
                    SUM(CASE WHEN lower(side) IN ('yes', 'buy') THEN size_usd ELSE 0 END) AS yes_volume,
                    SUM(CASE WHEN lower(side) IN ('no', 'sell') THEN size_usd ELSE 0 END) AS no_volume
             FROM whale_flows
             WHERE timestamp >= ?1 AND actor_address IS NOT NULL AND actor_address != ''
             GROUP BY actor_address
             ORDER BY volume DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![cutoff, limit as i64], |row| {
                let address: String = row.get(0)?;
                let volume: f64 = row.get::<_, Option<f64>>(1)?.unwrap_or(0.0);
                let yes_volume: f64 = row.get::<_, Option<f64>>(2)?.unwrap_or(0.0);
                let no_volume: f64 = row.get::<_, Option<f64>>(3)?.unwrap_or(0.0);
                Ok(LeaderboardRow {
                    address,
                    volume,
                    position: position_label(yes_volume, no_volume),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
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
        let conn = self.conn.lock();
        let summary = conn.query_row(
            "SELECT COUNT(*) AS trades,
                    SUM(size_usd) AS volume,
                    SUM(CASE WHEN lower(side) IN ('yes', 'buy') THEN size_usd ELSE 0 END) AS yes_volume,
                    SUM(CASE WHEN lower(side) IN ('no', 'sell') THEN size_usd ELSE 0 END) AS no_volume,
                    MAX(timestamp) AS last_ts
             FROM whale_flows
             WHERE actor_address = ?1 AND timestamp >= ?2",
            params![wallet, cutoff],
            |row| {
                let trades: i64 = row.get(0)?;
                Ok((
                    trades,
                    row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                ))
            },
        )?;
        let (trades, volume, yes_volume, no_volume, last_ts) = summary;
        if trades == 0 {
            return Ok(None);
        }
        Ok(Some(WalletSummary {
            trades: trades as u64,
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
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
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
             WHERE timestamp >= ?1 AND actor_address IS NOT NULL AND actor_address != ''
             GROUP BY actor_address
             ORDER BY volume DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![cutoff, limit as i64], |row| {
                Ok(WalletOverview {
                    address: row.get(0)?,
                    volume: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    trades: row.get::<_, i64>(2)? as u64,
                    last_ts: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    top_category: row
                        .get::<_, Option<String>>(4)?
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| "Mixed".to_string()),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn wallet_analytics(
        &self,
        wallet: &str,
        since_ts: Option<f64>,
    ) -> Result<WalletAnalytics> {
        let cutoff = Self::cutoff(since_ts);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COALESCE(NULLIF(market_category, ''), 'Other') AS category,
                    SUM(size_usd) AS volume,
                    COUNT(*) AS trades
             FROM whale_flows
             WHERE actor_address = ?1 AND timestamp >= ?2
             GROUP BY category
             ORDER BY volume DESC",
        )?;
        let mut analytics = WalletAnalytics::default();
        let rows = stmt.query_map(params![wallet, cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (category, volume, trades) = row?;
            analytics.categories.insert(
                category,
                CategoryStats {
                    volume,
                    trades: trades as u64,
                },
            );
        }
        analytics.diversity_score = analytics.categories.len();
        Ok(analytics)
    }
}
