//! Anomaly detectors and the per-trade pipeline that feeds them.
//!
//! Every raw venue payload flows through the same stages: normalize,
//! catalog lookup, classify, cluster, detect, persist. The bundle is
//! entered concurrently from both venue adapters; each detector guards its
//! own state, so interleaving across feeds cannot corrupt a window.

pub mod accumulation;
pub mod sweep;
pub mod windows;
pub mod zscore;

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::catalog::{value_str, MarketCatalog};
use crate::classifier::{Classification, MarketClassifier};
use crate::cluster::SemanticRegistry;
use crate::config::Settings;
use crate::models::{MarketMeta, Trade, Venue};
use crate::normalize::{
    backfill_trade_numbers, extract_market_label, extract_price, extract_quantity, extract_side,
    extract_size_usd, extract_timestamp, extract_trade_id, first_raw, normalize_market_id,
    normalize_wallet, MAKER_KEYS, TAKER_KEYS,
};
use crate::store::TradeStore;

pub use accumulation::{VenueSideAccumulator, WalletVolumeTracker};
pub use sweep::{SweepAlert, SweepDetector};
pub use zscore::ZScoreDetector;

pub struct DetectorBundle {
    zscore: ZScoreDetector,
    sweep: SweepDetector,
    wallet_tracker: WalletVolumeTracker,
    kalshi_yes: VenueSideAccumulator,
    classifier: MarketClassifier,
    catalog: Arc<MarketCatalog>,
    registry: SemanticRegistry,
    store: Option<Arc<dyn TradeStore>>,
}

impl DetectorBundle {
    pub fn new(
        settings: &Settings,
        classifier: MarketClassifier,
        catalog: Arc<MarketCatalog>,
        store: Option<Arc<dyn TradeStore>>,
    ) -> Self {
        Self {
            zscore: ZScoreDetector::new(
                settings.zscore_window_seconds as f64,
                settings.zscore_threshold,
                settings.zscore_min_samples,
                settings.zscore_cooldown_seconds,
            ),
            sweep: SweepDetector::new(
                settings.sweep_window_ms,
                settings.sweep_min_trades,
                settings.sweep_cooldown_seconds,
            ),
            wallet_tracker: WalletVolumeTracker::new(
                settings.polymarket_whale_window_seconds as f64,
                settings.polymarket_whale_threshold_usd,
            ),
            kalshi_yes: VenueSideAccumulator::new(
                "kalshi",
                "yes",
                settings.kalshi_yes_window_seconds as f64,
                settings.kalshi_yes_threshold_usd,
            ),
            classifier,
            catalog,
            registry: SemanticRegistry::new(settings.cluster_match_threshold),
            store,
        }
    }

    pub fn catalog(&self) -> &Arc<MarketCatalog> {
        &self.catalog
    }

    pub async fn handle_polymarket_trade(&self, raw: &Value) {
        let timestamp = extract_timestamp(raw);
        let market = normalize_market_id(raw);

        let extra_keys: Vec<String> = ["market_slug", "marketSlug", "event_slug", "eventSlug", "slug"]
            .iter()
            .filter_map(|k| value_str(raw, k))
            .collect();
        let mut candidates: Vec<&str> = vec![market.as_str()];
        candidates.extend(extra_keys.iter().map(String::as_str));
        let meta = self.catalog.lookup(Venue::Polymarket, &candidates);

        let (label, text_blob, classification) = self.classify(raw, &market, meta.as_deref());

        let taker = normalize_wallet(first_raw(raw, TAKER_KEYS));
        let maker = normalize_wallet(first_raw(raw, MAKER_KEYS));
        let side = extract_side(raw);
        let price = extract_price(raw);
        let quantity = extract_quantity(raw);
        let trade_id = extract_trade_id(raw);
        let size_usd = extract_size_usd(raw);
        if size_usd <= 0.0 {
            return;
        }
        let (price, quantity) = backfill_trade_numbers(size_usd, price, quantity);
        let actor = taker.clone().or_else(|| maker.clone());

        self.zscore
            .add_trade("polymarket", &market, timestamp, size_usd);
        self.sweep
            .add_trade("polymarket", &market, &side, timestamp, price, size_usd);

        let cluster_id = self.registry.cluster_for_market(
            Venue::Polymarket,
            &market,
            Some(&label),
            Some(&text_blob),
        );

        self.persist(Trade {
            timestamp,
            platform: "polymarket".to_string(),
            market: market.clone(),
            market_label: Some(label),
            size_usd,
            side,
            actor_address: actor,
            price,
            quantity,
            trade_id,
            market_is_niche: Some(classification.is_niche),
            market_is_stock: Some(classification.is_stock),
            market_volume: meta.as_ref().and_then(|m| m.volume),
            cluster_id,
            market_category: meta.as_ref().and_then(|m| m.category.clone()),
        })
        .await;

        // Both sides of the print accumulate, but a self-cross counts once.
        let mut wallets: Vec<&str> = Vec::new();
        if let Some(taker) = &taker {
            wallets.push(taker);
        }
        if let Some(maker) = &maker {
            if taker.as_ref() != Some(maker) {
                wallets.push(maker);
            }
        }
        for wallet in wallets {
            self.wallet_tracker.add_trade(wallet, timestamp, size_usd);
        }
    }

    pub async fn handle_kalshi_trade(&self, raw: &Value) {
        let timestamp = extract_timestamp(raw);
        let market = normalize_market_id(raw);

        let extra_keys: Vec<String> = ["ticker", "market_ticker", "event_ticker", "eventTicker"]
            .iter()
            .filter_map(|k| value_str(raw, k))
            .collect();
        let mut candidates: Vec<&str> = vec![market.as_str()];
        candidates.extend(extra_keys.iter().map(String::as_str));
        let meta = self.catalog.lookup(Venue::Kalshi, &candidates);

        let (label, text_blob, classification) = self.classify(raw, &market, meta.as_deref());

        let side = extract_side(raw);
        let price = extract_price(raw);
        let quantity = extract_quantity(raw);
        let trade_id = extract_trade_id(raw);
        let size_usd = extract_size_usd(raw);
        if size_usd <= 0.0 {
            return;
        }
        let (price, quantity) = backfill_trade_numbers(size_usd, price, quantity);

        self.zscore.add_trade("kalshi", &market, timestamp, size_usd);
        self.sweep
            .add_trade("kalshi", &market, &side, timestamp, price, size_usd);

        let cluster_id =
            self.registry
                .cluster_for_market(Venue::Kalshi, &market, Some(&label), Some(&text_blob));

        if side == "yes" {
            self.kalshi_yes.add(timestamp, size_usd, &market);
        }

        self.persist(Trade {
            timestamp,
            platform: "kalshi".to_string(),
            market,
            market_label: Some(label),
            size_usd,
            side,
            actor_address: None,
            price,
            quantity,
            trade_id,
            market_is_niche: Some(classification.is_niche),
            market_is_stock: Some(classification.is_stock),
            market_volume: meta.as_ref().and_then(|m| m.volume),
            cluster_id,
            market_category: meta.as_ref().and_then(|m| m.category.clone()),
        })
        .await;
    }

    /// Label from catalog metadata when available, else from the payload;
    /// the classifier runs over the richest text we have.
    fn classify(
        &self,
        raw: &Value,
        market: &str,
        meta: Option<&MarketMeta>,
    ) -> (String, String, Classification) {
        let mut label = extract_market_label(raw, market);
        if let Some(meta) = meta {
            if !meta.label.is_empty() {
                label = meta.label.clone();
            }
        }
        let text_blob = meta
            .filter(|m| !m.text_blob.is_empty())
            .map(|m| m.text_blob.clone())
            .unwrap_or_else(|| label.clone());
        let classification = self
            .classifier
            .classify(&text_blob, meta.and_then(|m| m.volume));
        (label, text_blob, classification)
    }

    async fn persist(&self, trade: Trade) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.add_trade(&trade).await {
            warn!(
                platform = %trade.platform,
                market = %trade.market,
                error = %e,
                "failed to persist trade"
            );
        }
    }
}
