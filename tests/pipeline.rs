//! End-to-end pipeline scenarios: raw venue payloads through
//! normalization, classification, detection, and persistence.

use serde_json::json;
use std::sync::Arc;

use whalewatch_backend::catalog::{MarketCatalog, MetaMap};
use whalewatch_backend::classifier::{ClassifierConfig, MarketClassifier};
use whalewatch_backend::config::Settings;
use whalewatch_backend::detectors::{DetectorBundle, SweepDetector, ZScoreDetector};
use whalewatch_backend::ingest::kalshi::build_kalshi_auth_headers;
use whalewatch_backend::models::{MarketMeta, Venue};
use whalewatch_backend::store::{InMemoryTradeStore, TradeStore};

fn test_settings() -> Settings {
    Settings::from_env()
}

fn bundle_with(
    catalog_entries: Option<(Venue, MetaMap)>,
) -> (Arc<InMemoryTradeStore>, DetectorBundle) {
    let settings = test_settings();
    let store = Arc::new(InMemoryTradeStore::new(2000));
    let catalog = Arc::new(MarketCatalog::new());
    if let Some((venue, entries)) = catalog_entries {
        catalog.replace(venue, entries);
    }
    let bundle = DetectorBundle::new(
        &settings,
        MarketClassifier::new(ClassifierConfig::default()),
        catalog,
        Some(store.clone()),
    );
    (store, bundle)
}

// S1: $5 notional survives normalization but is gated at store ingress.
#[tokio::test]
async fn small_polymarket_trade_is_not_persisted() {
    let (store, bundle) = bundle_with(None);
    bundle
        .handle_polymarket_trade(&json!({
            "market": "0xabc",
            "taker_address": "0xDEADBEEF00000000000000000000000000000000",
            "size": "10",
            "price": "0.5",
            "timestamp": "2024-06-01T12:00:00Z"
        }))
        .await;
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.trades, 0);
    assert_eq!(stats.wallets, 0);
}

// S2: millisecond timestamps collapse to seconds; size derives from
// price x quantity and the wallet is lowercased.
#[tokio::test]
async fn polymarket_trade_normalizes_and_persists() {
    let (store, bundle) = bundle_with(None);
    bundle
        .handle_polymarket_trade(&json!({
            "market": "0xabc",
            "size": "400",
            "price": "0.5",
            "taker_address": "0xAAAA",
            "timestamp": 1_700_000_000_000u64
        }))
        .await;
    let trades = store.recent_trades(0.0, 10, None, None, None).await.unwrap();
    assert_eq!(trades.len(), 1);
    let t = &trades[0];
    assert_eq!(t.size_usd, 200.0);
    assert_eq!(t.timestamp, 1_700_000_000.0);
    assert_eq!(t.platform, "polymarket");
    assert_eq!(t.actor_address.as_deref(), Some("0xaaaa"));
    assert_eq!(t.side, "");
    assert!((t.quantity.unwrap() - 400.0).abs() < 1e-9);
    assert_eq!(t.price, Some(0.5));
}

// S3: identical (platform, trade_id) persists exactly once.
#[tokio::test]
async fn duplicate_kalshi_trade_id_persists_once() {
    let (store, bundle) = bundle_with(None);
    for _ in 0..2 {
        bundle
            .handle_kalshi_trade(&json!({
                "market_ticker": "GOVSHUTDOWN-24",
                "trade_id": "K-1",
                "count": 500,
                "yes_price": 62,
                "side": "yes",
                "created_time": "2024-06-01T12:00:00Z"
            }))
            .await;
    }
    let trades = store.recent_trades(0.0, 10, None, None, None).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].trade_id.as_deref(), Some("K-1"));
    // 500 contracts at 62 cents
    assert_eq!(trades[0].size_usd, 310.0);
}

// S4: long-dated classification forces exclusion even over a niche match,
// carried through catalog metadata into the persisted row.
#[tokio::test]
async fn long_dated_market_is_excluded_not_niche() {
    let mut entries = MetaMap::new();
    entries.insert(
        "MADURO-2099".to_string(),
        Arc::new(MarketMeta {
            label: "Maduro arrest before 2099".to_string(),
            text_blob: "maduro arrest before 2099".to_string(),
            volume: Some(12_000.0),
            category: Some("Politics".to_string()),
        }),
    );
    let (store, bundle) = bundle_with(Some((Venue::Kalshi, entries)));
    bundle
        .handle_kalshi_trade(&json!({
            "market_ticker": "MADURO-2099",
            "trade_id": "K-2",
            "count": 400,
            "yes_price": 50,
            "side": "yes"
        }))
        .await;
    let trades = store.recent_trades(0.0, 10, None, None, None).await.unwrap();
    assert_eq!(trades.len(), 1);
    let t = &trades[0];
    assert_eq!(t.market_label.as_deref(), Some("Maduro arrest before 2099"));
    assert_eq!(t.market_is_niche, Some(false));
    assert_eq!(t.market_is_stock, Some(false));
    assert_eq!(t.market_volume, Some(12_000.0));
    assert_eq!(t.market_category.as_deref(), Some("Politics"));
}

// Catalog metadata enriches trades that only carry a token id.
#[tokio::test]
async fn catalog_lookup_enriches_by_alias() {
    let mut entries = MetaMap::new();
    let meta = Arc::new(MarketMeta {
        label: "SEC sues the exchange".to_string(),
        text_blob: "sec sues the exchange fraud investigation".to_string(),
        volume: Some(90_000.0),
        category: Some("Legal".to_string()),
    });
    entries.insert("123456".to_string(), meta.clone());
    entries.insert("sec-sues-exchange".to_string(), meta);
    let (store, bundle) = bundle_with(Some((Venue::Polymarket, entries)));

    bundle
        .handle_polymarket_trade(&json!({
            "market": "123456",
            "size_usd": 2_500.0,
            "side": "buy",
            "taker_address": "0xAAAA",
            "timestamp": 1_700_000_000
        }))
        .await;
    let trades = store.recent_trades(0.0, 10, None, None, None).await.unwrap();
    let t = &trades[0];
    assert_eq!(t.market_label.as_deref(), Some("SEC sues the exchange"));
    // "fraud" and "investigation" are niche terms
    assert_eq!(t.market_is_niche, Some(true));
    assert_eq!(t.side, "yes");
    assert_eq!(t.market_category.as_deref(), Some("Legal"));
    assert!(t.cluster_id.is_some());
}

// Two venue listings of the same question land in one cluster.
#[tokio::test]
async fn cross_venue_trades_share_cluster() {
    let (store, bundle) = bundle_with(None);
    bundle
        .handle_polymarket_trade(&json!({
            "market": "0xfed",
            "title": "Will the Fed cut rates by September?",
            "size_usd": 1_000.0,
            "side": "yes",
            "taker_address": "0xAAAA",
            "timestamp": 1_700_000_000
        }))
        .await;
    bundle
        .handle_kalshi_trade(&json!({
            "market_ticker": "FEDCUT-SEP",
            "title": "Fed cut rates by September",
            "size_usd": 1_000.0,
            "side": "yes",
            "trade_id": "K-3",
            "timestamp": 1_700_000_100
        }))
        .await;
    let trades = store.recent_trades(0.0, 10, None, None, None).await.unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].cluster_id, trades[1].cluster_id);
    assert!(trades[0].cluster_id.is_some());
}

// S5: constant flow never alerts; a massive outlier does, once per cooldown.
#[test]
fn zscore_scenario() {
    let detector = ZScoreDetector::new(3600.0, 3.0, 30, 30.0);
    // 30 identical $1000 prints: below min_samples, then zero variance.
    for i in 0..30 {
        assert!(detector
            .add_trade("polymarket", "0xabc", i as f64, 1_000.0)
            .is_none());
    }
    let z = detector
        .add_trade("polymarket", "0xabc", 30.0, 100_000.0)
        .expect("outlier should alert");
    assert!(z > 3.0);
    // second whale print within the 30s cooldown is suppressed
    assert!(detector
        .add_trade("polymarket", "0xabc", 40.0, 100_000.0)
        .is_none());
}

// S6: five cross-priced prints inside 40ms trigger; a sixth within the
// cooldown does not.
#[test]
fn sweep_scenario() {
    let detector = SweepDetector::new(50, 5, 1.0);
    let t0 = 1_700_000_000.0;
    let prices = [0.50, 0.51, 0.52, 0.52, 0.53];
    let mut last = None;
    for (i, price) in prices.iter().enumerate() {
        last = detector.add_trade(
            "polymarket",
            "0xabc",
            "yes",
            t0 + i as f64 * 0.01,
            Some(*price),
            2_000.0,
        );
    }
    let alert = last.expect("burst should alert");
    assert_eq!(alert.trades, 5);
    assert_eq!(alert.total_usd, 10_000.0);
    assert!(detector
        .add_trade("polymarket", "0xabc", "yes", t0 + 0.045, Some(0.54), 2_000.0)
        .is_none());
}

// S7: without credentials the websocket adapter has no headers to send.
#[test]
fn kalshi_headers_absent_without_credentials() {
    let mut settings = test_settings();
    settings.kalshi_access_key = String::new();
    settings.kalshi_private_key = String::new();
    assert!(build_kalshi_auth_headers(&settings).unwrap().is_none());

    settings.kalshi_access_key = "key-id".to_string();
    settings.kalshi_private_key = "0x".to_string() + &"11".repeat(32);
    settings.kalshi_signing_algo = "ed25519".to_string();
    let headers = build_kalshi_auth_headers(&settings).unwrap().unwrap();
    let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "KALSHI-ACCESS-KEY",
            "KALSHI-ACCESS-SIGNATURE",
            "KALSHI-ACCESS-TIMESTAMP"
        ]
    );
}

// Query surface smoke: leaderboard, summary and analytics agree across a
// mixed flow.
#[tokio::test]
async fn query_surface_over_mixed_flow() {
    let (store, bundle) = bundle_with(None);
    let base = 1_700_000_000.0;
    for i in 0..5 {
        bundle
            .handle_polymarket_trade(&json!({
                "market": "0xabc",
                "size_usd": 1_000.0 + i as f64,
                "side": if i % 2 == 0 { "buy" } else { "sell" },
                "taker_address": "0xAAAA",
                "timestamp": base + i as f64
            }))
            .await;
    }
    bundle
        .handle_polymarket_trade(&json!({
            "market": "0xdef",
            "size_usd": 50_000.0,
            "side": "sell no",
            "taker_address": "0xBBBB",
            "timestamp": base + 10.0
        }))
        .await;

    let since = Some(base - 1.0);
    let board = store.leaderboard(10, since).await.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].address, "0xbbbb");
    // "sell no" canonicalizes to yes exposure
    assert_eq!(board[0].position, "YES");

    let summary = store.wallet_summary("0xaaaa", since).await.unwrap().unwrap();
    assert_eq!(summary.trades, 5);

    let wallets = store.all_wallets(10, since).await.unwrap();
    assert_eq!(wallets.len(), 2);
    assert_eq!(wallets[0].address, "0xbbbb");

    let analytics = store.wallet_analytics("0xaaaa", since).await.unwrap();
    assert_eq!(analytics.diversity_score, 1);
    assert!(analytics.categories.contains_key("Other"));

    let platforms = vec!["kalshi".to_string()];
    let none = store
        .recent_trades(0.0, 10, None, Some(&platforms), None)
        .await
        .unwrap();
    assert!(none.is_empty());
}
