//! Process entry point: wires the store, classifier, detector bundle and
//! the enabled venue adapters together, then supervises them.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use whalewatch_backend::catalog::MarketCatalog;
use whalewatch_backend::classifier::MarketClassifier;
use whalewatch_backend::config::{load_env, Settings};
use whalewatch_backend::detectors::DetectorBundle;
use whalewatch_backend::ingest::kalshi::{kalshi_poller, kalshi_ws_listener};
use whalewatch_backend::ingest::polymarket::polymarket_listener;
use whalewatch_backend::store::select_store;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let settings = Arc::new(Settings::from_env());
    info!(
        polymarket = settings.enable_polymarket,
        kalshi = settings.enable_kalshi,
        feed_mode = %settings.dash_feed_mode,
        "starting whalewatch ingestion"
    );

    let store = if settings.persist_trades {
        Some(select_store(&settings).await?)
    } else {
        None
    };
    let classifier = MarketClassifier::from_env();
    let catalog = Arc::new(MarketCatalog::new());
    let bundle = Arc::new(DetectorBundle::new(&settings, classifier, catalog, store));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs_f64(settings.http_timeout_seconds))
        .build()
        .context("build http client")?;

    let mut tasks = Vec::new();
    if settings.enable_polymarket {
        tasks.push(tokio::spawn(polymarket_listener(
            http.clone(),
            settings.clone(),
            bundle.clone(),
        )));
    }
    if settings.enable_kalshi {
        if settings.kalshi_ws_enabled {
            tasks.push(tokio::spawn(kalshi_ws_listener(
                http.clone(),
                settings.clone(),
                bundle.clone(),
            )));
        }
        if settings.kalshi_poll_enabled {
            tasks.push(tokio::spawn(kalshi_poller(
                http.clone(),
                settings.clone(),
                bundle.clone(),
            )));
        }
    }

    if tasks.is_empty() {
        warn!("no ingestion tasks enabled; set ENABLE_POLYMARKET or ENABLE_KALSHI");
        return Ok(());
    }

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whalewatch_backend=info,whalewatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
