//! Polymarket streaming adapters.
//!
//! Two modes share the supervision shape (resolve universe, shard, connect,
//! subscribe, consume, reconnect with doubling backoff):
//! - RTDS: the high-cardinality real-time data stream keyed by event slugs,
//!   optionally wildcarded.
//! - CLOB: the lower-level order-book channel keyed by clob token ids.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{build_ws_request, chunk_list, dedup_preserve_order, extract_polymarket_trades};
use crate::catalog::{
    extract_items, parse_clob_token_ids, refresh_polymarket_events, CatalogFilter,
};
use crate::config::Settings;
use crate::detectors::DetectorBundle;
use crate::models::Venue;
use crate::normalize::{normalize_market_id, now_ts, to_f64};

type HmacSha256 = Hmac<Sha256>;

pub async fn polymarket_listener(
    http: reqwest::Client,
    settings: Arc<Settings>,
    bundle: Arc<DetectorBundle>,
) {
    match settings.polymarket_stream_mode.trim().to_lowercase().as_str() {
        "clob" | "orderbook" => clob_listener(http, settings, bundle).await,
        _ => rtds_listener(http, settings, bundle).await,
    }
}

async fn rtds_listener(
    http: reqwest::Client,
    settings: Arc<Settings>,
    bundle: Arc<DetectorBundle>,
) {
    loop {
        let universe = resolve_event_universe(&http, &settings, &bundle).await;
        if universe.is_empty() {
            warn!("no polymarket event slugs to subscribe to, retrying soon");
            sleep(Duration::from_secs(30)).await;
            continue;
        }
        let shards = chunk_list(&universe, settings.polymarket_rtds_chunk_size);
        info!(
            slugs = universe.len(),
            shards = shards.len(),
            "starting polymarket rtds workers"
        );
        let mut handles = Vec::with_capacity(shards.len());
        for (shard_id, shard) in shards.into_iter().enumerate() {
            let settings = settings.clone();
            let bundle = bundle.clone();
            handles.push(tokio::spawn(async move {
                rtds_worker(shard_id, shard, settings, bundle).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        sleep(Duration::from_secs(5)).await;
    }
}

/// Explicit slug list, `["*"]` when wildcarded with no filters, or the
/// filtered events catalog. A catalog refresh runs alongside so the
/// classifier always has metadata to look up.
async fn resolve_event_universe(
    http: &reqwest::Client,
    settings: &Settings,
    bundle: &DetectorBundle,
) -> Vec<String> {
    let refreshed = match refresh_polymarket_events(http, settings).await {
        Ok((slugs, entries)) => {
            if !entries.is_empty() {
                bundle.catalog().replace(Venue::Polymarket, entries);
            }
            Some(slugs)
        }
        Err(e) => {
            warn!(error = %e, "polymarket events refresh failed");
            None
        }
    };

    if !settings.polymarket_rtds_event_slugs.is_empty() {
        return dedup_preserve_order(&settings.polymarket_rtds_event_slugs);
    }
    if settings.polymarket_rtds_wildcard && CatalogFilter::polymarket(settings).is_empty() {
        return vec!["*".to_string()];
    }
    refreshed
        .map(|slugs| dedup_preserve_order(&slugs))
        .unwrap_or_default()
}

async fn rtds_worker(
    shard_id: usize,
    slugs: Vec<String>,
    settings: Arc<Settings>,
    bundle: Arc<DetectorBundle>,
) {
    let mut reconnect_delay = settings.polymarket_reconnect_min;
    loop {
        match run_rtds_connection(shard_id, &slugs, &settings, &bundle, &mut reconnect_delay).await
        {
            Ok(()) => info!(shard = shard_id, "polymarket rtds connection closed"),
            Err(e) => warn!(
                shard = shard_id,
                error = %e,
                reconnect_in = reconnect_delay,
                "polymarket rtds disconnected"
            ),
        }
        sleep(Duration::from_secs_f64(reconnect_delay)).await;
        reconnect_delay = (reconnect_delay * 2.0).min(settings.polymarket_reconnect_max);
    }
}

async fn run_rtds_connection(
    shard_id: usize,
    slugs: &[String],
    settings: &Settings,
    bundle: &DetectorBundle,
    reconnect_delay: &mut f64,
) -> Result<()> {
    let request = build_ws_request(
        &settings.polymarket_rtds_url,
        build_polymarket_auth_headers(settings),
    )?;
    let (ws, _resp) = connect_async(request).await.context("connect rtds ws")?;
    let (mut write, mut read) = ws.split();

    info!(shard = shard_id, slugs = slugs.len(), "polymarket rtds subscribing");
    for slug in slugs {
        let payload = build_rtds_subscription(slug, settings);
        write
            .send(Message::Text(payload.to_string()))
            .await
            .context("send rtds subscription")?;
        sleep(Duration::from_secs_f64(settings.polymarket_rtds_subscribe_pause)).await;
    }
    *reconnect_delay = settings.polymarket_reconnect_min;

    consume_frames(&mut write, &mut read, settings, bundle).await
}

fn build_rtds_subscription(slug: &str, settings: &Settings) -> Value {
    if settings.polymarket_rtds_subscribe_mode.trim().to_lowercase() == "command" {
        json!({
            "type": "subscribe",
            "topic": settings.polymarket_rtds_topic,
            "event_slug": slug,
            "resources": [settings.polymarket_rtds_type],
        })
    } else {
        json!({
            "topic": settings.polymarket_rtds_topic,
            "type": settings.polymarket_rtds_type,
            "event_slug": slug,
        })
    }
}

async fn clob_listener(
    http: reqwest::Client,
    settings: Arc<Settings>,
    bundle: Arc<DetectorBundle>,
) {
    loop {
        let token_ids = resolve_clob_universe(&http, &settings).await;
        if token_ids.is_empty() {
            warn!("no polymarket markets to subscribe to, retrying soon");
            sleep(Duration::from_secs(30)).await;
            continue;
        }
        let mode = settings.polymarket_subscribe_mode.trim().to_lowercase();
        let shards = match mode.as_str() {
            "shard" | "sharded" => chunk_list(&token_ids, settings.polymarket_rtds_chunk_size),
            "per-market" | "per_market" => chunk_list(&token_ids, 1),
            _ => vec![token_ids],
        };
        info!(shards = shards.len(), "starting polymarket clob workers");
        let mut handles = Vec::with_capacity(shards.len());
        for (shard_id, shard) in shards.into_iter().enumerate() {
            let settings = settings.clone();
            let bundle = bundle.clone();
            handles.push(tokio::spawn(async move {
                clob_worker(shard_id, shard, settings, bundle).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        sleep(Duration::from_secs(5)).await;
    }
}

async fn clob_worker(
    shard_id: usize,
    token_ids: Vec<String>,
    settings: Arc<Settings>,
    bundle: Arc<DetectorBundle>,
) {
    let mut reconnect_delay = settings.polymarket_reconnect_min;
    loop {
        match run_clob_connection(shard_id, &token_ids, &settings, &bundle, &mut reconnect_delay)
            .await
        {
            Ok(()) => info!(shard = shard_id, "polymarket clob connection closed"),
            Err(e) => warn!(
                shard = shard_id,
                error = %e,
                reconnect_in = reconnect_delay,
                "polymarket clob disconnected"
            ),
        }
        sleep(Duration::from_secs_f64(reconnect_delay)).await;
        reconnect_delay = (reconnect_delay * 2.0).min(settings.polymarket_reconnect_max);
    }
}

async fn run_clob_connection(
    shard_id: usize,
    token_ids: &[String],
    settings: &Settings,
    bundle: &DetectorBundle,
    reconnect_delay: &mut f64,
) -> Result<()> {
    let request = build_ws_request(
        &settings.polymarket_ws_url,
        build_polymarket_auth_headers(settings),
    )?;
    let (ws, _resp) = connect_async(request).await.context("connect clob ws")?;
    let (mut write, mut read) = ws.split();

    let unique_ids = dedup_preserve_order(token_ids);
    info!(
        shard = shard_id,
        tokens = unique_ids.len(),
        "polymarket clob subscribing"
    );
    for token_id in &unique_ids {
        let payload = json!({
            "type": "subscribe",
            "channel": settings.polymarket_channel,
            "market": token_id,
        });
        write
            .send(Message::Text(payload.to_string()))
            .await
            .context("send clob subscription")?;
        sleep(Duration::from_millis(5)).await;
    }
    *reconnect_delay = settings.polymarket_reconnect_min;

    consume_frames(&mut write, &mut read, settings, bundle).await
}

/// Shared read loop: keepalive pings, pong replies, trade dispatch.
async fn consume_frames<W, R>(
    write: &mut W,
    read: &mut R,
    settings: &Settings,
    bundle: &DetectorBundle,
) -> Result<()>
where
    W: futures_util::Sink<Message> + Unpin,
    R: futures_util::Stream<
            Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    let mut ping = interval(Duration::from_secs_f64(
        settings.polymarket_ping_interval.max(1.0),
    ));
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                let _ = write.send(Message::Ping(Vec::new())).await;
            }
            frame = read.next() => {
                let Some(frame) = frame else {
                    return Ok(());
                };
                match frame {
                    Ok(Message::Text(text)) => {
                        for raw in extract_polymarket_trades(&text) {
                            bundle.handle_polymarket_trade(&raw).await;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "polymarket ws close frame");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => return Err(anyhow!("polymarket ws error: {e}")),
                }
            }
        }
    }
}

/// Configured token ids, or the top-N gamma markets by 24h volume
/// (active only) expanded to their clob token ids.
async fn resolve_clob_universe(http: &reqwest::Client, settings: &Settings) -> Vec<String> {
    if !settings.polymarket_market_ids.is_empty() {
        return dedup_preserve_order(&settings.polymarket_market_ids);
    }
    match fetch_top_market_token_ids(http, settings).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "polymarket markets request failed");
            Vec::new()
        }
    }
}

async fn fetch_top_market_token_ids(
    http: &reqwest::Client,
    settings: &Settings,
) -> Result<Vec<String>> {
    let mut params: Vec<(String, String)> =
        vec![("limit".into(), settings.polymarket_top_n.to_string())];
    for (k, v) in &settings.polymarket_markets_params {
        params.push((k.clone(), v.clone()));
    }
    for (key, default) in [("active", "true"), ("closed", "false")] {
        if !params.iter().any(|(k, _)| k == key) {
            params.push((key.into(), default.into()));
        }
    }

    let response = http
        .get(&settings.polymarket_markets_url)
        .query(&params)
        .send()
        .await
        .context("polymarket markets request")?;
    if response.status().as_u16() >= 400 {
        return Err(anyhow!(
            "polymarket markets request failed status={}",
            response.status()
        ));
    }
    let payload: Value = response.json().await.context("polymarket markets json")?;

    let mut items = extract_items(&payload, &["markets", "data", "results", "items"]);
    items.retain(is_market_active);
    items.sort_by(|a, b| {
        market_volume(b)
            .partial_cmp(&market_volume(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut token_ids = Vec::new();
    for item in items.iter().take(settings.polymarket_top_n) {
        let clob_ids = parse_clob_token_ids(item);
        if clob_ids.is_empty() {
            let market_id = normalize_market_id(item);
            if !market_id.is_empty() {
                token_ids.push(market_id);
            }
        } else {
            token_ids.extend(clob_ids);
        }
    }
    Ok(dedup_preserve_order(&token_ids))
}

fn is_market_active(item: &Value) -> bool {
    if item.get("active").map(|v| v == &Value::Bool(false)).unwrap_or(false) {
        return false;
    }
    if item.get("closed").map(|v| v == &Value::Bool(true)).unwrap_or(false) {
        return false;
    }
    if item.get("archived").map(|v| v == &Value::Bool(true)).unwrap_or(false) {
        return false;
    }
    true
}

fn market_volume(item: &Value) -> f64 {
    ["volume24hr", "volume_24hr", "volume24h", "volume", "liquidity"]
        .iter()
        .find_map(|k| item.get(*k).and_then(to_f64))
        .unwrap_or(0.0)
}

/// L2 auth headers, present only when signing is enabled and fully
/// configured. Prehash is `timestamp + GET + path + body` over an empty
/// body; the secret is decoded from base64 when valid, else used as raw
/// UTF-8.
pub fn build_polymarket_auth_headers(settings: &Settings) -> Option<Vec<(String, String)>> {
    if !settings.polymarket_l2_enabled {
        return None;
    }
    if settings.polymarket_l2_api_key.is_empty()
        || settings.polymarket_l2_api_secret.is_empty()
        || settings.polymarket_l2_passphrase.is_empty()
    {
        return None;
    }
    let timestamp = (now_ts() as i64).to_string();
    let signature = build_polymarket_signature(
        &timestamp,
        "GET",
        &settings.polymarket_l2_request_path,
        "",
        &settings.polymarket_l2_api_secret,
    );
    Some(vec![
        ("Poly-Api-Key".to_string(), settings.polymarket_l2_api_key.clone()),
        (
            "Poly-Api-Passphrase".to_string(),
            settings.polymarket_l2_passphrase.clone(),
        ),
        ("Poly-Api-Timestamp".to_string(), timestamp),
        ("Poly-Api-Signature".to_string(), signature),
    ])
}

pub fn build_polymarket_signature(
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
    api_secret: &str,
) -> String {
    let secret = decode_polymarket_api_secret(api_secret);
    let prehash = format!("{timestamp}{}{path}{body}", method.to_uppercase());
    let mut mac =
        HmacSha256::new_from_slice(&secret).expect("HMAC can take key of any size");
    mac.update(prehash.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn decode_polymarket_api_secret(api_secret: &str) -> Vec<u8> {
    let cleaned = api_secret.trim();
    BASE64
        .decode(cleaned)
        .unwrap_or_else(|_| cleaned.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::from_env()
    }

    #[test]
    fn rtds_subscription_shapes() {
        let mut s = settings();
        s.polymarket_rtds_subscribe_mode = "simple".to_string();
        let payload = build_rtds_subscription("some-event", &s);
        assert_eq!(payload["topic"], "activity");
        assert_eq!(payload["type"], "trades");
        assert_eq!(payload["event_slug"], "some-event");
        assert!(payload.get("resources").is_none());

        s.polymarket_rtds_subscribe_mode = "command".to_string();
        let payload = build_rtds_subscription("some-event", &s);
        assert_eq!(payload["type"], "subscribe");
        assert_eq!(payload["resources"], json!(["trades"]));
    }

    #[test]
    fn signature_is_deterministic_and_base64() {
        let sig = build_polymarket_signature("1700000000", "get", "/ws", "", "topsecret");
        let again = build_polymarket_signature("1700000000", "GET", "/ws", "", "topsecret");
        // method is upper-cased into the prehash, so case does not matter
        assert_eq!(sig, again);
        let decoded = BASE64.decode(&sig).unwrap();
        assert_eq!(decoded.len(), 32);

        let other = build_polymarket_signature("1700000001", "GET", "/ws", "", "topsecret");
        assert_ne!(sig, other);
    }

    #[test]
    fn secret_decodes_base64_or_raw() {
        // "aGVsbG8=" is valid base64 for "hello"
        assert_eq!(decode_polymarket_api_secret("aGVsbG8="), b"hello");
        // invalid base64 falls back to raw utf-8 bytes
        assert_eq!(decode_polymarket_api_secret("!!not-base64!!"), b"!!not-base64!!");
    }

    #[test]
    fn auth_headers_require_full_config() {
        let mut s = settings();
        s.polymarket_l2_enabled = false;
        assert!(build_polymarket_auth_headers(&s).is_none());

        s.polymarket_l2_enabled = true;
        s.polymarket_l2_api_key = "key".into();
        s.polymarket_l2_api_secret = String::new();
        s.polymarket_l2_passphrase = "phrase".into();
        assert!(build_polymarket_auth_headers(&s).is_none());

        s.polymarket_l2_api_secret = "secret".into();
        let headers = build_polymarket_auth_headers(&s).unwrap();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Poly-Api-Key",
                "Poly-Api-Passphrase",
                "Poly-Api-Timestamp",
                "Poly-Api-Signature"
            ]
        );
    }

    #[test]
    fn active_filter_and_volume_sort_keys() {
        assert!(is_market_active(&json!({"active": true, "closed": false})));
        assert!(!is_market_active(&json!({"active": false})));
        assert!(!is_market_active(&json!({"closed": true})));
        assert!(!is_market_active(&json!({"archived": true})));
        // fields absent: treated as active
        assert!(is_market_active(&json!({})));

        assert_eq!(market_volume(&json!({"volume24hr": "1500.5"})), 1500.5);
        assert_eq!(market_volume(&json!({"liquidity": 10})), 10.0);
        assert_eq!(market_volume(&json!({})), 0.0);
    }
}
