//! Venue adapters and the shared plumbing between them: frame-to-trade
//! extraction, universe chunking, and websocket request building.

pub mod kalshi;
pub mod polymarket;

use anyhow::Result;
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::warn;

/// Lowercased first non-empty of the event-type-ish keys venues use.
fn frame_event_type(payload: &Value) -> String {
    for key in ["event", "type", "channel", "topic"] {
        if let Some(Value::String(s)) = payload.get(key) {
            let cleaned = s.trim().to_lowercase();
            if !cleaned.is_empty() {
                return cleaned;
            }
        }
    }
    String::new()
}

fn collect_objects(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.iter().filter(|i| i.is_object()).cloned().collect(),
        Value::Object(_) => vec![value.clone()],
        _ => Vec::new(),
    }
}

/// A bare payload counts as a trade if it carries any trade-shaped key.
fn looks_like_trade(payload: &Value) -> bool {
    [
        "taker_address",
        "maker_address",
        "size",
        "price",
        "market",
        "market_id",
        "market_slug",
        "event_slug",
    ]
    .iter()
    .any(|key| payload.get(*key).is_some())
}

/// Zero or more raw trade objects out of one Polymarket text frame.
/// Non-trade event types are ignored; `error` events are logged and
/// dropped.
pub fn extract_polymarket_trades(text: &str) -> Vec<Value> {
    let Ok(payload) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };
    let event_type = frame_event_type(&payload);
    if event_type == "error" {
        let detail = ["message", "error", "reason"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str));
        match detail {
            Some(detail) => warn!(error = %detail, "polymarket websocket error event"),
            None => warn!(payload = %truncate(&payload.to_string(), 200), "polymarket websocket error event"),
        }
        return Vec::new();
    }
    if !event_type.is_empty() && !matches!(event_type.as_str(), "trade" | "trades" | "activity") {
        return Vec::new();
    }

    let data = ["data", "trade", "trades", "payload"]
        .iter()
        .find_map(|k| payload.get(*k).filter(|v| !v.is_null()));
    match data {
        Some(data @ Value::Object(map)) => {
            // RTDS nests one more level: data.trades / data.trade / data.data
            let nested = ["trades", "trade", "data"]
                .iter()
                .find_map(|k| map.get(*k).filter(|v| v.is_object() || v.is_array()));
            match nested {
                Some(nested) => collect_objects(nested),
                None => vec![data.clone()],
            }
        }
        Some(data @ Value::Array(_)) => collect_objects(data),
        _ => {
            if looks_like_trade(&payload) {
                vec![payload]
            } else {
                Vec::new()
            }
        }
    }
}

/// Trades out of one Kalshi websocket frame.
pub fn extract_kalshi_ws_trades(text: &str) -> Vec<Value> {
    let Ok(payload) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };
    let msg_type = frame_event_type(&payload);
    if !msg_type.is_empty() && !matches!(msg_type.as_str(), "trade" | "trades") {
        return Vec::new();
    }
    let data = ["data", "trade", "trades", "payload"]
        .iter()
        .find_map(|k| payload.get(*k).filter(|v| !v.is_null()));
    data.map(collect_objects).unwrap_or_default()
}

/// Trades out of one Kalshi REST poll response.
pub fn extract_kalshi_rest_trades(payload: &Value) -> Vec<Value> {
    if payload.is_array() {
        return collect_objects(payload);
    }
    ["trades", "data", "results"]
        .iter()
        .find_map(|k| payload.get(*k).filter(|v| v.is_array()))
        .map(collect_objects)
        .unwrap_or_default()
}

pub fn chunk_list(items: &[String], chunk_size: usize) -> Vec<Vec<String>> {
    if chunk_size == 0 {
        return vec![items.to_vec()];
    }
    items.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

pub fn dedup_preserve_order(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Websocket handshake request with optional extra headers (auth).
pub fn build_ws_request(url: &str, headers: Option<Vec<(String, String)>>) -> Result<Request> {
    let mut request = url.into_client_request()?;
    if let Some(headers) = headers {
        let header_map = request.headers_mut();
        for (name, value) in headers {
            header_map.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn polymarket_single_trade_object() {
        let frame = json!({
            "event": "trade",
            "data": {"market": "0xabc", "size": "400", "price": "0.5"}
        });
        let trades = extract_polymarket_trades(&frame.to_string());
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0]["market"], "0xabc");
    }

    #[test]
    fn polymarket_nested_trade_list() {
        let frame = json!({
            "topic": "activity",
            "data": {"trades": [{"market": "a"}, {"market": "b"}]}
        });
        assert_eq!(extract_polymarket_trades(&frame.to_string()).len(), 2);
    }

    #[test]
    fn polymarket_bare_trade_passthrough() {
        let frame = json!({"taker_address": "0xAA", "size": "10", "price": "0.5"});
        assert_eq!(extract_polymarket_trades(&frame.to_string()).len(), 1);
    }

    #[test]
    fn polymarket_other_events_ignored() {
        for event in ["book", "price_change", "subscribed"] {
            let frame = json!({"event": event, "data": {"market": "x"}});
            assert!(extract_polymarket_trades(&frame.to_string()).is_empty());
        }
    }

    #[test]
    fn polymarket_error_event_dropped() {
        let frame = json!({"event": "error", "message": "bad subscription"});
        assert!(extract_polymarket_trades(&frame.to_string()).is_empty());
    }

    #[test]
    fn garbage_frames_yield_nothing() {
        assert!(extract_polymarket_trades("not json").is_empty());
        assert!(extract_kalshi_ws_trades("{{{{").is_empty());
    }

    #[test]
    fn kalshi_ws_trade_frame() {
        let frame = json!({
            "type": "trade",
            "data": {"market_ticker": "MKT", "count": 10, "yes_price": 50}
        });
        assert_eq!(extract_kalshi_ws_trades(&frame.to_string()).len(), 1);

        let frame = json!({"type": "orderbook_delta", "data": {"market_ticker": "MKT"}});
        assert!(extract_kalshi_ws_trades(&frame.to_string()).is_empty());
    }

    #[test]
    fn kalshi_rest_envelope_variants() {
        let payload = json!({"trades": [{"trade_id": "a"}, {"trade_id": "b"}]});
        assert_eq!(extract_kalshi_rest_trades(&payload).len(), 2);
        let payload = json!([{"trade_id": "a"}]);
        assert_eq!(extract_kalshi_rest_trades(&payload).len(), 1);
        assert!(extract_kalshi_rest_trades(&json!({"cursor": "x"})).is_empty());
    }

    #[test]
    fn chunking_and_dedup() {
        let items: Vec<String> = ["a", "b", "c", "a", "d"].iter().map(|s| s.to_string()).collect();
        let deduped = dedup_preserve_order(&items);
        assert_eq!(deduped, vec!["a", "b", "c", "d"]);
        let chunks = chunk_list(&deduped, 3);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1], vec!["d"]);
        assert_eq!(chunk_list(&deduped, 0).len(), 1);
    }
}
