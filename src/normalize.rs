//! Table-driven normalization of raw venue payloads.
//!
//! Every canonical field is described by an ordered list of source keys
//! (first non-empty wins) plus a post-processing step. Nothing in here
//! errors: unparsable inputs fall back to the current wall clock, an empty
//! string, or `None`, and trades that end up without a positive notional
//! are dropped by the caller.

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "time",
    "created_at",
    "createdAt",
    "created_time",
    "ts",
];

pub const MARKET_KEYS: &[&str] = &[
    "market",
    "market_id",
    "marketId",
    "condition_id",
    "conditionId",
    "id",
    "ticker",
    "market_ticker",
];

pub const SIDE_KEYS: &[&str] = &["side", "taker_side", "takerSide"];

pub const PRICE_KEYS: &[&str] = &[
    "price",
    "price_usd",
    "priceUsd",
    "price_cents",
    "yes_price",
    "no_price",
];

pub const QUANTITY_KEYS: &[&str] = &["size", "trade_size", "quantity", "qty", "count"];

pub const SIZE_USD_KEYS: &[&str] = &["size_usd", "sizeUsd", "volume_usd", "volumeUsd", "notional"];

pub const TRADE_ID_KEYS: &[&str] = &["trade_id", "id", "hash", "tx_hash", "txHash"];

pub const TAKER_KEYS: &[&str] = &["taker_address", "taker", "takerAddress"];

pub const MAKER_KEYS: &[&str] = &["maker_address", "maker", "makerAddress"];

pub const LABEL_KEYS: &[&str] = &[
    "title",
    "question",
    "name",
    "subtitle",
    "market_slug",
    "marketSlug",
    "event_slug",
    "eventSlug",
    "slug",
    "market",
    "ticker",
    "market_ticker",
];

/// Fractional seconds since epoch, from the wall clock.
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// First non-null, non-empty value among `keys`.
pub fn first_raw<'a>(trade: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    for key in keys {
        match trade.get(*key) {
            Some(Value::Null) | None => continue,
            Some(Value::String(s)) if s.is_empty() => continue,
            Some(v) => return Some(v),
        }
    }
    None
}

/// Numeric value from a JSON number or numeric string.
pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Seconds since epoch from whatever the venue sent: numeric (ms collapsed
/// to s above 1e12), ISO-8601 with an optional trailing `Z`, or garbage
/// (current wall clock).
pub fn parse_timestamp(value: Option<&Value>) -> f64 {
    let Some(value) = value else {
        return now_ts();
    };
    if let Some(mut ts) = to_f64(value) {
        if ts > 1e12 {
            ts /= 1000.0;
        }
        return ts;
    }
    if let Value::String(s) = value {
        let cleaned = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
            return dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_millis()) / 1000.0;
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, fmt) {
                return naive.and_utc().timestamp() as f64
                    + f64::from(naive.and_utc().timestamp_subsec_millis()) / 1000.0;
            }
        }
    }
    now_ts()
}

pub fn extract_timestamp(trade: &Value) -> f64 {
    parse_timestamp(first_raw(trade, TIMESTAMP_KEYS))
}

/// Venue-native market identifier, stringified; empty when absent.
pub fn normalize_market_id(trade: &Value) -> String {
    match first_raw(trade, MARKET_KEYS) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Lowercased wallet string; `None` when absent or empty.
pub fn normalize_wallet(value: Option<&Value>) -> Option<String> {
    let raw = match value? {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

/// Canonical side: {buy, bid, long, yes} -> "yes"; {sell, ask, short, no}
/// -> "no"; compound pairs resolve to the effective exposure ("sell no"
/// -> "yes"). Unknown input passes through lowercased.
pub fn normalize_side(value: &str) -> String {
    let cleaned = value.trim().to_lowercase();
    if cleaned.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = cleaned
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|p| !p.is_empty())
        .collect();
    let has = |token: &str| parts.iter().any(|p| *p == token);
    if has("sell") && has("no") {
        return "yes".to_string();
    }
    if has("buy") && has("no") {
        return "no".to_string();
    }
    if has("sell") && has("yes") {
        return "no".to_string();
    }
    if has("buy") && has("yes") {
        return "yes".to_string();
    }
    match cleaned.as_str() {
        "buy" | "bid" | "long" | "yes" => "yes".to_string(),
        "sell" | "ask" | "short" | "no" => "no".to_string(),
        _ => cleaned,
    }
}

pub fn extract_side(trade: &Value) -> String {
    match first_raw(trade, SIDE_KEYS) {
        Some(Value::String(s)) => normalize_side(s),
        _ => String::new(),
    }
}

/// Probability in [0, 1]; integer/basis-point inputs above 1.5 are divided
/// by 100 exactly once.
pub fn normalize_price(value: f64) -> f64 {
    if value > 1.5 {
        value / 100.0
    } else {
        value
    }
}

pub fn extract_price(trade: &Value) -> Option<f64> {
    for key in PRICE_KEYS {
        if let Some(value) = trade.get(*key).and_then(to_f64) {
            return Some(normalize_price(value));
        }
    }
    None
}

pub fn extract_quantity(trade: &Value) -> Option<f64> {
    for key in QUANTITY_KEYS {
        if let Some(value) = trade.get(*key).and_then(to_f64) {
            return Some(value);
        }
    }
    None
}

pub fn extract_trade_id(trade: &Value) -> Option<String> {
    match first_raw(trade, TRADE_ID_KEYS) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Notional in USD: a direct field wins, else price x quantity, else 0.
pub fn extract_size_usd(trade: &Value) -> f64 {
    for key in SIZE_USD_KEYS {
        if let Some(value) = trade.get(*key).and_then(to_f64) {
            return value;
        }
    }
    let quantity = extract_quantity(trade);
    let price = extract_price(trade);
    match (quantity, price) {
        (Some(q), Some(p)) if q > 0.0 && p > 0.0 => q * p,
        _ => 0.0,
    }
}

/// Back-fill the missing one of price/quantity by division once the
/// notional is known.
pub fn backfill_trade_numbers(
    size_usd: f64,
    price: Option<f64>,
    quantity: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    if size_usd <= 0.0 {
        return (price, quantity);
    }
    let price = match (price, quantity) {
        (None, Some(q)) if q > 0.0 => Some(size_usd / q),
        _ => price,
    };
    let quantity = match (quantity, price) {
        (None, Some(p)) if p > 0.0 => Some(size_usd / p),
        _ => quantity,
    };
    (price, quantity)
}

/// Human market title out of the raw payload; falls back to the market id.
pub fn extract_market_label(trade: &Value, fallback: &str) -> String {
    match first_raw(trade, LABEL_KEYS) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_ms_collapsed_to_seconds() {
        let trade = json!({"timestamp": 1_700_000_000_000u64});
        assert_eq!(extract_timestamp(&trade), 1_700_000_000.0);
    }

    #[test]
    fn timestamp_iso_with_trailing_z() {
        let trade = json!({"timestamp": "2024-06-01T12:00:00Z"});
        assert_eq!(extract_timestamp(&trade), 1_717_243_200.0);
    }

    #[test]
    fn timestamp_unparseable_falls_back_to_now() {
        let before = now_ts();
        let ts = parse_timestamp(Some(&json!("not a time")));
        assert!(ts >= before);
        assert!(ts <= now_ts() + 1.0);
    }

    #[test]
    fn timestamp_numeric_string() {
        let trade = json!({"created_at": "1700000000"});
        assert_eq!(extract_timestamp(&trade), 1_700_000_000.0);
    }

    #[test]
    fn side_table_is_total() {
        for (input, expected) in [
            ("buy", "yes"),
            ("BID", "yes"),
            ("long", "yes"),
            ("yes", "yes"),
            ("sell", "no"),
            ("Ask", "no"),
            ("short", "no"),
            ("no", "no"),
            ("buy yes", "yes"),
            ("sell yes", "no"),
            ("buy no", "no"),
            ("SELL NO", "yes"),
            ("sell_no", "yes"),
            ("weird", "weird"),
            ("", ""),
        ] {
            assert_eq!(normalize_side(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn price_rescaled_once() {
        assert_eq!(normalize_price(52.0), 0.52);
        assert_eq!(normalize_price(0.52), 0.52);
        assert_eq!(normalize_price(1.5), 1.5);
        let trade = json!({"price_cents": "52"});
        assert_eq!(extract_price(&trade), Some(0.52));
    }

    #[test]
    fn size_prefers_direct_field() {
        let trade = json!({"size_usd": 250.0, "size": "10", "price": "0.5"});
        assert_eq!(extract_size_usd(&trade), 250.0);
    }

    #[test]
    fn size_derived_from_price_times_quantity() {
        let trade = json!({"size": "400", "price": "0.5"});
        assert_eq!(extract_size_usd(&trade), 200.0);
    }

    #[test]
    fn size_zero_when_underivable() {
        let trade = json!({"market": "0xabc"});
        assert_eq!(extract_size_usd(&trade), 0.0);
    }

    #[test]
    fn backfill_quantity_from_price() {
        let (price, quantity) = backfill_trade_numbers(200.0, Some(0.5), None);
        assert_eq!(price, Some(0.5));
        assert!((quantity.unwrap() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn backfill_price_from_quantity() {
        let (price, quantity) = backfill_trade_numbers(200.0, None, Some(400.0));
        assert!((price.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(quantity, Some(400.0));
    }

    #[test]
    fn wallet_lowercased_and_empty_is_none() {
        assert_eq!(
            normalize_wallet(Some(&json!("0xDEADBEEF"))),
            Some("0xdeadbeef".to_string())
        );
        assert_eq!(normalize_wallet(Some(&json!(""))), None);
        assert_eq!(normalize_wallet(None), None);
    }

    #[test]
    fn market_id_first_key_wins() {
        let trade = json!({"condition_id": "0xc1", "id": "t-9"});
        assert_eq!(normalize_market_id(&trade), "0xc1");
        assert_eq!(normalize_market_id(&json!({})), "");
    }

    #[test]
    fn label_falls_back_to_market() {
        let trade = json!({"question": "Will it rain?"});
        assert_eq!(extract_market_label(&trade, "m-1"), "Will it rain?");
        assert_eq!(extract_market_label(&json!({}), "m-1"), "m-1");
    }
}
