//! Canonical records shared across adapters, detectors and stores.

use serde::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Venues we ingest from. `as_str` matches the lowercase platform tag
/// persisted with every trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Polymarket,
    Kalshi,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Polymarket => "polymarket",
            Venue::Kalshi => "kalshi",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized trade, regardless of which venue produced it.
///
/// `timestamp` is fractional seconds since epoch. `side` is canonical
/// ("yes" / "no" / lowercased pass-through / empty). Optional fields stay
/// `None` when the source payload did not carry them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: f64,
    pub platform: String,
    pub market: String,
    pub market_label: Option<String>,
    pub size_usd: f64,
    pub side: String,
    pub actor_address: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
    pub trade_id: Option<String>,
    pub market_is_niche: Option<bool>,
    pub market_is_stock: Option<bool>,
    pub market_volume: Option<f64>,
    pub cluster_id: Option<String>,
    pub market_category: Option<String>,
}

/// Catalog entry for one market, keyed by every alias the venue exposes
/// (slug, ticker, token ids, condition id). Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMeta {
    pub label: String,
    pub text_blob: String,
    pub volume: Option<f64>,
    pub category: Option<String>,
}

/// Deserialize a field that may be a number, a numeric string, or null.
pub fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        _ => Ok(None),
    }
}

/// Deserialize a list that some venue responses return as a JSON array and
/// others as a JSON-encoded string (e.g. "[\"123\",\"456\"]").
pub fn de_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        Value::String(s) => serde_json::from_str::<Vec<String>>(&s).map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "de_string_f64_opt")]
        volume: Option<f64>,
        #[serde(default, deserialize_with = "de_string_vec")]
        token_ids: Vec<String>,
    }

    #[test]
    fn tolerant_volume_parsing() {
        let p: Probe = serde_json::from_str(r#"{"volume": "123.5", "token_ids": []}"#).unwrap();
        assert_eq!(p.volume, Some(123.5));

        let p: Probe = serde_json::from_str(r#"{"volume": 42, "token_ids": []}"#).unwrap();
        assert_eq!(p.volume, Some(42.0));

        let p: Probe = serde_json::from_str(r#"{"volume": null, "token_ids": []}"#).unwrap();
        assert_eq!(p.volume, None);
    }

    #[test]
    fn token_ids_as_string_or_array() {
        let p: Probe = serde_json::from_str(r#"{"token_ids": "[\"11\",\"22\"]"}"#).unwrap();
        assert_eq!(p.token_ids, vec!["11", "22"]);

        let p: Probe = serde_json::from_str(r#"{"token_ids": ["11", 22]}"#).unwrap();
        assert_eq!(p.token_ids, vec!["11", "22"]);
    }
}
