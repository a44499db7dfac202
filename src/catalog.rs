//! Per-venue market catalog.
//!
//! A refresh walks the venue's paginated market/event listing and produces
//! a fresh `{alias -> MarketMeta}` map which replaces the venue's previous
//! snapshot wholesale under a short write lock. Readers grab the snapshot
//! Arc and never block a refresh.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::models::{MarketMeta, Venue};
use crate::normalize::to_f64;

pub type MetaMap = HashMap<String, Arc<MarketMeta>>;

#[derive(Default)]
pub struct MarketCatalog {
    venues: RwLock<HashMap<Venue, Arc<MetaMap>>>,
}

impl MarketCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy-on-refresh: the venue's previous snapshot is dropped atomically.
    pub fn replace(&self, venue: Venue, entries: MetaMap) {
        info!(venue = %venue, markets = entries.len(), "market catalog refreshed");
        self.venues.write().insert(venue, Arc::new(entries));
    }

    /// First hit over the candidate alias list. Empty candidates are skipped.
    pub fn lookup(&self, venue: Venue, candidates: &[&str]) -> Option<Arc<MarketMeta>> {
        let snapshot = self.venues.read().get(&venue).cloned()?;
        for key in candidates {
            if key.is_empty() {
                continue;
            }
            if let Some(meta) = snapshot.get(*key) {
                return Some(meta.clone());
            }
        }
        None
    }

    pub fn venue_size(&self, venue: Venue) -> usize {
        self.venues
            .read()
            .get(&venue)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Configured term lists restricting the subscription universe. All terms
/// are lowercased at construction.
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub categories: Vec<String>,
    pub subcategories: Vec<String>,
    pub tags: Vec<String>,
    pub companies: Vec<String>,
}

impl CatalogFilter {
    fn lower(terms: &[String]) -> Vec<String> {
        terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn polymarket(settings: &Settings) -> Self {
        Self {
            keywords: Self::lower(&settings.polymarket_event_keywords),
            exclude_keywords: Self::lower(&settings.polymarket_event_exclude_keywords),
            categories: Self::lower(&settings.polymarket_event_categories),
            subcategories: Self::lower(&settings.polymarket_event_subcategories),
            tags: Self::lower(&settings.polymarket_event_tags),
            companies: Self::lower(&settings.polymarket_event_companies),
        }
    }

    pub fn kalshi(settings: &Settings) -> Self {
        Self {
            keywords: Self::lower(&settings.kalshi_market_keywords),
            exclude_keywords: Self::lower(&settings.kalshi_market_exclude_keywords),
            categories: Self::lower(&settings.kalshi_market_categories),
            subcategories: Self::lower(&settings.kalshi_market_subcategories),
            tags: Self::lower(&settings.kalshi_market_tags),
            companies: Self::lower(&settings.kalshi_market_companies),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.exclude_keywords.is_empty()
            && self.categories.is_empty()
            && self.subcategories.is_empty()
            && self.tags.is_empty()
            && self.companies.is_empty()
    }

    /// A market passes iff its blob avoids every exclude term and matches
    /// each configured clause (empty clause = no restriction).
    pub fn accepts(
        &self,
        text_blob: &str,
        categories: &[String],
        subcategories: &[String],
        tags: &[String],
    ) -> bool {
        if contains_any(text_blob, &self.exclude_keywords) {
            return false;
        }
        if !self.categories.is_empty() && !values_match_any(categories, &self.categories) {
            return false;
        }
        if !self.subcategories.is_empty() && !values_match_any(subcategories, &self.subcategories) {
            return false;
        }
        if !self.tags.is_empty() && !values_match_any(tags, &self.tags) {
            return false;
        }
        if !self.keywords.is_empty() && !contains_any(text_blob, &self.keywords) {
            return false;
        }
        if !self.companies.is_empty() && !contains_any(text_blob, &self.companies) {
            return false;
        }
        true
    }
}

fn contains_any(text: &str, terms: &[String]) -> bool {
    if terms.is_empty() || text.is_empty() {
        return false;
    }
    terms.iter().any(|t| text.contains(t.as_str()))
}

fn values_match_any(values: &[String], terms: &[String]) -> bool {
    values.iter().any(|v| {
        let lowered = v.to_lowercase();
        terms.iter().any(|t| lowered.contains(t.as_str()))
    })
}

/// Lowercased space-joined concatenation of every text-ish field.
pub fn build_text_blob<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for part in parts {
        let part = part.as_ref().trim();
        if part.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push(' ');
        }
        joined.push_str(part);
    }
    joined.to_lowercase()
}

pub fn value_str(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn value_strings(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Tag payloads come as plain strings or `{name|tag|label}` objects.
pub fn extract_tag_names(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => return Vec::new(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(_) => ["name", "tag", "label"]
                .iter()
                .find_map(|k| value_str(item, k)),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// `clobTokenIds` arrives as a JSON array or as a JSON-encoded string.
pub fn parse_clob_token_ids(market: &Value) -> Vec<String> {
    let raw = market
        .get("clobTokenIds")
        .or_else(|| market.get("clob_token_ids"));
    match raw {
        Some(Value::Array(_)) => value_strings(market, "clobTokenIds")
            .into_iter()
            .chain(value_strings(market, "clob_token_ids"))
            .collect(),
        Some(Value::String(s)) => serde_json::from_str::<Vec<Value>>(s)
            .map(|items| {
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn first_category(item: &Value) -> Option<String> {
    value_str(item, "category")
        .or_else(|| value_strings(item, "categories").into_iter().next())
        .or_else(|| {
            item.get("tags")
                .map(extract_tag_names)
                .and_then(|tags| tags.into_iter().next())
        })
}

fn insert_aliases(entries: &mut MetaMap, aliases: &[Option<String>], meta: &Arc<MarketMeta>) {
    for alias in aliases.iter().flatten() {
        if !alias.is_empty() {
            entries.insert(alias.clone(), meta.clone());
        }
    }
}

/// Items list from a paginated response body; venues disagree on the
/// envelope key.
pub fn extract_items(payload: &Value, keys: &[&str]) -> Vec<Value> {
    if let Value::Array(items) = payload {
        return items.iter().filter(|i| i.is_object()).cloned().collect();
    }
    for key in keys {
        if let Some(Value::Array(items)) = payload.get(*key) {
            return items.iter().filter(|i| i.is_object()).cloned().collect();
        }
    }
    Vec::new()
}

/// One Polymarket event -> MarketMeta aliased by every identifier it and
/// its nested markets expose. Returns None when the filter rejects it.
pub fn polymarket_event_meta(
    event: &Value,
    filter: &CatalogFilter,
) -> Option<(String, Arc<MarketMeta>, Vec<Option<String>>)> {
    let slug = value_str(event, "slug")
        .or_else(|| value_str(event, "event_slug"))
        .or_else(|| value_str(event, "eventSlug"))?;

    let title = value_str(event, "title")
        .or_else(|| value_str(event, "question"))
        .or_else(|| value_str(event, "name"))
        .unwrap_or_else(|| slug.clone());

    let categories = value_strings(event, "categories")
        .into_iter()
        .chain(value_str(event, "category"))
        .collect::<Vec<_>>();
    let subcategories = value_strings(event, "subcategories")
        .into_iter()
        .chain(value_str(event, "subcategory"))
        .collect::<Vec<_>>();
    let tags = event
        .get("tags")
        .map(extract_tag_names)
        .unwrap_or_default();

    let markets = match event.get("markets") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let mut blob_parts: Vec<String> = vec![title.clone(), slug.clone()];
    for key in ["subtitle", "description", "question", "ticker"] {
        if let Some(v) = value_str(event, key) {
            blob_parts.push(v);
        }
    }
    for market in &markets {
        for key in ["question", "slug", "description", "groupItemTitle"] {
            if let Some(v) = value_str(market, key) {
                blob_parts.push(v);
            }
        }
    }
    blob_parts.extend(categories.iter().cloned());
    blob_parts.extend(subcategories.iter().cloned());
    blob_parts.extend(tags.iter().cloned());
    let text_blob = build_text_blob(blob_parts);

    if !filter.accepts(&text_blob, &categories, &subcategories, &tags) {
        return None;
    }

    let volume = ["volume24hr", "volume_24hr", "volume24h", "volume", "liquidity"]
        .iter()
        .find_map(|k| event.get(*k).and_then(to_f64));

    let meta = Arc::new(MarketMeta {
        label: title,
        text_blob,
        volume,
        category: first_category(event),
    });

    let mut aliases: Vec<Option<String>> = vec![
        Some(slug.clone()),
        value_str(event, "ticker"),
        value_str(event, "id"),
    ];
    for market in &markets {
        aliases.push(value_str(market, "slug"));
        aliases.push(value_str(market, "conditionId"));
        aliases.push(value_str(market, "condition_id"));
        aliases.push(value_str(market, "id"));
        for token_id in parse_clob_token_ids(market) {
            aliases.push(Some(token_id));
        }
    }

    Some((slug, meta, aliases))
}

/// Paginated walk over the Polymarket events listing: offset-based, stops
/// on empty page, HTTP >= 400, or the configured page cap. Returns the
/// accepted event slugs (subscription universe) and the alias map.
pub async fn refresh_polymarket_events(
    http: &reqwest::Client,
    settings: &Settings,
) -> Result<(Vec<String>, MetaMap)> {
    let filter = CatalogFilter::polymarket(settings);
    let mut slugs: Vec<String> = Vec::new();
    let mut entries: MetaMap = HashMap::new();
    let mut offset = 0usize;

    for _ in 0..settings.polymarket_events_max_pages {
        let mut params: Vec<(String, String)> = vec![
            ("limit".into(), settings.polymarket_events_limit.to_string()),
            ("offset".into(), offset.to_string()),
            ("active".into(), "true".into()),
            ("closed".into(), "false".into()),
        ];
        for (k, v) in &settings.polymarket_events_params {
            params.push((k.clone(), v.clone()));
        }

        let response = http
            .get(&settings.polymarket_events_url)
            .query(&params)
            .send()
            .await
            .context("polymarket events request")?;
        if response.status().as_u16() >= 400 {
            warn!(status = %response.status(), "polymarket events request failed");
            break;
        }
        let payload: Value = response.json().await.context("polymarket events json")?;
        let items = extract_items(&payload, &["events", "data", "results", "items"]);
        if items.is_empty() {
            break;
        }
        for event in &items {
            if let Some((slug, meta, aliases)) = polymarket_event_meta(event, &filter) {
                if !slugs.contains(&slug) {
                    slugs.push(slug);
                }
                insert_aliases(&mut entries, &aliases, &meta);
            }
        }
        offset += settings.polymarket_events_limit;
    }

    Ok((slugs, entries))
}

/// One Kalshi market -> MarketMeta aliased by ticker / event ticker / id.
pub fn kalshi_market_meta(
    market: &Value,
    filter: &CatalogFilter,
) -> Option<(Arc<MarketMeta>, Vec<Option<String>>)> {
    let ticker = value_str(market, "ticker").or_else(|| value_str(market, "market_ticker"))?;
    let title = value_str(market, "title")
        .or_else(|| value_str(market, "subtitle"))
        .unwrap_or_else(|| ticker.clone());

    let categories: Vec<String> = value_str(market, "category").into_iter().collect();
    let subcategories: Vec<String> = value_str(market, "subcategory").into_iter().collect();
    let tags = market
        .get("tags")
        .map(extract_tag_names)
        .unwrap_or_default();

    let mut blob_parts: Vec<String> = vec![title.clone(), ticker.clone()];
    for key in [
        "subtitle",
        "yes_sub_title",
        "no_sub_title",
        "rules_primary",
        "event_ticker",
    ] {
        if let Some(v) = value_str(market, key) {
            blob_parts.push(v);
        }
    }
    blob_parts.extend(categories.iter().cloned());
    blob_parts.extend(subcategories.iter().cloned());
    blob_parts.extend(tags.iter().cloned());
    let text_blob = build_text_blob(blob_parts);

    if !filter.accepts(&text_blob, &categories, &subcategories, &tags) {
        return None;
    }

    let volume = ["volume_24h", "volume24h", "volume", "liquidity"]
        .iter()
        .find_map(|k| market.get(*k).and_then(to_f64));

    let meta = Arc::new(MarketMeta {
        label: title,
        text_blob,
        volume,
        category: first_category(market),
    });

    let aliases = vec![
        Some(ticker),
        value_str(market, "event_ticker"),
        value_str(market, "eventTicker"),
        value_str(market, "id"),
    ];

    Some((meta, aliases))
}

/// Cursor-paginated walk over the Kalshi markets listing; stops on a
/// missing/empty cursor, empty page, HTTP >= 400, or the page cap.
pub async fn refresh_kalshi_markets(
    http: &reqwest::Client,
    settings: &Settings,
) -> Result<MetaMap> {
    let filter = CatalogFilter::kalshi(settings);
    let mut entries: MetaMap = HashMap::new();
    let mut cursor: Option<String> = None;

    for _ in 0..settings.kalshi_markets_max_pages {
        let mut params: Vec<(String, String)> = vec![(
            "limit".into(),
            settings.kalshi_markets_limit.to_string(),
        )];
        if let Some(cursor) = &cursor {
            params.push(("cursor".into(), cursor.clone()));
        }
        for (k, v) in &settings.kalshi_markets_params {
            params.push((k.clone(), v.clone()));
        }

        let response = http
            .get(&settings.kalshi_markets_url)
            .query(&params)
            .send()
            .await
            .context("kalshi markets request")?;
        if response.status().as_u16() >= 400 {
            warn!(status = %response.status(), "kalshi markets request failed");
            break;
        }
        let payload: Value = response.json().await.context("kalshi markets json")?;
        let items = extract_items(&payload, &["markets", "data", "results"]);
        if items.is_empty() {
            break;
        }
        for market in &items {
            if let Some((meta, aliases)) = kalshi_market_meta(market, &filter) {
                insert_aliases(&mut entries, &aliases, &meta);
            }
        }
        cursor = value_str(&payload, "cursor").or_else(|| value_str(&payload, "next_token"));
        if cursor.as_deref().map(str::is_empty).unwrap_or(true) {
            break;
        }
    }

    Ok(entries)
}
