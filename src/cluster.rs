//! Semantic clustering of market labels.
//!
//! Markets whose label/description text reads the same are grouped under
//! one opaque cluster id so downstream queries can fold venue-specific
//! listings of the same real-world question together. Matching is greedy:
//! the first cluster (in insertion order) whose centroid scores at or
//! above the threshold wins; otherwise a fresh cluster is created.

use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::Venue;

#[derive(Debug)]
struct Cluster {
    id: String,
    centroid: String,
}

#[derive(Debug, Default)]
struct RegistryInner {
    clusters: Vec<Cluster>,
    market_index: HashMap<(Venue, String), String>,
}

#[derive(Debug)]
pub struct SemanticRegistry {
    match_threshold: f64,
    inner: Mutex<RegistryInner>,
}

impl SemanticRegistry {
    /// `match_threshold` is on a 0-100 similarity scale.
    pub fn new(match_threshold: f64) -> Self {
        Self {
            match_threshold,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Stable cluster id for a market key; assigns one on first sight.
    pub fn cluster_for_market(
        &self,
        venue: Venue,
        market_key: &str,
        label: Option<&str>,
        text_blob: Option<&str>,
    ) -> Option<String> {
        if market_key.is_empty() {
            return None;
        }
        let normalized = build_text(label, text_blob, market_key);
        let key = (venue, market_key.to_string());
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.market_index.get(&key) {
            return Some(existing.clone());
        }
        let matched = inner
            .clusters
            .iter()
            .find(|cluster| similarity(&normalized, &cluster.centroid) >= self.match_threshold)
            .map(|cluster| cluster.id.clone());
        let cluster_id = match matched {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                inner.clusters.push(Cluster {
                    id: id.clone(),
                    centroid: normalized,
                });
                id
            }
        };
        inner.market_index.insert(key, cluster_id.clone());
        Some(cluster_id)
    }

    pub fn cluster_count(&self) -> usize {
        self.inner.lock().clusters.len()
    }
}

/// Token-set similarity on a 0-100 scale: insensitive to word order and
/// duplicated tokens, and a label whose tokens are a subset of the other's
/// scores 100 (so "Fed cut rates by September" matches the longer
/// "Will the Fed cut rates by September?").
fn similarity(a: &str, b: &str) -> f64 {
    let tokens_a = token_set(a);
    let tokens_b = token_set(b);
    let common: Vec<&String> = tokens_a.intersection(&tokens_b).collect();
    let only_a: Vec<&String> = tokens_a.difference(&tokens_b).collect();
    let only_b: Vec<&String> = tokens_b.difference(&tokens_a).collect();

    let join = |parts: &[&String]| -> String {
        parts
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };
    let base = join(&common);
    let with_a = join(&common.iter().chain(&only_a).copied().collect::<Vec<_>>());
    let with_b = join(&common.iter().chain(&only_b).copied().collect::<Vec<_>>());

    let score = strsim::normalized_levenshtein(&base, &with_a)
        .max(strsim::normalized_levenshtein(&base, &with_b))
        .max(strsim::normalized_levenshtein(&with_a, &with_b));
    score * 100.0
}

fn token_set(text: &str) -> std::collections::BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn build_text(label: Option<&str>, text_blob: Option<&str>, fallback: &str) -> String {
    let label = label.unwrap_or("").trim();
    let blob = text_blob.unwrap_or("").trim();
    if !blob.is_empty() && !label.is_empty() && !blob.contains(label) {
        return format!("{label} {blob}");
    }
    if !blob.is_empty() {
        return blob.to_string();
    }
    if !label.is_empty() {
        return label.to_string();
    }
    fallback.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_is_stable() {
        let registry = SemanticRegistry::new(87.0);
        let a = registry
            .cluster_for_market(Venue::Polymarket, "m-1", Some("Fed cut by September"), None)
            .unwrap();
        let b = registry
            .cluster_for_market(Venue::Polymarket, "m-1", Some("different text now"), None)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn near_identical_labels_share_a_cluster() {
        let registry = SemanticRegistry::new(87.0);
        let a = registry
            .cluster_for_market(
                Venue::Polymarket,
                "m-1",
                Some("Will the Fed cut rates by September?"),
                None,
            )
            .unwrap();
        let b = registry
            .cluster_for_market(
                Venue::Kalshi,
                "FEDCUT-SEP",
                Some("Fed cut rates by September"),
                None,
            )
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.cluster_count(), 1);
    }

    #[test]
    fn unrelated_labels_get_fresh_clusters() {
        let registry = SemanticRegistry::new(87.0);
        let a = registry
            .cluster_for_market(Venue::Polymarket, "m-1", Some("Maduro arrested by June"), None)
            .unwrap();
        let b = registry
            .cluster_for_market(Venue::Polymarket, "m-2", Some("AAPL earnings beat in Q4"), None)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.cluster_count(), 2);
    }

    #[test]
    fn empty_key_yields_none() {
        let registry = SemanticRegistry::new(87.0);
        assert!(registry
            .cluster_for_market(Venue::Kalshi, "", Some("x"), None)
            .is_none());
    }

    #[test]
    fn similarity_ignores_order_case_and_duplicates() {
        assert_eq!(similarity("B a b A", "a b"), 100.0);
        assert_eq!(similarity("fed cut rates", "rates cut fed"), 100.0);
        assert!(similarity("maduro arrested", "apple earnings") < 50.0);
    }
}
