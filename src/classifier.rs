//! Keyword-driven market classification.
//!
//! Markets are tagged niche / stock / excluded / long-dated from their text
//! blob and an optional 24h volume snapshot. Exclusion dominates: an
//! excluded or long-dated market is never niche or stock.

use chrono::{Datelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref YEAR_PATTERN: Regex = Regex::new(r"\b(20\d{2})\b").unwrap();
}

const DEFAULT_STOCK_KEYWORDS: &[&str] = &[
    "earnings",
    "eps",
    "revenue",
    "guidance",
    "ipo",
    "stock",
    "shares",
    "share price",
    "dividend",
    "buyback",
    "split",
    "nasdaq",
    "s&p",
    "spx",
    "dow",
    "dow jones",
];

const DEFAULT_NICHE_KEYWORDS: &[&str] = &[
    "arrest",
    "indictment",
    "raid",
    "investigation",
    "whistleblower",
    "leak",
    "scandal",
    "coup",
    "assassination",
    "extradition",
    "sanction",
    "venezuela",
    "maduro",
    "bankruptcy",
    "default",
    "delist",
    "fraud",
    "subpoena",
    "sec",
    "doj",
];

const DEFAULT_EXCLUDE_KEYWORDS: &[&str] = &[
    "bitcoin",
    "btc",
    "ethereum",
    "eth",
    "solana",
    "crypto",
    "super bowl",
    "nfl",
    "nba",
    "mlb",
    "nhl",
    "world cup",
    "champion",
    "playoff",
    "season",
    "ufc",
    "f1",
    "formula 1",
    "olympics",
    "soccer",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_niche: bool,
    pub is_stock: bool,
    pub is_excluded: bool,
    pub is_long_dated: bool,
    pub matched_niche: Vec<String>,
    pub matched_stock: Vec<String>,
    pub matched_exclude: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub niche_keywords: Vec<String>,
    pub stock_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub max_years_ahead: i32,
    pub niche_max_volume: Option<f64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            niche_keywords: DEFAULT_NICHE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            stock_keywords: DEFAULT_STOCK_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            exclude_keywords: DEFAULT_EXCLUDE_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_years_ahead: 1,
            niche_max_volume: None,
        }
    }
}

/// Matcher compiled once per configured term. Short alphanumeric-only terms
/// ("sec", "doj", "f1") match on word boundaries so they do not light up
/// inside unrelated words; everything else matches by substring.
#[derive(Debug, Clone)]
enum TermMatcher {
    Substring(String),
    WordBounded { term: String, pattern: Regex },
}

impl TermMatcher {
    fn compile(term: &str) -> Self {
        let alnum_only = term.chars().all(|c| c.is_ascii_alphanumeric());
        if alnum_only && term.len() <= 3 {
            let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(term)))
                .expect("escaped keyword pattern is valid");
            TermMatcher::WordBounded {
                term: term.to_string(),
                pattern,
            }
        } else {
            TermMatcher::Substring(term.to_string())
        }
    }

    fn term(&self) -> &str {
        match self {
            TermMatcher::Substring(term) => term,
            TermMatcher::WordBounded { term, .. } => term,
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            TermMatcher::Substring(term) => text.contains(term.as_str()),
            TermMatcher::WordBounded { pattern, .. } => pattern.is_match(text),
        }
    }
}

/// Stateless given its config; safe to call from every adapter task.
#[derive(Debug, Clone)]
pub struct MarketClassifier {
    niche: Vec<TermMatcher>,
    stock: Vec<TermMatcher>,
    exclude: Vec<TermMatcher>,
    max_years_ahead: i32,
    niche_max_volume: Option<f64>,
}

impl MarketClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let compile = |terms: &[String]| {
            terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .map(|t| TermMatcher::compile(&t))
                .collect()
        };
        Self {
            niche: compile(&config.niche_keywords),
            stock: compile(&config.stock_keywords),
            exclude: compile(&config.exclude_keywords),
            max_years_ahead: config.max_years_ahead,
            niche_max_volume: config.niche_max_volume,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ClassifierConfig {
            niche_keywords: load_terms("MARKET_NICHE_KEYWORDS", DEFAULT_NICHE_KEYWORDS),
            stock_keywords: load_terms("MARKET_STOCK_KEYWORDS", DEFAULT_STOCK_KEYWORDS),
            exclude_keywords: load_terms("MARKET_EXCLUDE_KEYWORDS", DEFAULT_EXCLUDE_KEYWORDS),
            max_years_ahead: load_int("MARKET_MAX_YEARS_AHEAD", 1),
            niche_max_volume: load_float("MARKET_NICHE_MAX_VOLUME_USD"),
        })
    }

    pub fn classify(&self, text: &str, volume: Option<f64>) -> Classification {
        let blob = text.to_lowercase();
        let matched_niche = matched_terms(&self.niche, &blob);
        let matched_stock = matched_terms(&self.stock, &blob);
        let matched_exclude = matched_terms(&self.exclude, &blob);
        let is_long_dated = self.is_long_dated(&blob);

        let mut is_niche = !matched_niche.is_empty();
        if let (Some(volume), Some(max_volume)) = (volume, self.niche_max_volume) {
            if volume <= max_volume {
                is_niche = true;
            }
        }

        let mut is_stock = !matched_stock.is_empty();
        let is_excluded = !matched_exclude.is_empty() || is_long_dated;
        if is_excluded {
            is_niche = false;
            is_stock = false;
        }

        Classification {
            is_niche,
            is_stock,
            is_excluded,
            is_long_dated,
            matched_niche,
            matched_stock,
            matched_exclude,
        }
    }

    fn is_long_dated(&self, text: &str) -> bool {
        self.is_long_dated_at(text, Utc::now().year())
    }

    fn is_long_dated_at(&self, text: &str, current_year: i32) -> bool {
        if self.max_years_ahead <= 0 {
            return false;
        }
        let max_year = current_year + self.max_years_ahead;
        YEAR_PATTERN
            .find_iter(text)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .any(|year| year > max_year)
    }
}

fn matched_terms(matchers: &[TermMatcher], text: &str) -> Vec<String> {
    matchers
        .iter()
        .filter(|m| m.matches(text))
        .map(|m| m.term().to_string())
        .collect()
}

fn load_terms(env_name: &str, defaults: &[&str]) -> Vec<String> {
    let raw = std::env::var(env_name).unwrap_or_default();
    let cleaned = raw.trim();
    if matches!(cleaned.to_lowercase().as_str(), "none" | "off" | "false" | "0") {
        return Vec::new();
    }
    if cleaned.is_empty() {
        return defaults.iter().map(|s| s.to_string()).collect();
    }
    cleaned
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn load_float(env_name: &str) -> Option<f64> {
    let raw = std::env::var(env_name).unwrap_or_default();
    let cleaned = raw.trim();
    if cleaned.is_empty() || matches!(cleaned.to_lowercase().as_str(), "none" | "off" | "false") {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn load_int(env_name: &str, default: i32) -> i32 {
    std::env::var(env_name)
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(default)
}
