//! Cross-print sweep detection.
//!
//! A sweep is a burst of prints on one side of one market at more than one
//! price inside a milliseconds-wide window - the signature of aggressive
//! liquidity takeouts walking the book.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

struct SweepState {
    buffer: VecDeque<(f64, Option<f64>, f64)>,
    last_alert: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepAlert {
    pub trades: usize,
    pub total_usd: f64,
}

pub struct SweepDetector {
    window_seconds: f64,
    min_trades: usize,
    cooldown_seconds: f64,
    state: Mutex<HashMap<(String, String, String), SweepState>>,
}

impl SweepDetector {
    pub fn new(window_ms: u64, min_trades: usize, cooldown_seconds: f64) -> Self {
        Self {
            window_seconds: window_ms as f64 / 1000.0,
            min_trades,
            cooldown_seconds,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_trade(
        &self,
        platform: &str,
        market: &str,
        side: &str,
        timestamp: f64,
        price: Option<f64>,
        size_usd: f64,
    ) -> Option<SweepAlert> {
        let mut state = self.state.lock();
        let entry = state
            .entry((platform.to_string(), market.to_string(), side.to_string()))
            .or_insert_with(|| SweepState {
                buffer: VecDeque::new(),
                last_alert: 0.0,
            });

        entry.buffer.push_back((timestamp, price, size_usd));
        let cutoff = timestamp - self.window_seconds;
        while entry
            .buffer
            .front()
            .map(|&(ts, _, _)| ts < cutoff)
            .unwrap_or(false)
        {
            entry.buffer.pop_front();
        }

        if entry.buffer.len() < self.min_trades {
            return None;
        }
        let prices: Vec<f64> = entry.buffer.iter().filter_map(|&(_, p, _)| p).collect();
        if prices.len() < 2 {
            return None;
        }
        let max = prices.iter().cloned().fold(f64::MIN, f64::max);
        let min = prices.iter().cloned().fold(f64::MAX, f64::min);
        if max == min {
            return None;
        }
        if timestamp - entry.last_alert < self.cooldown_seconds {
            return None;
        }
        let alert = SweepAlert {
            trades: entry.buffer.len(),
            total_usd: entry.buffer.iter().map(|&(_, _, s)| s).sum(),
        };
        entry.last_alert = timestamp;
        drop(state);
        warn!(
            platform = %platform,
            market = %market,
            side = %side,
            trades = alert.trades,
            total_usd = alert.total_usd,
            "sweep detected"
        );
        Some(alert)
    }
}
