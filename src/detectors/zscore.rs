//! Rolling z-score spike detection, keyed by `(platform, market)`.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

use super::windows::RollingStatsWindow;

struct MarketState {
    window: RollingStatsWindow,
    last_alert: f64,
}

pub struct ZScoreDetector {
    window_seconds: f64,
    threshold: f64,
    min_samples: usize,
    cooldown_seconds: f64,
    state: Mutex<HashMap<(String, String), MarketState>>,
}

impl ZScoreDetector {
    pub fn new(
        window_seconds: f64,
        threshold: f64,
        min_samples: usize,
        cooldown_seconds: f64,
    ) -> Self {
        Self {
            window_seconds,
            threshold,
            min_samples,
            cooldown_seconds,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one trade; returns the z-score when an alert fired.
    pub fn add_trade(
        &self,
        platform: &str,
        market: &str,
        timestamp: f64,
        size_usd: f64,
    ) -> Option<f64> {
        let mut state = self.state.lock();
        let entry = state
            .entry((platform.to_string(), market.to_string()))
            .or_insert_with(|| MarketState {
                window: RollingStatsWindow::new(self.window_seconds, self.min_samples),
                last_alert: 0.0,
            });
        let zscore = entry.window.add(timestamp, size_usd)?;
        if zscore < self.threshold || timestamp - entry.last_alert < self.cooldown_seconds {
            return None;
        }
        entry.last_alert = timestamp;
        drop(state);
        warn!(
            platform = %platform,
            market = %market,
            z = zscore,
            size_usd,
            "z-score whale spike"
        );
        Some(zscore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_alert_below_min_samples() {
        let detector = ZScoreDetector::new(3600.0, 3.0, 30, 30.0);
        for i in 0..29 {
            assert!(detector
                .add_trade("polymarket", "m", i as f64, 1_000.0 + i as f64)
                .is_none());
        }
    }

    #[test]
    fn constant_inputs_never_alert() {
        let detector = ZScoreDetector::new(3600.0, 3.0, 30, 30.0);
        for i in 0..60 {
            assert!(detector
                .add_trade("polymarket", "m", i as f64, 1_000.0)
                .is_none());
        }
    }

    #[test]
    fn spike_alerts_once_per_cooldown() {
        let detector = ZScoreDetector::new(3600.0, 3.0, 30, 30.0);
        for i in 0..30 {
            // count below min_samples for the first 29; at 30 the variance
            // of a constant window is zero
            assert!(detector
                .add_trade("polymarket", "m", i as f64, 1_000.0)
                .is_none());
        }
        // The spike itself makes the window variance non-zero.
        let z = detector
            .add_trade("polymarket", "m", 30.0, 100_000.0)
            .expect("spike should alert");
        assert!(z > 3.0, "z = {z}");
        // Within cooldown: suppressed even though z is still extreme.
        assert!(detector
            .add_trade("polymarket", "m", 35.0, 100_000.0)
            .is_none());
    }

    #[test]
    fn keys_are_independent() {
        let detector = ZScoreDetector::new(3600.0, 3.0, 5, 30.0);
        for i in 0..5 {
            detector.add_trade("polymarket", "a", i as f64, 1_000.0 + (i % 2) as f64 * 100.0);
        }
        // Market "b" has no samples yet; nothing fires.
        assert!(detector
            .add_trade("polymarket", "b", 10.0, 1_000_000.0)
            .is_none());
    }
}
