//! Rolling-sum accumulation trackers: per-wallet, and a single venue-wide
//! yes-side latch for Kalshi.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

use super::windows::SlidingWindowSum;

struct WalletState {
    window: SlidingWindowSum,
    flagged: bool,
}

/// Flags a wallet the first time its rolling volume crosses the threshold;
/// the flag clears when the windowed total falls back below, re-arming the
/// alert.
pub struct WalletVolumeTracker {
    window_seconds: f64,
    threshold_usd: f64,
    state: Mutex<HashMap<String, WalletState>>,
}

impl WalletVolumeTracker {
    pub fn new(window_seconds: f64, threshold_usd: f64) -> Self {
        Self {
            window_seconds,
            threshold_usd,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `(flagged_now, windowed_total)`; `flagged_now` is true only
    /// on the crossing trade.
    pub fn add_trade(&self, wallet: &str, timestamp: f64, size_usd: f64) -> (bool, f64) {
        if wallet.is_empty() {
            return (false, 0.0);
        }
        let mut state = self.state.lock();
        let entry = state.entry(wallet.to_string()).or_insert_with(|| WalletState {
            window: SlidingWindowSum::new(self.window_seconds),
            flagged: false,
        });
        let total = entry.window.add(timestamp, size_usd);
        if total >= self.threshold_usd && !entry.flagged {
            entry.flagged = true;
            drop(state);
            info!(
                wallet = %wallet,
                total_usd = total,
                window_seconds = self.window_seconds,
                "whale wallet flagged"
            );
            return (true, total);
        }
        if total < self.threshold_usd && entry.flagged {
            entry.flagged = false;
        }
        (false, total)
    }
}

struct AccumulatorState {
    window: SlidingWindowSum,
    alert_active: bool,
}

/// One global rolling sum for a venue/side pair. Latches into "alert
/// active" when the cumulative crosses the threshold (emitting once) and
/// clears when it drops back below. The latch is deliberately global
/// rather than per-market.
pub struct VenueSideAccumulator {
    platform: &'static str,
    side: &'static str,
    threshold_usd: f64,
    state: Mutex<AccumulatorState>,
}

impl VenueSideAccumulator {
    pub fn new(
        platform: &'static str,
        side: &'static str,
        window_seconds: f64,
        threshold_usd: f64,
    ) -> Self {
        Self {
            platform,
            side,
            threshold_usd,
            state: Mutex::new(AccumulatorState {
                window: SlidingWindowSum::new(window_seconds),
                alert_active: false,
            }),
        }
    }

    /// Feed one matching trade; returns the windowed total when the latch
    /// engages.
    pub fn add(&self, timestamp: f64, size_usd: f64, market: &str) -> Option<f64> {
        let mut state = self.state.lock();
        let total = state.window.add(timestamp, size_usd);
        if total >= self.threshold_usd && !state.alert_active {
            state.alert_active = true;
            drop(state);
            warn!(
                platform = %self.platform,
                side = %self.side,
                market = %market,
                total_usd = total,
                "one-sided accumulation alert"
            );
            return Some(total);
        }
        if total < self.threshold_usd && state.alert_active {
            state.alert_active = false;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_flags_once_per_crossing() {
        let tracker = WalletVolumeTracker::new(21_600.0, 10_000.0);
        let (flagged, _) = tracker.add_trade("0xabc", 0.0, 6_000.0);
        assert!(!flagged);
        let (flagged, total) = tracker.add_trade("0xabc", 1.0, 5_000.0);
        assert!(flagged);
        assert_eq!(total, 11_000.0);
        // Still above threshold: no repeated emission.
        let (flagged, _) = tracker.add_trade("0xabc", 2.0, 1_000.0);
        assert!(!flagged);
    }

    #[test]
    fn wallet_unlatches_when_volume_ages_out() {
        let tracker = WalletVolumeTracker::new(100.0, 10_000.0);
        assert!(tracker.add_trade("0xabc", 0.0, 12_000.0).0);
        // Window has rolled past the original trade; the small add leaves
        // the total below threshold, clearing the flag...
        let (flagged, total) = tracker.add_trade("0xabc", 200.0, 1_000.0);
        assert!(!flagged);
        assert_eq!(total, 1_000.0);
        // ...so the next crossing flags again.
        assert!(tracker.add_trade("0xabc", 201.0, 11_000.0).0);
    }

    #[test]
    fn empty_wallet_is_ignored() {
        let tracker = WalletVolumeTracker::new(100.0, 1.0);
        assert_eq!(tracker.add_trade("", 0.0, 1_000_000.0), (false, 0.0));
    }

    #[test]
    fn venue_accumulator_latches_globally() {
        let acc = VenueSideAccumulator::new("kalshi", "yes", 3_600.0, 50_000.0);
        assert!(acc.add(0.0, 30_000.0, "MKT-A").is_none());
        // Crossing trade arrives on a different market - one shared latch.
        let total = acc.add(1.0, 25_000.0, "MKT-B").unwrap();
        assert_eq!(total, 55_000.0);
        assert!(acc.add(2.0, 5_000.0, "MKT-C").is_none());
    }

    #[test]
    fn venue_accumulator_rearms_after_decay() {
        let acc = VenueSideAccumulator::new("kalshi", "yes", 10.0, 50_000.0);
        assert!(acc.add(0.0, 60_000.0, "MKT").is_some());
        // Everything aged out: below threshold clears the latch.
        assert!(acc.add(100.0, 1_000.0, "MKT").is_none());
        assert!(acc.add(101.0, 60_000.0, "MKT").is_some());
    }
}
