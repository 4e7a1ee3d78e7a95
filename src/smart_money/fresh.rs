// =============================================================================
// Fresh-position detector — new money entering a strike, with decay
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// OI jump (percent) that marks a fresh position.
const OI_JUMP_PCT: f64 = 10.0;
/// Volume over rolling mean required alongside the OI jump.
const VOLUME_RATIO: f64 = 2.0;
/// Absolute OI level whose first crossing also counts as fresh interest.
const OI_SIGNIFICANCE: u64 = 1_000_000;
/// Score half-life.
const HALF_LIFE_MIN: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct FreshPosition {
    pub symbol: String,
    pub initial_score: f64,
    pub detected_at: DateTime<Utc>,
}

impl FreshPosition {
    /// Score decayed by the configured half-life.
    pub fn score_at(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_min = (now - self.detected_at).num_seconds() as f64 / 60.0;
        self.initial_score * 0.5_f64.powf(elapsed_min / HALF_LIFE_MIN as f64)
    }
}

/// Tracks fresh-position events per symbol.
#[derive(Debug, Default)]
pub struct FreshPositionDetector {
    positions: HashMap<String, FreshPosition>,
    /// Symbols whose OI has already crossed the significance threshold.
    significance_seen: HashMap<String, bool>,
}

impl FreshPositionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one observation; records and returns a fresh position when
    /// the tape shows new money.
    pub fn observe(
        &mut self,
        symbol: &str,
        oi: u64,
        prev_oi: u64,
        volume_surge_ratio: f64,
    ) -> Option<FreshPosition> {
        let oi_jump_pct = if prev_oi > 0 {
            (oi as f64 - prev_oi as f64) / prev_oi as f64 * 100.0
        } else {
            0.0
        };

        let jump_detected = oi_jump_pct >= OI_JUMP_PCT && volume_surge_ratio >= VOLUME_RATIO;

        let first_crossing = oi >= OI_SIGNIFICANCE
            && !self.significance_seen.get(symbol).copied().unwrap_or(false);
        if oi >= OI_SIGNIFICANCE {
            self.significance_seen.insert(symbol.to_string(), true);
        }

        if !jump_detected && !first_crossing {
            return None;
        }

        let initial_score = if jump_detected {
            // Stronger jumps score closer to 1.
            (0.5 + oi_jump_pct / 100.0 + (volume_surge_ratio - VOLUME_RATIO) * 0.05).min(1.0)
        } else {
            0.6
        };

        let fresh = FreshPosition {
            symbol: symbol.to_string(),
            initial_score,
            detected_at: Utc::now(),
        };
        self.positions.insert(symbol.to_string(), fresh.clone());
        Some(fresh)
    }

    /// Decayed fresh score for `symbol` (0 when nothing was detected).
    pub fn score(&self, symbol: &str) -> f64 {
        self.positions
            .get(symbol)
            .map(|p| p.score_at(Utc::now()))
            .unwrap_or(0.0)
    }

    /// Drop entries whose score has decayed to noise.
    pub fn prune(&mut self) {
        let now = Utc::now();
        self.positions.retain(|_, p| p.score_at(now) > 0.05);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oi_jump_with_volume_is_fresh() {
        let mut detector = FreshPositionDetector::new();
        let fresh = detector.observe("S1", 560_000, 500_000, 2.5);
        assert!(fresh.is_some());
        assert!(detector.score("S1") > 0.5);
    }

    #[test]
    fn oi_jump_without_volume_is_not_fresh() {
        let mut detector = FreshPositionDetector::new();
        assert!(detector.observe("S1", 560_000, 500_000, 1.2).is_none());
        assert!((detector.score("S1") - 0.0).abs() < 1e-9);
    }

    #[test]
    fn first_significance_crossing_counts_once() {
        let mut detector = FreshPositionDetector::new();
        assert!(detector.observe("S1", 1_050_000, 1_040_000, 1.0).is_some());
        // Second crossing of the same level is not fresh again.
        assert!(detector.observe("S1", 1_060_000, 1_050_000, 1.0).is_none());
    }

    #[test]
    fn score_decays_by_half_life() {
        let fresh = FreshPosition {
            symbol: "S1".into(),
            initial_score: 0.8,
            detected_at: Utc::now() - Duration::minutes(HALF_LIFE_MIN),
        };
        let decayed = fresh.score_at(Utc::now());
        assert!((decayed - 0.4).abs() < 0.02);
    }

    #[test]
    fn prune_drops_stale_entries() {
        let mut detector = FreshPositionDetector::new();
        detector.positions.insert(
            "S1".into(),
            FreshPosition {
                symbol: "S1".into(),
                initial_score: 0.8,
                detected_at: Utc::now() - Duration::hours(2),
            },
        );
        detector.prune();
        assert!(detector.positions.is_empty());
    }
}
