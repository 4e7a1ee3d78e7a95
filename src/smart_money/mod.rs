// =============================================================================
// Smart-Money Detector — reading the operator's hand in the option chain
// =============================================================================
//
// Sub-detectors:
//   oi          — build-up classification (what OI is doing)
//   volume      — spike states against a rolling mean
//   trap        — fake-move probability from five tells
//   fresh       — new-position score with half-life decay
//   battlefield — CE vs PE control of the ATM zone
//
// This module composes them per strike and cross-validates through the
// OI × Greeks truth table.
// =============================================================================

pub mod battlefield;
pub mod fresh;
pub mod oi;
pub mod trap;
pub mod volume;

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::types::GreeksSnapshot;

pub use battlefield::{Battlefield, BattlefieldControl, ZoneLeg};
pub use oi::{OiBuildUp, OiClassification, OiConviction};
pub use trap::TrapAssessment;
pub use volume::VolumeState;

// =============================================================================
// OI × Greeks truth table
// =============================================================================

/// Cross-validation verdict for one strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TruthVerdict {
    SmartEntry,
    Trap,
    Explosive,
    ThetaTrap,
    Neutral,
}

impl std::fmt::Display for TruthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SmartEntry => write!(f, "SMART_ENTRY"),
            Self::Trap => write!(f, "TRAP"),
            Self::Explosive => write!(f, "EXPLOSIVE"),
            Self::ThetaTrap => write!(f, "THETA_TRAP"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Verdict plus its conviction and whether it hard-blocks entry.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TruthTableResult {
    pub verdict: TruthVerdict,
    pub probability: f64,
    pub blocks_entry: bool,
}

/// The cross-validation table:
///   Δ↑ ∧ OI↑ ∧ Vol↑          → smart entry (0.95)
///   Δ↑ ∧ OI↓ ∧ Vol↑          → trap (0.05, block)
///   Γ↑ ∧ ΔOI > 0             → explosive (0.90)
///   Θ aggressive near expiry → theta trap (block)
///   otherwise                → neutral (0.50)
pub fn truth_table(
    delta_rising: bool,
    oi_rising: bool,
    volume_rising: bool,
    gamma_rising: bool,
    theta_aggressive: bool,
) -> TruthTableResult {
    if delta_rising && oi_rising && volume_rising {
        TruthTableResult {
            verdict: TruthVerdict::SmartEntry,
            probability: 0.95,
            blocks_entry: false,
        }
    } else if delta_rising && !oi_rising && volume_rising {
        TruthTableResult {
            verdict: TruthVerdict::Trap,
            probability: 0.05,
            blocks_entry: true,
        }
    } else if gamma_rising && oi_rising {
        TruthTableResult {
            verdict: TruthVerdict::Explosive,
            probability: 0.90,
            blocks_entry: false,
        }
    } else if theta_aggressive {
        TruthTableResult {
            verdict: TruthVerdict::ThetaTrap,
            probability: 0.10,
            blocks_entry: true,
        }
    } else {
        TruthTableResult {
            verdict: TruthVerdict::Neutral,
            probability: 0.50,
            blocks_entry: false,
        }
    }
}

// =============================================================================
// Detector
// =============================================================================

/// One strike observation handed to the detector.
#[derive(Debug, Clone)]
pub struct StrikeObservation<'a> {
    pub strike: f64,
    pub spot: f64,
    pub strike_interval: f64,
    pub minutes_to_expiry: i64,
    pub current: &'a GreeksSnapshot,
    pub previous: &'a GreeksSnapshot,
}

/// Composite smart-money context for one strike at one tick.
#[derive(Debug, Clone, Serialize)]
pub struct SmartMoneyContext {
    pub buildup: OiClassification,
    pub conviction: OiConviction,
    pub volume_state: VolumeState,
    pub volume_surge_ratio: f64,
    pub fresh_score: f64,
    pub trap: TrapAssessment,
    pub validation: TruthTableResult,
    pub should_block: bool,
}

/// Stateful detector composing all sub-detectors per tracked symbol.
pub struct SmartMoneyDetector {
    trap_block_threshold: f64,
    volume_trackers: HashMap<String, volume::VolumeTracker>,
    fresh_detector: fresh::FreshPositionDetector,
}

impl SmartMoneyDetector {
    pub fn new(trap_block_threshold: f64) -> Self {
        Self {
            trap_block_threshold,
            volume_trackers: HashMap::new(),
            fresh_detector: fresh::FreshPositionDetector::new(),
        }
    }

    /// Fold one strike observation into the detector state and return the
    /// composite context the entry path consumes.
    pub fn assess(&mut self, obs: StrikeObservation<'_>) -> SmartMoneyContext {
        let cur = obs.current;
        let prev = obs.previous;

        let price_change_pct = pct_change(cur.ltp, prev.ltp);
        let oi_change_pct = pct_change(cur.oi as f64, prev.oi as f64);
        let vol_change_pct = pct_change(cur.volume as f64, prev.volume as f64);

        let buildup = oi::classify(price_change_pct, oi_change_pct, vol_change_pct);
        let conviction = oi::conviction(oi_change_pct);

        let tracker = self
            .volume_trackers
            .entry(cur.symbol.clone())
            .or_default();
        let volume_surge_ratio = tracker.surge_ratio(cur.volume);
        let volume_state = tracker.observe(cur.volume);

        self.fresh_detector
            .observe(&cur.symbol, cur.oi, prev.oi, volume_surge_ratio);
        let fresh_score = self.fresh_detector.score(&cur.symbol);

        let theta_burn_pct = if cur.ltp > 0.0 {
            cur.theta.abs() / cur.ltp * 100.0
        } else {
            0.0
        };

        let trap = trap::assess(
            trap::TrapInputs {
                oi: cur.oi,
                volume_surge_ratio,
                gamma_change: cur.gamma - prev.gamma,
                theta_burn_pct,
                minutes_to_expiry: obs.minutes_to_expiry,
                price_reversal: cur.ltp < prev.ltp,
                volume_declining: cur.volume < prev.volume,
                otm_steps: (obs.strike - obs.spot).abs() / obs.strike_interval.max(1.0),
            },
            self.trap_block_threshold,
        );

        let theta_aggressive = theta_burn_pct >= 8.0 && obs.minutes_to_expiry <= 90;
        let validation = truth_table(
            cur.delta > prev.delta,
            cur.oi > prev.oi,
            cur.volume > prev.volume,
            cur.gamma > prev.gamma,
            theta_aggressive,
        );

        let should_block = trap.should_block || validation.blocks_entry;

        debug!(
            symbol = %cur.symbol,
            buildup = %buildup.buildup,
            volume_state = %volume_state,
            trap_probability = trap.probability,
            verdict = %validation.verdict,
            should_block,
            "smart money assessed"
        );

        SmartMoneyContext {
            buildup,
            conviction,
            volume_state,
            volume_surge_ratio,
            fresh_score,
            trap,
            validation,
            should_block,
        }
    }

    /// CE vs PE control of the ATM zone, from both sides' zone legs.
    pub fn battlefield(&self, ce_legs: &[ZoneLeg], pe_legs: &[ZoneLeg]) -> Battlefield {
        battlefield::analyze(ce_legs, pe_legs)
    }

    /// Periodic housekeeping: decay-expired fresh positions.
    pub fn prune(&mut self) {
        self.fresh_detector.prune();
    }
}

fn pct_change(current: f64, previous: f64) -> f64 {
    if previous <= 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(ltp: f64, oi: u64, volume: u64, delta: f64, gamma: f64) -> GreeksSnapshot {
        GreeksSnapshot {
            symbol: "NIFTY07AUG2519500CE".into(),
            exchange: "NFO".into(),
            ltp,
            bid: ltp - 0.5,
            ask: ltp + 0.5,
            volume,
            oi,
            delta,
            gamma,
            theta: -4.0,
            vega: 12.0,
            iv: 22.0,
            timestamp: Utc::now(),
        }
    }

    fn obs<'a>(cur: &'a GreeksSnapshot, prev: &'a GreeksSnapshot) -> StrikeObservation<'a> {
        StrikeObservation {
            strike: 19500.0,
            spot: 19542.75,
            strike_interval: 50.0,
            minutes_to_expiry: 240,
            current: cur,
            previous: prev,
        }
    }

    #[test]
    fn truth_table_rows() {
        let smart = truth_table(true, true, true, true, false);
        assert_eq!(smart.verdict, TruthVerdict::SmartEntry);
        assert!((smart.probability - 0.95).abs() < 1e-9);
        assert!(!smart.blocks_entry);

        let trap = truth_table(true, false, true, false, false);
        assert_eq!(trap.verdict, TruthVerdict::Trap);
        assert!(trap.blocks_entry);

        let explosive = truth_table(false, true, false, true, false);
        assert_eq!(explosive.verdict, TruthVerdict::Explosive);
        assert!((explosive.probability - 0.90).abs() < 1e-9);

        let theta = truth_table(false, false, false, false, true);
        assert_eq!(theta.verdict, TruthVerdict::ThetaTrap);
        assert!(theta.blocks_entry);

        let neutral = truth_table(false, false, false, false, false);
        assert_eq!(neutral.verdict, TruthVerdict::Neutral);
    }

    #[test]
    fn aligned_tape_reads_as_smart_entry() {
        let mut detector = SmartMoneyDetector::new(0.6);
        let prev = snap(100.0, 500_000, 1000, 0.52, 0.0038);
        let cur = snap(101.0, 520_000, 1100, 0.55, 0.0040);

        let context = detector.assess(obs(&cur, &prev));
        assert_eq!(context.buildup.buildup, OiBuildUp::LongBuildUp);
        assert_eq!(context.validation.verdict, TruthVerdict::SmartEntry);
        assert!(!context.should_block);
    }

    #[test]
    fn rising_delta_on_falling_oi_blocks() {
        let mut detector = SmartMoneyDetector::new(0.6);
        let prev = snap(100.0, 520_000, 1000, 0.52, 0.0040);
        let cur = snap(101.0, 480_000, 1500, 0.55, 0.0040);

        let context = detector.assess(obs(&cur, &prev));
        assert_eq!(context.validation.verdict, TruthVerdict::Trap);
        assert!(context.should_block);
    }

    #[test]
    fn conviction_follows_oi_change() {
        let mut detector = SmartMoneyDetector::new(0.6);
        let prev = snap(100.0, 500_000, 1000, 0.52, 0.0038);
        let cur = snap(101.0, 530_000, 1100, 0.55, 0.0040);

        let context = detector.assess(obs(&cur, &prev));
        assert_eq!(context.conviction, OiConviction::Strong);
    }
}
