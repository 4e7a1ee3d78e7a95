// =============================================================================
// Trap filter — fake-move probability from five independent tells
// =============================================================================
//
// Each tell contributes a probability; the cumulative score decides whether
// the entry path must be blocked. Thresholds follow the scalper folklore the
// rest of the detector is built on: volume without open interest is bait.
// =============================================================================

use serde::Serialize;

/// OI below this with a volume surge looks like bait liquidity.
const LOW_OI_FLOOR: u64 = 100_000;
/// Volume surge ratio treated as "surging".
const SURGE_RATIO: f64 = 2.0;
/// Gamma change below this is flat.
const FLAT_GAMMA_EPS: f64 = 0.0001;
/// Theta burn (per day, premium %) considered aggressive near expiry.
const AGGRESSIVE_THETA_PCT: f64 = 8.0;
/// Minutes-to-expiry window where theta traps dominate.
const EXPIRY_WINDOW_MIN: i64 = 90;
/// Distance from spot (in strike steps) treated as extreme OTM.
const EXTREME_OTM_STEPS: f64 = 3.0;

/// Inputs for one trap evaluation.
#[derive(Debug, Clone, Copy)]
pub struct TrapInputs {
    pub oi: u64,
    /// Current volume over its rolling mean.
    pub volume_surge_ratio: f64,
    /// Absolute gamma change between the last two snapshots.
    pub gamma_change: f64,
    /// Daily theta as a percent of premium (positive = decay).
    pub theta_burn_pct: f64,
    pub minutes_to_expiry: i64,
    /// Price reversed direction against the last swing.
    pub price_reversal: bool,
    /// Volume shrinking while the reversal runs.
    pub volume_declining: bool,
    /// |strike - spot| in strike-interval steps.
    pub otm_steps: f64,
}

/// Trap assessment: cumulative probability plus the tells that fired.
#[derive(Debug, Clone, Serialize)]
pub struct TrapAssessment {
    pub probability: f64,
    pub should_block: bool,
    pub reasons: Vec<String>,
}

/// Evaluate the five tells. `block_threshold` is the cumulative probability
/// at which the entry path must refuse the trade.
pub fn assess(inputs: TrapInputs, block_threshold: f64) -> TrapAssessment {
    let mut probability: f64 = 0.0;
    let mut reasons = Vec::new();

    // 1. Volume surging into thin OI.
    if inputs.oi < LOW_OI_FLOOR && inputs.volume_surge_ratio >= SURGE_RATIO {
        probability += 0.30;
        reasons.push(format!(
            "volume {:.1}x into thin OI {}",
            inputs.volume_surge_ratio, inputs.oi
        ));
    }

    // 2. Volume surge with flat gamma: participation without acceleration.
    if inputs.gamma_change.abs() < FLAT_GAMMA_EPS && inputs.volume_surge_ratio >= SURGE_RATIO {
        probability += 0.25;
        reasons.push("volume surge with flat gamma".to_string());
    }

    // 3. Aggressive theta near expiry.
    if inputs.theta_burn_pct >= AGGRESSIVE_THETA_PCT
        && inputs.minutes_to_expiry <= EXPIRY_WINDOW_MIN
    {
        probability += 0.25;
        reasons.push(format!(
            "theta burn {:.1}%/day with {}min to expiry",
            inputs.theta_burn_pct, inputs.minutes_to_expiry
        ));
    }

    // 4. Reversal on declining volume.
    if inputs.price_reversal && inputs.volume_declining {
        probability += 0.20;
        reasons.push("reversal on declining volume".to_string());
    }

    // 5. Extreme OTM with thin OI.
    if inputs.otm_steps >= EXTREME_OTM_STEPS && inputs.oi < LOW_OI_FLOOR {
        probability += 0.20;
        reasons.push(format!("extreme OTM ({:.0} steps) with thin OI", inputs.otm_steps));
    }

    let probability = probability.min(1.0);

    TrapAssessment {
        probability,
        should_block: probability >= block_threshold,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean() -> TrapInputs {
        TrapInputs {
            oi: 500_000,
            volume_surge_ratio: 1.1,
            gamma_change: 0.0004,
            theta_burn_pct: 3.0,
            minutes_to_expiry: 240,
            price_reversal: false,
            volume_declining: false,
            otm_steps: 0.0,
        }
    }

    #[test]
    fn clean_tape_scores_zero() {
        let result = assess(clean(), 0.6);
        assert!((result.probability - 0.0).abs() < 1e-9);
        assert!(!result.should_block);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn thin_oi_surge_plus_flat_gamma_blocks() {
        let mut inputs = clean();
        inputs.oi = 50_000;
        inputs.volume_surge_ratio = 3.0;
        inputs.gamma_change = 0.00005;
        inputs.otm_steps = 3.0;

        // 0.30 + 0.25 + 0.20 = 0.75 >= 0.6
        let result = assess(inputs, 0.6);
        assert!(result.probability >= 0.6);
        assert!(result.should_block);
        assert_eq!(result.reasons.len(), 3);
    }

    #[test]
    fn theta_trap_fires_only_near_expiry() {
        let mut inputs = clean();
        inputs.theta_burn_pct = 10.0;
        inputs.minutes_to_expiry = 300;
        assert!((assess(inputs, 0.6).probability - 0.0).abs() < 1e-9);

        inputs.minutes_to_expiry = 45;
        let result = assess(inputs, 0.6);
        assert!((result.probability - 0.25).abs() < 1e-9);
        assert!(!result.should_block);
    }

    #[test]
    fn reversal_with_declining_volume_contributes() {
        let mut inputs = clean();
        inputs.price_reversal = true;
        inputs.volume_declining = true;
        let result = assess(inputs, 0.6);
        assert!((result.probability - 0.20).abs() < 1e-9);
    }

    #[test]
    fn probability_is_capped_at_one() {
        let inputs = TrapInputs {
            oi: 10_000,
            volume_surge_ratio: 5.0,
            gamma_change: 0.0,
            theta_burn_pct: 12.0,
            minutes_to_expiry: 10,
            price_reversal: true,
            volume_declining: true,
            otm_steps: 5.0,
        };
        let result = assess(inputs, 0.6);
        assert!(result.probability <= 1.0);
        assert!(result.should_block);
    }
}
