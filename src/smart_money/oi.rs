// =============================================================================
// OI build-up classification — what the open interest tape is doing
// =============================================================================

use serde::{Deserialize, Serialize};

/// Minimum relative move treated as a real change rather than noise.
const PRICE_NOISE_PCT: f64 = 0.05;
const OI_NOISE_PCT: f64 = 0.25;

/// Classified open-interest behaviour at a strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OiBuildUp {
    LongBuildUp,
    ShortBuildUp,
    ShortCovering,
    LongUnwinding,
    Neutral,
}

impl std::fmt::Display for OiBuildUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LongBuildUp => write!(f, "LONG_BUILD_UP"),
            Self::ShortBuildUp => write!(f, "SHORT_BUILD_UP"),
            Self::ShortCovering => write!(f, "SHORT_COVERING"),
            Self::LongUnwinding => write!(f, "LONG_UNWINDING"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Conviction grade used by the adaptive bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OiConviction {
    Weak,
    Medium,
    Strong,
}

impl std::fmt::Display for OiConviction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weak => write!(f, "WEAK"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Strong => write!(f, "STRONG"),
        }
    }
}

/// Classification result with a magnitude-derived confidence.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OiClassification {
    pub buildup: OiBuildUp,
    /// 0-1, larger changes on both axes score higher.
    pub confidence: f64,
}

/// Classify Δprice × ΔOI into a build-up type.
///
/// price↑ + OI↑ = longs entering; price↓ + OI↑ = shorts entering;
/// price↑ + OI↓ = shorts covering; price↓ + OI↓ = longs unwinding.
pub fn classify(price_change_pct: f64, oi_change_pct: f64, vol_change_pct: f64) -> OiClassification {
    let price_up = price_change_pct > PRICE_NOISE_PCT;
    let price_down = price_change_pct < -PRICE_NOISE_PCT;
    let oi_up = oi_change_pct > OI_NOISE_PCT;
    let oi_down = oi_change_pct < -OI_NOISE_PCT;

    let buildup = match (price_up, price_down, oi_up, oi_down) {
        (true, _, true, _) => OiBuildUp::LongBuildUp,
        (_, true, true, _) => OiBuildUp::ShortBuildUp,
        (true, _, _, true) => OiBuildUp::ShortCovering,
        (_, true, _, true) => OiBuildUp::LongUnwinding,
        _ => OiBuildUp::Neutral,
    };

    let confidence = if buildup == OiBuildUp::Neutral {
        0.0
    } else {
        // Magnitude of each change drives conviction; volume agreement tops
        // it up.
        let price_part = (price_change_pct.abs() / 2.0).min(1.0) * 0.4;
        let oi_part = (oi_change_pct.abs() / 5.0).min(1.0) * 0.4;
        let vol_part = (vol_change_pct.max(0.0) / 50.0).min(1.0) * 0.2;
        (price_part + oi_part + vol_part).min(1.0)
    };

    OiClassification { buildup, confidence }
}

/// Grade OI conviction from the relative OI change.
pub fn conviction(oi_change_pct: f64) -> OiConviction {
    let magnitude = oi_change_pct.abs();
    if magnitude >= 5.0 {
        OiConviction::Strong
    } else if magnitude >= 1.0 {
        OiConviction::Medium
    } else {
        OiConviction::Weak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_build_up() {
        let c = classify(1.0, 4.0, 10.0);
        assert_eq!(c.buildup, OiBuildUp::LongBuildUp);
        assert!(c.confidence > 0.3);
    }

    #[test]
    fn short_build_up() {
        let c = classify(-1.0, 4.0, 10.0);
        assert_eq!(c.buildup, OiBuildUp::ShortBuildUp);
    }

    #[test]
    fn short_covering_and_unwinding() {
        assert_eq!(classify(1.0, -4.0, 0.0).buildup, OiBuildUp::ShortCovering);
        assert_eq!(classify(-1.0, -4.0, 0.0).buildup, OiBuildUp::LongUnwinding);
    }

    #[test]
    fn noise_is_neutral() {
        let c = classify(0.01, 0.1, 0.0);
        assert_eq!(c.buildup, OiBuildUp::Neutral);
        assert!((c.confidence - 0.0).abs() < 1e-9);
    }

    #[test]
    fn bigger_moves_score_higher() {
        let small = classify(0.2, 0.5, 5.0);
        let large = classify(2.0, 6.0, 60.0);
        assert!(large.confidence > small.confidence);
    }

    #[test]
    fn conviction_grades() {
        assert_eq!(conviction(0.4), OiConviction::Weak);
        assert_eq!(conviction(2.0), OiConviction::Medium);
        assert_eq!(conviction(-6.0), OiConviction::Strong);
    }
}
