// =============================================================================
// CE vs PE battlefield — who controls the ATM zone
// =============================================================================
//
// Heavy PE writing under spot is support (put writers defend it); heavy CE
// writing above spot is resistance. Dominance is measured over the ATM ± N
// zone only, so far wings cannot skew the picture.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Dominance beyond this fraction hands one side control.
const CONTROL_THRESHOLD: f64 = 0.20;
/// Combined |score| below this with heavy two-sided volume is churn.
const CHOP_THRESHOLD: f64 = 0.08;

/// Zone control classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattlefieldControl {
    BullishControl,
    BearishControl,
    Balanced,
    NeutralChop,
}

impl std::fmt::Display for BattlefieldControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BullishControl => write!(f, "BULLISH_CONTROL"),
            Self::BearishControl => write!(f, "BEARISH_CONTROL"),
            Self::Balanced => write!(f, "BALANCED"),
            Self::NeutralChop => write!(f, "NEUTRAL_CHOP"),
        }
    }
}

/// One side of one strike inside the ATM zone.
#[derive(Debug, Clone, Copy)]
pub struct ZoneLeg {
    pub strike: f64,
    pub oi: u64,
    pub volume: u64,
    pub delta: f64,
}

/// Battlefield read-out for the ATM zone.
#[derive(Debug, Clone, Serialize)]
pub struct Battlefield {
    pub control: BattlefieldControl,
    /// (pe - ce) / (pe + ce) over OI; positive favours bulls.
    pub oi_dominance: f64,
    pub volume_dominance: f64,
    pub delta_skew: f64,
    pub score: f64,
}

/// Analyze the CE and PE legs of the ATM ± N zone.
pub fn analyze(ce_legs: &[ZoneLeg], pe_legs: &[ZoneLeg]) -> Battlefield {
    let ce_oi: f64 = ce_legs.iter().map(|l| l.oi as f64).sum();
    let pe_oi: f64 = pe_legs.iter().map(|l| l.oi as f64).sum();
    let ce_vol: f64 = ce_legs.iter().map(|l| l.volume as f64).sum();
    let pe_vol: f64 = pe_legs.iter().map(|l| l.volume as f64).sum();

    let oi_dominance = dominance(pe_oi, ce_oi);
    let volume_dominance = dominance(pe_vol, ce_vol);

    // Average |delta| gap between sides; calls leading means dealers are
    // hedging upside.
    let ce_delta = mean_abs_delta(ce_legs);
    let pe_delta = mean_abs_delta(pe_legs);
    let delta_skew = ce_delta - pe_delta;

    let score = oi_dominance * 0.5 + volume_dominance * 0.3 + delta_skew * 0.2;

    let total_volume = ce_vol + pe_vol;
    let control = if score >= CONTROL_THRESHOLD {
        BattlefieldControl::BullishControl
    } else if score <= -CONTROL_THRESHOLD {
        BattlefieldControl::BearishControl
    } else if score.abs() <= CHOP_THRESHOLD && total_volume > 0.0 && ce_vol > 0.0 && pe_vol > 0.0 {
        BattlefieldControl::NeutralChop
    } else {
        BattlefieldControl::Balanced
    };

    Battlefield {
        control,
        oi_dominance,
        volume_dominance,
        delta_skew,
        score,
    }
}

fn dominance(pe: f64, ce: f64) -> f64 {
    let total = pe + ce;
    if total <= 0.0 {
        0.0
    } else {
        (pe - ce) / total
    }
}

fn mean_abs_delta(legs: &[ZoneLeg]) -> f64 {
    if legs.is_empty() {
        return 0.0;
    }
    legs.iter().map(|l| l.delta.abs()).sum::<f64>() / legs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(strike: f64, oi: u64, volume: u64, delta: f64) -> ZoneLeg {
        ZoneLeg {
            strike,
            oi,
            volume,
            delta,
        }
    }

    #[test]
    fn heavy_pe_writing_is_bullish_control() {
        let ce = vec![leg(19500.0, 200_000, 30_000, 0.5)];
        let pe = vec![leg(19500.0, 900_000, 120_000, -0.5)];
        let field = analyze(&ce, &pe);
        assert_eq!(field.control, BattlefieldControl::BullishControl);
        assert!(field.oi_dominance > 0.5);
    }

    #[test]
    fn heavy_ce_writing_is_bearish_control() {
        let ce = vec![leg(19500.0, 900_000, 120_000, 0.5)];
        let pe = vec![leg(19500.0, 200_000, 30_000, -0.5)];
        let field = analyze(&ce, &pe);
        assert_eq!(field.control, BattlefieldControl::BearishControl);
    }

    #[test]
    fn symmetric_zone_is_chop_or_balance() {
        let ce = vec![leg(19500.0, 500_000, 80_000, 0.5)];
        let pe = vec![leg(19500.0, 500_000, 80_000, -0.5)];
        let field = analyze(&ce, &pe);
        assert_eq!(field.control, BattlefieldControl::NeutralChop);
        assert!(field.score.abs() < 1e-9);
    }

    #[test]
    fn empty_zone_is_balanced() {
        let field = analyze(&[], &[]);
        assert_eq!(field.control, BattlefieldControl::Balanced);
        assert!((field.score - 0.0).abs() < 1e-9);
    }
}
