// =============================================================================
// Feature buckets — the discrete coordinates every trade is filed under
// =============================================================================
//
// Five axes: time of day, bias strength, Greeks regime, OI conviction, and
// volatility band. The adaptive layer only ever reasons over these buckets,
// never over raw market values.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::smart_money::OiConviction;

/// All feature buckets across the five axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureBucket {
    TimeOpening,
    TimeMorning,
    TimeLunch,
    TimeAfternoon,
    TimeClosing,

    BiasLow,
    BiasMedium,
    BiasHigh,
    BiasExtreme,

    GreeksHighGamma,
    GreeksHighTheta,
    GreeksNeutral,

    OiWeak,
    OiMedium,
    OiStrong,

    VolLow,
    VolNormal,
    VolHigh,
}

impl std::fmt::Display for FeatureBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TimeOpening => "TIME_OPENING",
            Self::TimeMorning => "TIME_MORNING",
            Self::TimeLunch => "TIME_LUNCH",
            Self::TimeAfternoon => "TIME_AFTERNOON",
            Self::TimeClosing => "TIME_CLOSING",
            Self::BiasLow => "BIAS_LOW",
            Self::BiasMedium => "BIAS_MEDIUM",
            Self::BiasHigh => "BIAS_HIGH",
            Self::BiasExtreme => "BIAS_EXTREME",
            Self::GreeksHighGamma => "GREEKS_HIGH_GAMMA",
            Self::GreeksHighTheta => "GREEKS_HIGH_THETA",
            Self::GreeksNeutral => "GREEKS_NEUTRAL",
            Self::OiWeak => "OI_WEAK",
            Self::OiMedium => "OI_MEDIUM",
            Self::OiStrong => "OI_STRONG",
            Self::VolLow => "VOL_LOW",
            Self::VolNormal => "VOL_NORMAL",
            Self::VolHigh => "VOL_HIGH",
        };
        write!(f, "{name}")
    }
}

impl FeatureBucket {
    /// Every bucket, for weight-table initialisation.
    pub fn all() -> [FeatureBucket; 18] {
        use FeatureBucket::*;
        [
            TimeOpening,
            TimeMorning,
            TimeLunch,
            TimeAfternoon,
            TimeClosing,
            BiasLow,
            BiasMedium,
            BiasHigh,
            BiasExtreme,
            GreeksHighGamma,
            GreeksHighTheta,
            GreeksNeutral,
            OiWeak,
            OiMedium,
            OiStrong,
            VolLow,
            VolNormal,
            VolHigh,
        ]
    }
}

/// One trade's five-bucket coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTuple {
    pub time: FeatureBucket,
    pub bias: FeatureBucket,
    pub greeks: FeatureBucket,
    pub oi: FeatureBucket,
    pub vol: FeatureBucket,
}

impl BucketTuple {
    pub fn as_array(&self) -> [FeatureBucket; 5] {
        [self.time, self.bias, self.greeks, self.oi, self.vol]
    }

    pub fn contains(&self, bucket: FeatureBucket) -> bool {
        self.as_array().contains(&bucket)
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// IST session slices (minute-of-day).
pub fn time_bucket(minute_of_day: u32) -> FeatureBucket {
    match minute_of_day {
        m if m < 10 * 60 => FeatureBucket::TimeOpening, // 09:15-10:00
        m if m < 12 * 60 => FeatureBucket::TimeMorning,
        m if m < 13 * 60 => FeatureBucket::TimeLunch,
        m if m < 14 * 60 + 30 => FeatureBucket::TimeAfternoon,
        _ => FeatureBucket::TimeClosing,
    }
}

/// `strength` in [0, 1] (bias confidence / 100).
pub fn bias_bucket(strength: f64) -> FeatureBucket {
    if strength < 0.25 {
        FeatureBucket::BiasLow
    } else if strength < 0.50 {
        FeatureBucket::BiasMedium
    } else if strength < 0.75 {
        FeatureBucket::BiasHigh
    } else {
        FeatureBucket::BiasExtreme
    }
}

/// Gamma dominance beats theta dominance; otherwise neutral.
pub fn greeks_bucket(gamma: f64, theta: f64) -> FeatureBucket {
    if gamma >= 0.005 {
        FeatureBucket::GreeksHighGamma
    } else if theta <= -40.0 {
        FeatureBucket::GreeksHighTheta
    } else {
        FeatureBucket::GreeksNeutral
    }
}

pub fn oi_bucket(conviction: OiConviction) -> FeatureBucket {
    match conviction {
        OiConviction::Weak => FeatureBucket::OiWeak,
        OiConviction::Medium => FeatureBucket::OiMedium,
        OiConviction::Strong => FeatureBucket::OiStrong,
    }
}

/// IV serves as the VIX proxy.
pub fn vol_bucket(iv: f64) -> FeatureBucket {
    if iv < 15.0 {
        FeatureBucket::VolLow
    } else if iv <= 25.0 {
        FeatureBucket::VolNormal
    } else {
        FeatureBucket::VolHigh
    }
}

/// Build the full five-tuple for a live signal.
pub fn extract(
    minute_of_day: u32,
    bias_confidence: f64,
    gamma: f64,
    theta: f64,
    oi_conviction: OiConviction,
    iv: f64,
) -> BucketTuple {
    BucketTuple {
        time: time_bucket(minute_of_day),
        bias: bias_bucket(bias_confidence / 100.0),
        greeks: greeks_bucket(gamma, theta),
        oi: oi_bucket(oi_conviction),
        vol: vol_bucket(iv),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_slices() {
        assert_eq!(time_bucket(9 * 60 + 30), FeatureBucket::TimeOpening);
        assert_eq!(time_bucket(10 * 60 + 30), FeatureBucket::TimeMorning);
        assert_eq!(time_bucket(12 * 60 + 30), FeatureBucket::TimeLunch);
        assert_eq!(time_bucket(13 * 60 + 45), FeatureBucket::TimeAfternoon);
        assert_eq!(time_bucket(15 * 60), FeatureBucket::TimeClosing);
    }

    #[test]
    fn bias_strength_grades() {
        assert_eq!(bias_bucket(0.10), FeatureBucket::BiasLow);
        assert_eq!(bias_bucket(0.40), FeatureBucket::BiasMedium);
        assert_eq!(bias_bucket(0.60), FeatureBucket::BiasHigh);
        assert_eq!(bias_bucket(0.85), FeatureBucket::BiasExtreme);
    }

    #[test]
    fn greeks_regime() {
        assert_eq!(greeks_bucket(0.006, -10.0), FeatureBucket::GreeksHighGamma);
        assert_eq!(greeks_bucket(0.002, -50.0), FeatureBucket::GreeksHighTheta);
        assert_eq!(greeks_bucket(0.002, -10.0), FeatureBucket::GreeksNeutral);
    }

    #[test]
    fn vol_bands() {
        assert_eq!(vol_bucket(12.0), FeatureBucket::VolLow);
        assert_eq!(vol_bucket(20.0), FeatureBucket::VolNormal);
        assert_eq!(vol_bucket(30.0), FeatureBucket::VolHigh);
    }

    #[test]
    fn tuple_contains_its_members() {
        let tuple = extract(9 * 60 + 30, 85.0, 0.004, -8.0, OiConviction::Strong, 22.0);
        assert_eq!(tuple.time, FeatureBucket::TimeOpening);
        assert_eq!(tuple.bias, FeatureBucket::BiasExtreme);
        assert!(tuple.contains(FeatureBucket::OiStrong));
        assert!(!tuple.contains(FeatureBucket::OiWeak));
        assert_eq!(tuple.as_array().len(), 5);
    }
}
