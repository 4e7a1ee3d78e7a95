// =============================================================================
// Market-Regime Detector — coarse behaviour classification + posture
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The seven regimes the adaptive layer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    TrendingBullish,
    TrendingBearish,
    Choppy,
    HighVolatility,
    LowVolatility,
    EventDriven,
    Normal,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TrendingBullish => "TRENDING_BULLISH",
            Self::TrendingBearish => "TRENDING_BEARISH",
            Self::Choppy => "CHOPPY",
            Self::HighVolatility => "HIGH_VOLATILITY",
            Self::LowVolatility => "LOW_VOLATILITY",
            Self::EventDriven => "EVENT_DRIVEN",
            Self::Normal => "NORMAL",
        };
        write!(f, "{name}")
    }
}

/// Raw signals the detector classifies from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegimeSignals {
    /// Session price range as a percent of spot.
    pub price_range_pct: f64,
    pub higher_highs: bool,
    pub lower_lows: bool,
    /// Current ATM IV, standing in for VIX.
    pub vix_proxy: f64,
    pub atr_pct: f64,
    /// Rate of change over the short window (percent).
    pub roc_short: f64,
    /// Rate of change over the medium window (percent).
    pub roc_medium: f64,
    /// (pe - ce) / (pe + ce) OI imbalance.
    pub oi_imbalance: f64,
    pub iv_expanding: bool,
    pub volume_surging: bool,
}

/// Recommended trading posture for the detected regime.
#[derive(Debug, Clone, Serialize)]
pub struct TradePosture {
    pub frequency_multiplier: f64,
    pub size_multiplier: f64,
    pub holding_style: String,
}

/// Classification result.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeClassification {
    pub regime: MarketRegime,
    pub confidence: f64,
    pub posture: TradePosture,
}

/// Classify the current regime. Event conditions outrank volatility bands,
/// which outrank trend reads.
pub fn detect(signals: &RegimeSignals) -> RegimeClassification {
    let (regime, confidence) = if signals.iv_expanding && signals.volume_surging {
        (MarketRegime::EventDriven, 0.80)
    } else if signals.vix_proxy >= 28.0 || signals.atr_pct >= 1.5 {
        (MarketRegime::HighVolatility, 0.75)
    } else if signals.vix_proxy < 12.0 && signals.atr_pct < 0.30 {
        (MarketRegime::LowVolatility, 0.70)
    } else if signals.higher_highs && signals.roc_short > 0.30 && signals.roc_medium > 0.0 {
        (MarketRegime::TrendingBullish, trend_confidence(signals))
    } else if signals.lower_lows && signals.roc_short < -0.30 && signals.roc_medium < 0.0 {
        (MarketRegime::TrendingBearish, trend_confidence(signals))
    } else if !signals.higher_highs && !signals.lower_lows && signals.price_range_pct < 0.40 {
        (MarketRegime::Choppy, 0.70)
    } else {
        (MarketRegime::Normal, 0.60)
    };

    let posture = posture_for(regime);
    debug!(regime = %regime, confidence, "regime classified");

    RegimeClassification {
        regime,
        confidence,
        posture,
    }
}

fn trend_confidence(signals: &RegimeSignals) -> f64 {
    let momentum = (signals.roc_short.abs() / 1.0).min(1.0);
    0.60 + 0.25 * momentum
}

fn posture_for(regime: MarketRegime) -> TradePosture {
    let (frequency, size, style) = match regime {
        MarketRegime::TrendingBullish | MarketRegime::TrendingBearish => {
            (1.2, 1.0, "let winners run")
        }
        MarketRegime::Choppy => (0.4, 0.5, "quick scalps only"),
        MarketRegime::HighVolatility => (0.6, 0.6, "small and fast"),
        MarketRegime::LowVolatility => (0.8, 0.8, "patient entries"),
        MarketRegime::EventDriven => (0.3, 0.4, "stand aside until clarity"),
        MarketRegime::Normal => (1.0, 1.0, "standard plan"),
    };
    TradePosture {
        frequency_multiplier: frequency,
        size_multiplier: size,
        holding_style: style.to_string(),
    }
}
