// =============================================================================
// Market-State Engine — directional permission, not entry signals
// =============================================================================
//
// Produces BULLISH / BEARISH / NO_TRADE from delta, gamma momentum, OI-volume-
// price alignment, IV health, and micro-structure. The engine is a strict
// gate: any single failing factor forces NO_TRADE, and SIDEWAYS structure
// overrides everything.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EntryFilters;

/// Rolling history depth for every input series.
const MAX_HISTORY: usize = 100;

/// IV below this is premium-dead territory.
const IV_EXTREME_LOW: f64 = 12.0;
/// IV above this is scalp-only territory.
const IV_EXTREME_HIGH: f64 = 50.0;

fn push_bounded(history: &mut VecDeque<f64>, value: f64) {
    history.push_back(value);
    while history.len() > MAX_HISTORY {
        history.pop_front();
    }
}

// =============================================================================
// Public types
// =============================================================================

/// Market permission states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasState {
    Bullish,
    Bearish,
    NoTrade,
    Unknown,
}

impl std::fmt::Display for BiasState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::NoTrade => write!(f, "NO_TRADE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Micro-structure classification over the last ten price samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStructure {
    HigherHighs,
    LowerLows,
    Sideways,
    Unknown,
}

impl std::fmt::Display for MarketStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HigherHighs => write!(f, "HH-HL"),
            Self::LowerLows => write!(f, "LL-LH"),
            Self::Sideways => write!(f, "SIDEWAYS"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// The factor values behind the latest bias decision.
#[derive(Debug, Clone, Serialize)]
pub struct BiasMetrics {
    pub delta_signal: f64,
    pub gamma_rising: bool,
    pub oi_volume_align: f64,
    pub iv_health: f64,
    pub market_structure: MarketStructure,
}

/// Latest bias decision plus its inputs.
#[derive(Debug, Clone, Serialize)]
pub struct BiasReading {
    pub state: BiasState,
    /// Permission confidence, 0-100.
    pub confidence: f64,
    pub metrics: BiasMetrics,
    pub updated_at: DateTime<Utc>,
}

impl BiasReading {
    fn unknown() -> Self {
        Self {
            state: BiasState::Unknown,
            confidence: 0.0,
            metrics: BiasMetrics {
                delta_signal: 0.0,
                gamma_rising: false,
                oi_volume_align: 0.0,
                iv_health: 0.0,
                market_structure: MarketStructure::Unknown,
            },
            updated_at: Utc::now(),
        }
    }
}

/// One tick of bias inputs, taken from the chosen leg's current and previous
/// Greeks snapshots.
#[derive(Debug, Clone, Copy)]
pub struct BiasInputs {
    pub delta: f64,
    pub prev_gamma: f64,
    pub gamma: f64,
    pub oi: u64,
    pub oi_change: f64,
    pub ltp: f64,
    pub prev_ltp: f64,
    pub volume: u64,
    pub prev_volume: u64,
    pub iv: f64,
    pub prev_iv: f64,
}

// =============================================================================
// Engine
// =============================================================================

pub struct BiasEngine {
    filters: EntryFilters,
    price_history: VecDeque<f64>,
    gamma_history: VecDeque<f64>,
    current: BiasReading,
}

impl BiasEngine {
    pub fn new(filters: EntryFilters) -> Self {
        Self {
            filters,
            price_history: VecDeque::new(),
            gamma_history: VecDeque::new(),
            current: BiasReading::unknown(),
        }
    }

    pub fn current(&self) -> BiasReading {
        self.current.clone()
    }

    /// Recompute the bias from this tick's inputs.
    pub fn update(&mut self, inputs: BiasInputs) -> BiasReading {
        push_bounded(&mut self.price_history, inputs.ltp);
        push_bounded(&mut self.gamma_history, inputs.gamma);

        let delta_signal = self.delta_signal(inputs.delta);
        let gamma_rising = self.gamma_rising(inputs.gamma, inputs.prev_gamma);
        let alignment = alignment_score(
            inputs.oi_change,
            inputs.ltp,
            inputs.prev_ltp,
            inputs.volume,
            inputs.prev_volume,
        );
        let iv_health = self.iv_health(inputs.iv, inputs.prev_iv);
        let structure = self.market_structure();

        let (state, confidence) =
            decide(delta_signal, gamma_rising, alignment, iv_health, structure);

        self.current = BiasReading {
            state,
            confidence,
            metrics: BiasMetrics {
                delta_signal,
                gamma_rising,
                oi_volume_align: alignment,
                iv_health,
                market_structure: structure,
            },
            updated_at: Utc::now(),
        };

        debug!(
            state = %state,
            confidence,
            delta_signal,
            gamma_rising,
            alignment,
            iv_health,
            structure = %structure,
            "bias updated"
        );

        self.current.clone()
    }

    /// +1 strong bullish, -1 strong bearish, 0 no permission.
    fn delta_signal(&self, delta: f64) -> f64 {
        if delta >= self.filters.bullish_delta_min {
            1.0
        } else if delta <= self.filters.bearish_delta_max {
            -1.0
        } else {
            0.0
        }
    }

    /// Gamma momentum over the last 3 history points when available; a flat
    /// trend (below the epsilon) counts as not rising.
    fn gamma_rising(&self, gamma: f64, prev_gamma: f64) -> bool {
        if self.gamma_history.len() < 3 {
            return gamma >= prev_gamma;
        }
        let recent: Vec<f64> = self
            .gamma_history
            .iter()
            .rev()
            .take(3)
            .rev()
            .copied()
            .collect();
        recent[2] - recent[0] >= self.filters.no_trade_gamma_flat
    }

    fn iv_health(&self, iv: f64, prev_iv: f64) -> f64 {
        let (zone_low, zone_high) = self.filters.iv_safe_zone;

        let mut health: f64 = if iv >= zone_low && iv <= zone_high {
            0.5
        } else if iv < IV_EXTREME_LOW {
            -0.5
        } else if iv > IV_EXTREME_HIGH {
            -0.3
        } else {
            0.2
        };

        let iv_change_pct = if prev_iv > 0.0 {
            (iv - prev_iv) / prev_iv * 100.0
        } else {
            0.0
        };
        if iv_change_pct < self.filters.reject_iv_drop_percent {
            health -= 0.5;
        }

        health.clamp(-1.0, 1.0)
    }

    /// Last 5 vs previous 5 price samples.
    fn market_structure(&self) -> MarketStructure {
        if self.price_history.len() < 10 {
            return MarketStructure::Unknown;
        }
        let prices: Vec<f64> = self.price_history.iter().copied().collect();
        let (prior, recent) = prices.split_at(prices.len() - 5);
        let prior = &prior[prior.len() - 5..];

        let recent_high = recent.iter().cloned().fold(f64::MIN, f64::max);
        let recent_low = recent.iter().cloned().fold(f64::MAX, f64::min);
        let prior_high = prior.iter().cloned().fold(f64::MIN, f64::max);
        let prior_low = prior.iter().cloned().fold(f64::MAX, f64::min);

        if recent_high > prior_high && recent_low > prior_low {
            MarketStructure::HigherHighs
        } else if recent_high < prior_high && recent_low < prior_low {
            MarketStructure::LowerLows
        } else {
            MarketStructure::Sideways
        }
    }
}

/// OI + price + volume alignment:
///   +1.0  OI up with price and volume following (fresh accumulation)
///   +0.5  OI up with one of price/volume following
///   -1.0  OI up with neither following (operator trap)
///    0.0  OI not rising
fn alignment_score(
    oi_change: f64,
    ltp: f64,
    prev_ltp: f64,
    volume: u64,
    prev_volume: u64,
) -> f64 {
    let oi_rising = oi_change > 0.0;
    let ltp_rising = ltp > prev_ltp;
    let vol_rising = volume > prev_volume;

    if !oi_rising {
        return 0.0;
    }
    if ltp_rising && vol_rising {
        1.0
    } else if ltp_rising || vol_rising {
        0.5
    } else {
        -1.0
    }
}

/// The rule table. Strict: every factor must clear its bar, and SIDEWAYS
/// always blocks.
fn decide(
    delta_signal: f64,
    gamma_rising: bool,
    alignment: f64,
    iv_health: f64,
    structure: MarketStructure,
) -> (BiasState, f64) {
    let (state, confidence) = if delta_signal > 0.0 {
        if gamma_rising && alignment >= 0.5 {
            if iv_health >= -0.3 {
                (BiasState::Bullish, 85.0)
            } else {
                (BiasState::Bullish, 60.0)
            }
        } else {
            (BiasState::NoTrade, 0.0)
        }
    } else if delta_signal < 0.0 {
        if gamma_rising && alignment >= 0.5 {
            if iv_health >= -0.3 {
                (BiasState::Bearish, 85.0)
            } else {
                (BiasState::Bearish, 60.0)
            }
        } else {
            (BiasState::NoTrade, 0.0)
        }
    } else {
        (BiasState::NoTrade, 0.0)
    };

    if structure == MarketStructure::Sideways {
        return (BiasState::NoTrade, 0.0);
    }

    (state, confidence)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> BiasEngine {
        BiasEngine::new(EntryFilters::default())
    }

    fn bullish_inputs() -> BiasInputs {
        BiasInputs {
            delta: 0.55,
            prev_gamma: 0.0038,
            gamma: 0.004,
            oi: 520_000,
            oi_change: 20_000.0,
            ltp: 101.0,
            prev_ltp: 100.0,
            volume: 1100,
            prev_volume: 1000,
            iv: 22.0,
            prev_iv: 21.8,
        }
    }

    #[test]
    fn aligned_bullish_tick_grants_permission() {
        let mut engine = engine();
        assert_eq!(engine.current().state, BiasState::Unknown);

        let reading = engine.update(bullish_inputs());
        assert_eq!(reading.state, BiasState::Bullish);
        assert!(reading.confidence >= 60.0);
    }

    #[test]
    fn oi_trap_blocks_permission() {
        // OI rises but neither price nor volume follow.
        let mut engine = engine();
        let mut inputs = bullish_inputs();
        inputs.ltp = 100.0;
        inputs.prev_ltp = 100.0;
        inputs.volume = 1000;
        inputs.prev_volume = 1000;

        let reading = engine.update(inputs);
        assert_eq!(reading.state, BiasState::NoTrade);
        assert!((reading.metrics.oi_volume_align - -1.0).abs() < 1e-9);
    }

    #[test]
    fn weak_delta_means_no_permission() {
        let mut engine = engine();
        let mut inputs = bullish_inputs();
        inputs.delta = 0.30;
        let reading = engine.update(inputs);
        assert_eq!(reading.state, BiasState::NoTrade);
        assert!((reading.confidence - 0.0).abs() < 1e-9);
    }

    #[test]
    fn bearish_mirror_works() {
        let mut engine = engine();
        let mut inputs = bullish_inputs();
        inputs.delta = -0.55;
        let reading = engine.update(inputs);
        assert_eq!(reading.state, BiasState::Bearish);
        assert!(reading.confidence >= 60.0);
    }

    #[test]
    fn iv_crush_downgrades_confidence() {
        let mut engine = engine();
        let mut inputs = bullish_inputs();
        // 22 -> 19.8 is a -10% IV move, past the crush threshold.
        inputs.prev_iv = 22.0;
        inputs.iv = 19.8;
        let reading = engine.update(inputs);
        assert_eq!(reading.state, BiasState::Bullish);
        assert!((reading.confidence - 60.0).abs() < 1e-9);
    }

    #[test]
    fn sideways_structure_always_blocks() {
        let mut engine = engine();
        // Ten flat prices produce SIDEWAYS structure, then a perfect bullish
        // tick still must be refused.
        for _ in 0..10 {
            let mut inputs = bullish_inputs();
            inputs.ltp = 100.0;
            inputs.prev_ltp = 100.0;
            engine.update(inputs);
        }
        let reading = engine.update(bullish_inputs());
        // The strong tick is the 11th sample; highs advanced but lows did
        // not, so structure stays SIDEWAYS and permission stays revoked.
        assert_eq!(reading.metrics.market_structure, MarketStructure::Sideways);
        assert_eq!(reading.state, BiasState::NoTrade);
        assert!((reading.confidence - 0.0).abs() < 1e-9);
    }

    #[test]
    fn gamma_trend_uses_last_three_points() {
        let mut engine = engine();
        // Build a falling gamma series.
        for gamma in [0.0050, 0.0046, 0.0042] {
            let mut inputs = bullish_inputs();
            inputs.gamma = gamma;
            engine.update(inputs);
        }
        let mut inputs = bullish_inputs();
        inputs.gamma = 0.0040;
        let reading = engine.update(inputs);
        assert!(!reading.metrics.gamma_rising);
        assert_eq!(reading.state, BiasState::NoTrade);
    }
}
