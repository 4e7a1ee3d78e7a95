// =============================================================================
// Strike Selector — ATM ± N ladder scored on Greeks, liquidity, and IV
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::config::{EntryFilters, InstrumentConfig};
use crate::types::{GreeksSnapshot, OptionType};

/// Weighting of the three score components.
const GREEKS_WEIGHT: f64 = 0.5;
const LIQUIDITY_WEIGHT: f64 = 0.3;
const IV_WEIGHT: f64 = 0.2;

/// Liquidity floors.
const VOLUME_FLOOR: f64 = 500.0;
const OI_FLOOR: f64 = 100_000.0;

/// Preferred IV band for scalping legs.
const IV_PREFERRED: (f64, f64) = (15.0, 25.0);

/// One ladder candidate with its quote.
#[derive(Debug, Clone)]
pub struct StrikeQuote {
    pub strike: u32,
    pub snapshot: GreeksSnapshot,
}

/// The chosen leg plus its score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct SelectedLeg {
    pub strike: u32,
    pub symbol: String,
    pub option_type: OptionType,
    pub total_score: f64,
    pub greeks_score: f64,
    pub liquidity_score: f64,
    pub iv_score: f64,
    /// Offset from ATM in strike steps (signed).
    pub atm_offset: i32,
}

pub struct StrikeSelector {
    instrument: InstrumentConfig,
    filters: EntryFilters,
}

impl StrikeSelector {
    pub fn new(instrument: InstrumentConfig, filters: EntryFilters) -> Self {
        Self {
            instrument,
            filters,
        }
    }

    /// Nearest strike to `spot` on the configured interval.
    pub fn atm_strike(&self, spot: f64) -> u32 {
        let interval = self.instrument.strike_interval.max(1) as f64;
        ((spot / interval).round() * interval) as u32
    }

    /// The ATM ± depth strike ladder, ascending.
    pub fn ladder(&self, spot: f64) -> Vec<u32> {
        let atm = self.atm_strike(spot) as i64;
        let interval = self.instrument.strike_interval.max(1) as i64;
        let depth = self.instrument.strike_ladder_depth as i64;

        (-depth..=depth)
            .map(|offset| (atm + offset * interval) as u32)
            .collect()
    }

    /// Score every candidate and return the best leg. Ties break toward ATM.
    pub fn select(
        &self,
        spot: f64,
        option_type: OptionType,
        candidates: &[StrikeQuote],
    ) -> Option<SelectedLeg> {
        let atm = self.atm_strike(spot);
        let interval = self.instrument.strike_interval.max(1) as i32;

        let mut scored: Vec<SelectedLeg> = candidates
            .iter()
            .map(|candidate| {
                let greeks_score = self.greeks_score(&candidate.snapshot);
                let liquidity_score = self.liquidity_score(&candidate.snapshot);
                let iv_score = iv_score(candidate.snapshot.iv);
                let total_score = greeks_score * GREEKS_WEIGHT
                    + liquidity_score * LIQUIDITY_WEIGHT
                    + iv_score * IV_WEIGHT;

                SelectedLeg {
                    strike: candidate.strike,
                    symbol: candidate.snapshot.symbol.clone(),
                    option_type,
                    total_score,
                    greeks_score,
                    liquidity_score,
                    iv_score,
                    atm_offset: (candidate.strike as i32 - atm as i32) / interval,
                }
            })
            .collect();

        // Highest score first; on equal scores the strike closer to ATM wins.
        scored.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.atm_offset.abs().cmp(&b.atm_offset.abs()))
        });

        let chosen = scored.into_iter().next()?;
        debug!(
            strike = chosen.strike,
            score = chosen.total_score,
            offset = chosen.atm_offset,
            "strike selected"
        );
        Some(chosen)
    }

    /// Delta in the power zone, gamma above floor, theta burn tolerable,
    /// vega mid-range.
    fn greeks_score(&self, snap: &GreeksSnapshot) -> f64 {
        let abs_delta = snap.delta.abs();
        let delta_score = if (0.45..=0.65).contains(&abs_delta) {
            1.0
        } else {
            let distance = if abs_delta < 0.45 {
                0.45 - abs_delta
            } else {
                abs_delta - 0.65
            };
            (1.0 - distance * 5.0).max(0.0)
        };

        let gamma_score = if snap.gamma < self.filters.ideal_gamma_min {
            0.0
        } else {
            (snap.gamma / 0.004).min(1.0)
        };

        let theta_burn_pct = if snap.ltp > 0.0 {
            snap.theta.abs() / snap.ltp * 100.0
        } else {
            100.0
        };
        let theta_score = if theta_burn_pct <= 5.0 {
            1.0
        } else {
            (1.0 - (theta_burn_pct - 5.0) / 10.0).max(0.0)
        };

        let vega_score = if (5.0..=20.0).contains(&snap.vega) {
            1.0
        } else if snap.vega < 5.0 {
            (snap.vega / 5.0).max(0.0)
        } else {
            (1.0 - (snap.vega - 20.0) / 20.0).max(0.0)
        };

        (delta_score + gamma_score + theta_score + vega_score) / 4.0
    }

    /// Positive two-sided quote, tight spread, volume and OI above floors.
    fn liquidity_score(&self, snap: &GreeksSnapshot) -> f64 {
        let Some(spread_pct) = snap.spread_percent() else {
            return 0.0;
        };
        if spread_pct > self.filters.max_spread_percent {
            return 0.0;
        }

        let spread_score = 1.0 - (spread_pct / self.filters.max_spread_percent).min(1.0);
        let volume_score = (snap.volume as f64 / (VOLUME_FLOOR * 10.0)).min(1.0);
        let oi_score = (snap.oi as f64 / (OI_FLOOR * 10.0)).min(1.0);

        let volume_ok = snap.volume as f64 >= VOLUME_FLOOR;
        let oi_ok = snap.oi as f64 >= OI_FLOOR;
        if !volume_ok || !oi_ok {
            return (spread_score + volume_score + oi_score) / 6.0; // floor miss halves it
        }

        (spread_score + volume_score + oi_score) / 3.0
    }
}

/// Preference for 15-25% IV, smooth penalty outside.
fn iv_score(iv: f64) -> f64 {
    let (low, high) = IV_PREFERRED;
    if (low..=high).contains(&iv) {
        1.0
    } else if iv < low {
        (1.0 - (low - iv) / 20.0).max(0.0)
    } else {
        (1.0 - (iv - high) / 20.0).max(0.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn selector() -> StrikeSelector {
        StrikeSelector::new(InstrumentConfig::default(), EntryFilters::default())
    }

    fn quote(strike: u32, delta: f64, gamma: f64, volume: u64, oi: u64, iv: f64) -> StrikeQuote {
        StrikeQuote {
            strike,
            snapshot: GreeksSnapshot {
                symbol: format!("NIFTY07AUG25{strike}CE"),
                exchange: "NFO".into(),
                ltp: 100.0,
                bid: 99.5,
                ask: 100.5,
                volume,
                oi,
                delta,
                gamma,
                theta: -4.0,
                vega: 12.0,
                iv,
                timestamp: Utc::now(),
            },
        }
    }

    #[test]
    fn atm_rounds_to_interval() {
        let selector = selector();
        assert_eq!(selector.atm_strike(19542.75), 19550);
        assert_eq!(selector.atm_strike(19524.0), 19500);
    }

    #[test]
    fn ladder_spans_atm_both_sides() {
        let selector = selector();
        let ladder = selector.ladder(19542.75);
        assert_eq!(ladder.len(), 7);
        assert_eq!(ladder[0], 19400);
        assert_eq!(ladder[3], 19550);
        assert_eq!(ladder[6], 19700);
    }

    #[test]
    fn best_scored_strike_wins() {
        let selector = selector();
        let candidates = vec![
            quote(19500, 0.55, 0.0040, 5000, 800_000, 20.0),
            quote(19550, 0.30, 0.0008, 400, 50_000, 45.0),
        ];
        let chosen = selector
            .select(19542.75, OptionType::CE, &candidates)
            .unwrap();
        assert_eq!(chosen.strike, 19500);
        assert!(chosen.total_score > 0.5);
    }

    #[test]
    fn ties_break_toward_atm() {
        let selector = selector();
        // Identical quotes at two strikes; 19550 is ATM for this spot.
        let candidates = vec![
            quote(19450, 0.55, 0.0040, 5000, 800_000, 20.0),
            quote(19550, 0.55, 0.0040, 5000, 800_000, 20.0),
        ];
        let chosen = selector
            .select(19542.75, OptionType::CE, &candidates)
            .unwrap();
        assert_eq!(chosen.strike, 19550);
        assert_eq!(chosen.atm_offset, 0);
    }

    #[test]
    fn wide_spread_zeroes_liquidity() {
        let selector = selector();
        let mut candidate = quote(19500, 0.55, 0.0040, 5000, 800_000, 20.0);
        candidate.snapshot.bid = 90.0;
        candidate.snapshot.ask = 100.5;
        let chosen = selector
            .select(19542.75, OptionType::CE, &[candidate])
            .unwrap();
        assert!((chosen.liquidity_score - 0.0).abs() < 1e-9);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let selector = selector();
        assert!(selector.select(19542.75, OptionType::CE, &[]).is_none());
    }
}
