// =============================================================================
// Confidence Scorer — emotionless signal quality assessment
// =============================================================================
//
// Weighted blend:
//   0.40 historical win rate of the signal's buckets (adequate samples only)
//   0.25 regime alignment
//   0.20 recent performance (drawdown penalty, prevents revenge trading)
//   0.15 sample adequacy
//
// Trading is allowed at score >= 0.40.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adaptive::buckets::{BucketTuple, FeatureBucket};
use crate::adaptive::learning::BucketPerformance;
use crate::adaptive::regime::MarketRegime;

const MIN_CONFIDENCE_TO_TRADE: f64 = 0.40;
const RECENT_LOSS_PENALTY: f64 = 0.10;
const RECENT_FLOOR: f64 = 0.30;

/// Confidence bands with their size multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::VeryLow => "VERY_LOW",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::VeryHigh => "VERY_HIGH",
        };
        write!(f, "{name}")
    }
}

/// Full confidence assessment for one signal.
#[derive(Debug, Clone, Serialize)]
pub struct SignalConfidence {
    pub score: f64,
    pub level: ConfidenceLevel,

    pub historical_score: f64,
    pub regime_score: f64,
    pub recent_score: f64,
    pub sample_score: f64,

    pub should_trade: bool,
    pub recommended_size: f64,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
}

/// Score a signal's bucket tuple against accumulated performance, the
/// current regime, and recent outcomes (oldest first).
pub fn score_signal(
    tuple: &BucketTuple,
    performance: &HashMap<FeatureBucket, BucketPerformance>,
    regime: MarketRegime,
    recent_outcomes: &[bool],
) -> SignalConfidence {
    let historical_score = historical(tuple, performance);
    let regime_score = regime_alignment(tuple, regime);
    let recent_score = recent(recent_outcomes);
    let sample_score = sample_adequacy(tuple, performance);

    let score = historical_score * 0.40
        + regime_score * 0.25
        + recent_score * 0.20
        + sample_score * 0.15;

    let level = classify(score);
    let recommended_size = size_for(level);
    let should_trade = score >= MIN_CONFIDENCE_TO_TRADE;

    let explanation = format!(
        "confidence {:.0}% [{}] | hist {:.0}% | regime {:.0}% | recent {:.0}% | sample {:.0}%",
        score * 100.0,
        level,
        historical_score * 100.0,
        regime_score * 100.0,
        recent_score * 100.0,
        sample_score * 100.0,
    );

    SignalConfidence {
        score,
        level,
        historical_score,
        regime_score,
        recent_score,
        sample_score,
        should_trade,
        recommended_size,
        explanation,
        timestamp: Utc::now(),
    }
}

/// Mean win rate across the tuple's buckets that have adequate samples;
/// neutral 0.5 when none do.
fn historical(
    tuple: &BucketTuple,
    performance: &HashMap<FeatureBucket, BucketPerformance>,
) -> f64 {
    let rates: Vec<f64> = tuple
        .as_array()
        .into_iter()
        .filter_map(|bucket| performance.get(&bucket))
        .filter(|perf| perf.sample_size_adequate)
        .map(|perf| perf.win_rate)
        .collect();

    if rates.is_empty() {
        0.50
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    }
}

fn regime_alignment(tuple: &BucketTuple, regime: MarketRegime) -> f64 {
    match regime {
        MarketRegime::TrendingBullish | MarketRegime::TrendingBearish => 0.75,
        MarketRegime::Choppy => 0.30,
        MarketRegime::HighVolatility => {
            // A signal that already knows it is in a high-vol band has
            // acknowledged the risk.
            if tuple.contains(FeatureBucket::VolHigh) {
                0.40
            } else {
                0.25
            }
        }
        MarketRegime::EventDriven => 0.20,
        MarketRegime::LowVolatility => 0.60,
        MarketRegime::Normal => 0.70,
    }
}

/// 0.70 baseline, −0.10 per consecutive loss in the last 5, floor 0.30.
fn recent(outcomes: &[bool]) -> f64 {
    if outcomes.is_empty() {
        return 0.70;
    }
    let last_5 = &outcomes[outcomes.len().saturating_sub(5)..];
    let consecutive_losses = last_5.iter().rev().take_while(|won| !**won).count();
    (0.70 - consecutive_losses as f64 * RECENT_LOSS_PENALTY).max(RECENT_FLOOR)
}

/// Fraction of tuple buckets with adequate samples.
fn sample_adequacy(
    tuple: &BucketTuple,
    performance: &HashMap<FeatureBucket, BucketPerformance>,
) -> f64 {
    let buckets = tuple.as_array();
    let adequate = buckets
        .iter()
        .filter(|bucket| {
            performance
                .get(bucket)
                .map(|perf| perf.sample_size_adequate)
                .unwrap_or(false)
        })
        .count();
    adequate as f64 / buckets.len() as f64
}

fn classify(score: f64) -> ConfidenceLevel {
    if score < 0.30 {
        ConfidenceLevel::VeryLow
    } else if score < 0.50 {
        ConfidenceLevel::Low
    } else if score < 0.70 {
        ConfidenceLevel::Medium
    } else if score < 0.85 {
        ConfidenceLevel::High
    } else {
        ConfidenceLevel::VeryHigh
    }
}

fn size_for(level: ConfidenceLevel) -> f64 {
    match level {
        ConfidenceLevel::VeryLow => 0.0,
        ConfidenceLevel::Low => 0.5,
        ConfidenceLevel::Medium => 0.8,
        ConfidenceLevel::High => 1.0,
        ConfidenceLevel::VeryHigh => 1.2,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::buckets;
    use crate::smart_money::OiConviction;

    fn tuple() -> BucketTuple {
        buckets::extract(10 * 60 + 30, 85.0, 0.004, -8.0, OiConviction::Strong, 22.0)
    }

    fn perf(bucket: FeatureBucket, wins: usize, total: usize) -> BucketPerformance {
        BucketPerformance {
            bucket,
            total_trades: total,
            wins,
            losses: total - wins,
            win_rate: wins as f64 / total as f64,
            total_pnl: 0.0,
            sample_size_adequate: total >= 15,
        }
    }

    #[test]
    fn no_history_is_neutral_and_tradeable_in_normal_regime() {
        let confidence = score_signal(&tuple(), &HashMap::new(), MarketRegime::Normal, &[]);
        // 0.5*0.4 + 0.7*0.25 + 0.7*0.2 + 0*0.15 = 0.515
        assert!((confidence.score - 0.515).abs() < 1e-9);
        assert_eq!(confidence.level, ConfidenceLevel::Medium);
        assert!(confidence.should_trade);
        assert!((confidence.recommended_size - 0.8).abs() < 1e-9);
    }

    #[test]
    fn strong_history_raises_confidence() {
        let mut performance = HashMap::new();
        for bucket in tuple().as_array() {
            performance.insert(bucket, perf(bucket, 16, 20));
        }
        let confidence = score_signal(&tuple(), &performance, MarketRegime::TrendingBullish, &[]);
        // 0.8*0.4 + 0.75*0.25 + 0.7*0.2 + 1.0*0.15 = 0.7975
        assert!(confidence.score > 0.75);
        assert_eq!(confidence.level, ConfidenceLevel::High);
        assert!((confidence.recommended_size - 1.0).abs() < 1e-9);
    }

    #[test]
    fn choppy_regime_drags_score_down() {
        let confidence = score_signal(&tuple(), &HashMap::new(), MarketRegime::Choppy, &[]);
        assert!(confidence.score < 0.50);
    }

    #[test]
    fn consecutive_losses_penalise_recent_score() {
        let outcomes = [true, false, false, false, false];
        let confidence = score_signal(&tuple(), &HashMap::new(), MarketRegime::Normal, &outcomes);
        // Four consecutive losses: 0.70 - 0.40 = 0.30.
        assert!((confidence.recent_score - 0.30).abs() < 1e-9);
    }

    #[test]
    fn recent_floor_holds() {
        let outcomes = [false; 8];
        let confidence = score_signal(&tuple(), &HashMap::new(), MarketRegime::Normal, &outcomes);
        assert!((confidence.recent_score - RECENT_FLOOR).abs() < 1e-9);
    }

    #[test]
    fn very_low_blocks_trading() {
        let mut performance = HashMap::new();
        for bucket in tuple().as_array() {
            performance.insert(bucket, perf(bucket, 2, 20));
        }
        let outcomes = [false; 5];
        let confidence =
            score_signal(&tuple(), &performance, MarketRegime::EventDriven, &outcomes);
        // 0.1*0.4 + 0.2*0.25 + 0.3*0.2 + 1.0*0.15 = 0.30 -> LOW boundary
        assert!(!confidence.should_trade);
        assert!(confidence.recommended_size <= 0.5);
    }

    #[test]
    fn acknowledged_high_vol_scores_better_than_surprise() {
        let acknowledged = buckets::extract(11 * 60, 85.0, 0.004, -8.0, OiConviction::Strong, 30.0);
        let surprised = tuple(); // VOL_NORMAL

        let a = score_signal(
            &acknowledged,
            &HashMap::new(),
            MarketRegime::HighVolatility,
            &[],
        );
        let s = score_signal(
            &surprised,
            &HashMap::new(),
            MarketRegime::HighVolatility,
            &[],
        );
        assert!(a.regime_score > s.regime_score);
    }
}
