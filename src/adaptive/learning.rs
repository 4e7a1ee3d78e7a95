// =============================================================================
// Learning Engine — bucketed trade history and its insights
// =============================================================================
//
// Every completed trade is folded into per-bucket win/loss statistics. The
// engine proposes, never applies: insights flow through the safety guard and
// weight adjuster. Replaying the same trade tape always reproduces the same
// statistics.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adaptive::buckets::{BucketTuple, FeatureBucket};

/// In-memory trade feature history depth.
const MAX_HISTORY: usize = 1000;

/// Samples needed before a bucket's statistics are trusted.
pub const MIN_SAMPLE_SIZE: usize = 15;

/// Compact record of one completed trade; the only thing the adaptive layer
/// ever sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFeatures {
    pub buckets: BucketTuple,
    pub entry_delta: f64,
    pub entry_theta: f64,
    pub entry_gamma: f64,
    pub exit_reason: String,
    pub holding_minutes: i64,
    pub won: bool,
    pub pnl: f64,
    pub timestamp: DateTime<Utc>,
}

/// Accumulated performance for one bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketPerformance {
    pub bucket: FeatureBucket,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub sample_size_adequate: bool,
}

impl BucketPerformance {
    fn new(bucket: FeatureBucket) -> Self {
        Self {
            bucket,
            total_trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            sample_size_adequate: false,
        }
    }

    fn fold(&mut self, features: &TradeFeatures) {
        self.total_trades += 1;
        if features.won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.win_rate = self.wins as f64 / self.total_trades as f64;
        self.total_pnl += features.pnl;
        self.sample_size_adequate = self.total_trades >= MIN_SAMPLE_SIZE;
    }
}

/// What the engine suggests doing about a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsightKind {
    Amplify,
    Restrict,
    Block,
    Neutral,
}

impl std::fmt::Display for InsightKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amplify => write!(f, "AMPLIFY"),
            Self::Restrict => write!(f, "RESTRICT"),
            Self::Block => write!(f, "BLOCK"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// A single learning insight, handed to the safety guard as a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsight {
    pub kind: InsightKind,
    pub bucket: FeatureBucket,
    pub reason: String,
    pub confidence: f64,
    pub recommendation: String,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Default)]
pub struct LearningEngine {
    history: VecDeque<TradeFeatures>,
    performance: HashMap<FeatureBucket, BucketPerformance>,
}

impl LearningEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed trade into history and per-bucket statistics.
    pub fn ingest(&mut self, features: TradeFeatures) {
        for bucket in features.buckets.as_array() {
            self.performance
                .entry(bucket)
                .or_insert_with(|| BucketPerformance::new(bucket))
                .fold(&features);
        }

        self.history.push_back(features);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<TradeFeatures> {
        &self.history
    }

    pub fn performance(&self) -> &HashMap<FeatureBucket, BucketPerformance> {
        &self.performance
    }

    pub fn performance_for(&self, bucket: FeatureBucket) -> Option<&BucketPerformance> {
        self.performance.get(&bucket)
    }

    /// Win flags of the most recent `n` trades, oldest first.
    pub fn recent_outcomes(&self, n: usize) -> Vec<bool> {
        self.history
            .iter()
            .rev()
            .take(n)
            .rev()
            .map(|t| t.won)
            .collect()
    }

    /// Consecutive wins counted from the latest trade backwards.
    pub fn consecutive_wins(&self) -> usize {
        self.history.iter().rev().take_while(|t| t.won).count()
    }

    /// Pattern analysis over accumulated bucket statistics:
    ///   win_rate >= 0.65 with >= 20 samples  -> AMPLIFY
    ///   win_rate <= 0.25 with >= 15 samples  -> BLOCK
    ///   win_rate <= 0.40 with >= 20 samples  -> RESTRICT
    pub fn analyze(&self) -> Vec<LearningInsight> {
        let mut insights: Vec<LearningInsight> = Vec::new();

        let mut buckets: Vec<&BucketPerformance> = self.performance.values().collect();
        // Deterministic output order regardless of map iteration.
        buckets.sort_by_key(|p| p.bucket.to_string());

        for perf in buckets {
            let confidence = sample_confidence(perf.total_trades, perf.win_rate);

            let insight = if perf.win_rate >= 0.65 && perf.total_trades >= 20 {
                Some((
                    InsightKind::Amplify,
                    format!(
                        "{} wins {}/{} ({:.0}%)",
                        perf.bucket, perf.wins, perf.total_trades,
                        perf.win_rate * 100.0
                    ),
                    "increase weight".to_string(),
                ))
            } else if perf.win_rate <= 0.25 && perf.total_trades >= MIN_SAMPLE_SIZE {
                Some((
                    InsightKind::Block,
                    format!(
                        "{} wins only {}/{} ({:.0}%)",
                        perf.bucket, perf.wins, perf.total_trades,
                        perf.win_rate * 100.0
                    ),
                    "zero the weight".to_string(),
                ))
            } else if perf.win_rate <= 0.40 && perf.total_trades >= 20 {
                Some((
                    InsightKind::Restrict,
                    format!(
                        "{} underperforms {}/{} ({:.0}%)",
                        perf.bucket, perf.wins, perf.total_trades,
                        perf.win_rate * 100.0
                    ),
                    "decrease weight".to_string(),
                ))
            } else {
                None
            };

            if let Some((kind, reason, recommendation)) = insight {
                debug!(bucket = %perf.bucket, kind = %kind, reason = %reason, "insight generated");
                insights.push(LearningInsight {
                    kind,
                    bucket: perf.bucket,
                    reason,
                    confidence,
                    recommendation,
                });
            }
        }

        insights
    }

    /// Summary block for the dashboard and the adaptive state export.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "trades_ingested": self.history.len(),
            "buckets_tracked": self.performance.len(),
            "wins": self.history.iter().filter(|t| t.won).count(),
            "total_pnl": self.history.iter().map(|t| t.pnl).sum::<f64>(),
        })
    }
}

/// Confidence grows with sample size and distance of the win rate from coin
/// flip, capped at 1.
fn sample_confidence(samples: usize, win_rate: f64) -> f64 {
    let sample_part = (samples as f64 / 50.0).min(1.0);
    let edge_part = ((win_rate - 0.5).abs() * 2.0).min(1.0);
    (0.5 * sample_part + 0.5 * edge_part).min(1.0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::buckets;
    use crate::smart_money::OiConviction;

    fn features(won: bool, pnl: f64, time_minute: u32) -> TradeFeatures {
        TradeFeatures {
            buckets: buckets::extract(
                time_minute,
                85.0,
                0.004,
                -8.0,
                OiConviction::Strong,
                22.0,
            ),
            entry_delta: 0.55,
            entry_theta: -8.0,
            entry_gamma: 0.004,
            exit_reason: if won { "PROFIT_TARGET" } else { "HARD_SL" }.to_string(),
            holding_minutes: 12,
            won,
            pnl,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn bucket_stats_accumulate() {
        let mut engine = LearningEngine::new();
        engine.ingest(features(true, 1500.0, 9 * 60 + 30));
        engine.ingest(features(false, -700.0, 9 * 60 + 30));

        let perf = engine
            .performance_for(FeatureBucket::TimeOpening)
            .unwrap();
        assert_eq!(perf.total_trades, 2);
        assert_eq!(perf.wins, 1);
        assert!((perf.win_rate - 0.5).abs() < 1e-9);
        assert!((perf.total_pnl - 800.0).abs() < 1e-9);
        assert!(!perf.sample_size_adequate);
    }

    #[test]
    fn losing_bucket_emits_block_insight() {
        let mut engine = LearningEngine::new();
        for _ in 0..15 {
            engine.ingest(features(false, -500.0, 9 * 60 + 30));
        }

        let insights = engine.analyze();
        let block = insights
            .iter()
            .find(|i| i.bucket == FeatureBucket::TimeOpening)
            .unwrap();
        assert_eq!(block.kind, InsightKind::Block);
    }

    #[test]
    fn winning_bucket_emits_amplify_insight() {
        let mut engine = LearningEngine::new();
        for i in 0..20 {
            engine.ingest(features(i % 10 != 0, 900.0, 10 * 60 + 30));
        }

        let insights = engine.analyze();
        let amplify = insights
            .iter()
            .find(|i| i.bucket == FeatureBucket::TimeMorning)
            .unwrap();
        assert_eq!(amplify.kind, InsightKind::Amplify);
        assert!(amplify.confidence > 0.3);
    }

    #[test]
    fn small_samples_stay_silent() {
        let mut engine = LearningEngine::new();
        for _ in 0..5 {
            engine.ingest(features(false, -500.0, 9 * 60 + 30));
        }
        assert!(engine.analyze().is_empty());
    }

    #[test]
    fn replay_is_deterministic() {
        let tape: Vec<TradeFeatures> = (0..40)
            .map(|i| features(i % 3 == 0, if i % 3 == 0 { 900.0 } else { -400.0 }, 11 * 60))
            .collect();

        let mut first = LearningEngine::new();
        let mut second = LearningEngine::new();
        for t in &tape {
            first.ingest(t.clone());
            second.ingest(t.clone());
        }

        let a = first.performance_for(FeatureBucket::TimeMorning).unwrap();
        let b = second.performance_for(FeatureBucket::TimeMorning).unwrap();
        assert_eq!(a.total_trades, b.total_trades);
        assert_eq!(a.wins, b.wins);
        assert!((a.win_rate - b.win_rate).abs() < 1e-12);
        assert!((a.total_pnl - b.total_pnl).abs() < 1e-12);
    }

    #[test]
    fn recent_outcomes_and_streaks() {
        let mut engine = LearningEngine::new();
        for won in [false, true, true, true] {
            engine.ingest(features(won, if won { 500.0 } else { -500.0 }, 11 * 60));
        }
        assert_eq!(engine.recent_outcomes(3), vec![true, true, true]);
        assert_eq!(engine.consecutive_wins(), 3);
    }

    #[test]
    fn history_is_bounded() {
        let mut engine = LearningEngine::new();
        for _ in 0..(MAX_HISTORY + 50) {
            engine.ingest(features(true, 100.0, 11 * 60));
        }
        assert_eq!(engine.history().len(), MAX_HISTORY);
    }
}
