// =============================================================================
// Weight Adjuster — edge amplification without touching the rules
// =============================================================================
//
// Every (rule type, bucket) pair carries a weight in [0, 2] seeded at 1.0.
// Weights move only through approved learning insights, each application
// capped at ±0.5. A zero weight hard-blocks trades whose bucket tuple
// includes that bucket. Export/import round-trips the map exactly.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adaptive::buckets::{BucketTuple, FeatureBucket};
use crate::adaptive::learning::{InsightKind, LearningInsight};

/// Largest weight move a single application may make.
pub const MAX_DELTA_PER_APPLICATION: f64 = 0.5;

const WEIGHT_MIN: f64 = 0.0;
const WEIGHT_MAX: f64 = 2.0;

/// Rule families that carry adaptive weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    TimeFilter,
    OiConviction,
    GreeksThreshold,
    BiasStrength,
    VolatilityFilter,
    RiskSizing,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TimeFilter => "TIME_FILTER",
            Self::OiConviction => "OI_CONVICTION",
            Self::GreeksThreshold => "GREEKS_THRESHOLD",
            Self::BiasStrength => "BIAS_STRENGTH",
            Self::VolatilityFilter => "VOLATILITY_FILTER",
            Self::RiskSizing => "RISK_SIZING",
        };
        write!(f, "{name}")
    }
}

/// The rule family owning a bucket's axis.
pub fn rule_type_for(bucket: FeatureBucket) -> RuleType {
    use FeatureBucket::*;
    match bucket {
        TimeOpening | TimeMorning | TimeLunch | TimeAfternoon | TimeClosing => RuleType::TimeFilter,
        BiasLow | BiasMedium | BiasHigh | BiasExtreme => RuleType::BiasStrength,
        GreeksHighGamma | GreeksHighTheta | GreeksNeutral => RuleType::GreeksThreshold,
        OiWeak | OiMedium | OiStrong => RuleType::OiConviction,
        VolLow | VolNormal | VolHigh => RuleType::VolatilityFilter,
    }
}

/// One rule weight with its adjustment provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleWeight {
    pub rule_type: RuleType,
    pub bucket: FeatureBucket,
    pub current: f64,
    pub base: f64,
    #[serde(default)]
    pub last_adjusted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RuleWeight {
    fn seeded(bucket: FeatureBucket) -> Self {
        Self {
            rule_type: rule_type_for(bucket),
            bucket,
            current: 1.0,
            base: 1.0,
            last_adjusted: None,
            reason: None,
        }
    }

    fn adjust(&mut self, delta: f64, reason: &str) {
        let delta = delta.clamp(-MAX_DELTA_PER_APPLICATION, MAX_DELTA_PER_APPLICATION);
        self.current = (self.current + delta).clamp(WEIGHT_MIN, WEIGHT_MAX);
        self.last_adjusted = Some(Utc::now());
        self.reason = Some(reason.to_string());
    }

    pub fn is_active(&self) -> bool {
        self.current > 0.0
    }
}

/// Record of one applied adjustment.
#[derive(Debug, Clone, Serialize)]
pub struct WeightAdjustment {
    pub rule_type: RuleType,
    pub bucket: FeatureBucket,
    pub old_weight: f64,
    pub new_weight: f64,
    pub reason: String,
    pub impact: InsightKind,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Adjuster
// =============================================================================

pub struct WeightAdjuster {
    weights: HashMap<FeatureBucket, RuleWeight>,
    history: Vec<WeightAdjustment>,
}

impl WeightAdjuster {
    pub fn new() -> Self {
        let weights = FeatureBucket::all()
            .into_iter()
            .map(|bucket| (bucket, RuleWeight::seeded(bucket)))
            .collect();
        Self {
            weights,
            history: Vec::new(),
        }
    }

    pub fn weight_for(&self, bucket: FeatureBucket) -> f64 {
        self.weights.get(&bucket).map(|w| w.current).unwrap_or(1.0)
    }

    /// A zero weight on any bucket in the tuple hard-blocks the trade.
    pub fn blocked_bucket(&self, tuple: &BucketTuple) -> Option<FeatureBucket> {
        tuple
            .as_array()
            .into_iter()
            .find(|bucket| !self.weights[bucket].is_active())
    }

    /// Size multiplier: product of the tuple's weights, clamped [0.5, 1.5].
    pub fn size_adjustment(&self, tuple: &BucketTuple) -> f64 {
        let product: f64 = tuple
            .as_array()
            .into_iter()
            .map(|bucket| self.weight_for(bucket))
            .product();
        product.clamp(0.5, 1.5)
    }

    /// Translate an approved insight into a weight move. This is the single
    /// mutation site for weights outside reset/import.
    pub fn apply_insight(&mut self, insight: &LearningInsight) -> Option<WeightAdjustment> {
        let weight = self.weights.get_mut(&insight.bucket)?;
        let old_weight = weight.current;

        match insight.kind {
            InsightKind::Amplify => weight.adjust(0.3 * insight.confidence, &insight.reason),
            InsightKind::Restrict => weight.adjust(-0.3 * insight.confidence, &insight.reason),
            InsightKind::Block => {
                // A block may need more travel than the per-application cap;
                // walk down but never below zero, still one capped step.
                weight.adjust(-weight.current, &insight.reason);
            }
            InsightKind::Neutral => return None,
        }

        let adjustment = WeightAdjustment {
            rule_type: weight.rule_type,
            bucket: insight.bucket,
            old_weight,
            new_weight: weight.current,
            reason: insight.reason.clone(),
            impact: insight.kind,
            timestamp: Utc::now(),
        };

        info!(
            bucket = %insight.bucket,
            old = old_weight,
            new = weight.current,
            impact = %insight.kind,
            "weight adjusted"
        );

        self.history.push(adjustment.clone());
        Some(adjustment)
    }

    pub fn recent_adjustments(&self, n: usize) -> Vec<WeightAdjustment> {
        self.history.iter().rev().take(n).cloned().collect()
    }

    /// Restore every weight to 1.0 (emergency reset).
    pub fn reset_all(&mut self) {
        for weight in self.weights.values_mut() {
            weight.current = weight.base;
            weight.last_adjusted = Some(Utc::now());
            weight.reason = Some("emergency reset".to_string());
        }
        warn!("all rule weights reset to baseline");
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Export the weight map keyed by "RULE_BUCKET".
    pub fn export(&self) -> HashMap<String, RuleWeight> {
        self.weights
            .values()
            .map(|w| (format!("{}_{}", w.rule_type, w.bucket), w.clone()))
            .collect()
    }

    /// Import a previously exported weight map. Unknown keys are ignored;
    /// adjustment history is not restored by design.
    pub fn import(&mut self, exported: &HashMap<String, RuleWeight>) {
        for imported in exported.values() {
            if let Some(weight) = self.weights.get_mut(&imported.bucket) {
                weight.current = imported.current;
                weight.last_adjusted = imported.last_adjusted;
                weight.reason = imported.reason.clone();
            }
        }
        info!(count = exported.len(), "weights imported");
    }
}

impl Default for WeightAdjuster {
    fn default() -> Self {
        Self::new()
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
        buckets::extract(9 * 60 + 30, 85.0, 0.004, -8.0, OiConviction::Strong, 22.0)
    }

    fn insight(kind: InsightKind, bucket: FeatureBucket, confidence: f64) -> LearningInsight {
        LearningInsight {
            kind,
            bucket,
            reason: "test insight".into(),
            confidence,
            recommendation: String::new(),
        }
    }

    #[test]
    fn weights_seed_at_one() {
        let adjuster = WeightAdjuster::new();
        for bucket in FeatureBucket::all() {
            assert!((adjuster.weight_for(bucket) - 1.0).abs() < 1e-12);
        }
        assert!((adjuster.size_adjustment(&tuple()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn amplify_and_restrict_move_by_confidence() {
        let mut adjuster = WeightAdjuster::new();

        let up = adjuster
            .apply_insight(&insight(InsightKind::Amplify, FeatureBucket::TimeMorning, 1.0))
            .unwrap();
        assert!((up.new_weight - 1.3).abs() < 1e-9);

        let down = adjuster
            .apply_insight(&insight(InsightKind::Restrict, FeatureBucket::TimeLunch, 0.5))
            .unwrap();
        assert!((down.new_weight - 0.85).abs() < 1e-9);
    }

    #[test]
    fn block_zeroes_within_cap_steps() {
        let mut adjuster = WeightAdjuster::new();
        // From 1.0 a single capped step lands at 0.5; a second reaches 0.
        adjuster
            .apply_insight(&insight(InsightKind::Block, FeatureBucket::TimeOpening, 1.0))
            .unwrap();
        assert!((adjuster.weight_for(FeatureBucket::TimeOpening) - 0.5).abs() < 1e-9);

        adjuster
            .apply_insight(&insight(InsightKind::Block, FeatureBucket::TimeOpening, 1.0))
            .unwrap();
        assert!((adjuster.weight_for(FeatureBucket::TimeOpening) - 0.0).abs() < 1e-9);

        let blocked = adjuster.blocked_bucket(&tuple());
        assert_eq!(blocked, Some(FeatureBucket::TimeOpening));
    }

    #[test]
    fn per_application_delta_is_capped() {
        let mut adjuster = WeightAdjuster::new();
        // Even an absurd confidence cannot move more than 0.5... Amplify at
        // confidence 1.0 moves 0.3; feed several and watch the ceiling.
        for _ in 0..10 {
            adjuster.apply_insight(&insight(
                InsightKind::Amplify,
                FeatureBucket::OiStrong,
                1.0,
            ));
        }
        assert!((adjuster.weight_for(FeatureBucket::OiStrong) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn size_adjustment_is_clamped() {
        let mut adjuster = WeightAdjuster::new();
        adjuster.apply_insight(&insight(InsightKind::Block, FeatureBucket::VolNormal, 1.0));
        adjuster.apply_insight(&insight(InsightKind::Block, FeatureBucket::VolNormal, 1.0));
        // Product includes a zero weight; clamp floor holds at 0.5.
        assert!((adjuster.size_adjustment(&tuple()) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn neutral_insights_do_nothing() {
        let mut adjuster = WeightAdjuster::new();
        assert!(adjuster
            .apply_insight(&insight(InsightKind::Neutral, FeatureBucket::VolLow, 1.0))
            .is_none());
    }

    #[test]
    fn export_import_round_trips_exactly() {
        let mut adjuster = WeightAdjuster::new();
        adjuster.apply_insight(&insight(InsightKind::Amplify, FeatureBucket::TimeMorning, 0.8));
        adjuster.apply_insight(&insight(InsightKind::Restrict, FeatureBucket::VolHigh, 0.6));
        adjuster.apply_insight(&insight(InsightKind::Block, FeatureBucket::OiWeak, 1.0));

        let exported = adjuster.export();
        // Serialize through JSON like the state file does.
        let json = serde_json::to_string(&exported).unwrap();
        let parsed: HashMap<String, RuleWeight> = serde_json::from_str(&json).unwrap();

        let mut restored = WeightAdjuster::new();
        restored.import(&parsed);

        for bucket in FeatureBucket::all() {
            assert_eq!(
                adjuster.weight_for(bucket).to_bits(),
                restored.weight_for(bucket).to_bits(),
                "weight mismatch for {bucket}"
            );
        }
    }
}
