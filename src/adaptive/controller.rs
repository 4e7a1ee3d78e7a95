// =============================================================================
// Adaptive Controller — the single door every candidate entry passes through
// =============================================================================
//
// Pipeline per signal:
//   regime -> buckets -> pattern blocks -> weight hard-blocks -> confidence
//   -> size/frequency recommendation
//
// Daily learning (EOD): analyze -> mine loss patterns -> file proposals ->
// shadow-test -> auto-review -> apply approved insights through the weight
// adjuster (capped), under the safety guard's pacing rules.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::adaptive::buckets::{self, BucketTuple};
use crate::adaptive::confidence;
use crate::adaptive::learning::{InsightKind, LearningEngine, TradeFeatures};
use crate::adaptive::patterns::PatternDetector;
use crate::adaptive::regime::{self, MarketRegime, RegimeClassification, RegimeSignals};
use crate::adaptive::safety::SafetyGuard;
use crate::adaptive::weights::WeightAdjuster;
use crate::smart_money::OiConviction;

/// Live signal features the controller buckets and scores.
#[derive(Debug, Clone, Copy)]
pub struct SignalSnapshot {
    /// IST wall-clock minute of day.
    pub minute_of_day: u32,
    /// Bias confidence, 0-100.
    pub bias_confidence: f64,
    pub gamma: f64,
    pub theta: f64,
    pub oi_conviction: OiConviction,
    pub iv: f64,
}

/// The pipeline's verdict for one candidate entry.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveDecision {
    pub should_trade: bool,
    pub block_reason: Option<String>,
    /// Position size multiplier in [0, 1.5].
    pub recommended_size: f64,
    pub recommended_frequency: f64,
    pub confidence: f64,
    pub regime: MarketRegime,
    pub buckets: BucketTuple,
    pub contributing_factors: serde_json::Value,
    pub explanation: String,
}

/// Outcome report of one EOD learning run.
#[derive(Debug, Clone, Serialize)]
pub struct DailyLearningReport {
    pub success: bool,
    pub reason: Option<String>,
    pub insights_generated: usize,
    pub loss_patterns_detected: usize,
    pub proposals_created: usize,
    pub proposals_approved: usize,
    pub adjustments_applied: usize,
    pub amplifies_denied_by_streak: usize,
    pub timestamp: DateTime<Utc>,
}

/// Serialized adaptive state (weights survive restarts, history does not).
#[derive(Debug, Serialize, serde::Deserialize)]
struct ExportedState {
    last_daily_learning: Option<DateTime<Utc>>,
    weights: std::collections::HashMap<String, crate::adaptive::weights::RuleWeight>,
    learning_summary: serde_json::Value,
    timestamp: DateTime<Utc>,
}

// =============================================================================
// Controller
// =============================================================================

pub struct AdaptiveController {
    enabled: bool,
    pub(crate) learning: LearningEngine,
    pub(crate) weights: WeightAdjuster,
    pub(crate) patterns: PatternDetector,
    pub(crate) safety: SafetyGuard,
    last_daily_learning: Option<DateTime<Utc>>,
    last_regime: Option<RegimeClassification>,
}

impl AdaptiveController {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            learning: LearningEngine::new(),
            weights: WeightAdjuster::new(),
            patterns: PatternDetector::new(),
            safety: SafetyGuard::new(),
            last_daily_learning: None,
            last_regime: None,
        }
    }

    // ── Signal evaluation ───────────────────────────────────────────────

    pub fn evaluate_signal(
        &mut self,
        signal: SignalSnapshot,
        regime_signals: &RegimeSignals,
    ) -> AdaptiveDecision {
        let tuple = buckets::extract(
            signal.minute_of_day,
            signal.bias_confidence,
            signal.gamma,
            signal.theta,
            signal.oi_conviction,
            signal.iv,
        );

        if !self.enabled {
            return AdaptiveDecision {
                should_trade: true,
                block_reason: None,
                recommended_size: 1.0,
                recommended_frequency: 1.0,
                confidence: 0.5,
                regime: MarketRegime::Normal,
                buckets: tuple,
                contributing_factors: serde_json::json!({}),
                explanation: "adaptive layer disabled, defaults in force".to_string(),
            };
        }

        let regime = regime::detect(regime_signals);
        self.last_regime = Some(regime.clone());

        // Pattern blocks short-circuit the pipeline, first match wins.
        for bucket in tuple.as_array() {
            if let Some(reason) = self.patterns.is_bucket_blocked(bucket) {
                return Self::blocked(tuple, regime.regime, reason);
            }
        }

        // A zero weight on any bucket is a hard block.
        if let Some(bucket) = self.weights.blocked_bucket(&tuple) {
            return Self::blocked(
                tuple,
                regime.regime,
                format!("rule weight zero for {bucket}"),
            );
        }

        let recent = self.learning.recent_outcomes(5);
        let scored = confidence::score_signal(
            &tuple,
            self.learning.performance(),
            regime.regime,
            &recent,
        );

        let size = (scored.recommended_size
            * regime.posture.size_multiplier
            * self.weights.size_adjustment(&tuple))
        .clamp(0.0, 1.5);
        let frequency =
            regime.posture.frequency_multiplier * self.weights.weight_for(tuple.time);

        let explanation = format!(
            "{} | regime {} ({}) | size x{:.2} | freq x{:.2}",
            scored.explanation, regime.regime, regime.posture.holding_style, size, frequency
        );

        AdaptiveDecision {
            should_trade: scored.should_trade,
            block_reason: if scored.should_trade {
                None
            } else {
                Some(format!(
                    "confidence {:.0}% below trade floor",
                    scored.score * 100.0
                ))
            },
            recommended_size: size,
            recommended_frequency: frequency,
            confidence: scored.score,
            regime: regime.regime,
            buckets: tuple,
            contributing_factors: serde_json::json!({
                "historical": scored.historical_score,
                "regime": scored.regime_score,
                "recent": scored.recent_score,
                "sample": scored.sample_score,
                "regime_confidence": regime.confidence,
            }),
            explanation,
        }
    }

    fn blocked(tuple: BucketTuple, regime: MarketRegime, reason: String) -> AdaptiveDecision {
        AdaptiveDecision {
            should_trade: false,
            block_reason: Some(reason.clone()),
            recommended_size: 0.0,
            recommended_frequency: 0.0,
            confidence: 0.0,
            regime,
            buckets: tuple,
            contributing_factors: serde_json::json!({ "block_reason": reason }),
            explanation: format!("BLOCKED: {reason}"),
        }
    }

    // ── Outcome recording ───────────────────────────────────────────────

    /// Record a completed trade's final outcome. Must be called exactly once
    /// per trade, after `won` is settled.
    pub fn record_trade_outcome(&mut self, features: TradeFeatures) {
        self.learning.ingest(features);
    }

    // ── Daily learning ──────────────────────────────────────────────────

    /// The EOD learning cycle. Applies approved insights through the weight
    /// adjuster — the only live mutation path for rule weights.
    pub fn run_daily_learning(&mut self) -> DailyLearningReport {
        let now = Utc::now();

        let gate = self.safety.check_learning_allowed();
        if !gate.passed {
            return DailyLearningReport {
                success: false,
                reason: Some(gate.reason),
                insights_generated: 0,
                loss_patterns_detected: 0,
                proposals_created: 0,
                proposals_approved: 0,
                adjustments_applied: 0,
                amplifies_denied_by_streak: 0,
                timestamp: now,
            };
        }

        // 1. Insights from bucket statistics.
        let insights = self.learning.analyze();

        // 2. Loss-pattern mining over the recent tape.
        let history: Vec<TradeFeatures> = self.learning.history().iter().cloned().collect();
        let loss_patterns = self.patterns.analyze(&history);

        // 3. File proposals for adequately sampled insights.
        let mut proposals_created = 0;
        for insight in &insights {
            let samples = self
                .learning
                .performance_for(insight.bucket)
                .map(|p| p.total_trades)
                .unwrap_or(0);
            if !self.safety.check_sample_size(samples).passed {
                continue;
            }
            let id = self.safety.propose(insight.clone());
            self.safety.shadow_test(&id, &history);
            proposals_created += 1;
        }

        // 4. Review and apply.
        self.safety.auto_review();
        let approved = self.safety.take_approved();
        let proposals_approved = approved.len();

        let consecutive_wins = self.learning.consecutive_wins();
        let streak_caution = !self.safety.check_winning_streak(consecutive_wins).passed;

        let mut adjustments_applied = 0;
        let mut amplifies_denied = 0;
        for proposal in &approved {
            if proposal.insight.kind == InsightKind::Amplify && streak_caution {
                warn!(
                    bucket = %proposal.insight.bucket,
                    consecutive_wins,
                    "amplify denied: winning-streak caution"
                );
                amplifies_denied += 1;
                continue;
            }
            if self.weights.apply_insight(&proposal.insight).is_some() {
                adjustments_applied += 1;
            }
        }

        self.last_daily_learning = Some(now);

        info!(
            insights = insights.len(),
            patterns = loss_patterns.len(),
            proposals = proposals_created,
            approved = proposals_approved,
            applied = adjustments_applied,
            "daily learning complete"
        );

        DailyLearningReport {
            success: true,
            reason: None,
            insights_generated: insights.len(),
            loss_patterns_detected: loss_patterns.len(),
            proposals_created,
            proposals_approved,
            adjustments_applied,
            amplifies_denied_by_streak: amplifies_denied,
            timestamp: now,
        }
    }

    /// Emergency reset: weights to baseline, pending learning cleared,
    /// pattern blocks lifted.
    pub fn emergency_reset(&mut self) {
        self.weights.reset_all();
        self.safety.emergency_reset();
        self.patterns.reset();
        warn!("adaptive system reset to baseline");
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Default export location: logs/adaptive/state_YYYYMMDD.json.
    pub fn default_state_path() -> PathBuf {
        PathBuf::from(format!(
            "logs/adaptive/state_{}.json",
            Utc::now().format("%Y%m%d")
        ))
    }

    /// Export weights + last-learning timestamp (atomic tmp + rename).
    pub fn export_state(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let state = ExportedState {
            last_daily_learning: self.last_daily_learning,
            weights: self.weights.export(),
            learning_summary: self.learning.summary(),
            timestamp: Utc::now(),
        };
        let content =
            serde_json::to_string_pretty(&state).context("failed to serialise adaptive state")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename into {}", path.display()))?;

        info!(path = %path.display(), "adaptive state exported");
        Ok(())
    }

    /// Import a previous export. Only weights and the last-learning
    /// timestamp are restored; trade history resets by design.
    pub fn import_state(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let state: ExportedState =
            serde_json::from_str(&content).context("failed to parse adaptive state")?;

        self.weights.import(&state.weights);
        self.last_daily_learning = state.last_daily_learning;

        info!(path = %path.display(), "adaptive state imported");
        Ok(())
    }

    // ── Dashboard ───────────────────────────────────────────────────────

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "enabled": self.enabled,
            "last_daily_learning": self.last_daily_learning,
            "learning": self.learning.summary(),
            "regime": self.last_regime.as_ref().map(|r| serde_json::json!({
                "regime": r.regime.to_string(),
                "confidence": r.confidence,
                "posture": r.posture,
            })),
            "recent_weight_adjustments": self.weights.recent_adjustments(5),
            "active_pattern_blocks": self.patterns.active_blocks(),
            "safety": self.safety.status(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::buckets::FeatureBucket;
    use chrono::Duration;

    fn signal_at(minute: u32) -> SignalSnapshot {
        SignalSnapshot {
            minute_of_day: minute,
            bias_confidence: 85.0,
            gamma: 0.004,
            theta: -8.0,
            oi_conviction: OiConviction::Strong,
            iv: 22.0,
        }
    }

    fn normal_regime() -> RegimeSignals {
        RegimeSignals {
            vix_proxy: 18.0,
            atr_pct: 0.6,
            price_range_pct: 0.8,
            ..Default::default()
        }
    }

    fn losing_trade(minute: u32, days_ago: i64) -> TradeFeatures {
        TradeFeatures {
            buckets: buckets::extract(minute, 85.0, 0.004, -8.0, OiConviction::Strong, 22.0),
            entry_delta: 0.55,
            entry_theta: -8.0,
            entry_gamma: 0.004,
            exit_reason: "HARD_SL".to_string(),
            holding_minutes: 10,
            won: false,
            pnl: -800.0,
            timestamp: Utc::now() - Duration::days(days_ago),
        }
    }

    #[test]
    fn disabled_controller_defaults_to_allow() {
        let mut controller = AdaptiveController::new(false);
        let decision = controller.evaluate_signal(signal_at(9 * 60 + 30), &normal_regime());
        assert!(decision.should_trade);
        assert!((decision.recommended_size - 1.0).abs() < 1e-9);
    }

    #[test]
    fn opening_loss_pattern_blocks_morning_signal() {
        let mut controller = AdaptiveController::new(true);
        for i in 0..6 {
            controller.record_trade_outcome(losing_trade(9 * 60 + 30, i));
        }
        let report = controller.run_daily_learning();
        assert!(report.success);
        assert!(report.loss_patterns_detected > 0);

        // A fresh 09:30 bullish signal lands in TIME_OPENING: blocked.
        let decision = controller.evaluate_signal(signal_at(9 * 60 + 30), &normal_regime());
        assert!(!decision.should_trade);
        let reason = decision.block_reason.unwrap();
        assert!(reason.contains("TEMPORAL"));
        assert!(reason.contains("6 losses"));
        assert!((decision.recommended_size - 0.0).abs() < 1e-9);
    }

    #[test]
    fn unblocked_bucket_still_trades_after_pattern() {
        let mut controller = AdaptiveController::new(true);
        for i in 0..6 {
            controller.record_trade_outcome(losing_trade(9 * 60 + 30, i));
        }
        controller.run_daily_learning();

        // An afternoon signal differing on every pattern-mined axis (time,
        // greeks regime, volatility band) shares no blocked bucket.
        let decision = controller.evaluate_signal(
            SignalSnapshot {
                minute_of_day: 13 * 60 + 45,
                bias_confidence: 85.0,
                gamma: 0.006,
                theta: -8.0,
                oi_conviction: OiConviction::Medium,
                iv: 30.0,
            },
            &normal_regime(),
        );
        assert!(
            decision.should_trade,
            "unexpected block: {:?}",
            decision.block_reason
        );
    }

    #[test]
    fn zero_weight_hard_blocks() {
        let mut controller = AdaptiveController::new(true);
        // Drive the TIME_OPENING weight to zero directly.
        use crate::adaptive::learning::{InsightKind, LearningInsight};
        let block = LearningInsight {
            kind: InsightKind::Block,
            bucket: FeatureBucket::TimeOpening,
            reason: "forced".into(),
            confidence: 1.0,
            recommendation: String::new(),
        };
        controller.weights.apply_insight(&block);
        controller.weights.apply_insight(&block);

        let decision = controller.evaluate_signal(signal_at(9 * 60 + 30), &normal_regime());
        assert!(!decision.should_trade);
        assert!(decision
            .block_reason
            .unwrap()
            .contains("weight zero for TIME_OPENING"));
    }

    #[test]
    fn learning_is_paced_to_once_per_day() {
        let mut controller = AdaptiveController::new(true);
        // 20 losses: BLOCK insights with adequate samples get approved and
        // applied, arming the 24h interval gate.
        for i in 0..20 {
            controller.record_trade_outcome(losing_trade(11 * 60, i % 5));
        }
        let first = controller.run_daily_learning();
        assert!(first.success);
        assert!(first.adjustments_applied > 0);

        let second = controller.run_daily_learning();
        assert!(!second.success);
        assert!(second.reason.unwrap().contains("min 24h"));
    }

    #[test]
    fn export_import_round_trips_weights() {
        let mut controller = AdaptiveController::new(true);
        for i in 0..20 {
            controller.record_trade_outcome(losing_trade(11 * 60, i % 5));
        }
        controller.run_daily_learning();

        let path = std::env::temp_dir().join(format!(
            "meridian_adaptive_{}.json",
            uuid::Uuid::new_v4()
        ));
        controller.export_state(&path).unwrap();

        let mut restored = AdaptiveController::new(true);
        restored.import_state(&path).unwrap();
        std::fs::remove_file(&path).ok();

        for bucket in FeatureBucket::all() {
            assert_eq!(
                controller.weights.weight_for(bucket).to_bits(),
                restored.weights.weight_for(bucket).to_bits(),
                "weight mismatch for {bucket}"
            );
        }
        // History is explicitly not preserved.
        assert_eq!(restored.learning.history().len(), 0);
    }

    #[test]
    fn emergency_reset_restores_baseline() {
        let mut controller = AdaptiveController::new(true);
        for i in 0..20 {
            controller.record_trade_outcome(losing_trade(11 * 60, i % 5));
        }
        controller.run_daily_learning();
        controller.emergency_reset();

        for bucket in FeatureBucket::all() {
            assert!((controller.weights.weight_for(bucket) - 1.0).abs() < 1e-12);
        }
        let decision = controller.evaluate_signal(signal_at(11 * 60), &normal_regime());
        // Blocks lifted; only the confidence floor may still refuse.
        if !decision.should_trade {
            assert!(decision.block_reason.unwrap().contains("confidence"));
        }
    }
}
