// =============================================================================
// Safety Guard — stability over intelligence
// =============================================================================
//
// The guard owns the proposal lifecycle:
//   pending -> shadow-tested -> approved / rejected
//
// Hard rules:
//   - at least 24h between learning applications;
//   - at most 5 applications per day;
//   - per-application weight delta capped (enforced in the adjuster too);
//   - at least 20 samples behind any application;
//   - 5+ consecutive wins denies AMPLIFY applications;
//   - approval needs confidence >= 0.70 AND shadow win rate >= 0.60;
//     confidence < 0.40 is auto-rejected.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adaptive::learning::{InsightKind, LearningInsight, TradeFeatures};

pub const MIN_LEARNING_INTERVAL_HOURS: i64 = 24;
pub const MAX_ADJUSTMENTS_PER_DAY: usize = 5;
pub const MIN_SAMPLE_SIZE_FOR_LEARNING: usize = 20;
pub const MAX_CONSECUTIVE_WINS_BEFORE_CAUTION: usize = 5;

const APPROVE_CONFIDENCE: f64 = 0.70;
const APPROVE_SHADOW_WIN_RATE: f64 = 0.60;
const REJECT_CONFIDENCE: f64 = 0.40;

/// Outcome of a guard check.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyCheck {
    pub passed: bool,
    pub reason: String,
    pub recommendation: String,
}

impl SafetyCheck {
    fn pass(reason: &str) -> Self {
        Self {
            passed: true,
            reason: reason.to_string(),
            recommendation: "proceed".to_string(),
        }
    }

    fn fail(reason: String, recommendation: &str) -> Self {
        Self {
            passed: false,
            reason,
            recommendation: recommendation.to_string(),
        }
    }
}

/// Shadow-test result for a proposal.
#[derive(Debug, Clone, Serialize)]
pub struct ShadowResults {
    pub trades_affected: usize,
    pub shadow_win_rate: f64,
    pub shadow_pnl: f64,
}

/// A proposed learning update awaiting review.
#[derive(Debug, Clone, Serialize)]
pub struct LearningProposal {
    pub id: String,
    pub kind: String,
    pub insight: LearningInsight,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,

    pub shadow_tested: bool,
    pub shadow_results: Option<ShadowResults>,

    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_reason: Option<String>,
}

// =============================================================================
// Guard
// =============================================================================

pub struct SafetyGuard {
    pub(crate) last_learning_update: Option<DateTime<Utc>>,
    pub(crate) adjustments_today: usize,
    pending: Vec<LearningProposal>,
    approved: Vec<LearningProposal>,
    rejected: Vec<LearningProposal>,
}

impl SafetyGuard {
    pub fn new() -> Self {
        Self {
            last_learning_update: None,
            adjustments_today: 0,
            pending: Vec::new(),
            approved: Vec::new(),
            rejected: Vec::new(),
        }
    }

    // ── Checks ──────────────────────────────────────────────────────────

    /// Main gate: is a learning application allowed right now?
    pub fn check_learning_allowed(&self) -> SafetyCheck {
        if let Some(last) = self.last_learning_update {
            let hours = (Utc::now() - last).num_seconds() as f64 / 3600.0;
            if hours < MIN_LEARNING_INTERVAL_HOURS as f64 {
                return SafetyCheck::fail(
                    format!(
                        "last update {hours:.1}h ago (min {MIN_LEARNING_INTERVAL_HOURS}h)"
                    ),
                    "wait for the daily learning cycle",
                );
            }
        }

        if self.adjustments_today >= MAX_ADJUSTMENTS_PER_DAY {
            return SafetyCheck::fail(
                format!("{} adjustments already applied today", self.adjustments_today),
                "wait for the next day",
            );
        }

        SafetyCheck::pass("learning allowed")
    }

    pub fn check_sample_size(&self, samples: usize) -> SafetyCheck {
        if samples < MIN_SAMPLE_SIZE_FOR_LEARNING {
            return SafetyCheck::fail(
                format!("sample size {samples} below minimum {MIN_SAMPLE_SIZE_FOR_LEARNING}"),
                "collect more data",
            );
        }
        SafetyCheck::pass("sample size adequate")
    }

    /// 5+ consecutive wins means over-confidence risk: AMPLIFY applications
    /// are denied while the streak holds.
    pub fn check_winning_streak(&self, consecutive_wins: usize) -> SafetyCheck {
        if consecutive_wins >= MAX_CONSECUTIVE_WINS_BEFORE_CAUTION {
            return SafetyCheck::fail(
                format!("{consecutive_wins} consecutive wins, over-confidence risk"),
                "keep the conservative posture despite wins",
            );
        }
        SafetyCheck::pass("no over-confidence risk")
    }

    // ── Proposal lifecycle ──────────────────────────────────────────────

    /// File a proposal for an insight. Nothing is applied here.
    pub fn propose(&mut self, insight: LearningInsight) -> String {
        let proposal = LearningProposal {
            id: Uuid::new_v4().to_string(),
            kind: "WEIGHT_ADJUSTMENT".to_string(),
            confidence: insight.confidence,
            insight,
            created_at: Utc::now(),
            shadow_tested: false,
            shadow_results: None,
            approved_at: None,
            rejected_reason: None,
        };
        let id = proposal.id.clone();
        self.pending.push(proposal);
        id
    }

    /// Replay the proposal's bucket over the historical tape: what would the
    /// win rate have been for trades in that bucket?
    pub fn shadow_test(&mut self, proposal_id: &str, tape: &[TradeFeatures]) {
        let Some(proposal) = self.pending.iter_mut().find(|p| p.id == proposal_id) else {
            return;
        };

        let affected: Vec<&TradeFeatures> = tape
            .iter()
            .filter(|t| t.buckets.contains(proposal.insight.bucket))
            .collect();

        let wins = affected.iter().filter(|t| t.won).count();
        let results = ShadowResults {
            trades_affected: affected.len(),
            shadow_win_rate: if affected.is_empty() {
                0.0
            } else {
                wins as f64 / affected.len() as f64
            },
            shadow_pnl: affected.iter().map(|t| t.pnl).sum(),
        };

        proposal.shadow_tested = true;
        proposal.shadow_results = Some(results);
    }

    /// Review every pending proposal:
    ///   shadow-tested + confidence >= 0.70 + shadow wr >= 0.60 -> approve
    ///   (blocks approve on the inverse: a LOW shadow win rate CONFIRMS a
    ///   block/restrict insight)
    ///   confidence < 0.40 -> reject
    pub fn auto_review(&mut self) {
        let mut still_pending = Vec::new();

        for mut proposal in std::mem::take(&mut self.pending) {
            if !proposal.shadow_tested {
                still_pending.push(proposal);
                continue;
            }

            let shadow_wr = proposal
                .shadow_results
                .as_ref()
                .map(|r| r.shadow_win_rate)
                .unwrap_or(0.0);

            // For restrictive insights the evidence is an UNDER-performing
            // shadow tape; for amplifying ones an over-performing tape.
            let shadow_supports = match proposal.insight.kind {
                InsightKind::Amplify => shadow_wr >= APPROVE_SHADOW_WIN_RATE,
                InsightKind::Restrict | InsightKind::Block => {
                    shadow_wr < APPROVE_SHADOW_WIN_RATE
                }
                InsightKind::Neutral => false,
            };

            if proposal.confidence >= APPROVE_CONFIDENCE && shadow_supports {
                proposal.approved_at = Some(Utc::now());
                info!(id = %proposal.id, bucket = %proposal.insight.bucket, "proposal approved");
                self.approved.push(proposal);
            } else if proposal.confidence < REJECT_CONFIDENCE {
                proposal.rejected_reason = Some("low confidence".to_string());
                self.rejected.push(proposal);
            } else {
                still_pending.push(proposal);
            }
        }

        self.pending = still_pending;
    }

    /// Drain proposals approved but not yet applied; each drain counts as an
    /// application against the daily budget.
    pub fn take_approved(&mut self) -> Vec<LearningProposal> {
        let approved = std::mem::take(&mut self.approved);
        if !approved.is_empty() {
            self.last_learning_update = Some(Utc::now());
            self.adjustments_today += approved.len().min(MAX_ADJUSTMENTS_PER_DAY);
        }
        approved
    }

    pub fn pending(&self) -> &[LearningProposal] {
        &self.pending
    }

    pub fn rejected(&self) -> &[LearningProposal] {
        &self.rejected
    }

    /// Reset daily application budget (EOD).
    pub fn daily_reset(&mut self) {
        self.adjustments_today = 0;
    }

    /// Emergency reset: clear all pending learning.
    pub fn emergency_reset(&mut self) {
        self.pending.clear();
        self.approved.clear();
        self.last_learning_update = None;
        self.adjustments_today = 0;
        warn!("safety guard emergency reset, pending learning cleared");
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "learning_allowed": self.check_learning_allowed().passed,
            "last_update": self.last_learning_update,
            "adjustments_today": self.adjustments_today,
            "max_adjustments": MAX_ADJUSTMENTS_PER_DAY,
            "pending_proposals": self.pending.len(),
            "rejected_proposals": self.rejected.len(),
        })
    }
}

impl Default for SafetyGuard {
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
    use crate::adaptive::buckets::{self, FeatureBucket};
    use crate::adaptive::learning::InsightKind;
    use crate::smart_money::OiConviction;

    fn insight(kind: InsightKind, confidence: f64) -> LearningInsight {
        LearningInsight {
            kind,
            bucket: FeatureBucket::TimeOpening,
            reason: "test".into(),
            confidence,
            recommendation: String::new(),
        }
    }

    fn tape(won: bool, n: usize) -> Vec<TradeFeatures> {
        (0..n)
            .map(|_| TradeFeatures {
                buckets: buckets::extract(
                    9 * 60 + 30,
                    85.0,
                    0.004,
                    -8.0,
                    OiConviction::Strong,
                    22.0,
                ),
                entry_delta: 0.55,
                entry_theta: -8.0,
                entry_gamma: 0.004,
                exit_reason: "HARD_SL".into(),
                holding_minutes: 10,
                won,
                pnl: if won { 500.0 } else { -500.0 },
                timestamp: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn interval_gate_blocks_within_24h() {
        let mut guard = SafetyGuard::new();
        assert!(guard.check_learning_allowed().passed);

        guard.last_learning_update = Some(Utc::now() - Duration::hours(2));
        assert!(!guard.check_learning_allowed().passed);

        guard.last_learning_update = Some(Utc::now() - Duration::hours(25));
        assert!(guard.check_learning_allowed().passed);
    }

    #[test]
    fn daily_budget_blocks_after_five() {
        let mut guard = SafetyGuard::new();
        guard.adjustments_today = MAX_ADJUSTMENTS_PER_DAY;
        assert!(!guard.check_learning_allowed().passed);

        guard.daily_reset();
        assert!(guard.check_learning_allowed().passed);
    }

    #[test]
    fn block_proposal_with_losing_shadow_is_approved() {
        let mut guard = SafetyGuard::new();
        let id = guard.propose(insight(InsightKind::Block, 0.9));
        guard.shadow_test(&id, &tape(false, 20));
        guard.auto_review();

        let approved = guard.take_approved();
        assert_eq!(approved.len(), 1);
        assert!(approved[0].approved_at.is_some());
        assert!(guard.last_learning_update.is_some());
        assert_eq!(guard.adjustments_today, 1);
    }

    #[test]
    fn amplify_needs_winning_shadow() {
        let mut guard = SafetyGuard::new();
        let id = guard.propose(insight(InsightKind::Amplify, 0.9));
        // Losing tape contradicts an amplify: stays pending.
        guard.shadow_test(&id, &tape(false, 20));
        guard.auto_review();
        assert!(guard.take_approved().is_empty());
        assert_eq!(guard.pending().len(), 1);
    }

    #[test]
    fn low_confidence_is_auto_rejected() {
        let mut guard = SafetyGuard::new();
        let id = guard.propose(insight(InsightKind::Block, 0.2));
        guard.shadow_test(&id, &tape(false, 20));
        guard.auto_review();

        assert!(guard.take_approved().is_empty());
        assert_eq!(guard.rejected().len(), 1);
    }

    #[test]
    fn untested_proposals_stay_pending() {
        let mut guard = SafetyGuard::new();
        guard.propose(insight(InsightKind::Block, 0.9));
        guard.auto_review();
        assert_eq!(guard.pending().len(), 1);
        assert!(guard.take_approved().is_empty());
    }

    #[test]
    fn winning_streak_caution() {
        let guard = SafetyGuard::new();
        assert!(guard.check_winning_streak(3).passed);
        assert!(!guard.check_winning_streak(5).passed);
    }

    #[test]
    fn sample_size_gate() {
        let guard = SafetyGuard::new();
        assert!(!guard.check_sample_size(10).passed);
        assert!(guard.check_sample_size(20).passed);
    }

    #[test]
    fn emergency_reset_clears_everything() {
        let mut guard = SafetyGuard::new();
        let id = guard.propose(insight(InsightKind::Block, 0.9));
        guard.shadow_test(&id, &tape(false, 20));
        guard.last_learning_update = Some(Utc::now());
        guard.adjustments_today = 3;

        guard.emergency_reset();
        assert!(guard.pending().is_empty());
        assert!(guard.last_learning_update.is_none());
        assert_eq!(guard.adjustments_today, 0);
    }
}
