// =============================================================================
// Loss-Pattern Detector — stop repeating the same mistake
// =============================================================================
//
// Groups the last 30 days of losses by time bucket, Greeks bucket, exit
// reason, and volatility bucket. Any group with three or more members is a
// pattern; HIGH and CRITICAL patterns raise a PatternBlock on the bucket
// which the adaptive pipeline consults before every entry.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::adaptive::buckets::FeatureBucket;
use crate::adaptive::learning::TradeFeatures;

/// Minimum similar losses before a pattern exists.
const MIN_OCCURRENCES: usize = 3;
/// Analysis window.
const LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatternType {
    Temporal,
    GreeksSetup,
    ExitReason,
    MarketCondition,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Temporal => "TEMPORAL",
            Self::GreeksSetup => "GREEKS_SETUP",
            Self::ExitReason => "EXIT_REASON",
            Self::MarketCondition => "MARKET_CONDITION",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatternSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for PatternSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{name}")
    }
}

fn severity_for(occurrences: usize) -> PatternSeverity {
    match occurrences {
        0..=3 => PatternSeverity::Low,
        4..=5 => PatternSeverity::Medium,
        6..=9 => PatternSeverity::High,
        _ => PatternSeverity::Critical,
    }
}

fn block_hours_for(severity: PatternSeverity) -> i64 {
    match severity {
        PatternSeverity::Low => 24,
        PatternSeverity::Medium => 48,
        PatternSeverity::High => 72,
        PatternSeverity::Critical => 168,
    }
}

/// A detected repeating loss shape.
#[derive(Debug, Clone, Serialize)]
pub struct LossPattern {
    pub pattern_type: PatternType,
    pub severity: PatternSeverity,
    pub characteristic: String,
    pub occurrences: usize,
    pub total_loss: f64,
    pub avg_loss: f64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub recommended_action: String,
    pub block_duration_hours: i64,
    /// Bucket the pattern maps to, when it has one.
    pub bucket: Option<FeatureBucket>,
}

impl LossPattern {
    pub fn should_block(&self) -> bool {
        matches!(
            self.severity,
            PatternSeverity::High | PatternSeverity::Critical
        )
    }
}

/// Active block raised by a HIGH/CRITICAL pattern.
#[derive(Debug, Clone, Serialize)]
pub struct PatternBlock {
    pub bucket: FeatureBucket,
    pub block_start: DateTime<Utc>,
    pub block_end: DateTime<Utc>,
    pub reason: String,
}

impl PatternBlock {
    pub fn is_active(&self) -> bool {
        Utc::now() < self.block_end
    }

    pub fn remaining_hours(&self) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        (self.block_end - Utc::now()).num_seconds() as f64 / 3600.0
    }
}

// =============================================================================
// Detector
// =============================================================================

#[derive(Default)]
pub struct PatternDetector {
    patterns: Vec<LossPattern>,
    active_blocks: Vec<PatternBlock>,
}

impl PatternDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mine the trade history for loss patterns and refresh active blocks.
    pub fn analyze(&mut self, history: &[TradeFeatures]) -> Vec<LossPattern> {
        let cutoff = Utc::now() - Duration::days(LOOKBACK_DAYS);
        let losses: Vec<&TradeFeatures> = history
            .iter()
            .filter(|t| !t.won && t.timestamp >= cutoff)
            .collect();

        let mut patterns = Vec::new();
        patterns.extend(group_by_bucket(
            &losses,
            PatternType::Temporal,
            |t| t.buckets.time,
        ));
        patterns.extend(group_by_bucket(
            &losses,
            PatternType::GreeksSetup,
            |t| t.buckets.greeks,
        ));
        patterns.extend(exit_reason_patterns(&losses));
        patterns.extend(group_by_bucket(
            &losses,
            PatternType::MarketCondition,
            |t| t.buckets.vol,
        ));

        self.patterns = patterns.clone();
        self.refresh_blocks(&patterns);
        patterns
    }

    /// Is `bucket` under an active block? Returns the block reason.
    pub fn is_bucket_blocked(&self, bucket: FeatureBucket) -> Option<String> {
        self.active_blocks
            .iter()
            .find(|b| b.bucket == bucket && b.is_active())
            .map(|b| {
                format!(
                    "{} (blocked {:.1}h more)",
                    b.reason,
                    b.remaining_hours()
                )
            })
    }

    pub fn active_blocks(&self) -> Vec<PatternBlock> {
        self.active_blocks
            .iter()
            .filter(|b| b.is_active())
            .cloned()
            .collect()
    }

    pub fn detected_patterns(&self) -> &[LossPattern] {
        &self.patterns
    }

    /// Clear all blocks (emergency reset).
    pub fn reset(&mut self) {
        self.active_blocks.clear();
        self.patterns.clear();
        warn!("pattern blocks cleared");
    }

    fn refresh_blocks(&mut self, patterns: &[LossPattern]) {
        self.active_blocks.retain(|b| b.is_active());

        for pattern in patterns.iter().filter(|p| p.should_block()) {
            let Some(bucket) = pattern.bucket else {
                continue;
            };
            let already = self
                .active_blocks
                .iter()
                .any(|b| b.bucket == bucket && b.is_active());
            if already {
                continue;
            }

            let block = PatternBlock {
                bucket,
                block_start: Utc::now(),
                block_end: Utc::now() + Duration::hours(pattern.block_duration_hours),
                reason: format!(
                    "{}: {} — {} losses ({:.0})",
                    pattern.pattern_type,
                    pattern.characteristic,
                    pattern.occurrences,
                    pattern.total_loss
                ),
            };
            info!(
                bucket = %bucket,
                hours = pattern.block_duration_hours,
                reason = %block.reason,
                "pattern block raised"
            );
            self.active_blocks.push(block);
        }
    }
}

fn group_by_bucket(
    losses: &[&TradeFeatures],
    pattern_type: PatternType,
    key: impl Fn(&TradeFeatures) -> FeatureBucket,
) -> Vec<LossPattern> {
    let mut groups: HashMap<FeatureBucket, Vec<&TradeFeatures>> = HashMap::new();
    for &loss in losses {
        groups.entry(key(loss)).or_default().push(loss);
    }

    let mut patterns: Vec<LossPattern> = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= MIN_OCCURRENCES)
        .map(|(bucket, members)| build_pattern(pattern_type, bucket.to_string(), Some(bucket), &members))
        .collect();
    patterns.sort_by(|a, b| b.total_loss.partial_cmp(&a.total_loss).unwrap_or(std::cmp::Ordering::Equal));
    patterns
}

/// Exit-reason groups are informational: they carry no bucket and raise no
/// block.
fn exit_reason_patterns(losses: &[&TradeFeatures]) -> Vec<LossPattern> {
    let mut groups: HashMap<&str, Vec<&TradeFeatures>> = HashMap::new();
    for &loss in losses {
        groups.entry(loss.exit_reason.as_str()).or_default().push(loss);
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= MIN_OCCURRENCES)
        .map(|(reason, members)| {
            let mut pattern =
                build_pattern(PatternType::ExitReason, reason.to_string(), None, &members);
            pattern.recommended_action = "MONITOR".to_string();
            pattern.block_duration_hours = 0;
            pattern
        })
        .collect()
}

fn build_pattern(
    pattern_type: PatternType,
    characteristic: String,
    bucket: Option<FeatureBucket>,
    members: &[&TradeFeatures],
) -> LossPattern {
    let total_loss: f64 = members.iter().map(|t| t.pnl.abs()).sum();
    let severity = severity_for(members.len());
    let first = members.iter().map(|t| t.timestamp).min().unwrap_or_else(Utc::now);
    let last = members.iter().map(|t| t.timestamp).max().unwrap_or_else(Utc::now);

    LossPattern {
        pattern_type,
        severity,
        characteristic,
        occurrences: members.len(),
        total_loss,
        avg_loss: total_loss / members.len() as f64,
        first_occurrence: first,
        last_occurrence: last,
        recommended_action: if matches!(severity, PatternSeverity::High | PatternSeverity::Critical)
        {
            "BLOCK".to_string()
        } else {
            "REDUCE".to_string()
        },
        block_duration_hours: block_hours_for(severity),
        bucket,
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

    fn loss(time_minute: u32, pnl: f64, days_ago: i64) -> TradeFeatures {
        TradeFeatures {
            buckets: buckets::extract(time_minute, 85.0, 0.004, -8.0, OiConviction::Strong, 22.0),
            entry_delta: 0.55,
            entry_theta: -8.0,
            entry_gamma: 0.004,
            exit_reason: "HARD_SL".to_string(),
            holding_minutes: 10,
            won: false,
            pnl,
            timestamp: Utc::now() - Duration::days(days_ago),
        }
    }

    #[test]
    fn six_opening_losses_raise_a_72h_block() {
        let mut detector = PatternDetector::new();
        let history: Vec<TradeFeatures> =
            (0..6).map(|i| loss(9 * 60 + 30, -800.0, i)).collect();

        let patterns = detector.analyze(&history);
        let temporal = patterns
            .iter()
            .find(|p| {
                p.pattern_type == PatternType::Temporal
                    && p.bucket == Some(FeatureBucket::TimeOpening)
            })
            .unwrap();
        assert_eq!(temporal.severity, PatternSeverity::High);
        assert_eq!(temporal.block_duration_hours, 72);
        assert!(temporal.should_block());

        let reason = detector
            .is_bucket_blocked(FeatureBucket::TimeOpening)
            .unwrap();
        assert!(reason.contains("TEMPORAL"));
        assert!(reason.contains("6 losses"));
    }

    #[test]
    fn three_losses_are_low_and_do_not_block() {
        let mut detector = PatternDetector::new();
        let history: Vec<TradeFeatures> =
            (0..3).map(|i| loss(9 * 60 + 30, -500.0, i)).collect();

        let patterns = detector.analyze(&history);
        let temporal = patterns
            .iter()
            .find(|p| p.pattern_type == PatternType::Temporal)
            .unwrap();
        assert_eq!(temporal.severity, PatternSeverity::Low);
        assert!(detector
            .is_bucket_blocked(FeatureBucket::TimeOpening)
            .is_none());
    }

    #[test]
    fn old_losses_fall_outside_the_window() {
        let mut detector = PatternDetector::new();
        let history: Vec<TradeFeatures> =
            (0..6).map(|_| loss(9 * 60 + 30, -800.0, 45)).collect();
        let patterns = detector.analyze(&history);
        assert!(patterns.is_empty());
    }

    #[test]
    fn ten_losses_are_critical_with_week_block() {
        let mut detector = PatternDetector::new();
        let history: Vec<TradeFeatures> =
            (0..10).map(|i| loss(9 * 60 + 30, -800.0, i % 5)).collect();

        let patterns = detector.analyze(&history);
        let temporal = patterns
            .iter()
            .find(|p| p.pattern_type == PatternType::Temporal)
            .unwrap();
        assert_eq!(temporal.severity, PatternSeverity::Critical);
        assert_eq!(temporal.block_duration_hours, 168);
    }

    #[test]
    fn exit_reason_patterns_never_block() {
        let mut detector = PatternDetector::new();
        let history: Vec<TradeFeatures> =
            (0..8).map(|i| loss(11 * 60, -400.0, i % 3)).collect();

        let patterns = detector.analyze(&history);
        let exit_pattern = patterns
            .iter()
            .find(|p| p.pattern_type == PatternType::ExitReason)
            .unwrap();
        assert_eq!(exit_pattern.recommended_action, "MONITOR");
        assert_eq!(exit_pattern.block_duration_hours, 0);
        assert!(exit_pattern.bucket.is_none());
    }

    #[test]
    fn reset_clears_blocks() {
        let mut detector = PatternDetector::new();
        let history: Vec<TradeFeatures> =
            (0..6).map(|i| loss(9 * 60 + 30, -800.0, i)).collect();
        detector.analyze(&history);
        assert!(!detector.active_blocks().is_empty());

        detector.reset();
        assert!(detector.active_blocks().is_empty());
    }

    #[test]
    fn wins_are_ignored() {
        let mut detector = PatternDetector::new();
        let mut history: Vec<TradeFeatures> = Vec::new();
        for i in 0..6 {
            let mut t = loss(9 * 60 + 30, 800.0, i);
            t.won = true;
            history.push(t);
        }
        assert!(detector.analyze(&history).is_empty());
    }
}
