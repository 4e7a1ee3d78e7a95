// =============================================================================
// Entry Engine — acceleration + commitment + participation must all align
// =============================================================================
//
// The engine never opens positions. It checks eight gates in order and emits
// an immutable EntryContext when every one passes, or the first failing
// gate's reason. The reason string feeds the decision audit trail.
// =============================================================================

use serde::Serialize;
use tracing::{debug, info};

use crate::bias::{BiasReading, BiasState};
use crate::config::EntryFilters;
use crate::smart_money::SmartMoneyContext;
use crate::types::{GreeksSnapshot, OptionType};

/// Entry signal emitted toward the sizing and order path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntrySignal {
    NoSignal,
    CallBuy,
    PutBuy,
}

impl std::fmt::Display for EntrySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSignal => write!(f, "NO_SIGNAL"),
            Self::CallBuy => write!(f, "CALL_BUY"),
            Self::PutBuy => write!(f, "PUT_BUY"),
        }
    }
}

/// Immutable context for an approved entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryContext {
    pub signal: EntrySignal,
    pub option_type: OptionType,
    pub strike: u32,
    pub entry_price: f64,
    pub entry_delta: f64,
    pub entry_gamma: f64,
    pub entry_theta: f64,
    pub entry_iv: f64,
    pub reason_tags: Vec<String>,
    pub confidence: f64,
}

/// Outcome of one entry evaluation.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Signal(EntryContext),
    NoSignal(String),
}

impl EntryOutcome {
    pub fn context(&self) -> Option<&EntryContext> {
        match self {
            Self::Signal(ctx) => Some(ctx),
            Self::NoSignal(_) => None,
        }
    }

    pub fn block_reason(&self) -> Option<&str> {
        match self {
            Self::Signal(_) => None,
            Self::NoSignal(reason) => Some(reason),
        }
    }
}

pub struct EntryEngine {
    filters: EntryFilters,
}

impl EntryEngine {
    pub fn new(filters: EntryFilters) -> Self {
        Self { filters }
    }

    /// Evaluate all entry gates for the chosen leg.
    pub fn evaluate(
        &self,
        bias: &BiasReading,
        current: &GreeksSnapshot,
        previous: &GreeksSnapshot,
        smart_money: &SmartMoneyContext,
        strike: u32,
    ) -> EntryOutcome {
        // ── 1. Bias permission ──────────────────────────────────────
        let option_type = match bias.state {
            BiasState::Bullish => OptionType::CE,
            BiasState::Bearish => OptionType::PE,
            BiasState::NoTrade | BiasState::Unknown => {
                return EntryOutcome::NoSignal(format!("bias is {}", bias.state));
            }
        };
        if bias.confidence < 60.0 {
            return EntryOutcome::NoSignal(format!(
                "bias confidence {:.0} below 60",
                bias.confidence
            ));
        }

        // ── 2. Spread cap ───────────────────────────────────────────
        let Some(spread_pct) = current.spread_percent() else {
            return EntryOutcome::NoSignal("quote incomplete (bid/ask/ltp)".to_string());
        };
        if spread_pct > self.filters.max_spread_percent {
            return EntryOutcome::NoSignal(format!(
                "spread {spread_pct:.2}% above {:.2}% cap",
                self.filters.max_spread_percent
            ));
        }

        // ── 3. Quote validity ───────────────────────────────────────
        if current.bid <= 0.0 || current.ask <= 0.0 || current.ltp <= 0.0 {
            return EntryOutcome::NoSignal("quote has non-positive legs".to_string());
        }

        // ── 4. Choppiness ───────────────────────────────────────────
        if let Some(reason) = self.choppy_reason(current, previous) {
            debug!(reason = %reason, "entry blocked: choppy market");
            return EntryOutcome::NoSignal(reason);
        }

        // ── 5. Momentum alignment ───────────────────────────────────
        let mut reason_tags = Vec::new();
        let mut confidence: f64 = 0.0;

        if current.ltp > previous.ltp {
            reason_tags.push("ltp_rising".to_string());
            confidence += 15.0;
        } else {
            return EntryOutcome::NoSignal("LTP not rising".to_string());
        }

        if current.volume > previous.volume {
            reason_tags.push("volume_rising".to_string());
            confidence += 15.0;
        } else {
            return EntryOutcome::NoSignal("volume not rising".to_string());
        }

        if current.oi > previous.oi {
            reason_tags.push("oi_rising".to_string());
            confidence += 15.0;
        } else {
            return EntryOutcome::NoSignal("OI not rising".to_string());
        }

        if current.gamma > previous.gamma && current.gamma > self.filters.ideal_gamma_min {
            reason_tags.push("gamma_rising".to_string());
            confidence += 15.0;
        } else {
            return EntryOutcome::NoSignal("gamma not rising above floor".to_string());
        }

        // ── 6. Delta power zone ─────────────────────────────────────
        let delta_valid = match option_type {
            OptionType::CE => current.delta >= self.filters.ideal_delta_call.0,
            OptionType::PE => current.delta <= self.filters.ideal_delta_put.1,
        };
        if delta_valid {
            reason_tags.push("delta_power_zone".to_string());
            confidence += 20.0;
        } else {
            return EntryOutcome::NoSignal(format!(
                "delta {:.2} outside power zone for {option_type}",
                current.delta
            ));
        }

        // ── 7. Rejection rules ──────────────────────────────────────
        if let Some(reason) = self.rejection_reason(current, previous, spread_pct) {
            debug!(reason = %reason, "entry rejected");
            return EntryOutcome::NoSignal(reason);
        }

        // ── 8. Trap probability ─────────────────────────────────────
        if smart_money.should_block {
            return EntryOutcome::NoSignal(format!(
                "smart money block: {} (trap p={:.2})",
                smart_money.validation.verdict, smart_money.trap.probability
            ));
        }
        if smart_money.trap.probability >= self.filters.trap_probability_max {
            return EntryOutcome::NoSignal(format!(
                "trap probability {:.2} at threshold",
                smart_money.trap.probability
            ));
        }

        confidence += bias.confidence * 0.2;

        let context = EntryContext {
            signal: match option_type {
                OptionType::CE => EntrySignal::CallBuy,
                OptionType::PE => EntrySignal::PutBuy,
            },
            option_type,
            strike,
            entry_price: current.ltp,
            entry_delta: current.delta,
            entry_gamma: current.gamma,
            entry_theta: current.theta,
            entry_iv: current.iv,
            reason_tags,
            confidence: confidence.min(100.0),
        };

        info!(
            signal = %context.signal,
            strike,
            entry_price = context.entry_price,
            confidence = context.confidence,
            "entry signal emitted"
        );

        EntryOutcome::Signal(context)
    }

    /// Small price change with an oscillating delta, or weak delta on both
    /// observations, marks the tape as choppy.
    fn choppy_reason(&self, current: &GreeksSnapshot, previous: &GreeksSnapshot) -> Option<String> {
        let price_change_pct = if previous.ltp > 0.0 {
            (current.ltp - previous.ltp).abs() / previous.ltp * 100.0
        } else {
            0.0
        };
        let delta_change = (current.delta - previous.delta).abs();

        if price_change_pct < 0.5 && delta_change > 0.1 {
            return Some("choppy: small price move with oscillating delta".to_string());
        }
        if current.delta.abs() < 0.45 && previous.delta.abs() < 0.45 {
            return Some("choppy: weak delta on both observations".to_string());
        }
        None
    }

    fn rejection_reason(
        &self,
        current: &GreeksSnapshot,
        previous: &GreeksSnapshot,
        spread_pct: f64,
    ) -> Option<String> {
        // Flat price while OI builds: an operator adjustment, not a move.
        let price_move = (current.ltp - previous.ltp).abs();
        if price_move < self.filters.reject_oi_flat_threshold {
            return Some(format!(
                "price move {price_move:.2} below flat-OI threshold"
            ));
        }

        if previous.iv > 0.0 {
            let iv_change_pct = (current.iv - previous.iv) / previous.iv * 100.0;
            if iv_change_pct < self.filters.reject_iv_drop_percent {
                return Some(format!("IV crush: {iv_change_pct:.1}% change"));
            }
        }

        if spread_pct > self.filters.reject_spread_widening {
            return Some(format!("spread widened to {spread_pct:.2}%"));
        }

        let delta_change = (current.delta - previous.delta).abs();
        if delta_change > self.filters.reject_delta_spike_collapse {
            return Some(format!("delta spike-collapse: {delta_change:.2} swing"));
        }

        None
    }
}

// =============================================================================
// Tests
// =============================================================================
