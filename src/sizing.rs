// =============================================================================
// Position Sizing — risk-first, Kelly-adjusted, lot-aligned
// =============================================================================
//
// Non-negotiable rules:
//   - risk stays inside the configured per-trade band;
//   - SL wider than the hard cap skips the trade;
//   - quantity is always a whole multiple of the lot size;
//   - Kelly may only RAISE the effective risk% (win_prob > 0.60), and the
//     hard bounds still apply on top.
//
// The caller layers the adaptive size multiplier on the returned quantity.
// =============================================================================

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AdaptiveConfig, RiskLimits};

/// Optional Greeks context for probability-weighted sizing.
#[derive(Debug, Clone, Copy)]
pub struct SizingGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub iv: f64,
    /// Bias confidence, 0-100.
    pub bias_confidence: f64,
    pub oi_change: f64,
}

/// Full sizing result handed to the risk gate and order path.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSize {
    pub quantity: u32,
    pub lot_size: u32,
    pub num_lots: f64,
    pub capital_allocated: f64,
    pub max_loss_amount: f64,
    pub hard_sl_percent: f64,
    pub hard_sl_price: f64,
    pub target_price: f64,
    pub risk_reward_ratio: f64,
    pub sizing_valid: bool,
    pub rejection_reason: Option<String>,
    pub kelly_fraction: Option<f64>,
    pub win_probability: Option<f64>,
}

impl PositionSize {
    fn rejected(lot_size: u32, sl_percent: f64, sl_price: f64, target: f64, reason: &str) -> Self {
        Self {
            quantity: 0,
            lot_size,
            num_lots: 0.0,
            capital_allocated: 0.0,
            max_loss_amount: 0.0,
            hard_sl_percent: sl_percent,
            hard_sl_price: sl_price,
            target_price: target,
            risk_reward_ratio: 0.0,
            sizing_valid: false,
            rejection_reason: Some(reason.to_string()),
            kelly_fraction: None,
            win_probability: None,
        }
    }
}

pub struct PositionSizing {
    limits: RiskLimits,
    adaptive: AdaptiveConfig,
    lot_size: u32,
}

impl PositionSizing {
    pub fn new(limits: RiskLimits, adaptive: AdaptiveConfig, lot_size: u32) -> Self {
        Self {
            limits,
            adaptive,
            lot_size,
        }
    }

    // ── Probability estimate ────────────────────────────────────────────

    /// Win probability from Greeks + market conditions, clamped to
    /// [0.30, 0.80] — never extreme certainty.
    pub fn estimate_win_probability(&self, greeks: SizingGreeks) -> f64 {
        let base = 0.50;

        let delta_boost = match greeks.delta.abs() {
            d if d > 0.40 => 0.15,
            d if d > 0.30 => 0.10,
            d if d > 0.20 => 0.05,
            _ => 0.0,
        };

        let gamma_boost = match greeks.gamma {
            g if g > 0.01 => 0.10,
            g if g > 0.005 => 0.05,
            _ => 0.0,
        };

        let iv_boost = if (15.0..=25.0).contains(&greeks.iv) {
            0.10
        } else if greeks.iv > 25.0 && greeks.iv <= 35.0 {
            0.05
        } else if greeks.iv > 45.0 {
            -0.05
        } else {
            0.0
        };

        let conf_boost = (greeks.bias_confidence - 50.0) / 500.0;
        let oi_boost = if greeks.oi_change > 0.0 { 0.05 } else { 0.0 };

        let prob = base + delta_boost + gamma_boost + iv_boost + conf_boost + oi_boost;
        let prob = prob.clamp(0.30, 0.80);

        debug!(
            delta = greeks.delta,
            gamma = greeks.gamma,
            iv = greeks.iv,
            bias_confidence = greeks.bias_confidence,
            win_probability = prob,
            "win probability estimated"
        );
        prob
    }

    /// Fractional Kelly: (p·b − q)/b scaled by the configured fraction and
    /// clamped to [0, 0.20] of capital.
    pub fn kelly_size(&self, win_prob: f64, win_amount: f64, loss_amount: f64) -> f64 {
        if win_amount <= 0.0 || loss_amount <= 0.0 {
            return 0.0;
        }
        let q = 1.0 - win_prob;
        let b = win_amount / loss_amount;
        let kelly = (win_prob * b - q) / b;
        (kelly * self.adaptive.kelly_fraction).clamp(0.0, 0.20)
    }

    // ── Sizing ──────────────────────────────────────────────────────────

    /// Map (entry, SL, target, risk%) to a lot-aligned quantity.
    pub fn calculate(
        &self,
        entry_price: f64,
        sl_price: f64,
        target_price: f64,
        risk_percent: Option<f64>,
        greeks: Option<SizingGreeks>,
    ) -> PositionSize {
        if entry_price <= 0.0 || sl_price <= 0.0 {
            return PositionSize::rejected(
                self.lot_size,
                0.0,
                sl_price,
                target_price,
                "invalid entry or SL price",
            );
        }

        let mut risk_percent = risk_percent.unwrap_or(self.limits.risk_per_trade_optimal);
        let mut win_probability = None;
        let mut kelly_fraction = None;

        // Probability weighting + optional Kelly override (raise-only).
        if self.adaptive.use_probability_weighting {
            if let Some(g) = greeks {
                let prob = self.estimate_win_probability(g);
                win_probability = Some(prob);

                if self.adaptive.kelly_enabled && prob > 0.60 {
                    let win_amount = (target_price - entry_price).abs();
                    let loss_amount = (entry_price - sl_price).abs();
                    let kelly = self.kelly_size(prob, win_amount, loss_amount);
                    kelly_fraction = Some(kelly);

                    let kelly_risk_pct = kelly * 100.0;
                    if kelly_risk_pct > risk_percent {
                        info!(
                            kelly_risk_pct,
                            win_probability = prob,
                            "Kelly override raising risk percent"
                        );
                        risk_percent = kelly_risk_pct;
                    }
                }
            }
        }

        // Hard bounds always apply, Kelly or not.
        risk_percent = risk_percent.clamp(
            self.limits.risk_per_trade_min,
            self.limits.risk_per_trade_max,
        );

        // ── SL validation ───────────────────────────────────────────
        let sl_percent = (entry_price - sl_price).abs() / entry_price * 100.0;
        if sl_percent > self.limits.hard_sl_percent_exceed_skip {
            warn!(sl_percent, "SL too wide, trade skipped");
            let mut rejected = PositionSize::rejected(
                self.lot_size,
                sl_percent,
                sl_price,
                target_price,
                &format!(
                    "SL too wide: {sl_percent:.2}% (max {:.2}%)",
                    self.limits.hard_sl_percent_exceed_skip
                ),
            );
            rejected.win_probability = win_probability;
            return rejected;
        }

        // ── Quantity ────────────────────────────────────────────────
        let max_loss_allowed = self.limits.capital * risk_percent / 100.0;
        let loss_per_unit = (entry_price - sl_price).abs();
        if loss_per_unit <= 0.0 {
            return PositionSize::rejected(
                self.lot_size,
                sl_percent,
                sl_price,
                target_price,
                "SL equals entry",
            );
        }

        let raw_qty = max_loss_allowed / loss_per_unit;
        let num_lots = (raw_qty / self.lot_size as f64).floor() as u32;

        if num_lots < 1 {
            return PositionSize::rejected(
                self.lot_size,
                sl_percent,
                sl_price,
                target_price,
                &format!(
                    "insufficient capital for 1 lot ({}) at {risk_percent:.1}% risk",
                    self.lot_size
                ),
            );
        }

        let mut quantity = num_lots * self.lot_size;
        if quantity > self.limits.max_position_size {
            quantity = (self.limits.max_position_size / self.lot_size) * self.lot_size;
        }
        let num_lots = quantity as f64 / self.lot_size as f64;

        let max_loss_amount = quantity as f64 * loss_per_unit;
        let capital_allocated = entry_price * quantity as f64;
        let profit_per_unit = if target_price > 0.0 {
            (target_price - entry_price).abs()
        } else {
            0.0
        };
        let risk_reward_ratio = if max_loss_amount > 0.0 {
            quantity as f64 * profit_per_unit / max_loss_amount
        } else {
            0.0
        };

        info!(
            quantity,
            num_lots,
            max_loss_amount,
            risk_percent,
            risk_reward_ratio,
            "position sized"
        );

        PositionSize {
            quantity,
            lot_size: self.lot_size,
            num_lots,
            capital_allocated,
            max_loss_amount,
            hard_sl_percent: sl_percent,
            hard_sl_price: sl_price,
            target_price,
            risk_reward_ratio,
            sizing_valid: true,
            rejection_reason: None,
            kelly_fraction,
            win_probability,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
