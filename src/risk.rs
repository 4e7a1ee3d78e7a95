// =============================================================================
// Risk Manager — the gate in front of every order
// =============================================================================
//
// Checks, in order: kill switch, cooldown, daily loss, trade count, projected
// portfolio Greeks caps. The manager never cancels in-flight orders itself;
// tripping the kill switch raises an emergency-exit broadcast that the tick
// loop observes and acts on.
//
// Daily counters are strictly monotonic within a trading day and reset when
// the calendar date rolls.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RiskLimits;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Net portfolio Greeks over the active trade set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PortfolioGreeks {
    pub net_delta: f64,
    pub net_gamma: f64,
    pub net_theta: f64,
    pub net_vega: f64,
    pub gross_delta: f64,
}

/// Per-trade exposure used to project the portfolio after a proposed entry.
#[derive(Debug, Clone, Copy)]
pub struct ProposedExposure {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub quantity: u32,
}

/// Snapshot of the risk state for the dashboard and journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub trades_today: u32,
    pub daily_pnl: f64,
    pub daily_risk_used_pct: f64,
    pub consecutive_losses: u32,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    pub kill_switch_active: bool,
    pub current_date: String,
    #[serde(default)]
    pub portfolio: PortfolioGreeks,
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind RwLock)
// ---------------------------------------------------------------------------

struct Inner {
    trades_today: u32,
    daily_pnl: f64,
    daily_risk_used: f64,
    consecutive_losses: u32,
    cooldown_until: Option<DateTime<Utc>>,
    kill_switch_active: bool,
    emergency_exit_reason: Option<String>,
    portfolio: PortfolioGreeks,
    current_date: String,
}

// ---------------------------------------------------------------------------
// Risk Manager
// ---------------------------------------------------------------------------

pub struct RiskManager {
    limits: RiskLimits,
    state: RwLock<Inner>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        info!(
            capital = limits.capital,
            max_daily_loss = limits.max_daily_loss_amount,
            max_trades = limits.max_trades_per_day,
            "RiskManager initialised"
        );

        Self {
            limits,
            state: RwLock::new(Inner {
                trades_today: 0,
                daily_pnl: 0.0,
                daily_risk_used: 0.0,
                consecutive_losses: 0,
                cooldown_until: None,
                kill_switch_active: false,
                emergency_exit_reason: None,
                portfolio: PortfolioGreeks::default(),
                current_date: today,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Pre-trade gate
    // -------------------------------------------------------------------------

    /// Evaluate every gate for a proposed entry.
    ///
    /// Returns `(true, None)` when the order may go out, or `(false,
    /// Some(reason))`. On denial the caller must abandon the entry.
    pub fn can_take_trade(&self, proposed: Option<ProposedExposure>) -> (bool, Option<String>) {
        self.maybe_reset_daily();
        let s = self.state.read();

        if s.kill_switch_active {
            return (false, Some("Kill switch active".to_string()));
        }

        if let Some(until) = s.cooldown_until {
            if Utc::now() < until {
                return (
                    false,
                    Some(format!(
                        "Cooldown in force until {}",
                        until.format("%H:%M:%S")
                    )),
                );
            }
        }

        if s.daily_pnl <= -self.limits.max_daily_loss_amount {
            return (false, Some("Daily loss limit reached".to_string()));
        }

        if s.trades_today >= self.limits.max_trades_per_day {
            return (
                false,
                Some(format!(
                    "Trade limit reached: {} trades today (limit {})",
                    s.trades_today, self.limits.max_trades_per_day
                )),
            );
        }

        if let Some(p) = proposed {
            let qty = p.quantity as f64;
            let projected_net_delta = s.portfolio.net_delta + p.delta * qty;
            let projected_net_gamma = s.portfolio.net_gamma + p.gamma * qty;
            let projected_net_theta = s.portfolio.net_theta + p.theta * qty;
            let projected_net_vega = s.portfolio.net_vega + p.vega * qty;
            let projected_gross_delta = s.portfolio.gross_delta + (p.delta * qty).abs();

            if projected_net_delta.abs() > self.limits.max_net_delta {
                return (
                    false,
                    Some(format!(
                        "Net delta {projected_net_delta:.1} would exceed cap {:.1}",
                        self.limits.max_net_delta
                    )),
                );
            }
            if projected_net_gamma.abs() > self.limits.max_net_gamma {
                return (false, Some("Net gamma cap exceeded".to_string()));
            }
            if projected_net_theta.abs() > self.limits.max_net_theta {
                return (false, Some("Net theta cap exceeded".to_string()));
            }
            if projected_net_vega.abs() > self.limits.max_net_vega {
                return (false, Some("Net vega cap exceeded".to_string()));
            }
            if projected_gross_delta > self.limits.max_gross_delta {
                return (false, Some("Gross delta cap exceeded".to_string()));
            }
        }

        (true, None)
    }

    // -------------------------------------------------------------------------
    // Recording
    // -------------------------------------------------------------------------

    /// Record an accepted entry: bump the trade counter and the used risk.
    pub fn record_entry(&self, max_loss_amount: f64) {
        self.maybe_reset_daily();
        let mut s = self.state.write();
        s.trades_today += 1;
        s.daily_risk_used += max_loss_amount;
        debug!(
            trades_today = s.trades_today,
            daily_risk_used = s.daily_risk_used,
            "entry recorded"
        );
    }

    /// Record a completed trade's PnL; arms the cooldown after the
    /// configured number of consecutive losses, and trips the kill switch
    /// when the daily loss limit is breached.
    pub fn record_trade_result(&self, pnl: f64) {
        self.maybe_reset_daily();
        let mut s = self.state.write();

        s.daily_pnl += pnl;

        if pnl >= 0.0 {
            s.consecutive_losses = 0;
        } else {
            s.consecutive_losses += 1;
            if s.consecutive_losses >= self.limits.max_consecutive_losses {
                let until = Utc::now() + chrono::Duration::minutes(self.limits.cooldown_minutes);
                s.cooldown_until = Some(until);
                warn!(
                    consecutive_losses = s.consecutive_losses,
                    cooldown_until = %until,
                    "cooldown armed after consecutive losses"
                );
            }
        }

        if s.daily_pnl <= -self.limits.max_daily_loss_amount && !s.kill_switch_active {
            s.kill_switch_active = true;
            s.emergency_exit_reason = Some("strategy_stop".to_string());
            warn!(
                daily_pnl = s.daily_pnl,
                limit = self.limits.max_daily_loss_amount,
                "daily loss limit breached, kill switch tripped"
            );
        }

        debug!(
            pnl,
            daily_pnl = s.daily_pnl,
            consecutive_losses = s.consecutive_losses,
            "trade result recorded"
        );
    }

    /// Replace the portfolio Greeks; called whenever the active trade set
    /// changes. Vega aggregates as Σ(vega × qty), not a premium proxy.
    pub fn update_portfolio(&self, portfolio: PortfolioGreeks) {
        self.state.write().portfolio = portfolio;
    }

    // -------------------------------------------------------------------------
    // Kill switch
    // -------------------------------------------------------------------------

    /// Trip the kill switch and broadcast an emergency exit with `reason`.
    pub fn activate_kill_switch(&self, reason: &str) {
        let mut s = self.state.write();
        s.kill_switch_active = true;
        s.emergency_exit_reason = Some(reason.to_string());
        warn!(reason, "kill switch activated");
    }

    /// Clear the kill switch (operator action via the API).
    pub fn clear_kill_switch(&self) {
        let mut s = self.state.write();
        s.kill_switch_active = false;
        s.emergency_exit_reason = None;
        info!("kill switch cleared");
    }

    /// Consume a pending emergency-exit broadcast, if one is waiting. The
    /// tick loop polls this and closes all positions with the carried reason.
    pub fn take_emergency_exit(&self) -> Option<String> {
        self.state.write().emergency_exit_reason.take()
    }

    // -------------------------------------------------------------------------
    // Snapshots / reset
    // -------------------------------------------------------------------------

    pub fn get_state(&self) -> RiskState {
        self.maybe_reset_daily();
        let s = self.state.read();
        RiskState {
            trades_today: s.trades_today,
            daily_pnl: s.daily_pnl,
            daily_risk_used_pct: if self.limits.capital > 0.0 {
                s.daily_risk_used / self.limits.capital * 100.0
            } else {
                0.0
            },
            consecutive_losses: s.consecutive_losses,
            cooldown_until: s.cooldown_until,
            kill_switch_active: s.kill_switch_active,
            current_date: s.current_date.clone(),
            portfolio: s.portfolio,
        }
    }

    /// Reset daily counters at session start (or operator request).
    pub fn reset_daily(&self) {
        let mut s = self.state.write();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Self::do_reset(&mut s, &today);
        info!(date = %today, "daily risk counters reset");
    }

    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        // Re-check: another thread may have already rolled the date.
        if s.current_date != today {
            info!(old = %s.current_date, new = %today, "date rolled, resetting risk counters");
            Self::do_reset(&mut s, &today);
        }
    }

    fn do_reset(s: &mut Inner, date: &str) {
        s.trades_today = 0;
        s.daily_pnl = 0.0;
        s.daily_risk_used = 0.0;
        s.consecutive_losses = 0;
        s.cooldown_until = None;
        s.current_date = date.to_string();
        // Kill switch survives the date roll; it is an operator decision.
    }
}

impl std::fmt::Debug for RiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("RiskManager")
            .field("trades_today", &s.trades_today)
            .field("daily_pnl", &s.daily_pnl)
            .field("kill_switch", &s.kill_switch_active)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default())
    }

    fn exposure(delta: f64, quantity: u32) -> ProposedExposure {
        ProposedExposure {
            delta,
            gamma: 0.004,
            theta: -8.0,
            vega: 12.0,
            quantity,
        }
    }

    #[test]
    fn clean_state_allows_trading() {
        let (allowed, reason) = manager().can_take_trade(Some(exposure(0.55, 225)));
        assert!(allowed, "denied: {reason:?}");
    }

    #[test]
    fn daily_loss_limit_denies_and_trips_kill_switch() {
        let manager = manager();
        manager.record_trade_result(-10_000.0);

        let (allowed, reason) = manager.can_take_trade(None);
        assert!(!allowed);
        // The kill switch fired first; the emergency broadcast carries the
        // strategy_stop reason for open positions.
        assert!(reason.is_some());
        assert_eq!(manager.take_emergency_exit().as_deref(), Some("strategy_stop"));
        assert!(manager.get_state().kill_switch_active);
        // The broadcast is consumed exactly once.
        assert!(manager.take_emergency_exit().is_none());
    }

    #[test]
    fn trade_count_limit_denies() {
        let manager = manager();
        for _ in 0..10 {
            manager.record_entry(2000.0);
        }
        let (allowed, reason) = manager.can_take_trade(None);
        assert!(!allowed);
        assert!(reason.unwrap().contains("Trade limit"));
    }

    #[test]
    fn net_delta_cap_denies() {
        let manager = manager();
        manager.update_portfolio(PortfolioGreeks {
            net_delta: 450.0,
            gross_delta: 450.0,
            ..Default::default()
        });

        // 0.55 * 150 = 82.5 more delta; 532.5 > 500 cap.
        let (allowed, reason) = manager.can_take_trade(Some(exposure(0.55, 150)));
        assert!(!allowed);
        assert!(reason.unwrap().contains("Net delta"));
    }

    #[test]
    fn gross_delta_counts_absolute_exposure() {
        let manager = manager();
        // Net is hedged flat but gross is at the cap.
        manager.update_portfolio(PortfolioGreeks {
            net_delta: 0.0,
            gross_delta: 790.0,
            ..Default::default()
        });
        let (allowed, reason) = manager.can_take_trade(Some(exposure(0.55, 150)));
        assert!(!allowed);
        assert!(reason.unwrap().contains("Gross delta"));
    }

    #[test]
    fn consecutive_losses_arm_cooldown() {
        let manager = manager();
        for _ in 0..3 {
            manager.record_trade_result(-500.0);
        }
        let state = manager.get_state();
        assert_eq!(state.consecutive_losses, 3);
        assert!(state.cooldown_until.is_some());

        let (allowed, reason) = manager.can_take_trade(None);
        assert!(!allowed);
        assert!(reason.unwrap().contains("Cooldown"));
    }

    #[test]
    fn win_resets_consecutive_losses() {
        let manager = manager();
        manager.record_trade_result(-500.0);
        manager.record_trade_result(-500.0);
        manager.record_trade_result(800.0);
        assert_eq!(manager.get_state().consecutive_losses, 0);
    }

    #[test]
    fn manual_kill_switch_blocks_and_clears() {
        let manager = manager();
        manager.activate_kill_switch("operator stop");
        let (allowed, reason) = manager.can_take_trade(None);
        assert!(!allowed);
        assert!(reason.unwrap().contains("Kill switch"));

        manager.clear_kill_switch();
        let (allowed, _) = manager.can_take_trade(None);
        assert!(allowed);
    }

    #[test]
    fn risk_used_pct_tracks_entries() {
        let manager = manager();
        manager.record_entry(2000.0);
        manager.record_entry(1000.0);
        let state = manager.get_state();
        assert_eq!(state.trades_today, 2);
        assert!((state.daily_risk_used_pct - 3.0).abs() < 1e-9);
    }
}
