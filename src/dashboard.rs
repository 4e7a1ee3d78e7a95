// =============================================================================
// Dashboard Aggregator — read-only projection of the engine for the UI
// =============================================================================
//
// Composition never blocks on live data: every panel is built from try-read
// locks, and a panel whose producer is mid-write is served from the previous
// snapshot. A background task refreshes the cache on a timer; the REST layer
// serves whatever is cached.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::app_state::AppState;

/// Complete dashboard snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub state_version: u64,
    pub market_overview: serde_json::Value,
    pub option_chain_view: serde_json::Value,
    pub bias_panel: serde_json::Value,
    pub trade_monitor: serde_json::Value,
    pub risk_panel: serde_json::Value,
}

/// Compose a fresh snapshot, falling back to `previous` for any panel whose
/// producer could not be read without blocking.
pub fn compose(state: &AppState, previous: Option<&DashboardSnapshot>) -> DashboardSnapshot {
    let market_overview = market_overview(state);
    let option_chain_view = option_chain(state);
    let trade_monitor = trade_monitor(state);
    let risk_panel = risk_panel(state);

    let bias_panel = match state.bias.try_read() {
        Some(bias) => serde_json::to_value(bias.current()).unwrap_or_default(),
        None => previous
            .map(|p| p.bias_panel.clone())
            .unwrap_or_else(|| serde_json::json!({ "state": "UNKNOWN" })),
    };

    DashboardSnapshot {
        generated_at: Utc::now(),
        state_version: state.current_state_version(),
        market_overview,
        option_chain_view,
        bias_panel,
        trade_monitor,
        risk_panel,
    }
}

/// Refresh the cached snapshot in place; REST handlers read the cache.
pub fn refresh_cache(state: &AppState) {
    let snapshot = {
        let cache = state.dashboard_cache.read();
        compose(state, cache.as_ref())
    };
    *state.dashboard_cache.write() = Some(snapshot);
    debug!("dashboard cache refreshed");
}

/// Cached snapshot, composing one on demand if the timer has not run yet.
pub fn current(state: &AppState) -> DashboardSnapshot {
    if let Some(snapshot) = state.dashboard_cache.read().as_ref() {
        return snapshot.clone();
    }
    compose(state, None)
}

fn market_overview(state: &AppState) -> serde_json::Value {
    let tick = state.gateway.last_tick_any_age();
    serde_json::json!({
        "underlying": state.gateway.underlying(),
        "ltp": tick.as_ref().map(|t| t.ltp),
        "tick_timestamp": tick.as_ref().map(|t| t.timestamp),
        "tick_age_secs": state.gateway.tick_age_secs(),
        "ticks_received": state.gateway.ticks_received(),
        "in_session": state.in_session_window(),
        "expiry": *state.expiry.read(),
        "minutes_to_expiry": state.minutes_to_expiry(),
        "uptime_secs": state.uptime_secs(),
    })
}

fn option_chain(state: &AppState) -> serde_json::Value {
    let symbols = state.greeks_cache.tracked_symbols();
    let mut rows = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        if let Some((current, previous)) = state.greeks_cache.rolling(&symbol) {
            rows.push(serde_json::json!({
                "symbol": symbol,
                "ltp": current.ltp,
                "bid": current.bid,
                "ask": current.ask,
                "volume": current.volume,
                "oi": current.oi,
                "oi_change": current.oi as i64 - previous.oi as i64,
                "delta": current.delta,
                "gamma": current.gamma,
                "theta": current.theta,
                "vega": current.vega,
                "iv": current.iv,
                "timestamp": current.timestamp,
            }));
        }
    }
    serde_json::json!({
        "rows": rows,
        "cache": state.greeks_cache.stats(),
        "smart_money": state.last_smart_money.read().clone(),
        "battlefield": state.last_battlefield.read().clone(),
    })
}

fn trade_monitor(state: &AppState) -> serde_json::Value {
    let active = state.trades.active_trades();
    let closed = state.trades.closed_trades(20);
    let unrealized: f64 = active
        .iter()
        .map(|t| t.unrealized_pnl(t.current_price))
        .sum();
    serde_json::json!({
        "active_count": active.len(),
        "active": active,
        "recent_closed": closed,
        "unrealized_pnl": unrealized,
        "last_adaptive_decision": state.last_decision.read().clone(),
        "last_entry_block": state.last_entry_block.read().clone(),
    })
}

fn risk_panel(state: &AppState) -> serde_json::Value {
    let risk_state = state.risk.get_state();
    let portfolio = state.trades.portfolio_greeks();
    serde_json::json!({
        "risk": risk_state,
        "portfolio_greeks": portfolio,
        "alerts": state.alerts.stats(),
    })
}
