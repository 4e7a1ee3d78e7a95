// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// /health and /monitor/* are the operational probes; /api/* serves the
// dashboard. All handlers are read-only projections over AppState; nothing
// here mutates domain state.
//
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::dashboard;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared context for every handler: domain state + the metrics recorder.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<AppState>,
    pub prometheus: Option<PrometheusHandle>,
}

/// Build the full router with CORS middleware and shared state.
pub fn router(context: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Liveness ────────────────────────────────────────────────
        .route("/health", get(health))
        // ── Operational probes ──────────────────────────────────────
        .route("/monitor/health", get(monitor_health))
        .route("/monitor/ready", get(monitor_ready))
        .route("/monitor/live", get(monitor_live))
        .route("/monitor/metrics", get(monitor_metrics))
        .route("/monitor/alerts", get(monitor_alerts))
        .route("/monitor/alert-stats", get(monitor_alert_stats))
        // ── Dashboard ───────────────────────────────────────────────
        .route("/api/dashboard", get(api_dashboard))
        .route("/api/positions", get(api_positions))
        .route("/api/portfolio", get(api_portfolio))
        .route("/api/market", get(api_market))
        .route("/api/performance", get(api_performance))
        .route("/api/trades", get(api_trades))
        .route("/api/greeks-heatmap", get(api_greeks_heatmap))
        .layer(cors)
        .with_state(context)
}

// =============================================================================
// Liveness
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Operational probes
// =============================================================================

fn health_checks(state: &AppState) -> (bool, serde_json::Value) {
    let broker_auth = state.broker.is_authenticated();
    let tick_fresh = state.gateway.fresh_tick().is_some();
    let kill_switch = state.risk.get_state().kill_switch_active;
    let running = state.is_running();

    let healthy = running && broker_auth && !kill_switch;
    let degraded = !tick_fresh;

    let checks = serde_json::json!({
        "running": running,
        "broker_authenticated": broker_auth,
        "tick_fresh": tick_fresh,
        "kill_switch_active": kill_switch,
    });

    (healthy && !degraded, checks)
}

async fn monitor_health(State(context): State<ApiContext>) -> impl IntoResponse {
    let (healthy, checks) = health_checks(&context.state);
    let status = if healthy {
        "healthy"
    } else if context.state.is_running() {
        "degraded"
    } else {
        "stopping"
    };

    Json(serde_json::json!({
        "status": status,
        "checks": checks,
        "uptime_secs": context.state.uptime_secs(),
        "timestamp": chrono::Utc::now(),
    }))
}

async fn monitor_ready(State(context): State<ApiContext>) -> impl IntoResponse {
    let (ready, checks) = health_checks(&context.state);
    let body = Json(serde_json::json!({ "ready": ready, "checks": checks }));
    if ready {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

async fn monitor_live(State(context): State<ApiContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "alive": context.state.is_running(),
        "timestamp": chrono::Utc::now(),
        "version": VERSION,
    }))
}

async fn monitor_metrics(State(context): State<ApiContext>) -> impl IntoResponse {
    match &context.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("Content-Type", "text/plain; version=0.0.4")],
            "# metrics recorder not installed\n".to_string(),
        ),
    }
}

async fn monitor_alerts(State(context): State<ApiContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "stats": context.state.alerts.stats(),
        "recent_alerts": context.state.alerts.history(50),
    }))
}

async fn monitor_alert_stats(State(context): State<ApiContext>) -> impl IntoResponse {
    Json(context.state.alerts.stats())
}

// =============================================================================
// Dashboard API
// =============================================================================

async fn api_dashboard(State(context): State<ApiContext>) -> impl IntoResponse {
    Json(dashboard::current(&context.state))
}

async fn api_positions(State(context): State<ApiContext>) -> impl IntoResponse {
    let trades = context.state.trades.active_trades();
    Json(serde_json::json!({
        "active_count": trades.len(),
        "trades": trades,
    }))
}

async fn api_portfolio(State(context): State<ApiContext>) -> impl IntoResponse {
    let portfolio = context.state.trades.portfolio_greeks();
    let risk = context.state.risk.get_state();
    Json(serde_json::json!({
        "portfolio_greeks": portfolio,
        "daily_pnl": risk.daily_pnl,
        "trades_today": risk.trades_today,
        "daily_risk_used_pct": risk.daily_risk_used_pct,
    }))
}

async fn api_market(State(context): State<ApiContext>) -> impl IntoResponse {
    let tick = context.state.gateway.last_tick_any_age();
    let symbols = context.state.greeks_cache.tracked_symbols();
    let greeks: Vec<_> = symbols
        .iter()
        .filter_map(|s| context.state.greeks_cache.rolling(s).map(|(cur, _)| cur))
        .collect();
    Json(serde_json::json!({ "ltp": tick, "greeks": greeks }))
}

async fn api_performance(State(context): State<ApiContext>) -> impl IntoResponse {
    let closed = context.state.trades.closed_trades(500);
    let total_trades = closed.len();
    if total_trades == 0 {
        return Json(serde_json::json!({
            "total_trades": 0,
            "win_rate": 0.0,
            "total_net_pnl": 0.0,
            "profit_factor": 0.0,
        }));
    }

    let wins = closed.iter().filter(|t| t.pnl > 0.0).count();
    let total_net_pnl: f64 = closed.iter().map(|t| t.pnl).sum();
    let gross_profit: f64 = closed.iter().map(|t| t.pnl).filter(|p| *p > 0.0).sum();
    let gross_loss: f64 = closed
        .iter()
        .map(|t| t.pnl)
        .filter(|p| *p < 0.0)
        .map(f64::abs)
        .sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    Json(serde_json::json!({
        "total_trades": total_trades,
        "win_rate": wins as f64 / total_trades as f64,
        "total_net_pnl": total_net_pnl,
        "profit_factor": profit_factor,
        "adaptive": context.state.adaptive.read().status(),
    }))
}

async fn api_trades(
    State(context): State<ApiContext>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50);
    let trades = context.state.trades.closed_trades(limit);
    Json(serde_json::json!({
        "total": trades.len(),
        "trades": trades,
    }))
}

async fn api_greeks_heatmap(
    State(context): State<ApiContext>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let underlying = params
        .get("underlying")
        .cloned()
        .unwrap_or_else(|| context.state.gateway.underlying().to_string());

    let mut ladder = Vec::new();
    for symbol in context.state.greeks_cache.tracked_symbols() {
        if !symbol.starts_with(&underlying) {
            continue;
        }
        if let Some((current, previous)) = context.state.greeks_cache.rolling(&symbol) {
            ladder.push(serde_json::json!({
                "symbol": symbol,
                "ltp": current.ltp,
                "delta": current.delta,
                "gamma": current.gamma,
                "theta": current.theta,
                "vega": current.vega,
                "iv": current.iv,
                "oi": current.oi,
                "oi_change": current.oi as i64 - previous.oi as i64,
                "volume": current.volume,
            }));
        }
    }

    Json(serde_json::json!({
        "underlying": underlying,
        "strikes": ladder,
        "generated_at": chrono::Utc::now(),
    }))
}

// =============================================================================
// Tests
// =============================================================================
