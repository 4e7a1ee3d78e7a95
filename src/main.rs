// =============================================================================
// Meridian Options Engine — Main Entry Point
// =============================================================================
//
// Intraday options-scalping engine for Indian index options. The engine
// starts in Demo mode unless DEMO_MODE=false; live trading requires broker
// credentials and an authenticated session.
//
// Exit codes: 0 normal stop, 1 fatal init error, 2 authentication failure.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod adaptive;
mod alerts;
mod api;
mod app_state;
mod bias;
mod broker;
mod config;
mod dashboard;
mod entry;
mod journal;
mod market_data;
mod orders;
mod risk;
mod sizing;
mod smart_exit;
mod smart_money;
mod strategy;
mod strike_selector;
mod trade_manager;
mod types;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adaptive::controller::AdaptiveController;
use crate::alerts::{build_sinks, AlertBus, AlertKind, AlertSeverity};
use crate::app_state::AppState;
use crate::broker::api::{nearest_weekly_expiry, BrokerApi};
use crate::broker::{PaperBroker, SmartClient};
use crate::config::Config;
use crate::market_data::{GreeksCache, MarketGateway};
use crate::strategy::{StrategyEngine, TickOutcome};
use crate::types::AccountMode;

/// Cadence of the main tick loop.
const TICK_INTERVAL_SECS: u64 = 1;
/// Expiry refresh cadence.
const EXPIRY_REFRESH_SECS: u64 = 300;
/// Dashboard cache refresh cadence.
const DASHBOARD_SYNC_SECS: u64 = 2;
/// Bounded join window for background workers on shutdown.
const SHUTDOWN_DRAIN_MS: u64 = 750;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Options Engine — Starting Up            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = Config::resolve();
    info!(
        underlying = %config.instrument.primary_underlying,
        lot_size = config.instrument.minimum_lot_size,
        account_mode = %config.session.account_mode,
        adaptive = config.adaptive.adaptive_enabled,
        "configuration resolved"
    );

    // Prometheus recorder (rendered at /monitor/metrics).
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "failed to install metrics recorder, /monitor/metrics disabled");
            None
        }
    };

    // ── 2. Broker backend ────────────────────────────────────────────────
    let broker: Arc<dyn BrokerApi> = match config.session.account_mode {
        AccountMode::Demo => {
            info!("demo mode: paper broker in force, no real orders leave this process");
            Arc::new(PaperBroker::new(19500.0))
        }
        AccountMode::Live => Arc::new(SmartClient::new(
            config.broker.api_key.clone(),
            config.broker.client_code.clone(),
            config.broker.password.clone(),
            config.broker.totp_secret.clone(),
        )),
    };

    match broker.login().await {
        Ok(true) => info!("broker session authenticated"),
        Ok(false) => {
            error!("broker rejected the login — check credentials and TOTP secret");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "broker login failed");
            std::process::exit(2);
        }
    }
    broker.start_auto_refresh();

    // ── 3. Shared state ──────────────────────────────────────────────────
    let gateway = Arc::new(MarketGateway::new(
        config.instrument.primary_underlying.clone(),
        config.data.tick_freshness_secs,
    ));
    let greeks_cache = Arc::new(GreeksCache::new(
        broker.clone(),
        config.instrument.option_exchange.clone(),
        config.data.greeks_refresh_interval_secs,
    ));

    let (alert_bus, alert_rx) = AlertBus::new(build_sinks(&config.alerts));
    alert_bus.clone().start_dispatcher(alert_rx);

    let state = Arc::new(AppState::new(
        config,
        broker.clone(),
        gateway.clone(),
        greeks_cache.clone(),
        alert_bus.clone(),
    ));

    // Restore yesterday's learned weights when an export exists.
    let state_path = AdaptiveController::default_state_path();
    if state_path.exists() {
        match state.adaptive.write().import_state(&state_path) {
            Ok(()) => info!(path = %state_path.display(), "adaptive weights restored"),
            Err(e) => warn!(error = %e, "adaptive state import failed, starting fresh"),
        }
    }

    // ── 4. Market data feed ──────────────────────────────────────────────
    let use_websocket = state.config.session.account_mode == AccountMode::Live
        && !state.config.session.demo_skip_websocket;

    if use_websocket {
        let ws_url = std::env::var("QUOTE_WS_URL")
            .unwrap_or_else(|_| "wss://smartapisocket.angelone.in/smart-stream".to_string());
        let feed_gateway = gateway.clone();
        let feed_state = state.clone();
        tokio::spawn(async move {
            while feed_state.is_running() {
                let underlying = feed_state.config.instrument.primary_underlying.clone();
                if let Err(e) =
                    broker::feed::run_quote_stream(&ws_url, &underlying, &feed_gateway).await
                {
                    error!(error = %e, "quote stream error — reconnecting in 5s");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });
        info!("WebSocket quote feed launched");
    } else {
        // REST polling fallback (demo, or DEMO_SKIP_WEBSOCKET).
        let poll_state = state.clone();
        let poll_broker = broker.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(TICK_INTERVAL_SECS));
            while poll_state.is_running() {
                interval.tick().await;
                let underlying = poll_state.config.instrument.primary_underlying.clone();
                match poll_broker.get_ltp_with_timestamp(&underlying).await {
                    Ok(tick) => poll_state.gateway.update_tick(tick),
                    Err(e) => warn!(error = %e, "LTP poll failed"),
                }
            }
        });
        info!("REST quote polling launched");
    }

    // ── 5. Background workers ────────────────────────────────────────────
    if state.config.data.greeks_background_refresh {
        greeks_cache.clone().start_background_refresh();
        info!("greeks background refresh worker launched");
    }

    // Expiry refresh at a 5-minute cadence.
    {
        let expiry_state = state.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(EXPIRY_REFRESH_SECS));
            while expiry_state.is_running() {
                interval.tick().await;
                let today = (chrono::Utc::now() + chrono::Duration::minutes(330)).date_naive();
                let expiry = nearest_weekly_expiry(today);
                let changed = { *expiry_state.expiry.read() != expiry };
                if changed {
                    *expiry_state.expiry.write() = expiry;
                    info!(expiry = %expiry, "weekly expiry rolled");
                }
            }
        });
    }

    // Dashboard cache sync + HTTP server.
    {
        let sync_state = state.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(DASHBOARD_SYNC_SECS));
            while sync_state.is_running() {
                interval.tick().await;
                dashboard::refresh_cache(&sync_state);
            }
        });
    }

    if state.config.dashboard.enabled {
        let api_context = api::ApiContext {
            state: state.clone(),
            prometheus,
        };
        let port = state.config.dashboard.port;
        tokio::spawn(async move {
            let app = api::router(api_context);
            let bind_addr = format!("0.0.0.0:{port}");
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "dashboard API listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "dashboard API server failed");
                    }
                }
                Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind dashboard API"),
            }
        });
    }

    // ── 6. Main tick loop ────────────────────────────────────────────────
    info!("all subsystems running — entering tick loop (Ctrl+C to stop)");
    state.alerts.send_alert(
        AlertSeverity::Info,
        AlertKind::Configuration,
        "Engine started",
        &format!(
            "Meridian up in {} mode on {}",
            state.config.session.account_mode, state.config.instrument.primary_underlying
        ),
        None,
    );

    let mut engine = StrategyEngine::new(&state);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_INTERVAL_SECS));
    let mut last_outcome: Option<TickOutcome> = None;

    // SIGINT and SIGTERM both stop the engine cleanly.
    let shutdown = async {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("shutdown signal received — stopping gracefully");
                break;
            }
            _ = interval.tick() => {
                let outcome = engine.tick(&state).await;
                // Log state transitions, not every quiet tick.
                if last_outcome.as_ref() != Some(&outcome) {
                    match &outcome {
                        TickOutcome::Entered(id) => info!(trade_id = %id, "tick: entered"),
                        TickOutcome::DailyLimit(reason) => warn!(reason = %reason, "tick: trading halted"),
                        TickOutcome::StaleData => warn!("tick: stale data — halting decisions"),
                        TickOutcome::OutsideSession => info!("tick: outside session window"),
                        TickOutcome::NoEntry(reason) => tracing::debug!(reason = %reason, "tick: no entry"),
                        TickOutcome::Managed => {}
                    }
                    last_outcome = Some(outcome);
                }
            }
        }
    }

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    state.request_stop();

    // Close every open position before anything else winds down.
    engine.exit_all(&state, "strategy_stop").await;

    greeks_cache.stop_background_refresh();
    broker.stop_auto_refresh();

    // EOD learning + state export.
    {
        let mut adaptive = state.adaptive.write();
        let report = adaptive.run_daily_learning();
        info!(
            success = report.success,
            insights = report.insights_generated,
            applied = report.adjustments_applied,
            "EOD learning run"
        );
        if let Err(e) = adaptive.export_state(AdaptiveController::default_state_path()) {
            warn!(error = %e, "adaptive state export failed");
        }
    }

    // Session stats.
    let closed = state.trades.closed_trades(500);
    let wins = closed.iter().filter(|t| t.pnl > 0.0).count();
    let pnl: f64 = closed.iter().map(|t| t.pnl).sum();
    info!(
        trades = closed.len(),
        wins,
        session_pnl = format!("{pnl:+.2}"),
        uptime_secs = state.uptime_secs(),
        "session summary"
    );

    state
        .alerts
        .send_alert_sync(
            AlertSeverity::Info,
            AlertKind::Configuration,
            "Engine stopped",
            &format!("Session closed with {} trades, PnL {pnl:+.2}", closed.len()),
            None,
        )
        .await;

    // Let the alert dispatcher drain inside the bounded join window.
    alert_bus.close();
    tokio::time::sleep(std::time::Duration::from_millis(SHUTDOWN_DRAIN_MS)).await;

    info!("Meridian shut down complete.");
    Ok(())
}
