// =============================================================================
// Central Application Context — Meridian Options Engine
// =============================================================================
//
// The single constructed context handed to every component: no hidden
// process-wide state. Startup builds it, shutdown tears it down.
//
// Thread safety:
//   - Atomic counters for lock-free version/uptime tracking.
//   - parking_lot::RwLock around mutable engines the dashboard reads.
//   - Arc wrappers for subsystems with their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Timelike, Utc};
use parking_lot::RwLock;

use crate::adaptive::{AdaptiveController, AdaptiveDecision};
use crate::alerts::AlertBus;
use crate::bias::BiasEngine;
use crate::broker::api::{nearest_weekly_expiry, BrokerApi};
use crate::config::Config;
use crate::dashboard::DashboardSnapshot;
use crate::journal::TradeJournal;
use crate::market_data::{GreeksCache, MarketGateway};
use crate::orders::OrderManager;
use crate::risk::RiskManager;
use crate::smart_money::{Battlefield, SmartMoneyContext};
use crate::trade_manager::TradeManager;

/// IST offset from UTC in minutes.
const IST_OFFSET_MINUTES: i64 = 330;

/// Everything the engine shares across tasks, via `Arc<AppState>`.
pub struct AppState {
    pub config: Config,

    /// Flipped false on shutdown; every worker loop observes it.
    pub running: AtomicBool,

    /// Monotonic version, bumped on meaningful mutations; the dashboard uses
    /// it to cheaply detect change.
    pub state_version: AtomicU64,

    pub broker: Arc<dyn BrokerApi>,
    pub gateway: Arc<MarketGateway>,
    pub greeks_cache: Arc<GreeksCache>,

    pub bias: RwLock<BiasEngine>,
    pub risk: Arc<RiskManager>,
    pub trades: Arc<TradeManager>,
    pub orders: OrderManager,
    pub adaptive: RwLock<AdaptiveController>,

    pub alerts: Arc<AlertBus>,
    pub journal: TradeJournal,

    /// Current weekly expiry, refreshed on a 5-minute cadence.
    pub expiry: RwLock<NaiveDate>,

    // ── Observability mirrors (dashboard reads, tick loop writes) ──────
    pub last_smart_money: RwLock<Option<SmartMoneyContext>>,
    pub last_battlefield: RwLock<Option<Battlefield>>,
    pub last_decision: RwLock<Option<AdaptiveDecision>>,
    pub last_entry_block: RwLock<Option<String>>,
    pub dashboard_cache: RwLock<Option<DashboardSnapshot>>,

    pub ticks_processed: AtomicU64,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        broker: Arc<dyn BrokerApi>,
        gateway: Arc<MarketGateway>,
        greeks_cache: Arc<GreeksCache>,
        alerts: Arc<AlertBus>,
    ) -> Self {
        let bias = BiasEngine::new(config.filters.clone());
        let risk = Arc::new(RiskManager::new(config.risk.clone()));
        let orders = OrderManager::new(
            broker.clone(),
            config.instrument.option_exchange.clone(),
            config.multileg_enabled,
        );
        let adaptive = AdaptiveController::new(config.adaptive.adaptive_enabled);
        let expiry = nearest_weekly_expiry(Utc::now().date_naive());

        Self {
            config,
            running: AtomicBool::new(true),
            state_version: AtomicU64::new(1),
            broker,
            gateway,
            greeks_cache,
            bias: RwLock::new(bias),
            risk,
            trades: Arc::new(TradeManager::new()),
            orders,
            adaptive: RwLock::new(adaptive),
            alerts,
            journal: TradeJournal::new(TradeJournal::default_dir()),
            expiry: RwLock::new(expiry),
            last_smart_money: RwLock::new(None),
            last_battlefield: RwLock::new(None),
            last_decision: RwLock::new(None),
            last_entry_block: RwLock::new(None),
            dashboard_cache: RwLock::new(None),
            ticks_processed: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    // ── Session window ──────────────────────────────────────────────────

    /// Current IST wall-clock minute of day.
    pub fn ist_minute_of_day(&self) -> u32 {
        let ist = Utc::now() + chrono::Duration::minutes(IST_OFFSET_MINUTES);
        ist.hour() * 60 + ist.minute()
    }

    /// Is the IST clock inside the configured trading session? Weekends are
    /// closed for live accounts; paper sessions run on any day.
    pub fn in_session_window(&self) -> bool {
        let ist = Utc::now() + chrono::Duration::minutes(IST_OFFSET_MINUTES);
        let weekday = ist.weekday().num_days_from_monday();
        if weekday >= 5 && self.config.session.account_mode == crate::types::AccountMode::Live {
            return false;
        }
        let Some((start, end)) = self.config.session_window_minutes() else {
            return false;
        };
        let minute = ist.hour() * 60 + ist.minute();
        minute >= start && minute <= end
    }

    /// Minutes remaining to the current weekly expiry's close.
    pub fn minutes_to_expiry(&self) -> i64 {
        let expiry = *self.expiry.read();
        let ist = Utc::now() + chrono::Duration::minutes(IST_OFFSET_MINUTES);
        crate::broker::api::minutes_to_expiry(
            expiry,
            ist.date_naive(),
            ist.hour() * 60 + ist.minute(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alerts::AlertBus;
    use crate::broker::paper::PaperBroker;

    pub(crate) fn test_state() -> Arc<AppState> {
        let config = Config::default();
        let broker: Arc<dyn BrokerApi> = Arc::new(PaperBroker::new(19542.75));
        let gateway = Arc::new(MarketGateway::new(
            config.instrument.primary_underlying.clone(),
            config.data.tick_freshness_secs,
        ));
        let cache = Arc::new(GreeksCache::new(
            broker.clone(),
            config.instrument.option_exchange.clone(),
            config.data.greeks_refresh_interval_secs,
        ));
        let (alerts, _rx) = AlertBus::new(vec![]);
        Arc::new(AppState::new(config, broker, gateway, cache, alerts))
    }

    #[test]
    fn version_counter_is_monotonic() {
        let state = test_state();
        let first = state.current_state_version();
        state.increment_version();
        assert!(state.current_state_version() > first);
    }

    #[test]
    fn stop_request_flips_running() {
        let state = test_state();
        assert!(state.is_running());
        state.request_stop();
        assert!(!state.is_running());
    }

    #[test]
    fn expiry_is_a_thursday() {
        let state = test_state();
        let expiry = *state.expiry.read();
        assert_eq!(
            expiry.weekday().num_days_from_monday(),
            chrono::Weekday::Thu.num_days_from_monday()
        );
    }
}
