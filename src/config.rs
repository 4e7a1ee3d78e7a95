// =============================================================================
// Engine Configuration — typed record, JSON file + environment overrides
// =============================================================================
//
// Every tunable lives in one typed record with explicit defaults. Startup
// resolves an optional JSON config file, then applies environment variable
// overrides; validation happens here, at load time, never at lookup sites.
//
// Persistence uses an atomic tmp + rename pattern.  All fields carry
// `#[serde(default)]` so adding new fields never breaks older config files.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::AccountMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_underlying() -> String {
    "NIFTY".to_string()
}

fn default_underlying_exchange() -> String {
    "NSE".to_string()
}

fn default_option_exchange() -> String {
    "NFO".to_string()
}

fn default_lot_size() -> u32 {
    75
}

fn default_strike_interval() -> u32 {
    50
}

fn default_strike_ladder_depth() -> i32 {
    3
}

fn default_session_start() -> String {
    "09:15".to_string()
}

fn default_session_end() -> String {
    "15:30".to_string()
}

fn default_capital() -> f64 {
    100_000.0
}

fn default_risk_min() -> f64 {
    1.0
}

fn default_risk_optimal() -> f64 {
    2.0
}

fn default_risk_max() -> f64 {
    5.0
}

fn default_hard_sl_min() -> f64 {
    6.0
}

fn default_hard_sl_skip() -> f64 {
    10.0
}

fn default_max_daily_loss() -> f64 {
    10_000.0
}

fn default_max_trades_per_day() -> u32 {
    10
}

fn default_max_position_size() -> u32 {
    1800
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_cooldown_minutes() -> i64 {
    30
}

fn default_max_net_delta() -> f64 {
    500.0
}

fn default_max_net_gamma() -> f64 {
    5.0
}

fn default_max_net_theta() -> f64 {
    10_000.0
}

fn default_max_net_vega() -> f64 {
    20_000.0
}

fn default_max_gross_delta() -> f64 {
    800.0
}

fn default_bullish_delta_min() -> f64 {
    0.45
}

fn default_bearish_delta_max() -> f64 {
    -0.45
}

fn default_ideal_delta_call() -> (f64, f64) {
    (0.45, 0.65)
}

fn default_ideal_delta_put() -> (f64, f64) {
    (-0.65, -0.45)
}

fn default_ideal_gamma_min() -> f64 {
    0.002
}

fn default_max_spread_percent() -> f64 {
    3.0
}

fn default_reject_oi_flat() -> f64 {
    0.10
}

fn default_reject_iv_drop() -> f64 {
    -5.0
}

fn default_reject_spread_widening() -> f64 {
    5.0
}

fn default_reject_delta_spike() -> f64 {
    0.25
}

fn default_iv_safe_zone() -> (f64, f64) {
    (15.0, 40.0)
}

fn default_no_trade_gamma_flat() -> f64 {
    0.0001
}

fn default_trap_probability_max() -> f64 {
    0.6
}

fn default_tick_freshness_secs() -> u64 {
    5
}

fn default_greeks_refresh_secs() -> u64 {
    2
}

fn default_kelly_fraction() -> f64 {
    0.25
}

fn default_trailing_stop_percent() -> f64 {
    2.0
}

fn default_max_hold_seconds() -> i64 {
    600
}

fn default_exit_before_expiry_minutes() -> i64 {
    5
}

fn default_dashboard_port() -> u16 {
    3001
}

// =============================================================================
// Sections
// =============================================================================

/// Broker credentials. Values never appear in logs or serialized snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerCredentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub client_code: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub totp_secret: String,
}

/// Instrument universe: the primary index and its contract parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default = "default_underlying")]
    pub primary_underlying: String,

    #[serde(default = "default_underlying_exchange")]
    pub underlying_exchange: String,

    /// Exchange carrying the option contracts.
    #[serde(default = "default_option_exchange")]
    pub option_exchange: String,

    /// Contract lot size (75 NIFTY, 30 BANKNIFTY at current cycle).
    #[serde(default = "default_lot_size")]
    pub minimum_lot_size: u32,

    /// Strike spacing (50 NIFTY, 100 BANKNIFTY).
    #[serde(default = "default_strike_interval")]
    pub strike_interval: u32,

    /// How many strikes either side of ATM the selector considers.
    #[serde(default = "default_strike_ladder_depth")]
    pub strike_ladder_depth: i32,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            primary_underlying: default_underlying(),
            underlying_exchange: default_underlying_exchange(),
            option_exchange: default_option_exchange(),
            minimum_lot_size: default_lot_size(),
            strike_interval: default_strike_interval(),
            strike_ladder_depth: default_strike_ladder_depth(),
        }
    }
}

/// Trading session window and run mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// "HH:MM" IST session open.
    #[serde(default = "default_session_start")]
    pub session_start: String,

    /// "HH:MM" IST session close.
    #[serde(default = "default_session_end")]
    pub session_end: String,

    #[serde(default)]
    pub account_mode: AccountMode,

    /// Skip the broker WebSocket feed and poll over REST instead.
    #[serde(default)]
    pub demo_skip_websocket: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_start: default_session_start(),
            session_end: default_session_end(),
            account_mode: AccountMode::Demo,
            demo_skip_websocket: false,
        }
    }
}

/// Risk budgets and portfolio Greeks caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    #[serde(default = "default_capital")]
    pub capital: f64,

    #[serde(default = "default_risk_min")]
    pub risk_per_trade_min: f64,
    #[serde(default = "default_risk_optimal")]
    pub risk_per_trade_optimal: f64,
    #[serde(default = "default_risk_max")]
    pub risk_per_trade_max: f64,

    /// Typical hard SL as a percent of premium.
    #[serde(default = "default_hard_sl_min")]
    pub hard_sl_percent_min: f64,
    /// SL wider than this percent of premium skips the trade.
    #[serde(default = "default_hard_sl_skip")]
    pub hard_sl_percent_exceed_skip: f64,

    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss_amount: f64,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_max_position_size")]
    pub max_position_size: u32,

    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,

    // Portfolio Greeks caps, evaluated on the post-trade projection.
    #[serde(default = "default_max_net_delta")]
    pub max_net_delta: f64,
    #[serde(default = "default_max_net_gamma")]
    pub max_net_gamma: f64,
    #[serde(default = "default_max_net_theta")]
    pub max_net_theta: f64,
    #[serde(default = "default_max_net_vega")]
    pub max_net_vega: f64,
    #[serde(default = "default_max_gross_delta")]
    pub max_gross_delta: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            capital: default_capital(),
            risk_per_trade_min: default_risk_min(),
            risk_per_trade_optimal: default_risk_optimal(),
            risk_per_trade_max: default_risk_max(),
            hard_sl_percent_min: default_hard_sl_min(),
            hard_sl_percent_exceed_skip: default_hard_sl_skip(),
            max_daily_loss_amount: default_max_daily_loss(),
            max_trades_per_day: default_max_trades_per_day(),
            max_position_size: default_max_position_size(),
            max_consecutive_losses: default_max_consecutive_losses(),
            cooldown_minutes: default_cooldown_minutes(),
            max_net_delta: default_max_net_delta(),
            max_net_gamma: default_max_net_gamma(),
            max_net_theta: default_max_net_theta(),
            max_net_vega: default_max_net_vega(),
            max_gross_delta: default_max_gross_delta(),
        }
    }
}

/// Bias and entry filter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryFilters {
    #[serde(default = "default_bullish_delta_min")]
    pub bullish_delta_min: f64,
    #[serde(default = "default_bearish_delta_max")]
    pub bearish_delta_max: f64,

    /// Delta power zone for calls, inclusive.
    #[serde(default = "default_ideal_delta_call")]
    pub ideal_delta_call: (f64, f64),
    /// Delta power zone for puts, inclusive.
    #[serde(default = "default_ideal_delta_put")]
    pub ideal_delta_put: (f64, f64),

    #[serde(default = "default_ideal_gamma_min")]
    pub ideal_gamma_min: f64,

    #[serde(default = "default_max_spread_percent")]
    pub max_spread_percent: f64,

    /// Minimum absolute LTP move; below this with rising OI is a flat trap.
    #[serde(default = "default_reject_oi_flat")]
    pub reject_oi_flat_threshold: f64,
    /// IV change percent below this rejects entry (crush).
    #[serde(default = "default_reject_iv_drop")]
    pub reject_iv_drop_percent: f64,
    /// Spread percent above this rejects entry (widening).
    #[serde(default = "default_reject_spread_widening")]
    pub reject_spread_widening: f64,
    /// Absolute delta change above this rejects entry (spike-collapse).
    #[serde(default = "default_reject_delta_spike")]
    pub reject_delta_spike_collapse: f64,

    #[serde(default = "default_iv_safe_zone")]
    pub iv_safe_zone: (f64, f64),

    /// Gamma trend below this epsilon counts as flat.
    #[serde(default = "default_no_trade_gamma_flat")]
    pub no_trade_gamma_flat: f64,

    /// Cumulative trap probability at or above this blocks entry.
    #[serde(default = "default_trap_probability_max")]
    pub trap_probability_max: f64,
}

impl Default for EntryFilters {
    fn default() -> Self {
        Self {
            bullish_delta_min: default_bullish_delta_min(),
            bearish_delta_max: default_bearish_delta_max(),
            ideal_delta_call: default_ideal_delta_call(),
            ideal_delta_put: default_ideal_delta_put(),
            ideal_gamma_min: default_ideal_gamma_min(),
            max_spread_percent: default_max_spread_percent(),
            reject_oi_flat_threshold: default_reject_oi_flat(),
            reject_iv_drop_percent: default_reject_iv_drop(),
            reject_spread_widening: default_reject_spread_widening(),
            reject_delta_spike_collapse: default_reject_delta_spike(),
            iv_safe_zone: default_iv_safe_zone(),
            no_trade_gamma_flat: default_no_trade_gamma_flat(),
            trap_probability_max: default_trap_probability_max(),
        }
    }
}

/// Market data freshness and Greeks cache cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Ticks older than this halt trading decisions.
    #[serde(default = "default_tick_freshness_secs")]
    pub tick_freshness_secs: u64,

    #[serde(default = "default_true")]
    pub greeks_background_refresh: bool,

    #[serde(default = "default_greeks_refresh_secs")]
    pub greeks_refresh_interval_secs: u64,

    /// Use broker-supplied Greeks rather than locally derived estimates.
    #[serde(default = "default_true")]
    pub use_real_greeks_data: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            tick_freshness_secs: default_tick_freshness_secs(),
            greeks_background_refresh: true,
            greeks_refresh_interval_secs: default_greeks_refresh_secs(),
            use_real_greeks_data: true,
        }
    }
}

/// Adaptive learning layer switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default = "default_true")]
    pub adaptive_enabled: bool,

    #[serde(default)]
    pub kelly_enabled: bool,

    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,

    #[serde(default = "default_true")]
    pub use_probability_weighting: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            adaptive_enabled: true,
            kelly_enabled: false,
            kelly_fraction: default_kelly_fraction(),
            use_probability_weighting: true,
        }
    }
}

/// Smart-exit knobs. Remaining thresholds live in `smart_exit::ExitConfig`
/// defaults and are intentionally not env-tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitTuning {
    #[serde(default = "default_trailing_stop_percent")]
    pub trailing_stop_percent: f64,

    #[serde(default = "default_max_hold_seconds")]
    pub max_hold_seconds: i64,

    #[serde(default = "default_exit_before_expiry_minutes")]
    pub exit_before_expiry_minutes: i64,
}

impl Default for ExitTuning {
    fn default() -> Self {
        Self {
            trailing_stop_percent: default_trailing_stop_percent(),
            max_hold_seconds: default_max_hold_seconds(),
            exit_before_expiry_minutes: default_exit_before_expiry_minutes(),
        }
    }
}

/// Alert sink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Optional shared secret; when set, webhook payloads carry an
    /// HMAC-SHA256 signature header.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub telegram_enabled: bool,
}

/// Dashboard HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_dashboard_port(),
        }
    }
}

// =============================================================================
// Top-level config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerCredentials,
    #[serde(default)]
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub filters: EntryFilters,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub exits: ExitTuning,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Straddle/strangle leg template. Off by default; the order path refuses
    /// the multi-leg template unless this is set.
    #[serde(default)]
    pub multileg_enabled: bool,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_pair(key: &str) -> Option<(f64, f64)> {
    let raw = std::env::var(key).ok()?;
    let mut it = raw.split(',').map(|s| s.trim().parse::<f64>());
    match (it.next(), it.next()) {
        (Some(Ok(a)), Some(Ok(b))) => Some((a, b)),
        _ => None,
    }
}

impl Config {
    /// Resolve configuration: optional JSON file (CONFIG_PATH, default
    /// `config.json`), then environment overrides on top.
    pub fn resolve() -> Self {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
        let mut config = match Self::load(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path, error = %e, "config file not loaded, starting from defaults");
                Self::default()
            }
        };
        config.apply_env();
        config.validate();
        config
    }

    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        info!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Persist the current configuration using an atomic write (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Apply environment variable overrides on top of the loaded record.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("API_KEY") {
            self.broker.api_key = v;
        }
        if let Ok(v) = std::env::var("CLIENT_CODE") {
            self.broker.client_code = v;
        }
        if let Ok(v) = std::env::var("PASSWORD") {
            self.broker.password = v;
        }
        if let Ok(v) = std::env::var("TOTP_SECRET") {
            self.broker.totp_secret = v;
        }

        if let Ok(v) = std::env::var("PRIMARY_UNDERLYING") {
            self.instrument.primary_underlying = v.trim().to_uppercase();
        }
        if let Ok(v) = std::env::var("UNDERLYING_EXCHANGE") {
            self.instrument.underlying_exchange = v.trim().to_uppercase();
        }
        if let Some(v) = env_parse("MINIMUM_LOT_SIZE") {
            self.instrument.minimum_lot_size = v;
        }
        if let Some(v) = env_parse("STRIKE_INTERVAL") {
            self.instrument.strike_interval = v;
        }

        if let Ok(v) = std::env::var("TRADING_SESSION_START") {
            self.session.session_start = v;
        }
        if let Ok(v) = std::env::var("TRADING_SESSION_END") {
            self.session.session_end = v;
        }
        if let Some(demo) = env_bool("DEMO_MODE") {
            self.session.account_mode = if demo {
                AccountMode::Demo
            } else {
                AccountMode::Live
            };
        }
        if let Some(v) = env_bool("DEMO_SKIP_WEBSOCKET") {
            self.session.demo_skip_websocket = v;
        }

        if let Some(v) = env_parse("CAPITAL") {
            self.risk.capital = v;
        }
        if let Some(v) = env_parse("RISK_PER_TRADE_MIN") {
            self.risk.risk_per_trade_min = v;
        }
        if let Some(v) = env_parse("RISK_PER_TRADE_OPTIMAL") {
            self.risk.risk_per_trade_optimal = v;
        }
        if let Some(v) = env_parse("RISK_PER_TRADE_MAX") {
            self.risk.risk_per_trade_max = v;
        }
        if let Some(v) = env_parse("HARD_SL_PERCENT_MIN") {
            self.risk.hard_sl_percent_min = v;
        }
        if let Some(v) = env_parse("HARD_SL_PERCENT_EXCEED_SKIP") {
            self.risk.hard_sl_percent_exceed_skip = v;
        }
        if let Some(v) = env_parse("MAX_DAILY_LOSS_AMOUNT") {
            self.risk.max_daily_loss_amount = v;
        }
        if let Some(v) = env_parse("MAX_TRADES_PER_DAY") {
            self.risk.max_trades_per_day = v;
        }
        if let Some(v) = env_parse("MAX_POSITION_SIZE") {
            self.risk.max_position_size = v;
        }
        if let Some(v) = env_parse("MAX_NET_DELTA") {
            self.risk.max_net_delta = v;
        }
        if let Some(v) = env_parse("MAX_NET_GAMMA") {
            self.risk.max_net_gamma = v;
        }
        if let Some(v) = env_parse("MAX_NET_THETA") {
            self.risk.max_net_theta = v;
        }
        if let Some(v) = env_parse("MAX_NET_VEGA") {
            self.risk.max_net_vega = v;
        }
        if let Some(v) = env_parse("MAX_GROSS_DELTA") {
            self.risk.max_gross_delta = v;
        }

        if let Some(v) = env_parse("BULLISH_DELTA_MIN") {
            self.filters.bullish_delta_min = v;
        }
        if let Some(v) = env_parse("BEARISH_DELTA_MAX") {
            self.filters.bearish_delta_max = v;
        }
        if let Some(v) = env_pair("IDEAL_DELTA_CALL") {
            self.filters.ideal_delta_call = v;
        }
        if let Some(v) = env_pair("IDEAL_DELTA_PUT") {
            self.filters.ideal_delta_put = v;
        }
        if let Some(v) = env_parse("IDEAL_GAMMA_MIN") {
            self.filters.ideal_gamma_min = v;
        }
        if let Some(v) = env_parse("MAX_SPREAD_PERCENT") {
            self.filters.max_spread_percent = v;
        }
        if let Some(v) = env_parse("REJECT_OI_FLAT_THRESHOLD") {
            self.filters.reject_oi_flat_threshold = v;
        }
        if let Some(v) = env_parse("REJECT_IV_DROP_PERCENT") {
            self.filters.reject_iv_drop_percent = v;
        }
        if let Some(v) = env_parse("REJECT_SPREAD_WIDENING") {
            self.filters.reject_spread_widening = v;
        }
        if let Some(v) = env_parse("REJECT_DELTA_SPIKE_COLLAPSE") {
            self.filters.reject_delta_spike_collapse = v;
        }
        if let Some(v) = env_pair("IV_SAFE_ZONE") {
            self.filters.iv_safe_zone = v;
        }
        if let Some(v) = env_parse("NO_TRADE_GAMMA_FLAT") {
            self.filters.no_trade_gamma_flat = v;
        }
        if let Some(v) = env_parse("TRAP_PROBABILITY_MAX") {
            self.filters.trap_probability_max = v;
        }

        if let Some(v) = env_bool("GREEKS_BACKGROUND_REFRESH") {
            self.data.greeks_background_refresh = v;
        }
        if let Some(v) = env_parse("GREEKS_REFRESH_INTERVAL") {
            self.data.greeks_refresh_interval_secs = v;
        }
        if let Some(v) = env_bool("USE_REAL_GREEKS_DATA") {
            self.data.use_real_greeks_data = v;
        }
        if let Some(v) = env_parse("TICK_FRESHNESS_SECS") {
            self.data.tick_freshness_secs = v;
        }

        if let Some(v) = env_bool("ADAPTIVE_ENABLED") {
            self.adaptive.adaptive_enabled = v;
        }
        if let Some(v) = env_bool("KELLY") {
            self.adaptive.kelly_enabled = v;
        }
        if let Some(v) = env_parse("KELLY_FRACTION") {
            self.adaptive.kelly_fraction = v;
        }
        if let Some(v) = env_bool("USE_PROBABILITY_WEIGHTING") {
            self.adaptive.use_probability_weighting = v;
        }

        if let Ok(v) = std::env::var("ALERT_WEBHOOK_URL") {
            if !v.trim().is_empty() {
                self.alerts.webhook_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("ALERT_WEBHOOK_SECRET") {
            if !v.trim().is_empty() {
                self.alerts.webhook_secret = Some(v);
            }
        }
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.alerts.telegram_bot_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("TELEGRAM_CHAT_ID") {
            if !v.trim().is_empty() {
                self.alerts.telegram_chat_id = Some(v);
            }
        }
        if let Some(v) = env_bool("TELEGRAM_ALERTS_ENABLED") {
            self.alerts.telegram_enabled = v;
        }

        if let Some(v) = env_bool("DASHBOARD_ENABLED") {
            self.dashboard.enabled = v;
        }
        if let Some(v) = env_parse("DASHBOARD_PORT") {
            self.dashboard.port = v;
        }

        if let Some(v) = env_bool("MULTILEG_ENABLED") {
            self.multileg_enabled = v;
        }
    }

    /// Clamp obviously inconsistent values back into their documented ranges.
    fn validate(&mut self) {
        if self.risk.risk_per_trade_min > self.risk.risk_per_trade_max {
            warn!("risk bounds inverted, restoring defaults");
            self.risk.risk_per_trade_min = default_risk_min();
            self.risk.risk_per_trade_max = default_risk_max();
        }
        self.risk.risk_per_trade_optimal = self
            .risk
            .risk_per_trade_optimal
            .clamp(self.risk.risk_per_trade_min, self.risk.risk_per_trade_max);
        if self.filters.iv_safe_zone.0 > self.filters.iv_safe_zone.1 {
            self.filters.iv_safe_zone = default_iv_safe_zone();
        }
        self.adaptive.kelly_fraction = self.adaptive.kelly_fraction.clamp(0.0, 1.0);
    }

    /// Parse "HH:MM" session bounds into (start, end) minute-of-day values.
    pub fn session_window_minutes(&self) -> Option<(u32, u32)> {
        fn parse(s: &str) -> Option<u32> {
            let mut it = s.split(':');
            let h: u32 = it.next()?.trim().parse().ok()?;
            let m: u32 = it.next()?.trim().parse().ok()?;
            (h < 24 && m < 60).then_some(h * 60 + m)
        }
        Some((
            parse(&self.session.session_start)?,
            parse(&self.session.session_end)?,
        ))
    }
}
