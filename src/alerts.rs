// =============================================================================
// Alert Bus — asynchronous multi-sink alert delivery
// =============================================================================
//
// Producers enqueue onto an unbounded channel; one dispatcher task drains it
// (woken by the channel, no polling) and fans out to every registered sink
// with a per-sink timeout. A failing sink increments `alerts_failed` but the
// alert always lands in the bounded history ring — alerts are never lost to
// a bad handler.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Alert history ring depth.
const MAX_HISTORY: usize = 1000;

/// Per-sink delivery timeout.
const SINK_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    TradeEntry,
    TradeExit,
    LossLimit,
    PositionRisk,
    SystemError,
    MarketEvent,
    BrokerDisconnect,
    Configuration,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TradeEntry => "TRADE_ENTRY",
            Self::TradeExit => "TRADE_EXIT",
            Self::LossLimit => "LOSS_LIMIT",
            Self::PositionRisk => "POSITION_RISK",
            Self::SystemError => "SYSTEM_ERROR",
            Self::MarketEvent => "MARKET_EVENT",
            Self::BrokerDisconnect => "BROKER_DISCONNECT",
            Self::Configuration => "CONFIGURATION",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub queue_size: u64,
    pub history_size: usize,
    pub sinks: usize,
}

// =============================================================================
// Sinks
// =============================================================================

/// Capability set for one alert destination.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, alert: &Alert) -> bool;
}

/// Always-present sink routing alerts through tracing.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, alert: &Alert) -> bool {
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::Error => {
                error!(kind = %alert.kind, title = %alert.title, "{}", alert.message)
            }
            AlertSeverity::Warning => {
                warn!(kind = %alert.kind, title = %alert.title, "{}", alert.message)
            }
            AlertSeverity::Info => {
                info!(kind = %alert.kind, title = %alert.title, "{}", alert.message)
            }
        }
        true
    }
}

/// JSON POST sink; success on 200/201/202. Payloads are optionally signed
/// with HMAC-SHA256 over the body.
pub struct WebhookSink {
    url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            url: url.into(),
            secret,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(SINK_TIMEOUT_SECS))
                .build()
                .expect("failed to build reqwest client"),
        }
    }

    fn sign(&self, body: &str) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(body.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, alert: &Alert) -> bool {
        let payload = serde_json::json!({
            "timestamp": alert.ts.to_rfc3339(),
            "severity": alert.severity.to_string(),
            "type": alert.kind.to_string(),
            "title": alert.title,
            "message": alert.message,
            "details": alert.details,
            "alert_id": alert.id,
        });
        let body = payload.to_string();

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body.clone());
        if let Some(signature) = self.sign(&body) {
            request = request.header("X-Signature", signature);
        }

        match request.send().await {
            Ok(response) => {
                let ok = matches!(response.status().as_u16(), 200 | 201 | 202);
                if !ok {
                    warn!(status = %response.status(), "webhook sink rejected alert");
                }
                ok
            }
            Err(e) => {
                warn!(error = %e, "webhook sink unreachable");
                false
            }
        }
    }
}

/// Telegram bot sink (HTTPS sendMessage).
pub struct TelegramSink {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(SINK_TIMEOUT_SECS))
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn handle(&self, alert: &Alert) -> bool {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let text = format!(
            "[{}] {} — {}\n{}",
            alert.severity, alert.kind, alert.title, alert.message
        );
        let payload = serde_json::json!({ "chat_id": self.chat_id, "text": text });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "telegram sink unreachable");
                false
            }
        }
    }
}

// =============================================================================
// Bus
// =============================================================================

pub struct AlertBus {
    sinks: Vec<Arc<dyn AlertSink>>,
    tx: RwLock<Option<mpsc::UnboundedSender<Alert>>>,
    history: RwLock<VecDeque<Alert>>,
    alerts_sent: AtomicU64,
    alerts_failed: AtomicU64,
    queue_depth: AtomicU64,
}

impl AlertBus {
    /// Build the bus and hand back the receiver for `start_dispatcher`.
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> (Arc<Self>, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            sinks,
            tx: RwLock::new(Some(tx)),
            history: RwLock::new(VecDeque::new()),
            alerts_sent: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
        });
        (bus, rx)
    }

    fn build_alert(
        severity: AlertSeverity,
        kind: AlertKind,
        title: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Alert {
        Alert {
            id: format!("ALT-{}", Uuid::new_v4()),
            ts: Utc::now(),
            severity,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            details: details.unwrap_or_else(|| serde_json::json!({})),
        }
    }

    /// Queue an alert for asynchronous delivery. Returns the alert id.
    pub fn send_alert(
        &self,
        severity: AlertSeverity,
        kind: AlertKind,
        title: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> String {
        let alert = Self::build_alert(severity, kind, title, message, details);
        let id = alert.id.clone();

        let enqueued = match self.tx.read().as_ref() {
            Some(tx) => tx.send(alert).is_ok(),
            None => false,
        };
        if enqueued {
            self.queue_depth.fetch_add(1, Ordering::Relaxed);
            metrics::gauge!(
                "meridian_alert_queue_size",
                self.queue_depth.load(Ordering::Relaxed) as f64
            );
        } else {
            warn!(alert_id = %id, "alert bus closed, alert dropped to log only");
        }
        id
    }

    /// Deliver an alert inline, bypassing the queue (shutdown paths).
    pub async fn send_alert_sync(
        &self,
        severity: AlertSeverity,
        kind: AlertKind,
        title: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> String {
        let alert = Self::build_alert(severity, kind, title, message, details);
        let id = alert.id.clone();
        self.dispatch(alert).await;
        id
    }

    /// Fan an alert out to every sink and record it in history regardless of
    /// sink outcomes.
    pub async fn dispatch(&self, alert: Alert) {
        let mut success_count = 0usize;

        for sink in &self.sinks {
            let delivered = tokio::time::timeout(
                std::time::Duration::from_secs(SINK_TIMEOUT_SECS),
                sink.handle(&alert),
            )
            .await;

            match delivered {
                Ok(true) => success_count += 1,
                Ok(false) => {
                    self.alerts_failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_elapsed) => {
                    self.alerts_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(sink = sink.name(), alert_id = %alert.id, "sink timed out");
                }
            }
        }

        if success_count > 0 {
            self.alerts_sent.fetch_add(1, Ordering::Relaxed);
        }

        let mut history = self.history.write();
        history.push_back(alert);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Spawn the dispatcher task. It wakes on enqueue and exits when the bus
    /// is closed and drained.
    pub fn start_dispatcher(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Alert>) {
        let bus = self;
        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                bus.queue_depth.fetch_sub(1, Ordering::Relaxed);
                bus.dispatch(alert).await;
            }
            debug!("alert dispatcher stopped");
        });
    }

    /// Close the bus: the dispatcher drains what is queued, then exits.
    pub fn close(&self) {
        self.tx.write().take();
    }

    pub fn history(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.read();
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            queue_size: self.queue_depth.load(Ordering::Relaxed),
            history_size: self.history.read().len(),
            sinks: self.sinks.len(),
        }
    }
}

/// Build the sink set from configuration. The log sink is always present.
pub fn build_sinks(alerts: &crate::config::AlertConfig) -> Vec<Arc<dyn AlertSink>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];

    if let Some(url) = &alerts.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(
            url.clone(),
            alerts.webhook_secret.clone(),
        )));
        info!(url = %url, "webhook alert sink registered");
    }

    if alerts.telegram_enabled {
        if let (Some(token), Some(chat_id)) =
            (&alerts.telegram_bot_token, &alerts.telegram_chat_id)
        {
            sinks.push(Arc::new(TelegramSink::new(token.clone(), chat_id.clone())));
            info!("telegram alert sink registered");
        } else {
            warn!("telegram alerts enabled but token/chat id missing");
        }
    }

    sinks
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct TestSink {
        succeed: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AlertSink for TestSink {
        fn name(&self) -> &str {
            "test"
        }
        async fn handle(&self, _alert: &Alert) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }
    }

    #[tokio::test]
    async fn failing_sink_never_loses_the_alert() {
        let failing = Arc::new(TestSink {
            succeed: false,
            calls: AtomicU32::new(0),
        });
        let succeeding = Arc::new(TestSink {
            succeed: true,
            calls: AtomicU32::new(0),
        });
        let (bus, _rx) =
            AlertBus::new(vec![failing.clone() as Arc<dyn AlertSink>, succeeding.clone()]);

        bus.send_alert_sync(
            AlertSeverity::Error,
            AlertKind::SystemError,
            "broker down",
            "connection lost",
            None,
        )
        .await;

        let stats = bus.stats();
        assert_eq!(stats.alerts_sent, 1);
        assert_eq!(stats.alerts_failed, 1);
        assert_eq!(stats.history_size, 1);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(succeeding.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_ring_is_bounded() {
        let (bus, _rx) = AlertBus::new(vec![]);
        for i in 0..(MAX_HISTORY + 50) {
            bus.dispatch(AlertBus::build_alert(
                AlertSeverity::Info,
                AlertKind::MarketEvent,
                &format!("event {i}"),
                "m",
                None,
            ))
            .await;
        }
        assert_eq!(bus.stats().history_size, MAX_HISTORY);
        // Newest first in reads.
        let latest = bus.history(1);
        assert!(latest[0].title.contains(&format!("{}", MAX_HISTORY + 49)));
    }

    #[tokio::test]
    async fn dispatcher_drains_the_queue() {
        let sink = Arc::new(TestSink {
            succeed: true,
            calls: AtomicU32::new(0),
        });
        let (bus, rx) = AlertBus::new(vec![sink.clone() as Arc<dyn AlertSink>]);
        bus.clone().start_dispatcher(rx);

        for _ in 0..3 {
            bus.send_alert(
                AlertSeverity::Info,
                AlertKind::TradeEntry,
                "entry",
                "m",
                None,
            );
        }

        // Wait for the dispatcher to catch up.
        for _ in 0..50 {
            if sink.calls.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(bus.stats().history_size, 3);
        assert_eq!(bus.stats().queue_size, 0);
    }

    #[tokio::test]
    async fn closed_bus_drops_new_alerts_but_returns_an_id() {
        let (bus, _rx) = AlertBus::new(vec![]);
        bus.close();
        let id = bus.send_alert(
            AlertSeverity::Info,
            AlertKind::Configuration,
            "late",
            "m",
            None,
        );
        assert!(id.starts_with("ALT-"));
        assert_eq!(bus.stats().history_size, 0);
    }

    #[test]
    fn webhook_signature_is_deterministic() {
        let sink = WebhookSink::new("http://localhost/hook", Some("secret".into()));
        let a = sink.sign("payload").unwrap();
        let b = sink.sign("payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let unsigned = WebhookSink::new("http://localhost/hook", None);
        assert!(unsigned.sign("payload").is_none());
    }
}
