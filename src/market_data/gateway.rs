// =============================================================================
// Market Data Gateway — last-tick store with a freshness policy
// =============================================================================
//
// Fed by either the WebSocket quote stream or REST polling. Consumers never
// see a stale tick: anything older than the freshness tolerance reads back as
// absent, which the tick loop treats as "skip this tick".
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::types::Tick;

/// Freshness-gated store for the most recent underlying tick.
pub struct MarketGateway {
    underlying: String,
    freshness_secs: u64,
    last_tick: RwLock<Option<Tick>>,
    ticks_received: RwLock<u64>,
}

impl MarketGateway {
    pub fn new(underlying: impl Into<String>, freshness_secs: u64) -> Self {
        Self {
            underlying: underlying.into(),
            freshness_secs,
            last_tick: RwLock::new(None),
            ticks_received: RwLock::new(0),
        }
    }

    pub fn underlying(&self) -> &str {
        &self.underlying
    }

    /// Record a tick. Out-of-order ticks (older than the stored one) are
    /// dropped so the per-symbol timestamp stays monotonic.
    pub fn update_tick(&self, tick: Tick) {
        let mut last = self.last_tick.write();
        if let Some(existing) = last.as_ref() {
            if tick.timestamp < existing.timestamp {
                debug!(
                    underlying = %tick.underlying,
                    "out-of-order tick dropped"
                );
                return;
            }
        }
        *last = Some(tick);
        *self.ticks_received.write() += 1;
        metrics::counter!("meridian_ticks_total", 1);
    }

    /// The latest tick if it is within the freshness tolerance, else `None`.
    pub fn fresh_tick(&self) -> Option<Tick> {
        self.fresh_tick_at(Utc::now())
    }

    /// Freshness check against an explicit clock (tests).
    pub fn fresh_tick_at(&self, now: DateTime<Utc>) -> Option<Tick> {
        let tick = self.last_tick.read().clone()?;
        if tick.age_secs(now) > self.freshness_secs as f64 {
            return None;
        }
        Some(tick)
    }

    /// The latest tick regardless of age (dashboard display only).
    pub fn last_tick_any_age(&self) -> Option<Tick> {
        self.last_tick.read().clone()
    }

    /// Age of the newest tick in seconds, if any tick has arrived.
    pub fn tick_age_secs(&self) -> Option<f64> {
        self.last_tick
            .read()
            .as_ref()
            .map(|t| t.age_secs(Utc::now()))
    }

    pub fn ticks_received(&self) -> u64 {
        *self.ticks_received.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tick(ltp: f64, age_secs: i64) -> Tick {
        Tick {
            underlying: "NIFTY".into(),
            ltp,
            timestamp: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn fresh_tick_respects_tolerance() {
        let gateway = MarketGateway::new("NIFTY", 5);
        gateway.update_tick(tick(19542.75, 0));
        assert!(gateway.fresh_tick().is_some());

        let gateway = MarketGateway::new("NIFTY", 5);
        gateway.update_tick(tick(19542.75, 6));
        // Stale tick blocks trading decisions.
        assert!(gateway.fresh_tick().is_none());
        // But the dashboard can still display it.
        assert!(gateway.last_tick_any_age().is_some());
    }

    #[test]
    fn out_of_order_ticks_are_dropped() {
        let gateway = MarketGateway::new("NIFTY", 5);
        gateway.update_tick(tick(19550.0, 1));
        gateway.update_tick(tick(19500.0, 3)); // older than the stored tick
        assert!((gateway.fresh_tick().unwrap().ltp - 19550.0).abs() < 1e-9);
        assert_eq!(gateway.ticks_received(), 1);
    }

    #[test]
    fn empty_gateway_reports_nothing() {
        let gateway = MarketGateway::new("NIFTY", 5);
        assert!(gateway.fresh_tick().is_none());
        assert!(gateway.tick_age_secs().is_none());
    }
}
