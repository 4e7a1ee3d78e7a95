// =============================================================================
// Greeks Cache — current/previous snapshots per symbol + background refresh
// =============================================================================
//
// Contract:
//   - at most one in-flight refresh per symbol;
//   - `rolling` hands back (current, previous) differing by exactly one
//     refresh step, never two views of the same observation;
//   - a failed refresh keeps the previous snapshot and bumps `api_errors`;
//     the caller sees `None` and must skip the trade for this tick.
//
// Locking: one RwLock over the per-symbol map. Broker I/O is never performed
// while the lock is held.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::broker::api::BrokerApi;
use crate::types::GreeksSnapshot;

/// Bounded per-symbol rolling history depth.
const MAX_HISTORY: usize = 100;

#[derive(Default)]
struct SymbolEntry {
    current: Option<GreeksSnapshot>,
    previous: Option<GreeksSnapshot>,
    history: VecDeque<GreeksSnapshot>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Cache statistics for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub tracked_symbols: usize,
    pub refreshes: u64,
    pub api_errors: u64,
}

pub struct GreeksCache {
    broker: Arc<dyn BrokerApi>,
    exchange: String,
    refresh_interval_secs: u64,
    entries: RwLock<HashMap<String, SymbolEntry>>,
    tracked: RwLock<HashSet<String>>,
    in_flight: RwLock<HashSet<String>>,
    refreshes: AtomicU64,
    api_errors: AtomicU64,
    worker_running: Arc<AtomicBool>,
}

impl GreeksCache {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        exchange: impl Into<String>,
        refresh_interval_secs: u64,
    ) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            refresh_interval_secs,
            entries: RwLock::new(HashMap::new()),
            tracked: RwLock::new(HashSet::new()),
            in_flight: RwLock::new(HashSet::new()),
            refreshes: AtomicU64::new(0),
            api_errors: AtomicU64::new(0),
            worker_running: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Tracking ────────────────────────────────────────────────────────

    pub fn track(&self, symbol: &str) {
        self.tracked.write().insert(symbol.to_string());
    }

    pub fn untrack(&self, symbol: &str) {
        self.tracked.write().remove(symbol);
        self.entries.write().remove(symbol);
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.tracked.read().iter().cloned().collect()
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Current snapshot for `symbol`, refreshing through the broker when the
    /// cached one is older than the refresh interval (or `force_refresh`).
    ///
    /// Returns `None` when no data could be obtained this tick.
    pub async fn get(&self, symbol: &str, force_refresh: bool) -> Option<GreeksSnapshot> {
        let needs_refresh = {
            let entries = self.entries.read();
            match entries.get(symbol).and_then(|e| e.last_refresh) {
                Some(at) if !force_refresh => {
                    (Utc::now() - at).num_seconds() >= self.refresh_interval_secs as i64
                }
                Some(_) => true,
                None => true,
            }
        };

        if needs_refresh {
            self.refresh(symbol).await;
        }

        self.entries
            .read()
            .get(symbol)
            .and_then(|e| e.current.clone())
    }

    /// (current, previous) pair for `symbol`. The two snapshots are always
    /// separated by exactly one refresh step.
    pub fn rolling(&self, symbol: &str) -> Option<(GreeksSnapshot, GreeksSnapshot)> {
        let entries = self.entries.read();
        let entry = entries.get(symbol)?;
        match (&entry.current, &entry.previous) {
            (Some(cur), Some(prev)) => Some((cur.clone(), prev.clone())),
            _ => None,
        }
    }

    /// Rolling history, oldest first.
    pub fn history(&self, symbol: &str) -> Vec<GreeksSnapshot> {
        self.entries
            .read()
            .get(symbol)
            .map(|e| e.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tracked_symbols: self.tracked.read().len(),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
        }
    }

    // ── Refresh ─────────────────────────────────────────────────────────

    /// Fetch a fresh snapshot for `symbol`. No-op when another refresh for
    /// the same symbol is already in flight.
    async fn refresh(&self, symbol: &str) {
        {
            let mut in_flight = self.in_flight.write();
            if !in_flight.insert(symbol.to_string()) {
                return;
            }
        }

        let result = self.broker.get_option_quote(symbol, &self.exchange).await;

        match result {
            Ok(snapshot) => {
                self.apply_snapshot(symbol, snapshot);
                self.refreshes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.api_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("meridian_greeks_api_errors_total", 1);
                warn!(symbol, error = %e, "greeks refresh failed, keeping previous snapshot");
            }
        }

        self.in_flight.write().remove(symbol);
    }

    /// Rotate (current → previous) and install a new current snapshot.
    fn apply_snapshot(&self, symbol: &str, snapshot: GreeksSnapshot) {
        let mut entries = self.entries.write();
        let entry = entries.entry(symbol.to_string()).or_default();

        entry.previous = entry.current.take();
        entry.history.push_back(snapshot.clone());
        while entry.history.len() > MAX_HISTORY {
            entry.history.pop_front();
        }
        entry.current = Some(snapshot);
        entry.last_refresh = Some(Utc::now());

        debug!(symbol, "greeks snapshot rotated");
    }

    /// Directly install a snapshot (tests and replay tooling).
    #[cfg(test)]
    pub fn inject(&self, snapshot: GreeksSnapshot) {
        let symbol = snapshot.symbol.clone();
        self.apply_snapshot(&symbol, snapshot);
    }

    // ── Background worker ───────────────────────────────────────────────

    /// Spawn the background refresh worker. One task sweeps the tracked set,
    /// refreshing each symbol in turn; it never blocks the tick loop.
    pub fn start_background_refresh(self: Arc<Self>) {
        if self.worker_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let cache = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                cache.refresh_interval_secs.max(1),
            ));
            while cache.worker_running.load(Ordering::SeqCst) {
                interval.tick().await;
                let symbols = cache.tracked_symbols();
                for symbol in symbols {
                    if !cache.worker_running.load(Ordering::SeqCst) {
                        break;
                    }
                    cache.refresh(&symbol).await;
                }
            }
            debug!("greeks refresh worker stopped");
        });
    }

    pub fn stop_background_refresh(&self) {
        self.worker_running.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for GreeksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GreeksCache")
            .field("exchange", &self.exchange)
            .field("tracked", &self.tracked.read().len())
            .field("api_errors", &self.api_errors.load(Ordering::Relaxed))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::PaperBroker;

    fn snap(symbol: &str, ltp: f64) -> GreeksSnapshot {
        GreeksSnapshot {
            symbol: symbol.into(),
            exchange: "NFO".into(),
            ltp,
            bid: ltp - 0.5,
            ask: ltp + 0.5,
            volume: 1000,
            oi: 500_000,
            delta: 0.55,
            gamma: 0.004,
            theta: -8.0,
            vega: 12.0,
            iv: 22.0,
            timestamp: Utc::now(),
        }
    }

    fn cache() -> GreeksCache {
        let broker = Arc::new(PaperBroker::new(19500.0));
        GreeksCache::new(broker, "NFO", 2)
    }

    #[test]
    fn rolling_needs_two_refresh_steps() {
        let cache = cache();
        cache.inject(snap("S1", 100.0));
        assert!(cache.rolling("S1").is_none());

        cache.inject(snap("S1", 101.0));
        let (cur, prev) = cache.rolling("S1").unwrap();
        assert!((cur.ltp - 101.0).abs() < 1e-9);
        assert!((prev.ltp - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rolling_is_idempotent_between_refreshes() {
        let cache = cache();
        cache.inject(snap("S1", 100.0));
        cache.inject(snap("S1", 101.0));

        let first = cache.rolling("S1").unwrap();
        let second = cache.rolling("S1").unwrap();
        assert!((first.0.ltp - second.0.ltp).abs() < 1e-12);
        assert!((first.1.ltp - second.1.ltp).abs() < 1e-12);
    }

    #[test]
    fn history_is_bounded() {
        let cache = cache();
        for i in 0..(MAX_HISTORY + 20) {
            cache.inject(snap("S1", 100.0 + i as f64));
        }
        let history = cache.history("S1");
        assert_eq!(history.len(), MAX_HISTORY);
        // Oldest entries were discarded.
        assert!((history[0].ltp - 120.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn get_refreshes_through_broker() {
        let broker = Arc::new(PaperBroker::new(19500.0));
        broker.set_quote(snap("NIFTY07AUG2519500CE", 108.1));
        let cache = GreeksCache::new(broker, "NFO", 2);

        let got = cache.get("NIFTY07AUG2519500CE", true).await.unwrap();
        assert!((got.ltp - 108.1).abs() < 1e-9);
        assert_eq!(cache.stats().refreshes, 1);
    }

    #[test]
    fn untrack_drops_entry() {
        let cache = cache();
        cache.track("S1");
        cache.inject(snap("S1", 100.0));
        cache.untrack("S1");
        assert!(cache.rolling("S1").is_none());
        assert!(cache.tracked_symbols().is_empty());
    }
}
