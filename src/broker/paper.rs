// =============================================================================
// Paper Broker — in-process brokerage for Demo mode and tests
// =============================================================================
//
// Fully deterministic: the spot drifts on a fixed sawtooth and option quotes
// are derived from the symbol + call counter, so demo sessions replay the
// same way every run. Orders always fill with ids "PB-1", "PB-2", ...
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::broker::api::{BrokerApi, OrderRequest, OrderResponse};
use crate::types::{GreeksSnapshot, Tick};

/// In-process broker used in Demo mode.
pub struct PaperBroker {
    spot: RwLock<f64>,
    quotes: RwLock<HashMap<String, GreeksSnapshot>>,
    orders: RwLock<Vec<(String, OrderRequest)>>,
    order_seq: AtomicU64,
    tick_seq: AtomicU64,
    authenticated: RwLock<bool>,
}

impl PaperBroker {
    pub fn new(initial_spot: f64) -> Self {
        Self {
            spot: RwLock::new(initial_spot),
            quotes: RwLock::new(HashMap::new()),
            orders: RwLock::new(Vec::new()),
            order_seq: AtomicU64::new(0),
            tick_seq: AtomicU64::new(0),
            authenticated: RwLock::new(false),
        }
    }

    /// Pin the underlying spot (tests and demo scripting).
    pub fn set_spot(&self, spot: f64) {
        *self.spot.write() = spot;
    }

    /// Pin the full quote for a symbol (tests and demo scripting).
    pub fn set_quote(&self, snapshot: GreeksSnapshot) {
        self.quotes.write().insert(snapshot.symbol.clone(), snapshot);
    }

    /// Orders recorded so far, oldest first.
    pub fn placed_orders(&self) -> Vec<(String, OrderRequest)> {
        self.orders.read().clone()
    }

    /// Synthesize a plausible ATM-ish quote when none was pinned.
    fn synthetic_quote(&self, symbol: &str, exchange: &str, step: u64) -> GreeksSnapshot {
        // Stable per-symbol phase so different strikes do not move in lockstep.
        let phase = symbol.bytes().map(u64::from).sum::<u64>() % 17;
        let wiggle = ((step + phase) % 20) as f64 * 0.15;

        GreeksSnapshot {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            ltp: 100.0 + wiggle,
            bid: 99.5 + wiggle,
            ask: 100.5 + wiggle,
            volume: 1000 + step * 13,
            oi: 500_000 + step * 450,
            delta: 0.52,
            gamma: 0.004,
            theta: -8.0,
            vega: 12.0,
            iv: 22.0,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl BrokerApi for PaperBroker {
    async fn login(&self) -> Result<bool> {
        *self.authenticated.write() = true;
        Ok(true)
    }

    fn is_authenticated(&self) -> bool {
        *self.authenticated.read()
    }

    async fn get_ltp_with_timestamp(&self, underlying: &str) -> Result<Tick> {
        let step = self.tick_seq.fetch_add(1, Ordering::Relaxed);
        // Slow sawtooth drift around the pinned spot.
        let drift = ((step % 40) as f64 - 20.0) * 0.25;
        Ok(Tick {
            underlying: underlying.to_string(),
            ltp: *self.spot.read() + drift,
            timestamp: Utc::now(),
        })
    }

    async fn get_option_quote(&self, symbol: &str, exchange: &str) -> Result<GreeksSnapshot> {
        if let Some(pinned) = self.quotes.read().get(symbol) {
            let mut snap = pinned.clone();
            snap.timestamp = Utc::now();
            return Ok(snap);
        }
        let step = self.tick_seq.load(Ordering::Relaxed);
        Ok(self.synthetic_quote(symbol, exchange, step))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let id = format!("PB-{}", self.order_seq.fetch_add(1, Ordering::SeqCst) + 1);
        self.orders.write().push((id.clone(), request.clone()));

        debug!(
            order_id = %id,
            symbol = %request.symbol,
            action = %request.action,
            quantity = request.quantity,
            "paper order filled"
        );

        Ok(OrderResponse {
            status: "success".to_string(),
            order_id: Some(id),
            message: Some("paper fill".to_string()),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderResponse> {
        Ok(OrderResponse {
            status: "success".to_string(),
            order_id: Some(order_id.to_string()),
            message: Some("cancelled".to_string()),
        })
    }

    async fn get_order_status(&self, order_id: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "status": "complete", "orderid": order_id }))
    }
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperBroker")
            .field("spot", &*self.spot.read())
            .field("orders", &self.orders.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionType, OrderAction, OrderKind, ProductType};
    use crate::broker::api::build_option_symbol;

    fn request(symbol: &str, qty: u32) -> OrderRequest {
        OrderRequest {
            exchange: "NFO".into(),
            symbol: symbol.into(),
            action: OrderAction::Buy,
            kind: OrderKind::Limit,
            price: 101.0,
            quantity: qty,
            product: ProductType::Mis,
        }
    }

    #[tokio::test]
    async fn orders_get_sequential_ids() {
        let broker = PaperBroker::new(19500.0);
        let expiry = chrono::NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let symbol = build_option_symbol("NIFTY", expiry, 19500, OptionType::CE);

        let first = broker.place_order(&request(&symbol, 75)).await.unwrap();
        let second = broker.place_order(&request(&symbol, 150)).await.unwrap();

        assert!(first.accepted());
        assert_eq!(first.order_id.as_deref(), Some("PB-1"));
        assert_eq!(second.order_id.as_deref(), Some("PB-2"));
        assert_eq!(broker.placed_orders().len(), 2);
    }

    #[tokio::test]
    async fn pinned_quote_wins_over_synthetic() {
        let broker = PaperBroker::new(19500.0);
        let mut snap = broker.synthetic_quote("NIFTY07AUG2519500CE", "NFO", 0);
        snap.ltp = 123.45;
        broker.set_quote(snap);

        let quote = broker
            .get_option_quote("NIFTY07AUG2519500CE", "NFO")
            .await
            .unwrap();
        assert!((quote.ltp - 123.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn login_flips_authentication() {
        let broker = PaperBroker::new(19500.0);
        assert!(!broker.is_authenticated());
        assert!(broker.login().await.unwrap());
        assert!(broker.is_authenticated());
    }
}
