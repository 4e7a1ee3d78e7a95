// =============================================================================
// Order Manager — thin, idempotent wrapper over the broker seam
// =============================================================================
//
// Every response is validated against `status == "success"` plus a non-empty
// order id; anything else is a failed placement and NO trade may be created
// from it. The manager never resubmits; retrying is the caller's decision.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::broker::api::{BrokerApi, OrderRequest};
use crate::types::{OrderAction, OrderKind, ProductType};

pub struct OrderManager {
    broker: Arc<dyn BrokerApi>,
    exchange: String,
    multileg_enabled: bool,
}

impl OrderManager {
    pub fn new(broker: Arc<dyn BrokerApi>, exchange: impl Into<String>, multileg_enabled: bool) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            multileg_enabled,
        }
    }

    /// Place a BUY entry. Returns the broker order id on acceptance.
    pub async fn place_entry(&self, symbol: &str, quantity: u32, price: f64) -> Result<String> {
        self.place(symbol, OrderAction::Buy, OrderKind::Limit, price, quantity)
            .await
    }

    /// Place the SL leg linked to an entry: a SELL resting at the stop.
    pub async fn place_stop_loss(&self, symbol: &str, quantity: u32, sl_price: f64) -> Result<String> {
        self.place(symbol, OrderAction::Sell, OrderKind::Limit, sl_price, quantity)
            .await
    }

    /// Exit (part of) a position at market.
    pub async fn place_exit(&self, symbol: &str, quantity: u32) -> Result<String> {
        self.place(symbol, OrderAction::Sell, OrderKind::Market, 0.0, quantity)
            .await
    }

    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        let response = self
            .broker
            .cancel_order(order_id)
            .await
            .with_context(|| format!("cancel of order {order_id} failed"))?;
        if response.status != "success" {
            bail!(
                "broker refused cancel of {order_id}: {}",
                response.message.unwrap_or_default()
            );
        }
        Ok(())
    }

    /// Place the two legs of the straddle/strangle template atomically: when
    /// the second leg is rejected, the first is cancelled before returning.
    ///
    /// Refused outright unless the multileg feature flag is enabled.
    pub async fn place_multileg(
        &self,
        ce_symbol: &str,
        pe_symbol: &str,
        quantity: u32,
        ce_price: f64,
        pe_price: f64,
    ) -> Result<(String, String)> {
        if !self.multileg_enabled {
            bail!("multileg template is disabled (multileg_enabled = false)");
        }

        let ce_id = self
            .place(ce_symbol, OrderAction::Buy, OrderKind::Limit, ce_price, quantity)
            .await?;

        match self
            .place(pe_symbol, OrderAction::Buy, OrderKind::Limit, pe_price, quantity)
            .await
        {
            Ok(pe_id) => Ok((ce_id, pe_id)),
            Err(e) => {
                warn!(ce_order = %ce_id, error = %e, "second leg rejected, unwinding first leg");
                if let Err(cancel_err) = self.cancel(&ce_id).await {
                    warn!(error = %cancel_err, "failed to unwind first leg");
                }
                Err(e).context("multileg second leg placement failed")
            }
        }
    }

    async fn place(
        &self,
        symbol: &str,
        action: OrderAction,
        kind: OrderKind,
        price: f64,
        quantity: u32,
    ) -> Result<String> {
        let request = OrderRequest {
            exchange: self.exchange.clone(),
            symbol: symbol.to_string(),
            action,
            kind,
            price,
            quantity,
            product: ProductType::Mis,
        };

        let response = self
            .broker
            .place_order(&request)
            .await
            .with_context(|| format!("{action} {symbol} placement request failed"))?;

        if !response.accepted() {
            bail!(
                "broker rejected {action} {symbol}: status={} message={}",
                response.status,
                response.message.unwrap_or_default()
            );
        }

        let order_id = response.order_id.unwrap_or_default();
        info!(
            order_id = %order_id,
            symbol,
            action = %action,
            kind = %kind,
            quantity,
            price,
            "order placed"
        );
        metrics::counter!("meridian_orders_placed_total", 1);
        Ok(order_id)
    }
}

impl std::fmt::Debug for OrderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderManager")
            .field("exchange", &self.exchange)
            .field("multileg_enabled", &self.multileg_enabled)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::api::OrderResponse;
    use crate::broker::paper::PaperBroker;
    use crate::types::{GreeksSnapshot, Tick};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Broker double that rejects every Nth order.
    struct RejectingBroker {
        calls: AtomicU32,
        reject_from: u32,
    }

    #[async_trait]
    impl BrokerApi for RejectingBroker {
        async fn login(&self) -> Result<bool> {
            Ok(true)
        }
        fn is_authenticated(&self) -> bool {
            true
        }
        async fn get_ltp_with_timestamp(&self, _underlying: &str) -> Result<Tick> {
            bail!("not implemented")
        }
        async fn get_option_quote(&self, _s: &str, _e: &str) -> Result<GreeksSnapshot> {
            bail!("not implemented")
        }
        async fn place_order(&self, _request: &OrderRequest) -> Result<OrderResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.reject_from {
                Ok(OrderResponse {
                    status: "error".into(),
                    order_id: None,
                    message: Some("margin shortfall".into()),
                })
            } else {
                Ok(OrderResponse {
                    status: "success".into(),
                    order_id: Some(format!("R-{call}")),
                    message: None,
                })
            }
        }
        async fn cancel_order(&self, order_id: &str) -> Result<OrderResponse> {
            Ok(OrderResponse {
                status: "success".into(),
                order_id: Some(order_id.to_string()),
                message: None,
            })
        }
        async fn get_order_status(&self, _id: &str) -> Result<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn accepted_entry_returns_order_id() {
        let broker = Arc::new(PaperBroker::new(19500.0));
        let orders = OrderManager::new(broker.clone(), "NFO", false);

        let id = orders
            .place_entry("NIFTY07AUG2519500CE", 225, 101.0)
            .await
            .unwrap();
        assert_eq!(id, "PB-1");
        assert_eq!(broker.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn rejection_is_an_error_and_never_resubmits() {
        let broker = Arc::new(RejectingBroker {
            calls: AtomicU32::new(0),
            reject_from: 1,
        });
        let orders = OrderManager::new(broker.clone(), "NFO", false);

        let result = orders.place_entry("NIFTY07AUG2519500CE", 225, 101.0).await;
        assert!(result.is_err());
        // Exactly one attempt went out.
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multileg_refused_when_flag_off() {
        let broker = Arc::new(PaperBroker::new(19500.0));
        let orders = OrderManager::new(broker.clone(), "NFO", false);

        let result = orders
            .place_multileg("NIFTY07AUG2519500CE", "NIFTY07AUG2519500PE", 75, 101.0, 98.0)
            .await;
        assert!(result.is_err());
        assert!(broker.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn multileg_places_both_legs_when_enabled() {
        let broker = Arc::new(PaperBroker::new(19500.0));
        let orders = OrderManager::new(broker.clone(), "NFO", true);

        let (ce, pe) = orders
            .place_multileg("NIFTY07AUG2519500CE", "NIFTY07AUG2519500PE", 75, 101.0, 98.0)
            .await
            .unwrap();
        assert_eq!(ce, "PB-1");
        assert_eq!(pe, "PB-2");
    }

    #[tokio::test]
    async fn multileg_unwinds_first_leg_on_second_rejection() {
        let broker = Arc::new(RejectingBroker {
            calls: AtomicU32::new(0),
            reject_from: 2,
        });
        let orders = OrderManager::new(broker.clone(), "NFO", true);

        let result = orders
            .place_multileg("NIFTY07AUG2519500CE", "NIFTY07AUG2519500PE", 75, 101.0, 98.0)
            .await;
        assert!(result.is_err());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 2);
    }
}
