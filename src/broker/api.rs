// =============================================================================
// Broker API seam — the only surface the engine talks to a brokerage through
// =============================================================================
//
// Everything behind this trait is an external collaborator: the live REST
// client, the paper broker, and test doubles all implement the same calls.
// Gateway calls are bounded by the client's own timeout (5 s); callers treat
// a timeout as a failed call and skip the tick, never retrying in-line.
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::types::{GreeksSnapshot, OptionType, OrderAction, OrderKind, ProductType, Tick};

// =============================================================================
// Order payloads
// =============================================================================

/// A single order submitted through the seam.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub exchange: String,
    pub symbol: String,
    pub action: OrderAction,
    pub kind: OrderKind,
    /// Limit price; ignored for market orders.
    pub price: f64,
    pub quantity: u32,
    pub product: ProductType,
}

/// Broker response to an order placement or cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub status: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl OrderResponse {
    /// A placement is accepted only with `status == "success"` and a
    /// non-empty order id.
    pub fn accepted(&self) -> bool {
        self.status == "success"
            && self
                .order_id
                .as_ref()
                .map(|id| !id.is_empty())
                .unwrap_or(false)
    }
}

// =============================================================================
// The seam
// =============================================================================

/// Capability set offered by any brokerage backend.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Authenticate the session. Returns `true` on success.
    async fn login(&self) -> Result<bool>;

    fn is_authenticated(&self) -> bool;

    /// Begin background session-token upkeep. Backends without expiring
    /// tokens keep the default no-op.
    fn start_auto_refresh(&self) {}

    fn stop_auto_refresh(&self) {}

    /// Latest underlying LTP with the broker-side timestamp.
    async fn get_ltp_with_timestamp(&self, underlying: &str) -> Result<Tick>;

    /// Full quote + Greeks for a single option contract.
    async fn get_option_quote(&self, symbol: &str, exchange: &str) -> Result<GreeksSnapshot>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse>;

    async fn cancel_order(&self, order_id: &str) -> Result<OrderResponse>;

    async fn get_order_status(&self, order_id: &str) -> Result<serde_json::Value>;
}

// =============================================================================
// Symbology
// =============================================================================

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Build the exchange trading symbol for an index option contract:
/// `NIFTY` + `DDMMMYY` + strike + `CE`/`PE`, e.g. `NIFTY07AUG2519500CE`.
pub fn build_option_symbol(
    underlying: &str,
    expiry: NaiveDate,
    strike: u32,
    option_type: OptionType,
) -> String {
    format!(
        "{}{:02}{}{:02}{}{}",
        underlying.to_uppercase(),
        expiry.day(),
        MONTHS[expiry.month0() as usize],
        expiry.year() % 100,
        strike,
        option_type
    )
}

/// Nearest weekly expiry on or after `today` (index weeklies expire on
/// Thursday; a Thursday itself counts as the current expiry).
pub fn nearest_weekly_expiry(today: NaiveDate) -> NaiveDate {
    let days_ahead = (Weekday::Thu.num_days_from_monday() + 7
        - today.weekday().num_days_from_monday())
        % 7;
    today + chrono::Duration::days(days_ahead as i64)
}

/// Minutes remaining until `expiry` trading close (15:30 IST on expiry day),
/// measured from an IST wall-clock minute-of-day.
pub fn minutes_to_expiry(expiry: NaiveDate, today: NaiveDate, minute_of_day: u32) -> i64 {
    let close_minute = 15 * 60 + 30;
    let whole_days = (expiry - today).num_days();
    whole_days * 24 * 60 + close_minute as i64 - minute_of_day as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_symbol_format() {
        let expiry = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        assert_eq!(
            build_option_symbol("NIFTY", expiry, 19500, OptionType::CE),
            "NIFTY07AUG2519500CE"
        );
        assert_eq!(
            build_option_symbol("banknifty", expiry, 45000, OptionType::PE),
            "BANKNIFTY07AUG2545000PE"
        );
    }

    #[test]
    fn weekly_expiry_rolls_to_thursday() {
        // 2025-08-01 is a Friday; next Thursday is 2025-08-07.
        let friday = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        assert_eq!(
            nearest_weekly_expiry(friday),
            NaiveDate::from_ymd_opt(2025, 8, 7).unwrap()
        );

        // A Thursday maps to itself.
        let thursday = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        assert_eq!(nearest_weekly_expiry(thursday), thursday);
    }

    #[test]
    fn minutes_to_expiry_on_expiry_day() {
        let day = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        // At 15:25 on expiry day there are 5 minutes left.
        assert_eq!(minutes_to_expiry(day, day, 15 * 60 + 25), 5);
        // A day earlier there are 24h more.
        let prev = NaiveDate::from_ymd_opt(2025, 8, 6).unwrap();
        assert_eq!(minutes_to_expiry(day, prev, 15 * 60 + 25), 5 + 24 * 60);
    }

    #[test]
    fn order_response_acceptance() {
        let ok = OrderResponse {
            status: "success".into(),
            order_id: Some("O-1".into()),
            message: None,
        };
        assert!(ok.accepted());

        let no_id = OrderResponse {
            status: "success".into(),
            order_id: None,
            message: None,
        };
        assert!(!no_id.accepted());

        let failed = OrderResponse {
            status: "error".into(),
            order_id: Some("O-2".into()),
            message: Some("rejected".into()),
        };
        assert!(!failed.accepted());
    }
}
