// =============================================================================
// Shared types used across the Meridian options engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Option leg side: call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    CE,
    PE,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CE => write!(f, "CE"),
            Self::PE => write!(f, "PE"),
        }
    }
}

/// Order action submitted to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order pricing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Product type: intraday (MIS) or carry-forward (NRML).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Mis,
    Nrml,
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mis => write!(f, "MIS"),
            Self::Nrml => write!(f, "NRML"),
        }
    }
}

/// Whether we are running against real funds or the paper broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

// =============================================================================
// Market data values
// =============================================================================

/// One Greeks + quote observation for a single option contract.
///
/// Snapshots are value records: the Greeks cache stores copies and nothing
/// mutates one after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreeksSnapshot {
    pub symbol: String,
    pub exchange: String,
    pub ltp: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: u64,
    pub oi: u64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub iv: f64,
    pub timestamp: DateTime<Utc>,
}

impl GreeksSnapshot {
    /// Bid/ask spread as a percentage of LTP. Returns `None` when the quote
    /// is not fully formed (any leg non-positive).
    pub fn spread_percent(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 && self.ltp > 0.0 {
            Some((self.ask - self.bid) / self.ltp * 100.0)
        } else {
            None
        }
    }

    /// Quote sanity: bid <= ltp <= ask whenever all three are positive.
    pub fn quote_consistent(&self) -> bool {
        if self.bid > 0.0 && self.ask > 0.0 && self.ltp > 0.0 {
            self.bid <= self.ltp && self.ltp <= self.ask
        } else {
            true
        }
    }
}

/// Underlying spot tick with its receive timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub underlying: String,
    pub ltp: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Age of this tick in seconds relative to `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ltp: f64, bid: f64, ask: f64) -> GreeksSnapshot {
        GreeksSnapshot {
            symbol: "NIFTY06AUG2519500CE".into(),
            exchange: "NFO".into(),
            ltp,
            bid,
            ask,
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

    #[test]
    fn spread_percent_requires_full_quote() {
        let s = snap(100.0, 99.5, 100.5);
        assert!((s.spread_percent().unwrap() - 1.0).abs() < 1e-9);

        let s = snap(100.0, 0.0, 100.5);
        assert!(s.spread_percent().is_none());
    }

    #[test]
    fn quote_consistency() {
        assert!(snap(101.0, 100.5, 101.5).quote_consistent());
        assert!(!snap(99.0, 100.5, 101.5).quote_consistent());
    }

    #[test]
    fn tick_age() {
        let tick = Tick {
            underlying: "NIFTY".into(),
            ltp: 19542.75,
            timestamp: Utc::now() - chrono::Duration::seconds(6),
        };
        assert!(tick.age_secs(Utc::now()) >= 6.0);
    }
}
