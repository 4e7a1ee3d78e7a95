// =============================================================================
// Trade Manager — the single owner of the active-trade registry
// =============================================================================
//
// Life-cycle: Active -> (partial exits...) -> Closed.
//
// `quantity` is the original fill and never changes; `quantity_remaining`
// shrinks with each partial. For every trade the partial quantities sum to at
// most `quantity`, and after the close they plus the final exit equal it
// exactly.
//
// Thread-safety: all mutable state sits behind `parking_lot::RwLock`. Only
// the tick loop writes; the dashboard reads cloned snapshots.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::risk::PortfolioGreeks;
use crate::types::{GreeksSnapshot, OptionType};

/// Closed-trade history depth.
const MAX_CLOSED_HISTORY: usize = 500;

// ---------------------------------------------------------------------------
// Trade model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Active,
    Closed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// One recorded partial exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub time: DateTime<Utc>,
    pub qty: u32,
    pub price: f64,
}

/// A single option trade through its whole life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub underlying: String,
    /// Broker trading symbol for the leg.
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: u32,
    pub option_type: OptionType,

    /// Original filled quantity (immutable).
    pub quantity: u32,
    /// Quantity still open after partial exits.
    pub quantity_remaining: u32,

    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_delta: f64,
    pub entry_gamma: f64,
    pub entry_theta: f64,
    pub entry_iv: f64,

    pub sl_price: f64,
    pub target_price: f64,

    pub current_price: f64,
    pub current_delta: f64,
    pub current_gamma: f64,
    pub current_theta: f64,
    pub current_iv: f64,
    pub current_vega: f64,

    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_reason: Option<String>,

    pub entry_reason_tags: Vec<String>,
    #[serde(default)]
    pub exit_reason_tags: Vec<String>,

    pub status: TradeStatus,
    /// Realised PnL: partial legs accrue here, the final leg completes it.
    pub pnl: f64,
    /// Fees charged across the trade's orders.
    pub fees: f64,

    #[serde(default)]
    pub partial_exits: Vec<PartialExit>,

    /// Entry order id returned by the broker.
    pub entry_order_id: String,
}

impl Trade {
    /// Quantity already taken off through partials.
    pub fn exited_qty(&self) -> u32 {
        self.partial_exits.iter().map(|p| p.qty).sum()
    }

    /// Unrealised PnL of the still-open quantity at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity_remaining as f64
    }
}

/// Parameters for opening a trade (set by the entry pipeline).
#[derive(Debug, Clone)]
pub struct TradeOpen {
    pub underlying: String,
    pub symbol: String,
    pub expiry: NaiveDate,
    pub strike: u32,
    pub option_type: OptionType,
    pub quantity: u32,
    pub entry_price: f64,
    pub entry_delta: f64,
    pub entry_gamma: f64,
    pub entry_theta: f64,
    pub entry_iv: f64,
    pub sl_price: f64,
    pub target_price: f64,
    pub entry_reason_tags: Vec<String>,
    pub entry_order_id: String,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct TradeManager {
    active: RwLock<Vec<Trade>>,
    closed: RwLock<Vec<Trade>>,
}

impl TradeManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Register a filled entry and return the new trade's id.
    pub fn open_trade(&self, open: TradeOpen) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let trade = Trade {
            id: id.clone(),
            underlying: open.underlying,
            symbol: open.symbol,
            expiry: open.expiry,
            strike: open.strike,
            option_type: open.option_type,
            quantity: open.quantity,
            quantity_remaining: open.quantity,
            entry_price: open.entry_price,
            entry_time: now,
            entry_delta: open.entry_delta,
            entry_gamma: open.entry_gamma,
            entry_theta: open.entry_theta,
            entry_iv: open.entry_iv,
            sl_price: open.sl_price,
            target_price: open.target_price,
            current_price: open.entry_price,
            current_delta: open.entry_delta,
            current_gamma: open.entry_gamma,
            current_theta: open.entry_theta,
            current_iv: open.entry_iv,
            current_vega: 0.0,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            entry_reason_tags: open.entry_reason_tags,
            exit_reason_tags: Vec::new(),
            status: TradeStatus::Active,
            pnl: 0.0,
            fees: 0.0,
            partial_exits: Vec::new(),
            entry_order_id: open.entry_order_id,
        };

        info!(
            id = %id,
            symbol = %trade.symbol,
            quantity = trade.quantity,
            entry_price = trade.entry_price,
            sl = trade.sl_price,
            target = trade.target_price,
            "trade opened"
        );

        self.active.write().push(trade);
        metrics::counter!("meridian_trades_opened_total", 1);
        id
    }

    // -------------------------------------------------------------------------
    // Per-tick update
    // -------------------------------------------------------------------------

    /// Refresh a trade's `current_*` fields from a Greeks snapshot.
    pub fn update_current(&self, id: &str, snapshot: &GreeksSnapshot) {
        let mut active = self.active.write();
        if let Some(trade) = active.iter_mut().find(|t| t.id == id) {
            trade.current_price = snapshot.ltp;
            trade.current_delta = snapshot.delta;
            trade.current_gamma = snapshot.gamma;
            trade.current_theta = snapshot.theta;
            trade.current_iv = snapshot.iv;
            trade.current_vega = snapshot.vega;
        }
    }

    // -------------------------------------------------------------------------
    // Exits
    // -------------------------------------------------------------------------

    /// Record a partial exit: quantity shrinks, realised PnL accrues, the
    /// trade stays active.
    pub fn apply_partial_exit(&self, id: &str, qty: u32, price: f64) -> Option<Trade> {
        let mut active = self.active.write();
        let trade = active.iter_mut().find(|t| t.id == id)?;

        if qty > trade.quantity_remaining {
            warn!(
                id,
                qty,
                remaining = trade.quantity_remaining,
                "partial exit larger than remaining quantity refused"
            );
            return None;
        }

        trade.quantity_remaining -= qty;
        trade.pnl += (price - trade.entry_price) * qty as f64;
        trade.partial_exits.push(PartialExit {
            time: Utc::now(),
            qty,
            price,
        });

        info!(
            id,
            qty,
            price,
            remaining = trade.quantity_remaining,
            realised = trade.pnl,
            "partial exit applied"
        );

        Some(trade.clone())
    }

    /// Close a trade: the remaining quantity exits at `price`, the trade
    /// moves to history, and the final PnL (net of fees) is returned.
    pub fn close_trade(
        &self,
        id: &str,
        price: f64,
        reason: &str,
        exit_tags: Vec<String>,
    ) -> Option<Trade> {
        let mut active = self.active.write();
        let index = active.iter().position(|t| t.id == id)?;
        let mut trade = active.remove(index);
        drop(active);

        trade.pnl += (price - trade.entry_price) * trade.quantity_remaining as f64;
        trade.pnl -= trade.fees;
        trade.current_price = price;
        trade.exit_price = Some(price);
        trade.exit_time = Some(Utc::now());
        trade.exit_reason = Some(reason.to_string());
        trade.exit_reason_tags = exit_tags;
        trade.status = TradeStatus::Closed;
        trade.quantity_remaining = 0;

        info!(
            id,
            price,
            reason,
            pnl = trade.pnl,
            "trade closed"
        );
        metrics::counter!("meridian_trades_closed_total", 1);

        let mut closed = self.closed.write();
        closed.push(trade.clone());
        while closed.len() > MAX_CLOSED_HISTORY {
            closed.remove(0);
        }

        Some(trade)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn active_trades(&self) -> Vec<Trade> {
        self.active.read().clone()
    }

    pub fn has_active(&self) -> bool {
        !self.active.read().is_empty()
    }

    pub fn closed_trades(&self, limit: usize) -> Vec<Trade> {
        let closed = self.closed.read();
        closed.iter().rev().take(limit).cloned().collect()
    }

    /// Net portfolio Greeks over the active set, weighted by the remaining
    /// quantity. Vega aggregates as Σ(vega × qty).
    pub fn portfolio_greeks(&self) -> PortfolioGreeks {
        let active = self.active.read();
        let mut portfolio = PortfolioGreeks::default();
        for trade in active.iter() {
            let qty = trade.quantity_remaining as f64;
            portfolio.net_delta += trade.current_delta * qty;
            portfolio.net_gamma += trade.current_gamma * qty;
            portfolio.net_theta += trade.current_theta * qty;
            portfolio.net_vega += trade.current_vega * qty;
            portfolio.gross_delta += (trade.current_delta * qty).abs();
        }
        portfolio
    }
}

impl Default for TradeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TradeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeManager")
            .field("active", &self.active.read().len())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
