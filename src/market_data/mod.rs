// =============================================================================
// Market data — freshness-gated ticks and the Greeks cache
// =============================================================================

pub mod gateway;
pub mod greeks_cache;

pub use gateway::MarketGateway;
pub use greeks_cache::GreeksCache;
