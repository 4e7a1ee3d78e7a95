// =============================================================================
// Broker seam — trait, symbology, REST client, paper broker, quote feed
// =============================================================================

pub mod api;
pub mod feed;
pub mod paper;
pub mod smart_client;

pub use api::{
    build_option_symbol, nearest_weekly_expiry, BrokerApi, OrderRequest, OrderResponse,
};
pub use paper::PaperBroker;
pub use smart_client::SmartClient;
