// =============================================================================
// HTTP surface — REST endpoints and operational probes
// =============================================================================

pub mod rest;

pub use rest::{router, ApiContext};
