// =============================================================================
// Adaptive layer — rule-based pattern reinforcement, never strategy mutation
// =============================================================================
//
// Sub-components:
//   buckets     — the five categorical axes
//   learning    — bucketed trade history + insights
//   regime      — market regime classification + posture
//   weights     — per-(rule, bucket) multipliers
//   confidence  — signal quality scoring
//   patterns    — loss-pattern mining + blocks
//   safety      — proposal lifecycle and pacing guards
//   controller  — the pipeline tying them together
// =============================================================================

pub mod buckets;
pub mod confidence;
pub mod controller;
pub mod learning;
pub mod patterns;
pub mod regime;
pub mod safety;
pub mod weights;

pub use buckets::{BucketTuple, FeatureBucket};
pub use controller::{AdaptiveController, AdaptiveDecision, SignalSnapshot};
pub use learning::TradeFeatures;
pub use regime::{MarketRegime, RegimeSignals};
