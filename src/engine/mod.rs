// 8.0: evaluation engine. coordinates order placement, the risk watchdog,
// checkpoint evaluation and funded account provisioning on top of a
// transactional account store and a price oracle.

mod config;
mod core;
mod evaluator;
mod lifecycle;
mod orders;
mod positions;
mod results;
mod watchdog;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{CheckpointEvaluationResult, EngineError, OrderRequest, OrderResult, OrderType, RefreshSummary};
