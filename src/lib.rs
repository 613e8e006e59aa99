// prop-eval-core: evaluation and position-simulation engine for a prop-trading platform.
// traders run a virtual balance against a real price feed, pass or fail a
// multi-checkpoint profit evaluation, and graduate to a funded account.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: AccountId, Symbol, Side, Price, Quote, Leverage, Timestamp
//   1.7  clock.rs: wall clock and manual clock
//   2.x  conditional.rs: take profit / stop loss orders, bracket validation
//   3.x  account.rs: evaluation + funded accounts, drawdown rules
//   4.x  position.rs: position struct, PnL, increase/reduce/flip math
//   5.x  checkpoint.rs: checkpoint state machine (pure)
//   6.x  risk.rs: per-position forced close triggers
//   7.x  config.rs: fees, risk, oracle, funded constants, env presets
//   7.x  lifecycle.rs: evaluation account creation, funded account derivation
//   8.x  engine/: orders, watchdog, evaluator, provisioning
//   9.x  price_feed.rs: oracle fallback chain, symbol cache
//   9.1  price_sources.rs: binance / coinbase / coingecko http sources
//   10.x store.rs: transactional per-account record store
//   11.x events.rs: audit events

// core modules
pub mod account;
pub mod checkpoint;
pub mod clock;
pub mod conditional;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod position;
pub mod risk;
pub mod store;
pub mod types;

// integration modules
pub mod config;
pub mod price_feed;
pub mod price_sources;

// re exports for convenience
pub use account::*;
pub use checkpoint::*;
pub use clock::*;
pub use conditional::*;
pub use engine::*;
pub use events::*;
pub use lifecycle::*;
pub use position::*;
pub use risk::*;
pub use store::*;
pub use types::*;
pub use config::{ConfigError, Environment, PlatformConfig, LedgerConfig, RiskConfig, OracleConfig, FundedAccountConfig, EvaluationDefaults, SourceKind};
pub use price_feed::{canonicalize, OracleError, PriceOracle, PriceQuote, PriceSource, StaticPriceSource, SymbolCache};
pub use price_sources::{build_sources, BinanceTicker, CoinbaseSpot, CoinGeckoSimple};
