// =============================================================================
// F&O subcore — option chains, structure selection, multi-leg execution
// =============================================================================

pub mod chain;
pub mod executor;
pub mod greeks;
pub mod selector;

pub use chain::{ChainFetcher, OptionChain, OptionContract};
pub use executor::{MultiLegExecutor, StructureResult};
pub use selector::{build_legs, select_strategy, MarketState, OptionStrategyKind, StrategyChoice};
