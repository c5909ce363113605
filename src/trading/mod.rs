// =============================================================================
// Trading Engine (C6)
// =============================================================================
//
// An in-memory ledger mirroring database positions and balances, in the
// shape of the teacher's `position_engine::PositionManager`
// (`RwLock<Vec<Position>>`, logged state transitions) generalized from spot
// TP1/TP2/trailing-stop exits to perpetual-futures leverage, liquidation,
// and the paper/live split named in spec §4.6.

pub mod engine;
pub mod tools;

pub use engine::{BotLedger, OpenOutcome, TradingEngine};
