//! Paper trading: persistent portfolios with a scored-universe rebalance
//! rule (stop-loss first, then top-N selection with pyramiding), executed
//! against live quotes and written atomically. One writer per portfolio;
//! concurrent rebalances on the same portfolio queue FIFO.

pub mod models;
pub mod rebalance;
pub mod store;

pub use models::*;
pub use rebalance::{PaperTrader, RebalanceSettings};
pub use store::PaperStore;

#[cfg(test)]
mod tests;
