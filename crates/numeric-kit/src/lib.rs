//! Pure numeric primitives shared by the analysis crates. No I/O, no clocks;
//! degenerate inputs come back as `None` or `EngineError::Degenerate`, never
//! as NaN leaking into downstream aggregates.

pub mod indicators;
pub mod regression;
pub mod returns;
pub mod stats;

pub use indicators::*;
pub use regression::*;
pub use returns::*;
pub use stats::*;


/// Variance floor below which a series is treated as constant.
pub const EPSILON: f64 = 1e-12;
