//! Analytic signal modules: cross-sectional momentum, correlation anomaly
//! detection and regime classification, cointegration-based pairs signals,
//! and multi-source signal fusion. Each engine exposes pure computations
//! over price series plus an async wrapper that pulls data through the
//! runtime context.

pub mod cointegration;
pub mod correlation;
pub mod fusion;
pub mod momentum;

pub use cointegration::{CointegrationEngine, CointegrationReport, SpreadSignal};
pub use correlation::{
    CorrelationEngine, CorrelationSettings, CorrelationRegime, PairsSignal, RegimeReport,
};
pub use fusion::{ComponentSignal, FusionEngine, FusedSignal};
pub use momentum::{MomentumEngine, MomentumRank};
