//! Risk and simulation: seeded Monte Carlo over GBM and bootstrap paths,
//! VaR/CVaR, and deterministic stress scenarios. All stochastic entry
//! points take an explicit seed; identical inputs and seed give identical
//! outputs.

pub mod monte_carlo;
pub mod scenarios;
pub mod var;
pub mod vol_surface;

pub use monte_carlo::{MonteCarloEngine, MonteCarloReport, SimMethod, TerminalPercentiles};
pub use scenarios::{scenario_grid, ScenarioOutcome};
pub use var::{tail_risk, VarEntry};
pub use vol_surface::{build_surface, VolSurface};
