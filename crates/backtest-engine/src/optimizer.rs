use engine_core::{CancelToken, EngineError, EngineResult, PriceSeries};
use numeric_kit::mean_std;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::SimulationEngine;
use crate::models::{BacktestConfig, BacktestRun};

/// Metric the optimizer scores candidates by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMetric {
    Sharpe,
    TotalReturn,
    Calmar,
}

impl ScoreMetric {
    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "sharpe" => Ok(ScoreMetric::Sharpe),
            "total_return" => Ok(ScoreMetric::TotalReturn),
            "calmar" => Ok(ScoreMetric::Calmar),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown score metric {other} (want sharpe|total_return|calmar)"
            ))),
        }
    }

    fn extract(&self, run: &BacktestRun) -> f64 {
        match self {
            ScoreMetric::Sharpe => run.metrics.sharpe.unwrap_or(f64::NEG_INFINITY),
            ScoreMetric::TotalReturn => run.metrics.total_return_pct,
            ScoreMetric::Calmar => run.metrics.calmar.unwrap_or(f64::NEG_INFINITY),
        }
    }
}

/// Parameter search space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SearchSpace {
    /// Cartesian product of explicit value lists.
    Grid(BTreeMap<String, Vec<f64>>),
    /// Uniform samples from per-parameter ranges; deterministic under the
    /// run seed.
    Random {
        ranges: BTreeMap<String, (f64, f64)>,
        samples: usize,
    },
}

impl SearchSpace {
    /// Materialize candidate parameter sets in a deterministic order.
    fn candidates(&self, seed: u64) -> Vec<BTreeMap<String, f64>> {
        match self {
            SearchSpace::Grid(axes) => {
                let mut combos: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new()];
                for (name, values) in axes {
                    let mut next = Vec::with_capacity(combos.len() * values.len().max(1));
                    for combo in &combos {
                        for value in values {
                            let mut c = combo.clone();
                            c.insert(name.clone(), *value);
                            next.push(c);
                        }
                    }
                    combos = next;
                }
                combos
            }
            SearchSpace::Random { ranges, samples } => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..*samples)
                    .map(|_| {
                        ranges
                            .iter()
                            .map(|(name, (lo, hi))| {
                                let v = if hi > lo { rng.gen_range(*lo..*hi) } else { *lo };
                                (name.clone(), v)
                            })
                            .collect()
                    })
                    .collect()
            }
        }
    }
}

/// One evaluated candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub params: BTreeMap<String, f64>,
    pub score: f64,
    pub sharpe: Option<f64>,
    pub num_trades: u32,
}

/// Optimizer output: the winner plus the full score surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_params: BTreeMap<String, f64>,
    pub best_score: f64,
    pub metric: ScoreMetric,
    pub heatmap: Vec<HeatmapCell>,
    /// std of the top-decile scores divided by their mean; low values mean
    /// the optimum sits on a plateau rather than a spike.
    pub stability: Option<f64>,
    pub evaluated: usize,
}

/// Evaluate the search space over `series`. Degenerate parameter
/// combinations (fast ≥ slow and friends) are skipped silently and do not
/// count toward totals.
pub fn optimize(
    base: &BacktestConfig,
    series: &PriceSeries,
    benchmark: Option<&PriceSeries>,
    space: &SearchSpace,
    metric: ScoreMetric,
    seed: u64,
    cancel: &CancelToken,
) -> EngineResult<OptimizationResult> {
    let candidates = space.candidates(seed);
    if candidates.is_empty() {
        return Err(EngineError::InvalidArgument(
            "empty parameter search space".to_string(),
        ));
    }

    let mut cells: Vec<HeatmapCell> = Vec::with_capacity(candidates.len());
    // Parallel evaluation in deterministic chunks; cancellation lands
    // between chunks.
    for chunk in candidates.chunks(64) {
        cancel.check()?;
        let evaluated: Vec<Option<HeatmapCell>> = chunk
            .par_iter()
            .map(|params| {
                let mut config = base.clone();
                for (k, v) in params {
                    config.params.insert(k.clone(), *v);
                }
                match SimulationEngine::new(config).run(series, benchmark, cancel) {
                    Ok(run) => Some(HeatmapCell {
                        params: params.clone(),
                        score: metric.extract(&run),
                        sharpe: run.metrics.sharpe,
                        num_trades: run.metrics.num_trades,
                    }),
                    Err(EngineError::Degenerate(_)) => None,
                    Err(err) => {
                        tracing::warn!("optimizer candidate failed: {err}");
                        None
                    }
                }
            })
            .collect();
        cells.extend(evaluated.into_iter().flatten());
    }

    if cells.is_empty() {
        return Err(EngineError::Degenerate(
            "every parameter combination was degenerate".to_string(),
        ));
    }

    // Rank: score, then Sharpe, then fewer trades, then lexicographically
    // smaller parameters for a stable winner.
    let mut ranked: Vec<&HeatmapCell> = cells.iter().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.sharpe
                    .unwrap_or(f64::NEG_INFINITY)
                    .partial_cmp(&a.sharpe.unwrap_or(f64::NEG_INFINITY))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.num_trades.cmp(&b.num_trades))
            .then_with(|| param_order(&a.params, &b.params))
    });
    let best = ranked[0];

    let top_n = (cells.len() / 10).max(1);
    let top_scores: Vec<f64> = ranked.iter().take(top_n).map(|c| c.score).collect();
    let stability = mean_std(&top_scores).and_then(|(mean, std)| {
        if mean.abs() > numeric_kit::EPSILON {
            Some(std / mean.abs())
        } else {
            None
        }
    });

    Ok(OptimizationResult {
        best_params: best.params.clone(),
        best_score: best.score,
        metric,
        stability,
        evaluated: cells.len(),
        heatmap: cells.clone(),
    })
}

/// Lexicographic comparison over name-sorted parameter values.
fn param_order(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> std::cmp::Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let key = ka.cmp(kb);
        if key != std::cmp::Ordering::Equal {
            return key;
        }
        if let Some(ord) = va.partial_cmp(vb) {
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
    }
    a.len().cmp(&b.len())
}
