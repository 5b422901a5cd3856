use serde::{Deserialize, Serialize};

/// One deterministic stress scenario projected over the horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub drift_daily: f64,
    pub volatility_daily: f64,
    pub terminal_price: f64,
    pub return_pct: f64,
}

/// Four deterministic scenarios over the base (μ, σ) estimate. The drift
/// shift is expressed in standard errors of the mean (σ/√n) so the stress
/// scales with estimation uncertainty; the terminal value is the median GBM
/// path under the modified parameters.
pub fn scenario_grid(
    spot: f64,
    mu: f64,
    sigma: f64,
    sample_size: usize,
    horizon_days: usize,
) -> Vec<ScenarioOutcome> {
    let se_mu = if sample_size > 0 {
        sigma / (sample_size as f64).sqrt()
    } else {
        sigma
    };

    let grid: [(&str, f64, f64); 4] = [
        ("bull", mu + 2.0 * se_mu, sigma * 0.5),
        ("base", mu, sigma),
        ("bear", mu - 2.0 * se_mu, sigma * 1.5),
        ("crash", mu - 3.0 * se_mu, sigma * 2.0),
    ];

    grid.iter()
        .map(|(name, drift, vol)| {
            let log_terminal = (drift - vol * vol / 2.0) * horizon_days as f64;
            let terminal = spot * log_terminal.exp();
            ScenarioOutcome {
                name: name.to_string(),
                drift_daily: *drift,
                volatility_daily: *vol,
                terminal_price: terminal,
                return_pct: (terminal / spot - 1.0) * 100.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenarios_are_ordered_bull_to_crash() {
        let scenarios = scenario_grid(100.0, 0.0005, 0.015, 252, 30);
        assert_eq!(scenarios.len(), 4);
        assert_eq!(scenarios[0].name, "bull");
        assert_eq!(scenarios[3].name, "crash");
        assert!(scenarios[0].terminal_price > scenarios[1].terminal_price);
        assert!(scenarios[1].terminal_price > scenarios[2].terminal_price);
        assert!(scenarios[2].terminal_price > scenarios[3].terminal_price);
    }

    #[test]
    fn base_scenario_uses_unmodified_parameters() {
        let scenarios = scenario_grid(100.0, 0.001, 0.02, 252, 10);
        let base = &scenarios[1];
        assert_eq!(base.drift_daily, 0.001);
        assert_eq!(base.volatility_daily, 0.02);
    }
}
