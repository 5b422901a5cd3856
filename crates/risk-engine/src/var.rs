use numeric_kit::percentile;
use serde::{Deserialize, Serialize};

/// Value-at-Risk and Conditional VaR at one confidence level, in percent of
/// notional and in absolute terms against the supplied spot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarEntry {
    pub confidence: f64,
    /// Loss threshold (positive number) as a fraction of notional.
    pub var_pct: f64,
    pub var_abs: f64,
    /// Mean loss beyond the VaR threshold.
    pub cvar_pct: f64,
    pub cvar_abs: f64,
}

/// Tail risk of a simulated return distribution. VaR at confidence α is the
/// loss at the (1−α) return quantile; CVaR averages the losses beyond it.
/// Losses are reported positive; a distribution whose tail is profitable
/// yields zeros rather than negative risk.
pub fn tail_risk(returns: &[f64], spot: f64, confidences: &[f64]) -> Vec<VarEntry> {
    let mut out = Vec::with_capacity(confidences.len());
    for &confidence in confidences {
        let q = 1.0 - confidence;
        let cutoff = match percentile(returns, q) {
            Some(c) => c,
            None => continue,
        };
        let var_pct = (-cutoff).max(0.0);

        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= cutoff).collect();
        let cvar_pct = if tail.is_empty() {
            var_pct
        } else {
            (-(tail.iter().sum::<f64>() / tail.len() as f64)).max(0.0)
        };

        out.push(VarEntry {
            confidence,
            var_pct,
            var_abs: var_pct * spot,
            cvar_pct,
            cvar_abs: cvar_pct * spot,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cvar_dominates_var() {
        // Symmetric-ish distribution with a fat left tail.
        let returns: Vec<f64> = (0..1000)
            .map(|i| {
                let x = (i as f64 / 1000.0) * 2.0 - 1.0; // [-1, 1)
                if x < -0.9 {
                    x * 0.5 // deep losses
                } else {
                    x * 0.1
                }
            })
            .collect();
        let entries = tail_risk(&returns, 100.0, &[0.95, 0.99]);
        assert_eq!(entries.len(), 2);
        for e in &entries {
            assert!(e.cvar_pct >= e.var_pct);
            assert!(e.var_abs >= 0.0);
            assert!((e.var_abs - e.var_pct * 100.0).abs() < 1e-9);
        }
        // Higher confidence cuts deeper into the tail.
        assert!(entries[1].var_pct >= entries[0].var_pct);
    }

    #[test]
    fn all_profit_distribution_has_zero_var() {
        let returns = vec![0.01, 0.02, 0.05, 0.10];
        let entries = tail_risk(&returns, 100.0, &[0.95]);
        assert_eq!(entries[0].var_pct, 0.0);
        assert_eq!(entries[0].cvar_pct, 0.0);
    }
}
