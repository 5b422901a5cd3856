use engine_core::{EngineError, EngineResult};
use nalgebra::{DMatrix, DVector};

use crate::EPSILON;

/// Ordinary least squares fit.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub residuals: Vec<f64>,
    pub r_squared: f64,
}

/// Fit y = X·β by SVD. `xs` holds one column per regressor; callers add a
/// constant column themselves when they want an intercept. Rank deficiency
/// comes back as `Degenerate` with the offending dimensions.
pub fn ols(y: &[f64], xs: &[Vec<f64>]) -> EngineResult<OlsFit> {
    let n = y.len();
    let k = xs.len();
    if k == 0 || n < k + 1 {
        return Err(EngineError::Degenerate(format!(
            "ols needs more observations ({n}) than regressors ({k})"
        )));
    }
    if xs.iter().any(|col| col.len() != n) {
        return Err(EngineError::Degenerate(
            "ols regressor length mismatch".to_string(),
        ));
    }

    let x = DMatrix::from_fn(n, k, |row, col| xs[col][row]);
    let yv = DVector::from_column_slice(y);

    let svd = x.clone().svd(true, true);
    if svd.rank(EPSILON) < k {
        return Err(EngineError::Degenerate(format!(
            "ols design matrix is rank-deficient ({} of {k} independent columns)",
            svd.rank(EPSILON)
        )));
    }
    let beta = svd
        .solve(&yv, EPSILON)
        .map_err(|e| EngineError::Degenerate(format!("ols solve failed: {e}")))?;

    let fitted = &x * &beta;
    let residuals: Vec<f64> = (&yv - &fitted).iter().copied().collect();

    let mean_y = y.iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = y.iter().map(|v| (v - mean_y).powi(2)).sum();
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    let r_squared = if ss_tot <= EPSILON {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Ok(OlsFit {
        coefficients: beta.iter().copied().collect(),
        residuals,
        r_squared,
    })
}

/// Half-life of mean reversion under an OU model: regress Δs on lagged s
/// (with intercept) and convert the slope. None when the spread is not
/// mean-reverting (slope ≥ 0) or the regression is degenerate.
pub fn half_life_of_mean_reversion(spread: &[f64]) -> Option<f64> {
    if spread.len() < 20 {
        return None;
    }
    let lagged: Vec<f64> = spread[..spread.len() - 1].to_vec();
    let deltas: Vec<f64> = spread.windows(2).map(|w| w[1] - w[0]).collect();
    let intercept = vec![1.0; lagged.len()];

    let fit = ols(&deltas, &[intercept, lagged]).ok()?;
    let slope = fit.coefficients[1];
    if slope >= 0.0 || (1.0 + slope) <= 0.0 {
        return None;
    }
    let hl = -(2.0_f64.ln()) / (1.0 + slope).ln();
    if hl.is_finite() && hl > 0.0 {
        Some(hl)
    } else {
        None
    }
}

/// Augmented Dickey-Fuller test statistic on a series (no trend term, one
/// lag). Returns the t-statistic of the lagged-level coefficient and an
/// approximate p-value from the Dickey-Fuller distribution.
pub fn adf_test(series: &[f64]) -> EngineResult<AdfResult> {
    if series.len() < 25 {
        return Err(EngineError::Degenerate(format!(
            "adf needs at least 25 observations, got {}",
            series.len()
        )));
    }

    // Δy_t = α + γ·y_{t-1} + δ·Δy_{t-1} + ε
    let deltas: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let y = deltas[1..].to_vec();
    let n = y.len();
    let intercept = vec![1.0; n];
    let lagged_level = series[1..series.len() - 1].to_vec();
    let lagged_delta = deltas[..deltas.len() - 1].to_vec();

    let fit = ols(&y, &[intercept, lagged_level.clone(), lagged_delta])?;
    let gamma = fit.coefficients[1];

    // Standard error of the gamma coefficient via the residual variance and
    // the centered sum of squares of the lagged level.
    let dof = n.saturating_sub(3).max(1) as f64;
    let sigma2 = fit.residuals.iter().map(|r| r * r).sum::<f64>() / dof;
    let mean_level = lagged_level.iter().sum::<f64>() / n as f64;
    let ss_level: f64 = lagged_level.iter().map(|v| (v - mean_level).powi(2)).sum();
    if ss_level <= EPSILON {
        return Err(EngineError::Degenerate(
            "adf lagged level has zero variance".to_string(),
        ));
    }
    let se = (sigma2 / ss_level).sqrt();
    let t_stat = gamma / se;

    Ok(AdfResult {
        t_stat,
        p_value: adf_p_value(t_stat),
    })
}

/// ADF test output.
#[derive(Debug, Clone)]
pub struct AdfResult {
    pub t_stat: f64,
    pub p_value: f64,
}

/// Interpolated p-value from the MacKinnon critical values for the
/// constant-only Dickey-Fuller distribution.
fn adf_p_value(t_stat: f64) -> f64 {
    // (critical value, p) anchors, most negative first.
    const TABLE: [(f64, f64); 5] = [
        (-3.75, 0.005),
        (-3.43, 0.01),
        (-2.86, 0.05),
        (-2.57, 0.10),
        (-1.94, 0.30),
    ];
    if t_stat <= TABLE[0].0 {
        return TABLE[0].1;
    }
    if t_stat >= TABLE[TABLE.len() - 1].0 {
        // Shallow tail: scale toward 1 as the statistic approaches zero.
        let last = TABLE[TABLE.len() - 1];
        let frac = ((t_stat - last.0) / last.0.abs()).clamp(0.0, 1.0);
        return (last.1 + (1.0 - last.1) * frac).min(1.0);
    }
    for pair in TABLE.windows(2) {
        let (c0, p0) = pair[0];
        let (c1, p1) = pair[1];
        if t_stat <= c1 {
            let frac = (t_stat - c0) / (c1 - c0);
            return p0 + (p1 - p0) * frac;
        }
    }
    1.0
}
