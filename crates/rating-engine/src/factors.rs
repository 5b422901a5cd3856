use engine_core::FundamentalSnapshot;
use numeric_kit::{rsi, sma, trailing_return};
use serde_json::{json, Map, Value};

/// One factor group's outcome before weighting.
#[derive(Debug, Clone)]
pub struct FactorOutcome {
    /// None when every input for the group was missing.
    pub grade: Option<f64>,
    pub raw_value: Option<f64>,
    pub details: Value,
}

fn band(value: f64, cutoffs: &[(f64, f64)], fallback: f64) -> f64 {
    for (cutoff, grade) in cutoffs {
        if value < *cutoff {
            return *grade;
        }
    }
    fallback
}

fn band_desc(value: f64, cutoffs: &[(f64, f64)], fallback: f64) -> f64 {
    for (cutoff, grade) in cutoffs {
        if value > *cutoff {
            return *grade;
        }
    }
    fallback
}

fn mean(grades: &[f64]) -> Option<f64> {
    if grades.is_empty() {
        None
    } else {
        Some(grades.iter().sum::<f64>() / grades.len() as f64)
    }
}

/// Trailing-twelve-month sum of a flow item over the most recent quarters.
fn ttm(quarters: &[FundamentalSnapshot], get: fn(&FundamentalSnapshot) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = quarters.iter().take(4).filter_map(get).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum())
    }
}

/// Valuation: P/E, P/B, P/S graded on value bands (lower is better).
pub fn valuation(price: f64, quarters: &[FundamentalSnapshot]) -> FactorOutcome {
    let mut grades = Vec::new();
    let mut details = Map::new();

    let latest = quarters.first();
    let shares = latest.and_then(|f| f.shares_outstanding);

    let ttm_eps = ttm(quarters, |f| f.eps);
    if let Some(eps) = ttm_eps {
        if eps > 0.0 && price > 0.0 {
            let pe = price / eps;
            details.insert("pe_ratio".to_string(), json!(pe));
            grades.push(band(
                pe,
                &[(10.0, 5.0), (15.0, 4.0), (22.0, 3.0), (30.0, 2.0), (45.0, 1.0)],
                0.0,
            ));
        }
    }

    if let (Some(f), Some(sh)) = (latest, shares) {
        if let Some(equity) = f.shareholders_equity {
            if equity > 0.0 && sh > 0.0 {
                let pb = price / (equity / sh);
                details.insert("pb_ratio".to_string(), json!(pb));
                grades.push(band(
                    pb,
                    &[(1.0, 5.0), (2.0, 4.0), (3.5, 3.0), (6.0, 2.0), (10.0, 1.0)],
                    0.0,
                ));
            }
        }
    }

    if let (Some(revenue), Some(sh)) = (ttm(quarters, |f| f.revenue), shares) {
        if revenue > 0.0 && sh > 0.0 {
            let ps = price / (revenue / sh);
            details.insert("ps_ratio".to_string(), json!(ps));
            grades.push(band(
                ps,
                &[(1.0, 5.0), (2.0, 4.0), (4.0, 3.0), (8.0, 2.0), (12.0, 1.0)],
                0.0,
            ));
        }
    }

    FactorOutcome {
        grade: mean(&grades),
        raw_value: details.get("pe_ratio").and_then(|v| v.as_f64()),
        details: Value::Object(details),
    }
}

/// Growth: revenue and EPS year over year, comparing the two most recent
/// comparable periods (TTM vs prior-year TTM when enough quarters exist).
pub fn growth(quarters: &[FundamentalSnapshot]) -> FactorOutcome {
    let mut grades = Vec::new();
    let mut details = Map::new();

    let yoy = |get: fn(&FundamentalSnapshot) -> Option<f64>| -> Option<f64> {
        if quarters.len() < 8 {
            return None;
        }
        let current: Vec<f64> = quarters[..4].iter().filter_map(get).collect();
        let prior: Vec<f64> = quarters[4..8].iter().filter_map(get).collect();
        if current.len() < 3 || prior.len() < 3 {
            return None;
        }
        let cur = current.iter().sum::<f64>() / current.len() as f64 * 4.0;
        let prev = prior.iter().sum::<f64>() / prior.len() as f64 * 4.0;
        if prev.abs() < f64::EPSILON {
            return None;
        }
        Some((cur - prev) / prev.abs() * 100.0)
    };

    if let Some(rev_growth) = yoy(|f| f.revenue) {
        details.insert("revenue_yoy_pct".to_string(), json!(rev_growth));
        grades.push(band_desc(
            rev_growth,
            &[(30.0, 5.0), (15.0, 4.0), (7.0, 3.0), (0.0, 2.0), (-10.0, 1.0)],
            0.0,
        ));
    }
    if let Some(eps_growth) = yoy(|f| f.eps) {
        details.insert("eps_yoy_pct".to_string(), json!(eps_growth));
        grades.push(band_desc(
            eps_growth,
            &[(30.0, 5.0), (15.0, 4.0), (7.0, 3.0), (0.0, 2.0), (-10.0, 1.0)],
            0.0,
        ));
    }

    FactorOutcome {
        grade: mean(&grades),
        raw_value: details.get("revenue_yoy_pct").and_then(|v| v.as_f64()),
        details: Value::Object(details),
    }
}

/// Profitability: net margin, ROE, ROA and free-cash-flow positivity.
pub fn profitability(quarters: &[FundamentalSnapshot]) -> FactorOutcome {
    let mut grades = Vec::new();
    let mut details = Map::new();

    let net_income = ttm(quarters, |f| f.net_income);
    let revenue = ttm(quarters, |f| f.revenue);
    let latest = quarters.first();

    if let (Some(ni), Some(rev)) = (net_income, revenue) {
        if rev > 0.0 {
            let margin = ni / rev * 100.0;
            details.insert("net_margin_pct".to_string(), json!(margin));
            grades.push(band_desc(
                margin,
                &[(25.0, 5.0), (15.0, 4.0), (8.0, 3.0), (3.0, 2.0), (0.0, 1.0)],
                0.0,
            ));
        }
    }
    if let (Some(ni), Some(equity)) = (net_income, latest.and_then(|f| f.shareholders_equity)) {
        if equity > 0.0 {
            let roe = ni / equity * 100.0;
            details.insert("roe_pct".to_string(), json!(roe));
            grades.push(band_desc(
                roe,
                &[(25.0, 5.0), (15.0, 4.0), (10.0, 3.0), (5.0, 2.0), (0.0, 1.0)],
                0.0,
            ));
        }
    }
    if let (Some(ni), Some(assets)) = (net_income, latest.and_then(|f| f.total_assets)) {
        if assets > 0.0 {
            let roa = ni / assets * 100.0;
            details.insert("roa_pct".to_string(), json!(roa));
            grades.push(band_desc(
                roa,
                &[(12.0, 5.0), (8.0, 4.0), (5.0, 3.0), (2.0, 2.0), (0.0, 1.0)],
                0.0,
            ));
        }
    }
    // FCF approximated as operating cash flow net of investing outflows.
    let ocf = ttm(quarters, |f| f.cash_flow_operating);
    let cfi = ttm(quarters, |f| f.cash_flow_investing);
    if let Some(ocf) = ocf {
        let fcf = ocf + cfi.unwrap_or(0.0);
        details.insert("free_cash_flow".to_string(), json!(fcf));
        grades.push(if fcf > 0.0 { 5.0 } else { 0.0 });
    }

    FactorOutcome {
        grade: mean(&grades),
        raw_value: details.get("net_margin_pct").and_then(|v| v.as_f64()),
        details: Value::Object(details),
    }
}

/// Momentum: 3/6/12-month returns, RSI(14) and position against the
/// 200-period moving average.
pub fn momentum(closes: &[f64]) -> FactorOutcome {
    let mut grades = Vec::new();
    let mut details = Map::new();

    let return_bands: [(f64, f64); 5] = [(0.25, 5.0), (0.12, 4.0), (0.04, 3.0), (-0.04, 2.0), (-0.15, 1.0)];
    for (label, lookback) in [("return_3m", 63), ("return_6m", 126), ("return_12m", 252)] {
        if let Some(ret) = trailing_return(closes, lookback) {
            details.insert(label.to_string(), json!(ret));
            grades.push(band_desc(ret, &return_bands, 0.0));
        }
    }

    if let Ok(values) = rsi(closes, 14) {
        if let Some(value) = values.last() {
            details.insert("rsi_14".to_string(), json!(value));
            // Healthy uptrends sit in the 50-70 band; deeply overbought and
            // oversold both score poorly for trend continuation.
            grades.push(if (50.0..70.0).contains(value) {
                5.0
            } else if (40.0..50.0).contains(value) || (70.0..80.0).contains(value) {
                3.0
            } else {
                1.0
            });
        }
    }

    let ma = sma(closes, 200);
    if let (Some(ma_last), Some(last)) = (ma.last(), closes.last()) {
        let above = last > ma_last;
        details.insert("above_200d_ma".to_string(), json!(above));
        grades.push(if above { 5.0 } else { 0.0 });
    }

    FactorOutcome {
        grade: mean(&grades),
        raw_value: details.get("return_6m").and_then(|v| v.as_f64()),
        details: Value::Object(details),
    }
}

/// Catalyst proxy from the earnings print pattern: how often the last four
/// year-over-year EPS comparisons improved. Analyst upgrade/downgrade
/// counts are not served by the data layer and are reported as unavailable.
pub fn revisions(quarters: &[FundamentalSnapshot]) -> FactorOutcome {
    let mut details = Map::new();
    details.insert("analyst_ratings".to_string(), json!("unavailable"));

    if quarters.len() < 8 {
        return FactorOutcome {
            grade: None,
            raw_value: None,
            details: Value::Object(details),
        };
    }

    let mut improvements = 0u32;
    let mut comparisons = 0u32;
    for i in 0..4 {
        let (recent, year_ago) = (&quarters[i], &quarters[i + 4]);
        if let (Some(now), Some(then)) = (recent.eps, year_ago.eps) {
            comparisons += 1;
            if now > then {
                improvements += 1;
            }
        }
    }
    if comparisons == 0 {
        return FactorOutcome {
            grade: None,
            raw_value: None,
            details: Value::Object(details),
        };
    }

    details.insert("eps_improvement_prints".to_string(), json!(improvements));
    details.insert("eps_comparisons".to_string(), json!(comparisons));
    let ratio = f64::from(improvements) / f64::from(comparisons);
    FactorOutcome {
        grade: Some(ratio * 5.0),
        raw_value: Some(ratio),
        details: Value::Object(details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snapshot(q: usize, eps: f64, revenue: f64) -> FundamentalSnapshot {
        let period = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
            - chrono::Duration::days(91 * q as i64);
        FundamentalSnapshot {
            ticker: "T".to_string(),
            period_ending: period,
            reported_at: Some(period + chrono::Duration::days(45)),
            fiscal_period: "Q".to_string(),
            fiscal_year: 2024,
            revenue: Some(revenue),
            gross_profit: Some(revenue * 0.4),
            operating_income: Some(revenue * 0.2),
            net_income: Some(revenue * 0.15),
            eps: Some(eps),
            total_assets: Some(revenue * 4.0),
            total_liabilities: Some(revenue * 2.0),
            shareholders_equity: Some(revenue * 2.0),
            cash_flow_operating: Some(revenue * 0.18),
            cash_flow_investing: Some(-revenue * 0.05),
            cash_flow_financing: Some(-revenue * 0.03),
            shares_outstanding: Some(1.0e9),
        }
    }

    fn eight_quarters(growth: f64) -> Vec<FundamentalSnapshot> {
        (0..8)
            .map(|q| {
                let factor = (1.0 + growth).powi(-(q as i32) / 4);
                snapshot(q, 2.0 * factor, 1.0e10 * factor)
            })
            .collect()
    }

    #[test]
    fn all_grades_stay_in_bounds() {
        let quarters = eight_quarters(0.2);
        let closes: Vec<f64> = (0..300).map(|i| 100.0 * 1.001_f64.powi(i)).collect();
        for outcome in [
            valuation(120.0, &quarters),
            growth(&quarters),
            profitability(&quarters),
            momentum(&closes),
            revisions(&quarters),
        ] {
            if let Some(grade) = outcome.grade {
                assert!((0.0..=5.0).contains(&grade), "grade {grade}");
            }
        }
    }

    #[test]
    fn growing_company_outgrades_shrinking_one() {
        let grower = growth(&eight_quarters(0.4)).grade.unwrap();
        let shrinker = growth(&eight_quarters(-0.3)).grade.unwrap();
        assert!(grower > shrinker);
    }

    #[test]
    fn negative_eps_drops_pe_not_the_group() {
        let mut quarters = eight_quarters(0.1);
        for q in &mut quarters {
            q.eps = Some(-1.0);
        }
        let outcome = valuation(100.0, &quarters);
        assert!(outcome.details.get("pe_ratio").is_none());
        // P/B and P/S still grade the group.
        assert!(outcome.grade.is_some());
    }

    #[test]
    fn empty_fundamentals_give_null_grades() {
        assert!(growth(&[]).grade.is_none());
        assert!(profitability(&[]).grade.is_none());
        assert!(revisions(&[]).grade.is_none());
    }

    #[test]
    fn uptrend_momentum_beats_downtrend() {
        let up: Vec<f64> = (0..300).map(|i| 100.0 * 1.002_f64.powi(i)).collect();
        let down: Vec<f64> = (0..300).map(|i| 100.0 * 0.998_f64.powi(i)).collect();
        let up_grade = momentum(&up).grade.unwrap();
        let down_grade = momentum(&down).grade.unwrap();
        assert!(up_grade > down_grade);
    }
}
