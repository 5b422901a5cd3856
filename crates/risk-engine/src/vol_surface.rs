use engine_core::{EngineError, EngineResult, OptionsChain};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Implied-volatility surface point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub strike: f64,
    pub implied_volatility: f64,
    pub is_call: bool,
    pub open_interest: Option<f64>,
}

/// One expiry's smile plus its at-the-money volatility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceSlice {
    pub expiry: String,
    pub points: Vec<SurfacePoint>,
    pub atm_volatility: Option<f64>,
}

/// Implied-volatility surface for one underlying, sliced by expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolSurface {
    pub underlying: String,
    pub spot: f64,
    pub slices: Vec<SurfaceSlice>,
    /// ATM vol of the nearest expiry minus the furthest; positive means an
    /// inverted (near over far) term structure.
    pub term_structure_slope: Option<f64>,
}

/// Build the surface from a provider options chain. Contracts without an
/// implied volatility are skipped; an entirely bare chain is degenerate.
pub fn build_surface(chain: &OptionsChain, spot: f64) -> EngineResult<VolSurface> {
    if spot <= 0.0 {
        return Err(EngineError::InvalidArgument(format!(
            "spot must be positive, got {spot}"
        )));
    }

    let mut by_expiry: BTreeMap<String, Vec<SurfacePoint>> = BTreeMap::new();
    for contract in &chain.contracts {
        let iv = match contract.implied_volatility {
            Some(iv) if iv.is_finite() && iv > 0.0 => iv,
            _ => continue,
        };
        by_expiry
            .entry(contract.expiry.to_string())
            .or_default()
            .push(SurfacePoint {
                strike: contract.strike,
                implied_volatility: iv,
                is_call: contract.is_call,
                open_interest: contract.open_interest,
            });
    }

    if by_expiry.is_empty() {
        return Err(EngineError::Degenerate(format!(
            "options chain for {} carries no usable implied volatilities",
            chain.underlying
        )));
    }

    let mut slices = Vec::with_capacity(by_expiry.len());
    for (expiry, mut points) in by_expiry {
        points.sort_by(|a, b| {
            a.strike
                .partial_cmp(&b.strike)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let atm = points
            .iter()
            .min_by(|a, b| {
                (a.strike - spot)
                    .abs()
                    .partial_cmp(&(b.strike - spot).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| p.implied_volatility);
        slices.push(SurfaceSlice {
            expiry,
            points,
            atm_volatility: atm,
        });
    }

    let term_structure_slope = match (slices.first(), slices.last()) {
        (Some(near), Some(far)) if slices.len() > 1 => {
            match (near.atm_volatility, far.atm_volatility) {
                (Some(n), Some(f)) => Some(n - f),
                _ => None,
            }
        }
        _ => None,
    };

    Ok(VolSurface {
        underlying: chain.underlying.clone(),
        spot,
        slices,
        term_structure_slope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use engine_core::OptionContract;

    fn contract(expiry: (i32, u32, u32), strike: f64, iv: Option<f64>) -> OptionContract {
        OptionContract {
            contract: format!("T{}C{strike}", expiry.1),
            underlying: "TST".to_string(),
            expiry: NaiveDate::from_ymd_opt(expiry.0, expiry.1, expiry.2).unwrap(),
            strike,
            is_call: true,
            last: Some(1.0),
            implied_volatility: iv,
            open_interest: Some(10.0),
        }
    }

    #[test]
    fn surface_groups_by_expiry_and_finds_atm() {
        let chain = OptionsChain {
            underlying: "TST".to_string(),
            contracts: vec![
                contract((2025, 1, 17), 90.0, Some(0.35)),
                contract((2025, 1, 17), 100.0, Some(0.30)),
                contract((2025, 1, 17), 110.0, Some(0.32)),
                contract((2025, 2, 21), 100.0, Some(0.28)),
            ],
        };
        let surface = build_surface(&chain, 101.0).unwrap();
        assert_eq!(surface.slices.len(), 2);
        assert_eq!(surface.slices[0].atm_volatility, Some(0.30));
        // Near ATM 0.30 vs far 0.28: mildly inverted.
        assert!((surface.term_structure_slope.unwrap() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn bare_chain_is_degenerate() {
        let chain = OptionsChain {
            underlying: "TST".to_string(),
            contracts: vec![contract((2025, 1, 17), 100.0, None)],
        };
        let err = build_surface(&chain, 100.0).unwrap_err();
        assert_eq!(err.kind(), "Degenerate");
    }
}
