//! Composite multi-factor rating with point-in-time evaluation. Five factor
//! groups are graded 0-5 and blended under fixed weights; groups whose
//! inputs are unavailable drop out and the weights renormalize over what
//! remains. Historical scores never let current data leak in silently: the
//! `data_completeness` object names which inputs were point-in-time
//! faithful.

pub mod factors;

use chrono::NaiveDate;
use engine_core::{
    CancelToken, CompositeScore, EngineError, EngineResult, FactorScore, Interval, PeriodType,
    Rating, RuntimeContext,
};
use serde_json::json;
use std::collections::BTreeMap;

use factors::FactorOutcome;

/// (group, weight) pairs; weights sum to 1 when every group is available.
const WEIGHTS: [(&str, f64); 5] = [
    ("valuation", 0.15),
    ("growth", 0.20),
    ("profitability", 0.20),
    ("momentum", 0.20),
    ("revisions", 0.25),
];

/// History fetched beyond the scoring window so a past as-of date still has
/// a full year of bars behind it.
const HISTORY_DAYS: i64 = 450;

pub struct RatingEngine;

impl RatingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Score `ticker` as of `as_of` (now when absent). For past dates every
    /// input is filtered to what was visible then; factor groups the data
    /// layer cannot serve point-in-time are excluded and reported, never
    /// proxied silently.
    pub async fn score(
        &self,
        ctx: &RuntimeContext,
        ticker: &str,
        as_of: Option<NaiveDate>,
        cancel: &CancelToken,
    ) -> EngineResult<CompositeScore> {
        let today = ctx.clock.today();
        let as_of_date = as_of.unwrap_or(today);
        if as_of_date > today {
            return Err(EngineError::InvalidArgument(format!(
                "as_of {as_of_date} is in the future"
            )));
        }
        let historical = as_of_date < today;

        // Prices: fetch enough calendar history to cover the as-of window,
        // then truncate to bars visible at the scoring date.
        let span = (today - as_of_date).num_days() + HISTORY_DAYS;
        cancel.check()?;
        let series = ctx
            .fetcher
            .price_history(ticker, Interval::Day, span, cancel)
            .await?;
        let visible = series.up_to(as_of_date);
        let closes = visible.closes();
        let price = *closes.last().ok_or_else(|| {
            EngineError::Degenerate(format!("no price history for {ticker} at {as_of_date}"))
        })?;

        // Fundamentals: point-in-time filtered when the data layer can do
        // it; refused outright for historical scores when it cannot.
        let pit_capable = ctx.fetcher.supports_pit_fundamentals();
        let mut fundamentals_mode = "current";
        let quarters = if historical && !pit_capable {
            fundamentals_mode = "unavailable_no_pit";
            Vec::new()
        } else {
            if historical {
                fundamentals_mode = "pit";
            }
            let filter = historical.then_some(as_of_date);
            cancel.check()?;
            match ctx
                .fetcher
                .fundamentals(ticker, PeriodType::Quarterly, filter, cancel)
                .await
            {
                Ok(snaps) => snaps,
                Err(EngineError::NotFound(msg)) => {
                    tracing::warn!("no fundamentals for {ticker}: {msg}");
                    fundamentals_mode = "unavailable";
                    Vec::new()
                }
                Err(err) => return Err(err),
            }
        };

        let outcomes: Vec<(&str, FactorOutcome)> = vec![
            ("valuation", factors::valuation(price, &quarters)),
            ("growth", factors::growth(&quarters)),
            ("profitability", factors::profitability(&quarters)),
            ("momentum", factors::momentum(&closes)),
            ("revisions", factors::revisions(&quarters)),
        ];

        let mut factor_map: BTreeMap<String, FactorScore> = BTreeMap::new();
        let mut completeness = serde_json::Map::new();
        completeness.insert("fundamentals".to_string(), json!(fundamentals_mode));
        completeness.insert("prices".to_string(), json!("pit"));

        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        for (name, weight) in WEIGHTS {
            let outcome = outcomes
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, o)| o)
                .ok_or_else(|| EngineError::Internal(format!("missing factor {name}")))?;
            match outcome.grade {
                Some(grade) => {
                    weighted += weight * grade;
                    weight_sum += weight;
                    // Momentum runs on as-of-truncated prices; the other
                    // groups inherit the fundamentals mode.
                    let mode = if name == "momentum" { "pit" } else { fundamentals_mode };
                    completeness.insert(name.to_string(), json!(mode));
                    factor_map.insert(
                        name.to_string(),
                        FactorScore {
                            factor: name.to_string(),
                            raw_value: outcome.raw_value,
                            grade,
                            details: outcome.details.clone(),
                        },
                    );
                }
                None => {
                    completeness.insert(name.to_string(), json!("excluded"));
                }
            }
        }

        if weight_sum <= 0.0 {
            return Err(EngineError::Degenerate(format!(
                "no factor group had usable inputs for {ticker} at {as_of_date}"
            )));
        }
        let composite = (weighted / weight_sum).clamp(0.0, 5.0);

        Ok(CompositeScore {
            ticker: ticker.to_uppercase(),
            as_of: as_of_date,
            composite,
            rating: Rating::from_composite(composite),
            factors: factor_map,
            data_completeness: serde_json::Value::Object(completeness),
        })
    }
}

impl Default for RatingEngine {
    fn default() -> Self {
        Self::new()
    }
}
