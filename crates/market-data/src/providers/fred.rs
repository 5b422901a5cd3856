use async_trait::async_trait;
use chrono::NaiveDate;
use engine_core::{EngineError, EngineResult, MacroSeries, SeriesPoint};
use reqwest::Client;

use super::MarketDataProvider;

/// FRED CSV download endpoint for macro series (rates, CPI, unemployment).
/// No API key required.
pub struct FredProvider {
    client: Client,
}

impl FredProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for FredProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for FredProvider {
    fn name(&self) -> &'static str {
        "fred"
    }

    async fn macro_series(
        &self,
        series_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<MacroSeries> {
        let url = "https://fred.stlouisfed.org/graph/fredgraph.csv";
        let response = self
            .client
            .get(url)
            .query(&[("id", series_id)])
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("fred: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Upstream(format!(
                "fred HTTP {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Upstream(format!("fred body: {e}")))?;

        let mut points = Vec::new();
        for line in body.lines().skip(1) {
            let (date_str, value_str) = match line.split_once(',') {
                Some(pair) => pair,
                None => continue,
            };
            let date = match NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) => continue,
            };
            if date < from || date > to {
                continue;
            }
            // FRED marks missing observations with a dot.
            let value = value_str.trim().parse::<f64>().ok();
            points.push(SeriesPoint { date, value });
        }

        if points.is_empty() {
            return Err(EngineError::NotFound(format!(
                "fred series {series_id} empty in range"
            )));
        }
        Ok(MacroSeries {
            series_id: series_id.to_string(),
            points,
        })
    }
}
