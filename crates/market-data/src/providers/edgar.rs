use async_trait::async_trait;
use chrono::NaiveDate;
use engine_core::{EngineError, EngineResult, FilingRef};
use reqwest::Client;
use serde::Deserialize;

use super::MarketDataProvider;

/// SEC EDGAR submissions API. Requires a descriptive User-Agent per SEC
/// fair-access policy; no key.
pub struct EdgarProvider {
    client: Client,
}

impl EdgarProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("quantdesk/0.1 (research; contact ops@quantdesk.local)")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    async fn resolve_cik(&self, ticker: &str) -> EngineResult<String> {
        let response = self
            .client
            .get("https://www.sec.gov/files/company_tickers.json")
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("edgar ticker map: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Upstream(format!(
                "edgar ticker map HTTP {}",
                response.status()
            )));
        }
        let map: std::collections::HashMap<String, TickerEntry> = response
            .json()
            .await
            .map_err(|e| EngineError::ParseError(format!("edgar ticker map: {e}")))?;

        let upper = ticker.to_uppercase();
        map.values()
            .find(|entry| entry.ticker == upper)
            .map(|entry| format!("{:010}", entry.cik_str))
            .ok_or_else(|| EngineError::NotFound(format!("no CIK for {ticker}")))
    }
}

impl Default for EdgarProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for EdgarProvider {
    fn name(&self) -> &'static str {
        "edgar"
    }

    async fn filings(
        &self,
        ticker: &str,
        form_types: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<FilingRef>> {
        let cik = self.resolve_cik(ticker).await?;
        let url = format!("https://data.sec.gov/submissions/CIK{cik}.json");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("edgar submissions: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Upstream(format!(
                "edgar submissions HTTP {}",
                response.status()
            )));
        }
        let body: Submissions = response
            .json()
            .await
            .map_err(|e| EngineError::ParseError(format!("edgar submissions: {e}")))?;

        let recent = body.filings.recent;
        let mut out = Vec::new();
        for i in 0..recent.form.len() {
            let form = &recent.form[i];
            if !form_types.is_empty() && !form_types.iter().any(|f| f == form) {
                continue;
            }
            let filed = match recent
                .filing_date
                .get(i)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            {
                Some(d) => d,
                None => continue,
            };
            if filed < from || filed > to {
                continue;
            }
            let accession = recent
                .accession_number
                .get(i)
                .map(|a| a.replace('-', ""))
                .unwrap_or_default();
            out.push(FilingRef {
                ticker: ticker.to_uppercase(),
                form_type: form.clone(),
                filed_at: filed,
                url: format!(
                    "https://www.sec.gov/Archives/edgar/data/{}/{accession}",
                    cik.trim_start_matches('0')
                ),
            });
        }
        Ok(out)
    }
}

#[derive(Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
}

#[derive(Deserialize)]
struct Submissions {
    filings: Filings,
}

#[derive(Deserialize)]
struct Filings {
    recent: RecentFilings,
}

#[derive(Deserialize)]
struct RecentFilings {
    #[serde(default)]
    form: Vec<String>,
    #[serde(rename = "filingDate", default)]
    filing_date: Vec<String>,
    #[serde(rename = "accessionNumber", default)]
    accession_number: Vec<String>,
}
