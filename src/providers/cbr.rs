use crate::core::error::{RateError, Result};
use crate::core::rate::{RateSnapshot, RateSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Daily rates published by the Central Bank of Russia as XML.
pub struct CbrRateSource {
    url: String,
    client: reqwest::Client,
}

impl CbrRateSource {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("rates-bot/1.0")
            .timeout(timeout)
            .build()?;
        Ok(CbrRateSource {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl RateSource for CbrRateSource {
    #[instrument(name = "CbrFetch", skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<String> {
        debug!("Requesting daily rates");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RateError::Fetch(format!("Request error: {e}")))?;

        if !response.status().is_success() {
            return Err(RateError::Fetch(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| RateError::Fetch(format!("Failed to read response body: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct ValCurs {
    #[serde(rename = "@Date", default)]
    date: Option<String>,
    #[serde(rename = "Valute", default)]
    valutes: Vec<Valute>,
}

#[derive(Debug, Deserialize)]
struct Valute {
    #[serde(rename = "CharCode")]
    char_code: String,
    #[serde(rename = "Nominal")]
    nominal: String,
    #[serde(rename = "Value")]
    value: String,
}

/// Decodes a rates document into a snapshot of base-currency units per one
/// unit of each currency. The base currency is always present at 1.0.
pub fn parse_rates(document: &str, base_currency: &str) -> Result<RateSnapshot> {
    let parsed: ValCurs = quick_xml::de::from_str(document).map_err(|e| {
        let preview: String = document.chars().take(200).collect();
        warn!(error = %e, %preview, "Rates document is not valid");
        RateError::Parse(e.to_string())
    })?;

    let mut snapshot = RateSnapshot::new(base_currency);
    snapshot.date = parsed.date;

    for valute in parsed.valutes {
        let code = parse_code(&valute.char_code)?;
        let value = parse_decimal(&code, &valute.value)?;
        let nominal = parse_nominal(&code, &valute.nominal)?;
        if code.eq_ignore_ascii_case(base_currency) {
            warn!("Ignoring record for base currency {code}, it stays at 1.0");
            continue;
        }
        if snapshot.get(&code).is_some() {
            debug!("Duplicate record for {code}, keeping the last one");
        }
        snapshot.insert(code, value / f64::from(nominal));
    }

    debug!(entries = snapshot.len(), date = ?snapshot.date, "Parsed rates");
    Ok(snapshot)
}

fn parse_code(raw: &str) -> Result<String> {
    let code = raw.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(RateError::Parse(format!("Invalid currency code: {raw:?}")));
    }
    Ok(code.to_ascii_uppercase())
}

// Values use a comma as the decimal separator, e.g. "90,2500".
fn parse_decimal(code: &str, raw: &str) -> Result<f64> {
    let value = raw
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| RateError::Parse(format!("Non-numeric value for {code}: {raw:?}")))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(RateError::Parse(format!(
            "Value for {code} must be positive: {raw:?}"
        )));
    }
    Ok(value)
}

fn parse_nominal(code: &str, raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(nominal) if nominal > 0 => Ok(nominal),
        _ => Err(RateError::Parse(format!(
            "Invalid nominal for {code}: {raw:?}"
        ))),
    }
}
