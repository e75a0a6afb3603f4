//! Currency conversion over the shared rate store

use super::error::{RateError, Result};
use super::rate::RateEntry;
use super::store::RateStore;
use futures::future::try_join_all;
use std::fmt::Display;
use std::sync::Arc;
use tracing::debug;

/// Result of one conversion. Rounded to 2 decimals only when displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub result: f64,
}

impl Display for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} = {:.2} {}",
            self.amount, self.from, self.result, self.to
        )
    }
}

/// Trims and upper-cases a user supplied currency code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Parses user supplied amount text. Accepts a comma decimal separator.
pub fn parse_amount(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    match trimmed.replace(',', ".").parse::<f64>() {
        Ok(amount) if amount.is_finite() => Ok(amount),
        _ => Err(RateError::InvalidAmount(trimmed.to_string())),
    }
}

#[derive(Clone)]
pub struct RateService {
    store: Arc<dyn RateStore>,
}

impl RateService {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self { store }
    }

    /// Converts `amount` of `from` into `to` as `amount * rate(from) / rate(to)`.
    pub async fn convert(&self, from: &str, to: &str, amount: f64) -> Result<Conversion> {
        if !amount.is_finite() {
            return Err(RateError::InvalidAmount(amount.to_string()));
        }
        let from = normalize_code(from);
        let to = normalize_code(to);

        let (from_rate, to_rate) =
            futures::try_join!(self.store.get(&from), self.store.get(&to))?;

        let (from_rate, to_rate) = match (from_rate, to_rate) {
            (Some(from_rate), Some(to_rate)) => (from_rate, to_rate),
            (from_rate, to_rate) => {
                let mut missing = Vec::new();
                if from_rate.is_none() {
                    missing.push(from.clone());
                }
                if to_rate.is_none() && to != from {
                    missing.push(to.clone());
                }
                return Err(RateError::UnknownCurrency(missing));
            }
        };
        if to_rate <= 0.0 {
            return Err(RateError::StoreUnavailable(format!(
                "Stored rate for {to} is not positive: {to_rate}"
            )));
        }

        let result = amount * from_rate / to_rate;
        debug!(%from, %to, amount, result, "Converted");
        Ok(Conversion {
            from,
            to,
            amount,
            result,
        })
    }

    /// Same as [`RateService::convert`] with the amount given as text.
    pub async fn convert_text(&self, from: &str, to: &str, amount: &str) -> Result<Conversion> {
        let amount = parse_amount(amount)?;
        self.convert(from, to, amount).await
    }

    /// All stored rates sorted by code, or `None` when the store holds no data.
    pub async fn list_rates(&self) -> Result<Option<Vec<RateEntry>>> {
        let codes = self.currencies().await?;
        if codes.is_empty() {
            return Ok(None);
        }

        let values = try_join_all(codes.iter().map(|code| self.store.get(code))).await?;
        // A key may disappear between listing and reading it.
        let entries: Vec<RateEntry> = codes
            .into_iter()
            .zip(values)
            .filter_map(|(code, value)| value.map(|value| RateEntry { code, value }))
            .collect();

        if entries.is_empty() {
            Ok(None)
        } else {
            Ok(Some(entries))
        }
    }

    /// Known currency codes, sorted.
    pub async fn currencies(&self) -> Result<Vec<String>> {
        let mut codes = self.store.list_keys().await?;
        codes.sort();
        Ok(codes)
    }
}
