//! Rate entries, snapshots and the rate source abstraction

use super::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

/// Units of base currency per one unit of `code`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateEntry {
    pub code: String,
    pub value: f64,
}

/// All rates produced by one parse cycle.
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    rates: HashMap<String, f64>,
    pub date: Option<String>,
}

impl RateSnapshot {
    /// Creates a snapshot that already holds the base currency at 1.0.
    pub fn new(base_currency: &str) -> Self {
        let mut rates = HashMap::new();
        rates.insert(base_currency.to_string(), 1.0);
        Self { rates, date: None }
    }

    /// Inserts a rate. A repeated code replaces the earlier value.
    pub fn insert(&mut self, code: impl Into<String>, value: f64) {
        self.rates.insert(code.into(), value);
    }

    pub fn get(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.rates.iter().map(|(code, value)| (code.as_str(), *value))
    }

    /// Entries sorted by currency code.
    pub fn entries(&self) -> Vec<RateEntry> {
        let mut entries: Vec<RateEntry> = self
            .iter()
            .map(|(code, value)| RateEntry {
                code: code.to_string(),
                value,
            })
            .collect();
        entries.sort_by(|a, b| a.code.cmp(&b.code));
        entries
    }
}

/// Remote document holding the daily rates.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}
