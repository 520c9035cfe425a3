//! Upstream data providers.
//!
//! The provider traits abstract over transport so fetchers can be driven by
//! fakes in tests. Providers validate payload shape; fetchers own row
//! selection and tagging.

pub mod worldbank;
pub mod yahoo;

use crate::domain::DateRange;
use crate::error::ProviderError;
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub use worldbank::WorldBankProvider;
pub use yahoo::YahooProvider;

/// One yearly observation; `value` is `None` when the provider has no figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub year: i32,
    pub value: Option<f64>,
}

/// Statistics API returning yearly observations per (country, indicator).
pub trait IndicatorProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_indicator(
        &self,
        country: &str,
        indicator: &str,
    ) -> Result<Vec<Observation>, ProviderError>;
}

/// Price-series API returning a date-indexed table of OHLC-style columns.
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// The shape of the returned labels depends on how many tickers are
    /// requested: one ticker gives [`ColumnLabel::Flat`] labels, several give
    /// [`ColumnLabel::Compound`] `[field, ticker]` labels.
    fn fetch_prices(
        &self,
        tickers: &[&str],
        range: DateRange,
    ) -> Result<PriceTable, ProviderError>;
}

/// Column label of a [`PriceTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnLabel {
    Flat(String),
    Compound(Vec<String>),
}

impl ColumnLabel {
    /// Join the non-empty parts of a compound label with `_`.
    pub fn flatten(&self) -> String {
        match self {
            Self::Flat(name) => name.clone(),
            Self::Compound(parts) => parts
                .iter()
                .filter(|p| !p.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceColumn {
    pub label: ColumnLabel,
    pub values: Vec<Option<f64>>,
}

/// Date-indexed price table as returned by a [`PriceProvider`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceTable {
    pub index: Vec<NaiveDateTime>,
    pub columns: Vec<PriceColumn>,
}

impl PriceTable {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Replace every label by its flat form.
    pub fn flattened(mut self) -> Self {
        for column in &mut self.columns {
            column.label = ColumnLabel::Flat(column.label.flatten());
        }
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.label.flatten()).collect()
    }

    /// Values of the column whose flattened label equals `name`.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.label.flatten() == name)
            .map(|c| c.values.as_slice())
    }

    /// Stitch single-ticker tables into one table with compound labels.
    ///
    /// The index is the sorted union of all dates; a ticker without a row on
    /// some date gets `None` there.
    pub fn combine(per_ticker: Vec<(String, PriceTable)>) -> Self {
        let index: Vec<NaiveDateTime> = per_ticker
            .iter()
            .flat_map(|(_, t)| t.index.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = Vec::new();
        for (ticker, table) in per_ticker {
            let position: HashMap<NaiveDateTime, usize> = table
                .index
                .iter()
                .enumerate()
                .map(|(i, d)| (*d, i))
                .collect();

            for column in table.columns {
                let values = index
                    .iter()
                    .map(|d| {
                        position
                            .get(d)
                            .and_then(|&i| column.values.get(i).copied().flatten())
                    })
                    .collect();
                columns.push(PriceColumn {
                    label: ColumnLabel::Compound(vec![column.label.flatten(), ticker.clone()]),
                    values,
                });
            }
        }

        Self { index, columns }
    }
}

/// Blocking HTTP client shared by the providers.
pub(crate) fn http_client(user_agent: &str) -> Result<reqwest::blocking::Client, ProviderError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(user_agent)
        .build()
        .map_err(|e| ProviderError::Transport {
            provider: "http",
            context: "client construction".into(),
            reason: e.to_string(),
        })
}
