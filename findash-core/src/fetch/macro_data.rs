//! Macro indicator fetcher.
//!
//! Issues one provider request per (country, indicator) pair, countries in
//! the outer loop. Observations without a value are dropped: a null means
//! "no figure that year", not an error.

use crate::domain::IndicatorRecord;
use crate::error::{Result, SchemaError};
use crate::provider::IndicatorProvider;
use crate::sources::SourceTables;
use polars::prelude::*;
use tracing::info;

pub struct MacroFetcher<'a> {
    provider: &'a dyn IndicatorProvider,
    tables: &'a SourceTables,
}

impl<'a> MacroFetcher<'a> {
    pub fn new(provider: &'a dyn IndicatorProvider, tables: &'a SourceTables) -> Self {
        Self { provider, tables }
    }

    /// Fetch one pair and tag its rows with the country and indicator codes.
    pub fn fetch_pair(&self, country: &str, indicator: &str) -> Result<Vec<IndicatorRecord>> {
        let observations = self.provider.fetch_indicator(country, indicator)?;

        Ok(observations
            .into_iter()
            .filter_map(|obs| {
                obs.value.map(|value| IndicatorRecord {
                    country_code: country.to_string(),
                    indicator_code: indicator.to_string(),
                    year: obs.year,
                    value,
                })
            })
            .collect())
    }

    /// Fetch every pair and concatenate in table order. The first failing
    /// pair aborts the whole fetch.
    pub fn fetch_all(&self) -> Result<Vec<IndicatorRecord>> {
        let mut records = Vec::new();

        for country in &self.tables.countries {
            for indicator in &self.tables.indicators {
                info!(
                    provider = self.provider.name(),
                    "Fetching {} for {}...",
                    indicator.label,
                    country.label
                );
                records.extend(self.fetch_pair(&country.code, &indicator.code)?);
            }
        }

        Ok(records)
    }
}

/// Snapshot layout of the macro dataset: `year, value, country, indicator`.
pub fn indicator_frame(records: &[IndicatorRecord]) -> Result<DataFrame, SchemaError> {
    let years: Vec<i64> = records.iter().map(|r| i64::from(r.year)).collect();
    let values: Vec<f64> = records.iter().map(|r| r.value).collect();
    let countries: Vec<&str> = records.iter().map(|r| r.country_code.as_str()).collect();
    let indicators: Vec<&str> = records.iter().map(|r| r.indicator_code.as_str()).collect();

    Ok(DataFrame::new(vec![
        Column::new("year".into(), years),
        Column::new("value".into(), values),
        Column::new("country".into(), countries),
        Column::new("indicator".into(), indicators),
    ])?)
}
