//! Country, indicator and index-symbol tables handed to the fetchers.
//!
//! Tables are ordered: fetch output follows table order, so they are kept as
//! vectors rather than maps. The defaults reproduce the production tables; a
//! TOML file can replace any of them.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A provider code with its human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labeled {
    pub code: String,
    pub label: String,
}

impl Labeled {
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
        }
    }
}

/// A country's benchmark index ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSymbol {
    pub country: String,
    pub ticker: String,
}

impl IndexSymbol {
    pub fn new(country: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            ticker: ticker.into(),
        }
    }
}

/// Immutable lookup tables for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceTables {
    /// ISO2 country codes with display names.
    pub countries: Vec<Labeled>,
    /// World Bank indicator codes with short column-style labels.
    pub indicators: Vec<Labeled>,
    /// Country code → index ticker.
    pub index_symbols: Vec<IndexSymbol>,
}

impl Default for SourceTables {
    fn default() -> Self {
        Self {
            countries: default_countries(),
            indicators: default_indicators(),
            index_symbols: default_index_symbols(),
        }
    }
}

impl SourceTables {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PipelineError::Config(format!("source tables: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml(&content)
    }
}

fn default_indicators() -> Vec<Labeled> {
    vec![
        Labeled::new("NY.GDP.MKTP.CD", "gdp_usd"),
        Labeled::new("FP.CPI.TOTL.ZG", "cpi_percent"),
        Labeled::new("SL.UEM.TOTL.ZS", "unemployment_pct"),
        Labeled::new("FR.INR.RINR", "interest_rate"),
    ]
}

fn default_countries() -> Vec<Labeled> {
    vec![
        Labeled::new("US", "United States"),
        Labeled::new("DE", "Germany"),
        Labeled::new("PL", "Poland"),
        Labeled::new("JP", "Japan"),
        Labeled::new("FR", "France"),
        Labeled::new("GB", "United Kingdom"),
        Labeled::new("IT", "Italy"),
        Labeled::new("CN", "China"),
        Labeled::new("IN", "India"),
        Labeled::new("BR", "Brazil"),
        Labeled::new("CA", "Canada"),
        Labeled::new("AU", "Australia"),
    ]
}

fn default_index_symbols() -> Vec<IndexSymbol> {
    vec![
        IndexSymbol::new("US", "^GSPC"),
        IndexSymbol::new("DE", "^GDAXI"),
        IndexSymbol::new("JP", "^N225"),
        IndexSymbol::new("PL", "^WIG20"),
        IndexSymbol::new("FR", "^FCHI"),
        IndexSymbol::new("GB", "^FTSE"),
        IndexSymbol::new("IT", "FTSEMIB.MI"),
        IndexSymbol::new("CN", "000001.SS"),
        IndexSymbol::new("IN", "^BSESN"),
        IndexSymbol::new("BR", "^BVSP"),
        IndexSymbol::new("CA", "^GSPTSE"),
        IndexSymbol::new("AU", "^AXJO"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_twelve_countries() {
        let tables = SourceTables::default();
        assert_eq!(tables.countries.len(), 12);
        assert_eq!(tables.index_symbols.len(), 12);
        assert_eq!(tables.indicators.len(), 4);
        assert_eq!(tables.countries[0].code, "US");
    }

    #[test]
    fn toml_replaces_only_given_tables() {
        let tables = SourceTables::from_toml(
            r#"
            [[countries]]
            code = "US"
            label = "United States"
            "#,
        )
        .unwrap();

        assert_eq!(tables.countries.len(), 1);
        assert_eq!(tables.indicators, default_indicators());
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = SourceTables::from_toml("countries = 3").unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
