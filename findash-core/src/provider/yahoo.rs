//! Yahoo Finance price provider.
//!
//! Fetches daily bars from Yahoo's v8 chart API, one request per ticker.
//! Yahoo has no official API and is subject to unannounced format changes,
//! so every structural surprise surfaces as a malformed-payload error.

use super::{http_client, ColumnLabel, PriceColumn, PriceProvider, PriceTable};
use crate::domain::DateRange;
use crate::error::ProviderError;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

const PROVIDER: &str = "yahoo_finance";
pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    /// Absent when the window holds no trading days.
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build the chart API URL for a symbol and date range.
    fn chart_url(&self, symbol: &str, range: DateRange) -> String {
        format!(
            "{}/v8/finance/chart/{symbol}?period1={}&period2={}&interval=1d&includeAdjustedClose=true",
            self.base_url,
            day_start_ts(range.start),
            day_end_ts(range.end),
        )
    }

    fn fetch_single(&self, symbol: &str, range: DateRange) -> Result<PriceTable, ProviderError> {
        let url = self.chart_url(symbol, range);
        debug!(%url, "requesting chart");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ProviderError::Transport {
                provider: PROVIDER,
                context: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                context: symbol.to_string(),
            });
        }

        let chart: ChartResponse = resp.json().map_err(|e| ProviderError::MalformedPayload {
            provider: PROVIDER,
            context: symbol.to_string(),
            reason: format!("failed to parse response: {e}"),
        })?;

        parse_response(symbol, chart)
    }
}

fn day_start_ts(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp())
}

fn day_end_ts(date: NaiveDate) -> i64 {
    date.and_hms_opt(23, 59, 59)
        .map_or(0, |dt| dt.and_utc().timestamp())
}

/// Parse the chart API response into a table with flat labels.
fn parse_response(symbol: &str, resp: ChartResponse) -> Result<PriceTable, ProviderError> {
    let malformed = |reason: String| ProviderError::MalformedPayload {
        provider: PROVIDER,
        context: symbol.to_string(),
        reason,
    };

    let result = match (resp.chart.result, resp.chart.error) {
        (Some(result), _) => result,
        (None, Some(err)) => return Err(malformed(format!("{}: {}", err.code, err.description))),
        (None, None) => return Err(malformed("empty result with no error".into())),
    };

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| malformed("result array is empty".into()))?;

    let timestamps = data.timestamp;

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| malformed("no quote data".into()))?;

    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose)
        .unwrap_or_default();

    // Dates are taken in the exchange's local calendar.
    let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

    fn at(series: &[Option<f64>], i: usize) -> Option<f64> {
        series.get(i).copied().flatten()
    }

    let mut index = Vec::with_capacity(timestamps.len());
    let mut fields: [Vec<Option<f64>>; 6] = Default::default();

    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts + offset, 0)
            .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
            .ok_or_else(|| malformed(format!("invalid timestamp: {ts}")))?;

        let row = [
            at(&quote.open, i),
            at(&quote.high, i),
            at(&quote.low, i),
            at(&quote.close, i),
            at(&adj_closes, i),
            at(&quote.volume, i),
        ];

        // Skip rows where every field is missing (holidays/non-trading days)
        if row.iter().all(Option::is_none) {
            continue;
        }

        index.push(date);
        for (column, value) in fields.iter_mut().zip(row) {
            column.push(value);
        }
    }

    let columns = ["Open", "High", "Low", "Close", "Adj Close", "Volume"]
        .into_iter()
        .zip(fields)
        .map(|(name, values)| PriceColumn {
            label: ColumnLabel::Flat(name.to_string()),
            values,
        })
        .collect();

    Ok(PriceTable { index, columns })
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn fetch_prices(
        &self,
        tickers: &[&str],
        range: DateRange,
    ) -> Result<PriceTable, ProviderError> {
        match tickers {
            [single] => self.fetch_single(single, range),
            _ => {
                let mut per_ticker = Vec::with_capacity(tickers.len());
                for ticker in tickers {
                    per_ticker.push((ticker.to_string(), self.fetch_single(ticker, range)?));
                }
                Ok(PriceTable::combine(per_ticker))
            }
        }
    }
}
