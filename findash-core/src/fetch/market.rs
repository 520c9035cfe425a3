//! Market index fetcher.
//!
//! One provider request per (country, ticker). The provider may label its
//! columns flat (`Close`) or compound (`Close` × `^GSPC`); labels are
//! flattened first, then the close column is located by a typed lookup.

use crate::domain::{DateRange, IndexPricePoint};
use crate::error::{Result, SchemaError};
use crate::provider::PriceProvider;
use crate::sources::IndexSymbol;
use polars::prelude::*;
use tracing::{debug, info};

/// Accepted spellings of the closing-price column after flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseColumn {
    /// `Close`, as returned for a single-ticker request.
    Plain,
    /// `Close_<ticker>`, a flattened compound label.
    TickerSuffixed,
}

impl CloseColumn {
    pub const FIELD: &'static str = "Close";

    pub fn column_name(self, ticker: &str) -> String {
        match self {
            Self::Plain => Self::FIELD.to_string(),
            Self::TickerSuffixed => format!("{}_{ticker}", Self::FIELD),
        }
    }

    /// Find which accepted variant is present among `columns`.
    pub fn locate(columns: &[String], ticker: &str) -> Result<Self, SchemaError> {
        [Self::Plain, Self::TickerSuffixed]
            .into_iter()
            .find(|variant| columns.iter().any(|c| *c == variant.column_name(ticker)))
            .ok_or_else(|| SchemaError::MissingColumn {
                column: Self::FIELD.to_string(),
                context: ticker.to_string(),
            })
    }
}

pub struct MarketFetcher<'a> {
    provider: &'a dyn PriceProvider,
    symbols: &'a [IndexSymbol],
    range: DateRange,
}

impl<'a> MarketFetcher<'a> {
    pub fn new(provider: &'a dyn PriceProvider, symbols: &'a [IndexSymbol], range: DateRange) -> Self {
        Self {
            provider,
            symbols,
            range,
        }
    }

    /// Fetch one country's closing series.
    pub fn fetch_pair(&self, country: &str, ticker: &str) -> Result<Vec<IndexPricePoint>> {
        info!(
            provider = self.provider.name(),
            "Fetching index data for {country} ({ticker})..."
        );

        let table = self.provider.fetch_prices(&[ticker], self.range)?.flattened();
        let variant = CloseColumn::locate(&table.column_names(), ticker)?;
        let name = variant.column_name(ticker);
        let closes = table.column(&name).ok_or_else(|| SchemaError::MissingColumn {
            column: name.clone(),
            context: ticker.to_string(),
        })?;

        let points: Vec<IndexPricePoint> = table
            .index
            .iter()
            .zip(closes)
            .filter_map(|(date, close)| {
                close.map(|close_price| IndexPricePoint {
                    date: *date,
                    country_code: country.to_string(),
                    close_price,
                })
            })
            .collect();

        debug!(
            ticker,
            rows = points.len(),
            skipped = table.len() - points.len(),
            "close series extracted"
        );
        Ok(points)
    }

    /// Fetch every symbol and concatenate in table order.
    pub fn fetch_all(&self) -> Result<Vec<IndexPricePoint>> {
        let mut points = Vec::new();
        for symbol in self.symbols {
            points.extend(self.fetch_pair(&symbol.country, &symbol.ticker)?);
        }
        Ok(points)
    }
}

/// Snapshot layout of the market dataset: `Date, Close, country`.
///
/// `Date` is a nanosecond datetime here; the snapshot writer turns it into
/// integer microseconds.
pub fn price_frame(points: &[IndexPricePoint]) -> Result<DataFrame, SchemaError> {
    let dates = points
        .iter()
        .map(|p| {
            p.date
                .and_utc()
                .timestamp_nanos_opt()
                .ok_or_else(|| SchemaError::Frame(format!("date out of range: {}", p.date)))
        })
        .collect::<Result<Vec<i64>, SchemaError>>()?;
    let closes: Vec<f64> = points.iter().map(|p| p.close_price).collect();
    let countries: Vec<&str> = points.iter().map(|p| p.country_code.as_str()).collect();

    Ok(DataFrame::new(vec![
        Column::new("Date".into(), dates)
            .cast(&DataType::Datetime(TimeUnit::Nanoseconds, None))?,
        Column::new(CloseColumn::FIELD.into(), closes),
        Column::new("country".into(), countries),
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, ProviderError};
    use crate::provider::{ColumnLabel, PriceColumn, PriceTable};
    use chrono::{NaiveDate, NaiveDateTime};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn range() -> DateRange {
        DateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }
    }

    /// How the fake labels its columns.
    enum Shape {
        Flat,
        /// Compound labels for the requested ticker plus extra tickers.
        Compound(Vec<&'static str>),
        NoClose,
    }

    struct FakePrices {
        shape: Shape,
    }

    impl PriceProvider for FakePrices {
        fn name(&self) -> &str {
            "fake"
        }

        fn fetch_prices(
            &self,
            tickers: &[&str],
            _range: DateRange,
        ) -> std::result::Result<PriceTable, ProviderError> {
            let index = vec![day(2), day(3), day(4)];
            let series = |base: f64| vec![Some(base), None, Some(base + 2.0)];

            let columns = match &self.shape {
                Shape::Flat => ["Open", "Close", "Adj Close"]
                    .iter()
                    .map(|f| PriceColumn {
                        label: ColumnLabel::Flat(f.to_string()),
                        values: series(100.0),
                    })
                    .collect(),
                Shape::Compound(extra) => tickers
                    .iter()
                    .copied()
                    .chain(extra.iter().copied())
                    .enumerate()
                    .flat_map(|(i, t)| {
                        ["Open", "Close"].map(|f| PriceColumn {
                            label: ColumnLabel::Compound(vec![f.to_string(), t.to_string()]),
                            values: series(100.0 * (i + 1) as f64),
                        })
                    })
                    .collect(),
                Shape::NoClose => vec![PriceColumn {
                    label: ColumnLabel::Flat("Open".into()),
                    values: series(1.0),
                }],
            };

            Ok(PriceTable { index, columns })
        }
    }

    #[test]
    fn locate_prefers_plain_close() {
        let cols = vec!["Adj Close".to_string(), "Close".to_string()];
        assert_eq!(CloseColumn::locate(&cols, "^GSPC").unwrap(), CloseColumn::Plain);

        let cols = vec!["Close_^GSPC".to_string()];
        assert_eq!(
            CloseColumn::locate(&cols, "^GSPC").unwrap(),
            CloseColumn::TickerSuffixed
        );
    }

    #[test]
    fn locate_rejects_other_tickers_and_adjusted_close() {
        let cols = vec!["Adj Close".to_string(), "Close_^FTSE".to_string()];
        let err = CloseColumn::locate(&cols, "^GSPC").unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingColumn {
                column: "Close".into(),
                context: "^GSPC".into()
            }
        );
    }

    #[test]
    fn flat_response_yields_close_series_without_gaps() {
        let provider = FakePrices { shape: Shape::Flat };
        let symbols = vec![IndexSymbol::new("US", "^GSPC")];

        let points = MarketFetcher::new(&provider, &symbols, range())
            .fetch_all()
            .unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].close_price, 100.0);
        assert_eq!(points[1].date, day(4));
        assert!(points.iter().all(|p| p.country_code == "US"));
    }

    #[test]
    fn compound_response_picks_the_requested_ticker() {
        let provider = FakePrices {
            shape: Shape::Compound(vec!["^FTSE"]),
        };
        let symbols = vec![IndexSymbol::new("US", "^GSPC")];

        let points = MarketFetcher::new(&provider, &symbols, range())
            .fetch_all()
            .unwrap();

        // ^GSPC is the first ticker in the fake, so its closes start at 100
        assert_eq!(points[0].close_price, 100.0);
    }

    #[test]
    fn output_is_three_columns_whatever_the_label_shape() {
        let symbols = vec![IndexSymbol::new("US", "^GSPC"), IndexSymbol::new("GB", "^FTSE")];

        for shape in [
            Shape::Flat,
            Shape::Compound(vec![]),
            Shape::Compound(vec!["^N225", "^GDAXI"]),
        ] {
            let provider = FakePrices { shape };
            let points = MarketFetcher::new(&provider, &symbols, range())
                .fetch_all()
                .unwrap();
            let df = price_frame(&points).unwrap();

            let names: Vec<String> =
                df.get_column_names().iter().map(|n| n.to_string()).collect();
            assert_eq!(names, vec!["Date", "Close", "country"]);
            assert_eq!(df.height(), 4);
        }
    }

    #[test]
    fn missing_close_is_schema_error() {
        let provider = FakePrices {
            shape: Shape::NoClose,
        };
        let symbols = vec![IndexSymbol::new("US", "^GSPC")];

        let err = MarketFetcher::new(&provider, &symbols, range())
            .fetch_all()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::MissingColumn { .. })
        ));
    }

    #[test]
    fn countries_are_concatenated_in_table_order() {
        let provider = FakePrices { shape: Shape::Flat };
        let symbols = vec![IndexSymbol::new("JP", "^N225"), IndexSymbol::new("US", "^GSPC")];

        let points = MarketFetcher::new(&provider, &symbols, range())
            .fetch_all()
            .unwrap();

        let countries: Vec<&str> = points.iter().map(|p| p.country_code.as_str()).collect();
        assert_eq!(countries, vec!["JP", "JP", "US", "US"]);
    }

    #[test]
    fn frame_date_is_nanosecond_datetime() {
        let points = vec![IndexPricePoint {
            date: day(2),
            country_code: "US".into(),
            close_price: 4742.83,
        }];
        let df = price_frame(&points).unwrap();
        assert_eq!(
            df.column("Date").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Nanoseconds, None)
        );
    }
}
