//! Fetchers: drive a provider over a source table and normalize the result
//! into typed records and a snapshot-ready DataFrame.

pub mod macro_data;
pub mod market;

pub use macro_data::{indicator_frame, MacroFetcher};
pub use market::{price_frame, CloseColumn, MarketFetcher};
