//! World Bank statistics provider.
//!
//! `GET {base}/v2/country/{country}/indicator/{indicator}?format=json&per_page=1000`
//! answers with a two-element array `[metadata, observations]`. Anything else
//! (including the single-element error envelope the API uses for unknown
//! codes) is rejected as malformed.

use super::{http_client, IndicatorProvider, Observation};
use crate::error::ProviderError;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const PROVIDER: &str = "world_bank";
pub const DEFAULT_BASE_URL: &str = "http://api.worldbank.org";
pub const PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: Option<f64>,
}

pub struct WorldBankProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    per_page: u32,
}

impl WorldBankProvider {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client("findash/0.1")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            per_page: PAGE_SIZE,
        })
    }

    fn indicator_url(&self, country: &str, indicator: &str) -> String {
        format!(
            "{}/v2/country/{country}/indicator/{indicator}?format=json&per_page={}",
            self.base_url, self.per_page
        )
    }
}

/// Validate the `[metadata, observations]` envelope and decode observations.
pub fn parse_response(context: &str, payload: Value) -> Result<Vec<Observation>, ProviderError> {
    let malformed = |reason: String| ProviderError::MalformedPayload {
        provider: PROVIDER,
        context: context.to_string(),
        reason,
    };

    let mut envelope = match payload {
        Value::Array(items) => items,
        other => return Err(malformed(format!("expected array, got {}", type_name(&other)))),
    };

    if envelope.len() < 2 {
        return Err(malformed(format!(
            "expected [metadata, observations], got {} element(s)",
            envelope.len()
        )));
    }

    let observations = match envelope.swap_remove(1) {
        Value::Array(items) => items,
        other => {
            return Err(malformed(format!(
                "observations must be a list, got {}",
                type_name(&other)
            )))
        }
    };

    observations
        .into_iter()
        .map(|item| {
            let raw: RawObservation = serde_json::from_value(item)
                .map_err(|e| malformed(format!("observation: {e}")))?;
            let year = raw
                .date
                .trim()
                .parse::<i32>()
                .map_err(|e| malformed(format!("year '{}': {e}", raw.date)))?;
            Ok(Observation {
                year,
                value: raw.value,
            })
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl IndicatorProvider for WorldBankProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn fetch_indicator(
        &self,
        country: &str,
        indicator: &str,
    ) -> Result<Vec<Observation>, ProviderError> {
        let context = format!("{country}/{indicator}");
        let url = self.indicator_url(country, indicator);
        debug!(%url, "requesting indicator");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ProviderError::Transport {
                provider: PROVIDER,
                context: context.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                context,
            });
        }

        let payload: Value = resp.json().map_err(|e| ProviderError::MalformedPayload {
            provider: PROVIDER,
            context: context.clone(),
            reason: format!("invalid JSON: {e}"),
        })?;

        parse_response(&context, payload)
    }
}
