use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use log::debug;

use crate::errors::FetchError;

/// Upstream source of the current price.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self) -> Result<f64, FetchError>;
}

#[derive(Debug, Deserialize)]
struct PricePayload {
    #[serde(rename = "Data")]
    data: HashMap<String, InstrumentValue>,
}

#[derive(Debug, Deserialize)]
struct InstrumentValue {
    #[serde(rename = "VALUE")]
    value: f64,
}

/// CoinDesk latest-tick fetcher.
///
/// The URL template carries the API key placeholder (`%s` or `{api_key}`);
/// every request is bounded by the client timeout.
pub struct CoinDeskFetcher {
    client: reqwest::Client,
    url: String,
    instrument: String,
}

impl CoinDeskFetcher {
    pub fn new(
        api_key: &str,
        url_template: &str,
        instrument: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            url: Self::render_url(url_template, api_key),
            instrument: instrument.to_string(),
        })
    }

    fn render_url(template: &str, api_key: &str) -> String {
        template.replace("%s", api_key).replace("{api_key}", api_key)
    }
}

#[async_trait]
impl PriceSource for CoinDeskFetcher {
    async fn fetch(&self) -> Result<f64, FetchError> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let body = response.bytes().await?;
        let payload: PricePayload =
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        let price = payload
            .data
            .get(&self.instrument)
            .map(|entry| entry.value)
            .ok_or_else(|| FetchError::MissingInstrument(self.instrument.clone()))?;

        debug!("Fetched {} price: {}", self.instrument, price);
        Ok(price)
    }
}
