use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::RateProvider;

const DEFAULT_API_URL: &str = "https://v6.exchangerate-api.com/v6";

/// Rates from [ExchangeRate-API](https://www.exchangerate-api.com).
pub struct ExchangeRateApiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct LatestRatesResponse {
    result: String,
    #[serde(default)]
    conversion_rates: HashMap<String, f64>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
}

impl ExchangeRateApiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_api_url(api_key, DEFAULT_API_URL.to_owned())
    }

    pub fn with_api_url(api_key: String, api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApiProvider {
    async fn rate(&self, base: &str, currency: &str) -> anyhow::Result<f64> {
        // Rates are listed relative to the requested currency, so the entry
        // for the base currency is the number of base units per unit.
        let url = format!("{}/{}/latest/{}", self.api_url, self.api_key, currency);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("exchange rate request failed")?
            .error_for_status()
            .context("exchange rate request was rejected")?
            .json::<LatestRatesResponse>()
            .await
            .context("malformed exchange rate response")?;

        if response.result != "success" {
            return Err(anyhow!(
                "exchange rate lookup for {} failed: {}",
                currency,
                response.error_type.as_deref().unwrap_or("unknown error")
            ));
        }

        let rate = response
            .conversion_rates
            .get(base)
            .copied()
            .ok_or_else(|| anyhow!("no {} rate listed for {}", base, currency))?;
        debug!(base, currency, rate, "Received exchange rate.");

        Ok(rate)
    }
}
