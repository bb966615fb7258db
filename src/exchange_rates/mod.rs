//! Conversion of amounts into the ledger's base currency.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::ledger::domain::currency::Conversion;

mod http;

pub use http::ExchangeRateApiProvider;

/// How long a fetched rate is reused before it is requested again.
pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(60 * 60);

/// How long a single rate request may take.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Number of decimal places stored for exchange rates.
const RATE_DECIMALS: u32 = 8;

pub type DynRateProvider = Arc<dyn RateProvider + Send + Sync>;

/// A source of exchange rates.
#[async_trait]
pub trait RateProvider {
    /// Look up an exchange rate.
    ///
    /// # Arguments
    ///
    /// * `base` - The currency the rate converts into.
    /// * `currency` - The currency the rate converts from.
    ///
    /// # Returns
    ///
    /// The number of `base` units one unit of `currency` is worth.
    async fn rate(&self, base: &str, currency: &str) -> anyhow::Result<f64>;
}

#[derive(Clone, Copy)]
struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

/// Exchange rates into a single base currency, cached per currency.
pub struct ExchangeRates {
    provider: DynRateProvider,
    base_currency: String,
    ttl: Duration,
    fetch_timeout: Duration,
    cache: RwLock<HashMap<String, CachedRate>>,
}

impl ExchangeRates {
    pub fn new(provider: DynRateProvider, base_currency: String) -> Self {
        Self {
            provider,
            base_currency,
            ttl: DEFAULT_RATE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Get the rate converting `currency` into the base currency.
    ///
    /// The base currency always has a rate of 1. Other rates are served from
    /// the cache while they are younger than the configured TTL.
    pub async fn rate(&self, currency: &str) -> anyhow::Result<Decimal> {
        if currency == self.base_currency {
            return Ok(Decimal::ONE);
        }

        if let Some(cached) = self.cache.read().await.get(currency) {
            if cached.fetched_at.elapsed() < self.ttl {
                debug!(currency, rate = %cached.rate, "Using cached exchange rate.");
                return Ok(cached.rate);
            }
        }

        let raw_rate = tokio::time::timeout(
            self.fetch_timeout,
            self.provider.rate(&self.base_currency, currency),
        )
        .await
        .map_err(|_| anyhow!("exchange rate request timed out"))?
        .with_context(|| format!("failed to fetch exchange rate for {}", currency))?;

        let rate = Decimal::try_from(raw_rate)
            .with_context(|| format!("exchange rate {} is not a valid decimal", raw_rate))?
            .round_dp(RATE_DECIMALS);

        if rate <= Decimal::ZERO {
            return Err(anyhow!("exchange rate for {} must be positive", currency));
        }

        self.cache.write().await.insert(
            currency.to_owned(),
            CachedRate {
                rate,
                fetched_at: Instant::now(),
            },
        );
        debug!(currency, %rate, "Fetched exchange rate.");

        Ok(rate)
    }

    /// Convert an amount into the base currency.
    ///
    /// Failing to determine a rate is not an error. The conversion is recorded
    /// with a zero rate instead. The same applies to a rate that pushes the
    /// converted amount out of range.
    pub async fn convert(&self, currency: &str, amount: Decimal) -> Conversion {
        let conversion = self.rate(currency).await.and_then(|rate| {
            Conversion::at_rate(rate, amount)
                .ok_or_else(|| anyhow!("converting {amount} at rate {rate} overflowed"))
        });

        match conversion {
            Ok(conversion) => conversion,
            Err(error) => {
                warn!(
                    currency,
                    base_currency = %self.base_currency,
                    ?error,
                    "Exchange rate unavailable. Recording a zero rate."
                );

                Conversion::unavailable()
            }
        }
    }
}
