//! MetaTrader 5 terminal reached through a local HTTP bridge.
//!
//! The bridge is a thin process running next to the terminal that exposes
//! the terminal calls the collector needs:
//!
//! | Call            | Request                                                   |
//! |-----------------|-----------------------------------------------------------|
//! | initialize      | `POST /initialize`                                        |
//! | probe           | `GET /terminal_info`                                      |
//! | fetch           | `GET /rates?symbol=&timeframe=<code>&start_pos=&count=`   |
//! | shutdown        | `POST /shutdown`                                          |
//!
//! `timeframe` is the terminal's numeric granularity code.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use candle_relay_core::{MarketDataSource, RawRate, TerminalInfo, Timeframe};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Default bridge address.
pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:5555";

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP-bridged market data source.
pub struct BridgeSource {
    http: Client,
    base_url: String,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl BridgeSource {
    /// Creates a source paced at `requests_per_second`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration, requests_per_second: u32) -> Result<Self> {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build bridge HTTP client")?;

        Ok(Self {
            http,
            base_url: DEFAULT_BRIDGE_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
        })
    }

    /// Points the source at another bridge address.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for the rate limiter, sends, and fails on non-2xx.
    async fn execute(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        self.rate_limiter.until_ready().await;

        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("bridge {what} request failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("bridge {} error {}: {}", what, status, text));
        }

        Ok(response)
    }
}

#[async_trait]
impl MarketDataSource for BridgeSource {
    async fn initialize(&self) -> Result<()> {
        let url = format!("{}/initialize", self.base_url);
        tracing::debug!("POST {}", url);
        self.execute(self.http.post(&url), "initialize").await?;
        Ok(())
    }

    async fn probe(&self) -> Result<TerminalInfo> {
        let url = format!("{}/terminal_info", self.base_url);
        let response = self.execute(self.http.get(&url), "terminal_info").await?;
        let info: TerminalInfo = response
            .json()
            .await
            .context("malformed terminal info")?;

        if !info.connected {
            return Err(anyhow!("terminal is not connected to its trade server"));
        }
        Ok(info)
    }

    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        offset: usize,
        count: usize,
    ) -> Result<Vec<RawRate>> {
        let url = format!("{}/rates", self.base_url);
        tracing::debug!(symbol, timeframe = %timeframe, count, "GET {}", url);

        let request = self.http.get(&url).query(&[
            ("symbol", symbol.to_string()),
            ("timeframe", timeframe.mt5_code().to_string()),
            ("start_pos", offset.to_string()),
            ("count", count.to_string()),
        ]);
        let response = self.execute(request, "rates").await?;

        // The bridge answers null when the terminal has no data for the pair
        let rows: Option<Vec<RawRate>> = response
            .json()
            .await
            .with_context(|| format!("malformed rates for {symbol} {timeframe}"))?;
        Ok(rows.unwrap_or_default())
    }

    async fn shutdown(&self) {
        let url = format!("{}/shutdown", self.base_url);
        if let Err(e) = self.execute(self.http.post(&url), "shutdown").await {
            tracing::debug!(error = %e, "Bridge shutdown request failed");
        }
    }
}
