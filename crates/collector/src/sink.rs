//! Remote collector endpoint.
//!
//! Every batch becomes one `POST {base_url}/kline`:
//!
//! ```json
//! {
//!   "symbol": "EURUSD",
//!   "timeframe": "M1",
//!   "data": [
//!     {"time": "2024-01-30 20:00:00", "open": 1.08, "close": 1.09,
//!      "high": 1.1, "low": 1.07, "volume": 42.0}
//!   ],
//!   "timestamp": "2024-01-30T20:00:03.512+08:00"
//! }
//! ```

use crate::error::SinkError;
use anyhow::Result;
use async_trait::async_trait;
use candle_relay_core::{CandleBatch, CandleSink, ServerConfig};
use chrono::Utc;
use chrono_tz::Tz;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;

/// Candle time layout expected by the collector.
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize)]
struct KlinePayload<'a> {
    symbol: &'a str,
    timeframe: &'a str,
    data: Vec<WireCandle>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct WireCandle {
    time: String,
    open: f64,
    close: f64,
    high: f64,
    low: f64,
    volume: f64,
}

/// Posts candle batches to the remote collector.
pub struct HttpSink {
    http: Client,
    base_url: String,
    api_key: SecretString,
    timezone: Tz,
}

impl HttpSink {
    /// Creates a sink with a client bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
        timezone: Tz,
    ) -> Result<Self, SinkError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timezone,
        })
    }

    /// Creates a sink from validated server settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(server: &ServerConfig, timezone: Tz) -> Result<Self, SinkError> {
        Self::new(
            server.url.clone(),
            SecretString::from(server.api_key.expose_secret().to_string()),
            server.request_timeout,
            timezone,
        )
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn payload<'a>(&self, batch: &'a CandleBatch) -> KlinePayload<'a> {
        KlinePayload {
            symbol: &batch.symbol,
            timeframe: batch.timeframe.as_str(),
            data: batch
                .candles
                .iter()
                .map(|c| WireCandle {
                    time: c.time.format(WIRE_TIME_FORMAT).to_string(),
                    open: c.open,
                    close: c.close,
                    high: c.high,
                    low: c.low,
                    volume: c.volume,
                })
                .collect(),
            timestamp: Utc::now().with_timezone(&self.timezone).to_rfc3339(),
        }
    }

    /// Posts one batch.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Rejected`] for a non-2xx response and
    /// [`SinkError::Transport`] when the request itself fails.
    pub async fn post(&self, batch: &CandleBatch) -> Result<(), SinkError> {
        let url = format!("{}/kline", self.base_url);
        tracing::debug!(
            url = %url,
            symbol = %batch.symbol,
            timeframe = %batch.timeframe,
            candles = batch.len(),
            "POST kline"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.payload(batch))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl CandleSink for HttpSink {
    async fn send(&self, batch: &CandleBatch) -> Result<()> {
        self.post(batch).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_relay_core::{RawRate, Timeframe};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn sink(url: &str) -> HttpSink {
        HttpSink::new(
            url,
            SecretString::from("test-key".to_string()),
            Duration::from_secs(5),
            chrono_tz::Asia::Shanghai,
        )
        .unwrap()
    }

    fn batch() -> CandleBatch {
        let rows = vec![
            RawRate {
                time: 1_706_616_060,
                open: 1.0851,
                high: 1.0860,
                low: 1.0849,
                close: 1.0855,
                tick_volume: 120,
            },
            RawRate {
                time: 1_706_616_000,
                open: 1.0840,
                high: 1.0852,
                low: 1.0838,
                close: 1.0851,
                tick_volume: 98,
            },
        ];
        CandleBatch::from_rates("EURUSD", Timeframe::M1, &rows, chrono_tz::Asia::Shanghai, 300)
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(sink("http://localhost:8080/api/v1/").base_url(), "http://localhost:8080/api/v1");
    }

    #[tokio::test]
    async fn test_post_sends_kline_payload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/kline"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let sink = sink(&format!("{}/api/v1", mock_server.uri()));
        sink.post(&batch()).await.unwrap();

        let requests: Vec<Request> = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();

        assert_eq!(body["symbol"], "EURUSD");
        assert_eq!(body["timeframe"], "M1");
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        // Oldest first, rendered in Asia/Shanghai
        assert_eq!(body["data"][0]["time"], "2024-01-30 20:00:00");
        assert_eq!(body["data"][1]["time"], "2024-01-30 20:01:00");
        assert_eq!(body["data"][0]["volume"], 98.0);
        assert_eq!(body["data"][1]["close"], 1.0855);
        assert!(body["timestamp"].as_str().unwrap().ends_with("+08:00"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/kline"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&mock_server)
            .await;

        let err = sink(&mock_server.uri()).post(&batch()).await.unwrap_err();

        match err {
            SinkError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid token");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let err = sink(&format!("http://127.0.0.1:{port}"))
            .post(&batch())
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Transport(_)));
    }

    #[tokio::test]
    async fn test_trait_send_surfaces_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/kline"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let sink: &dyn CandleSink = &sink(&mock_server.uri());
        assert!(sink.send(&batch()).await.is_err());
    }
}
