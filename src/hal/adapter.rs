// src/hal/adapter.rs
//! Protocol adapter: register reads and writes through the cloud proxy

use crate::error::{GatewayError, GatewayResult};
use crate::hal::http::HttpClient;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Retry and timeout policy for register operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub timeout_ms: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
        }
    }
}

/// Register-level access to the inverter
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Read `count` consecutive registers starting at `start`
    async fn read_registers(&self, start: u8, count: u16) -> GatewayResult<Vec<u16>>;

    /// Write a single register
    async fn write_register(&self, address: u8, value: u16) -> GatewayResult<()>;
}

#[derive(Deserialize)]
struct ReadResponse {
    values: Vec<u16>,
}

/// Adapter that reaches the inverter's register bank through the cloud
/// HTTP proxy, with bounded retries and a per-request timeout.
pub struct CloudProtocolAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
    read_endpoint: String,
    write_endpoint: String,
    config: AdapterConfig,
}

impl CloudProtocolAdapter {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        read_endpoint: impl Into<String>,
        write_endpoint: impl Into<String>,
        config: AdapterConfig,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            read_endpoint: read_endpoint.into(),
            write_endpoint: write_endpoint.into(),
            config,
        }
    }

    async fn request_with_retries<F, Fut>(&self, what: &str, attempt_fn: F) -> GatewayResult<String>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = GatewayResult<crate::hal::http::HttpResponse>>,
    {
        let attempts = self.config.max_retries.max(1);
        let timeout = Duration::from_millis(u64::from(self.config.timeout_ms));
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = tokio::time::timeout(timeout, attempt_fn()).await;
            match outcome {
                Ok(Ok(resp)) if resp.is_success() => return Ok(resp.body),
                Ok(Ok(resp)) => {
                    last_error = format!("status {}", resp.status);
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!("timeout after {} ms", self.config.timeout_ms);
                }
            }

            debug!(
                "{} attempt {}/{} failed: {}",
                what, attempt, attempts, last_error
            );
            if attempt < attempts && self.config.retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(u64::from(self.config.retry_delay_ms)))
                    .await;
            }
        }

        warn!("{} failed after {} retries: {}", what, attempts, last_error);
        Err(GatewayError::Transport(format!(
            "{} failed after {} retries: {}",
            what, attempts, last_error
        )))
    }
}

#[async_trait]
impl ProtocolAdapter for CloudProtocolAdapter {
    async fn read_registers(&self, start: u8, count: u16) -> GatewayResult<Vec<u16>> {
        let url = format!(
            "{}{}?address={}&count={}",
            self.base_url, self.read_endpoint, start, count
        );

        let body = self
            .request_with_retries("read_registers", || self.http.get(&url))
            .await?;

        let parsed: ReadResponse = serde_json::from_str(&body)?;
        if parsed.values.len() != usize::from(count) {
            return Err(GatewayError::Protocol(format!(
                "Expected {} register values, got {}",
                count,
                parsed.values.len()
            )));
        }

        Ok(parsed.values)
    }

    async fn write_register(&self, address: u8, value: u16) -> GatewayResult<()> {
        let url = format!("{}{}", self.base_url, self.write_endpoint);
        let payload = serde_json::json!({ "address": address, "value": value }).to_string();

        self.request_with_retries("write_register", || {
            self.http.post(&url, payload.as_bytes(), "application/json")
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::http::MockHttpClient;

    fn adapter(http: Arc<MockHttpClient>) -> CloudProtocolAdapter {
        CloudProtocolAdapter::new(
            http,
            "http://cloud",
            "/api/inverter/read",
            "/api/inverter/write",
            AdapterConfig {
                retry_delay_ms: 0,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_read_parses_values() {
        let http = Arc::new(MockHttpClient::new());
        http.on_get("/api/inverter/read", 200, r#"{"values":[2303]}"#);

        let values = adapter(http.clone()).read_registers(0, 1).await.unwrap();
        assert_eq!(values, vec![2303]);

        let url = &http.requests()[0].url;
        assert!(url.contains("address=0"));
        assert!(url.contains("count=1"));
    }

    #[tokio::test]
    async fn test_read_retries_until_success() {
        let http = Arc::new(MockHttpClient::new());
        http.on_get("/api/inverter/read", 503, "");
        http.on_get("/api/inverter/read", 200, r#"{"values":[1,2,3]}"#);

        let values = adapter(http.clone()).read_registers(0, 3).await.unwrap();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(http.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_read_exhausts_retries() {
        let http = Arc::new(MockHttpClient::new());
        http.on_get("/api/inverter/read", 500, "");

        let err = adapter(http.clone()).read_registers(0, 1).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(http.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_read_count_mismatch_is_protocol_error() {
        let http = Arc::new(MockHttpClient::new());
        http.on_get("/api/inverter/read", 200, r#"{"values":[1]}"#);

        let err = adapter(http).read_registers(0, 2).await.unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_write_posts_payload() {
        let http = Arc::new(MockHttpClient::new());
        http.on_post("/api/inverter/write", 200, "");

        adapter(http.clone()).write_register(8, 75).await.unwrap();

        let requests = http.requests_to("/api/inverter/write");
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["address"], 8);
        assert_eq!(body["value"], 75);
    }
}
