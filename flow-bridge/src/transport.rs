//! Transport layer abstraction.
//!
//! The bridge only needs "send JSON, get JSON": one POST per batch, answered
//! with a status code and a JSON body.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{ExchangeRequest, CONTENT_TYPE};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Status and body of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed body; `null` when the server sent none.
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// A `200 OK` response.
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Carries exchange requests to the remote handler.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts `request` to `endpoint` and returns the raw reply.
    ///
    /// Non-success statuses are not errors at this level; only failures to
    /// obtain a reply at all are.
    async fn exchange(
        &self,
        endpoint: &str,
        request: &ExchangeRequest,
    ) -> BridgeResult<TransportResponse>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport posting to `base_url` + endpoint.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> BridgeResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Creates a transport from the bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| BridgeError::Config("base URL is not configured".into()))?;
        Self::new(base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(
        &self,
        endpoint: &str,
        request: &ExchangeRequest,
    ) -> BridgeResult<TransportResponse> {
        let url = format!("{}{}", self.base_url, endpoint);
        let body = serde_json::to_vec(request)?;
        debug!("POST {} ({} bytes)", url, body.len());

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => body,
                // Error pages (e.g. an HTML 403) still carry a usable status.
                Err(_) if !(200..300).contains(&status) => Value::Null,
                Err(e) => {
                    return Err(BridgeError::Protocol(format!(
                        "response body is not JSON: {e}"
                    )));
                }
            }
        };

        Ok(TransportResponse { status, body })
    }
}

/// A mock transport for testing.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&ExchangeRequest) -> BridgeResult<TransportResponse> + Send + Sync>;

    /// Records every request and answers through a responder closure.
    pub struct MockTransport {
        responder: Responder,
        requests: Mutex<Vec<(String, ExchangeRequest)>>,
        latency: Option<Duration>,
    }

    impl MockTransport {
        /// Creates a mock answering with `responder`.
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&ExchangeRequest) -> BridgeResult<TransportResponse> + Send + Sync + 'static,
        {
            Self {
                responder: Box::new(responder),
                requests: Mutex::new(Vec::new()),
                latency: None,
            }
        }

        /// Answers every request with `status` and `body`.
        pub fn replying(status: u16, body: Value) -> Self {
            Self::new(move |_| Ok(TransportResponse::new(status, body.clone())))
        }

        /// Fails every request with `error`.
        pub fn failing(error: BridgeError) -> Self {
            Self::new(move |_| Err(error.clone()))
        }

        /// Delays every reply.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        /// Requests received so far.
        pub fn requests(&self) -> Vec<ExchangeRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, request)| request.clone())
                .collect()
        }

        /// Endpoints posted to so far.
        pub fn endpoints(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(endpoint, _)| endpoint.clone())
                .collect()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> Option<ExchangeRequest> {
            self.requests
                .lock()
                .unwrap()
                .last()
                .map(|(_, request)| request.clone())
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn exchange(
            &self,
            endpoint: &str,
            request: &ExchangeRequest,
        ) -> BridgeResult<TransportResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((endpoint.to_string(), request.clone()));
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            (self.responder)(request)
        }
    }
}
