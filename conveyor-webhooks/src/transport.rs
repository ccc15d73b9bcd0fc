//! Outbound transport for webhook requests

use crate::error::{WebhookError, WebhookResult};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// A signed request ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    /// Value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Receiver's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends outbound webhook requests.
///
/// Implementations only report what happened on the wire; timeouts, status
/// classification and the circuit breaker are applied by the caller.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> WebhookResult<TransportResponse>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a fresh HTTP client.
    pub fn new() -> WebhookResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    /// Use an existing HTTP client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> WebhookResult<TransportResponse> {
        let url = Url::parse(&request.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebhookError::Config(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut builder = self.client.post(url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        debug!(status, "Webhook receiver responded");

        Ok(TransportResponse { status })
    }
}
