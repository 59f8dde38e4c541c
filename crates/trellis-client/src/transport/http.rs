//! HTTP request transport

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use trellis_protocol::WireCall;

use super::RequestTransport;
use crate::config::ClientConfig;
use crate::error::{ClientError, TransportError};

/// Posts each call as JSON to the configured query endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            endpoint: config.query_endpoint(),
            token: config.token.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn execute(&self, call: &WireCall) -> Result<String, TransportError> {
        debug!(operation = %call.operation, endpoint = %self.endpoint, "Sending request");

        let mut request = self.client.post(&self.endpoint).json(call);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() && !carries_errors(&body) {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// A reply with an `errors` list is an answer, whatever the status says.
fn carries_errors(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .map(|reply| reply.get("errors").is_some_and(serde_json::Value::is_array))
        .unwrap_or(false)
}
