use std::time::Duration;

use reqwest::Client;
use werkzoek_core::error::{ApiError, TransportCode};
use werkzoek_core::request::{Method, PreparedRequest, RawResponse};
use werkzoek_core::traits::Transport;

const USER_AGENT: &str = "Werkzoek/0.1";

/// HTTP transport using reqwest.
///
/// Executes prepared requests and hands back status and body text. Non-2xx
/// responses are returned, not raised; the gateway classifies them.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_timeout(werkzoek_core::config::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::transport(TransportCode::Request, e.to_string()))?;

        Ok(Self { client, timeout })
    }

    fn classify(&self, e: &reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::transport(
                TransportCode::Timeout,
                format!("timeout of {}ms exceeded", self.timeout.as_millis()),
            )
        } else if e.is_connect() {
            ApiError::transport(TransportCode::Network, format!("Connection failed: {e}"))
        } else if e.is_builder() {
            ApiError::transport(TransportCode::Request, e.to_string())
        } else if e.is_body() || e.is_decode() {
            ApiError::transport(TransportCode::Body, e.to_string())
        } else if e.is_request() {
            ApiError::transport(TransportCode::Network, e.to_string())
        } else {
            ApiError::transport(TransportCode::Unknown, e.to_string())
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<RawResponse, ApiError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(&e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::transport(TransportCode::Body, format!("Failed to read response body: {e}")))?;

        tracing::trace!(status, bytes = body.len(), url = %request.url, "Response received");
        Ok(RawResponse { status, body })
    }
}
