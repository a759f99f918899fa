use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{default_on_request_failure, default_on_request_success, Retryable};

use crate::error::ApiError;
use crate::rpc::{RpcRequest, RpcResponse};

/// One HTTP endpoint of a Zabbix frontend.
///
/// No retry middleware is installed. The session's retry machine owns the
/// attempt budget for HTTP and JSON-RPC failures alike.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ClientWithMiddleware,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .default_headers(Self::default_headers())
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Malformed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: ClientBuilder::new(client).build(),
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json-rpc"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("metrics-export/0.1"));
        headers
    }

    /// Send one request without any retry.
    pub async fn send(
        &self,
        request: &RpcRequest<'_>,
        bearer: Option<&str>,
    ) -> Result<RpcResponse, ApiError> {
        debug!("POST {} method={} id={}", self.url, request.method, request.id);

        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        if let Some(retryable) = default_on_request_success(&response) {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retryable, &text));
        }

        response.json::<RpcResponse>().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Transient(format!("timed out reading response: {e}"))
            } else {
                ApiError::Malformed(format!("invalid JSON-RPC response: {e}"))
            }
        })
    }
}

fn classify_send_error(error: &reqwest_middleware::Error) -> ApiError {
    match default_on_request_failure(error) {
        Some(Retryable::Transient) => ApiError::Transient(error.to_string()),
        _ => ApiError::Malformed(error.to_string()),
    }
}

fn classify_status(status: StatusCode, retryable: Retryable, body: &str) -> ApiError {
    let detail = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {} - {}", status, body.trim())
    };
    match (status, retryable) {
        (StatusCode::TOO_MANY_REQUESTS, _) => ApiError::RateLimited(detail),
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => ApiError::Permission(detail),
        (_, Retryable::Transient) => ApiError::Transient(detail),
        (_, Retryable::Fatal) => ApiError::Malformed(detail),
    }
}
