use crate::core::flow::dispatcher::{CollaboratorError, HttpResponse, HttpTransport};
use crate::core::flow::effects::HttpCall;
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Live HTTP transport. The idempotency key travels in the `Idempotency-Key`
/// header so the receiving service can de-duplicate retries.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
}

impl ReqwestHttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn request(
        &self,
        idempotency_key: &str,
        call: &HttpCall,
    ) -> Result<HttpResponse, CollaboratorError> {
        let method = Method::from_bytes(call.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CollaboratorError::Permanent(format!("invalid method '{}'", call.method)))?;
        let mut builder = self
            .client
            .request(method, &call.url)
            .header(IDEMPOTENCY_HEADER, idempotency_key);
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout(e.to_string())
            } else if e.is_builder() {
                CollaboratorError::Permanent(e.to_string())
            } else {
                CollaboratorError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        let mut headers = IndexMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Transient(e.to_string()))?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CollaboratorError::Transient(format!(
                "{} {} returned {}",
                call.method, call.url, status
            )));
        }
        if status.is_client_error() {
            return Err(CollaboratorError::Permanent(format!(
                "{} {} returned {}",
                call.method, call.url, status
            )));
        }

        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}
