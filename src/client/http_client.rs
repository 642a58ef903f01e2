use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::RemoteGateway;
use crate::collection::{Collection, Query};
use crate::config::EngineConfig;
use crate::error::{GatewayError, SyncError, SyncResult};
use crate::storage::{Record, RecordId};

const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// reqwest client for the ledger REST API.
pub struct HttpGateway {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        })
    }

    pub fn from_config(config: &EngineConfig) -> SyncResult<Self> {
        let gateway = Self::new(&config.remote.base_url, config.request_timeout())?;
        Ok(match &config.remote.auth_token {
            Some(token) => gateway.with_token(token),
            None => gateway,
        })
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| GatewayError::Protocol(format!("invalid token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Send a request and return the raw body of a 2xx response.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        extra: Option<(HeaderName, HeaderValue)>,
    ) -> Result<String, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut headers = self.get_headers()?;
        if let Some((name, value)) = extra {
            headers.insert(name, value);
        }

        let mut request = self.client.request(method.clone(), &url).headers(headers);
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(b) = body {
            request = request.json(b);
        }

        debug!("HTTP {} {}", method, path);
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(format!("{} {}: {}", method, path, e))
            } else {
                GatewayError::Connection(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .text()
            .await
            .map_err(|e| GatewayError::Protocol(format!("Failed to read response: {}", e)))
    }
}

/// Accept a bare array or an envelope such as `{"balances": [...]}`.
fn unwrap_records(body: Value) -> Result<Vec<Record>, GatewayError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => Ok(items),
                _ => Err(GatewayError::Protocol(
                    "expected an array or an object holding one array".to_string(),
                )),
            }
        }
        Value::Null => Ok(Vec::new()),
        other => Err(GatewayError::Protocol(format!(
            "expected an array, got {}",
            other
        ))),
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn create(
        &self,
        collection: Collection,
        payload: &Value,
        idempotency_key: Uuid,
    ) -> Result<Record, GatewayError> {
        let key = HeaderValue::from_str(&idempotency_key.to_string())
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let text = self
            .request(
                Method::POST,
                collection.endpoint(),
                &[],
                Some(payload),
                Some((HeaderName::from_static(IDEMPOTENCY_KEY), key)),
            )
            .await?;

        // Some endpoints answer with a bare message instead of the stored record
        match serde_json::from_str::<Value>(&text) {
            Ok(record @ Value::Object(_)) => Ok(record),
            _ => Ok(payload.clone()),
        }
    }

    async fn read(&self, collection: Collection, query: &Query) -> Result<Vec<Record>, GatewayError> {
        let text = self
            .request(Method::GET, collection.endpoint(), &query.params(), None, None)
            .await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Protocol(format!("Failed to parse response: {}", e)))?;
        unwrap_records(body)
    }

    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<(), GatewayError> {
        let id = id.to_string();
        self.request(
            Method::DELETE,
            collection.endpoint(),
            &[("id", id.as_str())],
            None,
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_records() {
        assert_eq!(
            unwrap_records(json!(["Cash", "Gold"])).unwrap(),
            vec![json!("Cash"), json!("Gold")]
        );
        assert_eq!(
            unwrap_records(json!({"balances": [{"party": "A"}]})).unwrap(),
            vec![json!({"party": "A"})]
        );
        assert!(unwrap_records(json!({"a": [], "b": []})).is_err());
        assert!(unwrap_records(json!(42)).is_err());
        assert!(unwrap_records(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let gateway = HttpGateway::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_headers_with_token() {
        let gateway = HttpGateway::new("http://h", Duration::from_secs(1))
            .unwrap()
            .with_token("abc");
        let headers = gateway.get_headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
    }
}
