//! Request/response plumbing for the test-management REST API.

use crate::auth::TokenProvider;
use async_trait::async_trait;
use qbridge_core::{parse_http_date, Config, EpochMs};
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Every path handed to a [`Transport`] is relative to this prefix.
pub const API_PREFIX: &str = "/api/v3";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_BODY_LIMIT: usize = 300;

/// Query parameters as ordered key/value pairs.
pub type Params<'a> = [(&'a str, String)];

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed `Date` response header.
    pub date_ms: Option<EpochMs>,
    pub data: Value,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: 200,
            date_ms: None,
            data,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        serde_json::from_value(self.data.clone()).map_err(|source| TransportError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{method} {path} returned HTTP {status}: {body}")]
    Status {
        method: String,
        path: String,
        status: u16,
        body: String,
    },
    #[error("{method} {path}: {source}")]
    Request {
        method: String,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("decoding response of {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl TransportError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, params: &Params<'_>) -> Result<ApiResponse, TransportError>;

    async fn post(
        &self,
        path: &str,
        params: &Params<'_>,
        body: &Value,
    ) -> Result<ApiResponse, TransportError>;
}

/// [`Transport`] over HTTPS with bearer authentication.
pub struct HttpTransport {
    client: Client,
    api_root: String,
    auth: TokenProvider,
}

impl HttpTransport {
    pub fn new(base_url: &str, auth: TokenProvider) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| TransportError::Request {
                method: "BUILD".into(),
                path: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            api_root: format!("{}{API_PREFIX}", base_url.trim_end_matches('/')),
            auth,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let method = cfg.auth.method()?;
        let auth = TokenProvider::new(cfg.base_url(), method);
        Ok(Self::new(cfg.base_url(), auth)?)
    }

    /// Fetch a token up front so that bad credentials fail before any work starts.
    pub async fn authenticate(&self) -> Result<(), TransportError> {
        self.auth.token(&self.client).await.map(|_| ())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &Params<'_>,
        body: Option<&Value>,
    ) -> Result<ApiResponse, TransportError> {
        let token = self.auth.token(&self.client).await?;
        let url = format!("{}{}", self.api_root, path);
        let request_err = |source| TransportError::Request {
            method: method.to_string(),
            path: path.to_string(),
            source,
        };

        let mut req = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(token)
            .query(params);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(request_err)?;
        let status = resp.status();
        let date_ms = resp
            .headers()
            .get(header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let text = resp.text().await.map_err(request_err)?;
        debug!("{method} {path} -> {}", status.as_u16());

        if !status.is_success() {
            return Err(TransportError::Status {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|source| TransportError::Decode {
                path: path.to_string(),
                source,
            })?
        };
        Ok(ApiResponse {
            status: status.as_u16(),
            date_ms,
            data,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, params: &Params<'_>) -> Result<ApiResponse, TransportError> {
        self.send(Method::GET, path, params, None).await
    }

    async fn post(
        &self,
        path: &str,
        params: &Params<'_>,
        body: &Value,
    ) -> Result<ApiResponse, TransportError> {
        self.send(Method::POST, path, params, Some(body)).await
    }
}
