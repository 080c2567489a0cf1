//! HTTP client for the Drive Copilot backend.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use copilot_auth_bridge::CodeExchange;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// `ingestion_status` is a flag on older backends and a document count on newer ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngestionProgress {
    Flag(bool),
    Count(f64),
}

impl fmt::Display for IngestionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionProgress::Flag(true) => write!(f, "yes"),
            IngestionProgress::Flag(false) => write!(f, "no"),
            IngestionProgress::Count(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStatus {
    pub ingestion_status: IngestionProgress,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_name: Option<&'a str>,
    pub query: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    /// Answer text with inline `<cite>` markers.
    pub response: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: Url,
    http_client: Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| BackendError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            http_client: Client::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
    }

    /// Liveness probe (`GET /hello`).
    pub async fn hello(&self) -> Result<String, BackendError> {
        let url = self.endpoint("hello")?;
        self.send_json(self.http_client.get(url)).await
    }

    /// Hand an authorization code to the backend (`POST /auth`).
    pub async fn exchange_auth_code(&self, code: &str) -> Result<serde_json::Value, BackendError> {
        let url = self.endpoint("auth")?;
        debug!("posting authorization code to {}", url);
        self.send_json(
            self.http_client
                .post(url)
                .json(&serde_json::json!({ "code": code })),
        )
        .await
    }

    pub async fn ingestion_status(&self) -> Result<IngestionStatus, BackendError> {
        let url = self.endpoint("ingestion_status")?;
        self.send_json(self.http_client.get(url)).await
    }

    pub async fn search(
        &self,
        query: &str,
        document_name: Option<&str>,
    ) -> Result<SearchResponse, BackendError> {
        let url = self.endpoint("search")?;
        let body = SearchRequest {
            document_name: document_name.filter(|name| !name.is_empty()),
            query,
        };
        info!("searching (document: {:?})", body.document_name);
        self.send_json(self.http_client.post(url).json(&body)).await
    }

    pub async fn ingest_data(&self) -> Result<IngestResponse, BackendError> {
        let url = self.endpoint("ingest_data")?;
        self.send_json(self.http_client.get(url)).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, BackendError> {
        let url = self.endpoint("login")?;
        self.send_json(self.http_client.post(url).json(&serde_json::json!({
            "username": username,
            "password": password,
        })))
        .await
    }
}

#[async_trait]
impl CodeExchange for BackendClient {
    async fn exchange_code(&self, code: &str) -> anyhow::Result<serde_json::Value> {
        Ok(self.exchange_auth_code(code).await?)
    }
}

/// Best-effort message from an error body: FastAPI's `detail`, else the raw text.
fn error_detail(body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| match value.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        });
    match detail {
        Some(detail) => detail,
        None if body.trim().is_empty() => "no detail".to_string(),
        None => body.trim().to_string(),
    }
}
