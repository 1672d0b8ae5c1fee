use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use vigil_plan::HttpMethod;
use vigil_types::{NetworkFailure, VigilError};

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: Duration::from_millis(vigil_plan::DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names are lower-case.
    pub headers: BTreeMap<String, String>,
    pub data: String,
}

impl HttpResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: reason_phrase(status),
            headers: BTreeMap::new(),
            data: body.into(),
        }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::text(status, body.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

pub(crate) fn reason_phrase(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    Network(#[from] NetworkFailure),

    #[error("No stub matched {method} {url}")]
    NoStubMatched { method: String, url: String },
}

impl AdapterError {
    /// Attach the node that issued the request.
    pub fn for_node(self, node: &str) -> VigilError {
        match self {
            AdapterError::Network(failure) => VigilError::NetworkError {
                node: node.to_string(),
                failure,
            },
            AdapterError::NoStubMatched { method, url } => VigilError::NoStubMatched { method, url },
        }
    }
}

// ---------------------------------------------------------------------------
// HttpAdapter
// ---------------------------------------------------------------------------

#[async_trait]
pub trait HttpAdapter: Send + Sync {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, AdapterError>;
    fn name(&self) -> &str;
}
