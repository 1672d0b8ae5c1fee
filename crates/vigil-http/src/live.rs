use std::collections::BTreeMap;

use async_trait::async_trait;

use vigil_plan::HttpMethod;
use vigil_types::NetworkFailure;

use crate::adapter::{AdapterError, HttpAdapter, HttpRequest, HttpResponse};

/// Issues real requests with `reqwest`.
///
/// By default a response outside 2xx/3xx is a failure
/// (`HttpStatusError`); [`LiveAdapter::accept_all_statuses`] hands every
/// response to the assertions instead.
#[derive(Debug, Clone)]
pub struct LiveAdapter {
    client: reqwest::Client,
    accept_all_statuses: bool,
}

impl LiveAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            accept_all_statuses: false,
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            accept_all_statuses: false,
        }
    }

    pub fn accept_all_statuses(mut self, accept: bool) -> Self {
        self.accept_all_statuses = accept;
        self
    }
}

impl Default for LiveAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

fn classify(err: reqwest::Error, request: &HttpRequest) -> NetworkFailure {
    if err.is_timeout() {
        return NetworkFailure::Timeout {
            timeout_ms: request.timeout.as_millis() as u64,
        };
    }
    let invalid = err.is_builder();
    // The URL may carry substituted secrets; it stays out of the message.
    let err = err.without_url();
    let mut message = err.to_string();
    if let Some(cause) = root_cause(&err) {
        message = format!("{message}: {cause}");
    }
    if invalid {
        NetworkFailure::InvalidRequest { message }
    } else {
        NetworkFailure::ConnectionRefused { message }
    }
}

fn root_cause(err: &reqwest::Error) -> Option<String> {
    let mut source = std::error::Error::source(err)?;
    while let Some(next) = source.source() {
        source = next;
    }
    Some(source.to_string())
}

#[async_trait]
impl HttpAdapter for LiveAdapter {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, AdapterError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(|e| classify(e, request))?;

        let status = resp.status();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in resp.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        let host = resp.url().host_str().unwrap_or("").to_string();
        let data = resp.text().await.map_err(|e| classify(e, request))?;

        // The URL may carry substituted secrets, so only the host is logged.
        tracing::debug!(
            method = %request.method,
            host = %host,
            status = status.as_u16(),
            bytes = data.len(),
            "HTTP response"
        );

        if !self.accept_all_statuses && !(status.is_success() || status.is_redirection()) {
            return Err(NetworkFailure::HttpStatusError {
                status: status.as_u16(),
            }
            .into());
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            data,
        })
    }

    fn name(&self) -> &str {
        "live"
    }
}
