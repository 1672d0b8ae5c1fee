//! Table-driven adapter for tests and dry runs.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use vigil_plan::HttpMethod;
use vigil_types::{NetworkFailure, Result, VigilError};

use crate::adapter::{AdapterError, HttpAdapter, HttpRequest, HttpResponse};

type RequestPredicate = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum StubMatcher {
    Exact(String),
    Pattern(Regex),
    Predicate(RequestPredicate),
}

impl fmt::Debug for StubMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubMatcher::Exact(url) => f.debug_tuple("Exact").field(url).finish(),
            StubMatcher::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            StubMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl StubMatcher {
    fn matches(&self, request: &HttpRequest) -> bool {
        match self {
            StubMatcher::Exact(url) => request.url == *url,
            StubMatcher::Pattern(re) => re.is_match(&request.url),
            StubMatcher::Predicate(f) => f(request),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StubReply {
    Respond(HttpResponse),
    Fail(NetworkFailure),
}

/// One row of the stub table.
#[derive(Debug, Clone)]
pub struct Stub {
    method: Option<HttpMethod>,
    matcher: StubMatcher,
    reply: StubReply,
    delay: Option<Duration>,
}

impl Stub {
    pub fn exact(url: impl Into<String>) -> Self {
        Self::with_matcher(StubMatcher::Exact(url.into()))
    }

    /// Match URLs against a regular expression.
    pub fn pattern(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| VigilError::Other(format!("invalid stub pattern '{pattern}': {e}")))?;
        Ok(Self::with_matcher(StubMatcher::Pattern(re)))
    }

    pub fn matching(f: impl Fn(&HttpRequest) -> bool + Send + Sync + 'static) -> Self {
        Self::with_matcher(StubMatcher::Predicate(Arc::new(f)))
    }

    fn with_matcher(matcher: StubMatcher) -> Self {
        Self {
            method: None,
            matcher,
            reply: StubReply::Respond(HttpResponse::text(200, "")),
            delay: None,
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn respond(mut self, response: HttpResponse) -> Self {
        self.reply = StubReply::Respond(response);
        self
    }

    pub fn respond_json(self, status: u16, body: serde_json::Value) -> Self {
        self.respond(HttpResponse::json(status, &body))
    }

    pub fn fail(mut self, failure: NetworkFailure) -> Self {
        self.reply = StubReply::Fail(failure);
        self
    }

    /// Hold the reply back; a delay past the request timeout yields `Timeout`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn matches(&self, request: &HttpRequest) -> bool {
        self.method.map_or(true, |m| m == request.method) && self.matcher.matches(request)
    }
}

/// Answers requests from a table of [`Stub`]s; the first matching row wins.
#[derive(Debug, Default)]
pub struct StubAdapter {
    stubs: Vec<Stub>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl StubAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stub(mut self, stub: Stub) -> Self {
        self.stubs.push(stub);
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl HttpAdapter for StubAdapter {
    async fn request(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, AdapterError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        let stub = self
            .stubs
            .iter()
            .find(|s| s.matches(request))
            .ok_or_else(|| AdapterError::NoStubMatched {
                method: request.method.to_string(),
                url: request.url.clone(),
            })?;

        if let Some(delay) = stub.delay {
            if delay > request.timeout {
                tokio::time::sleep(request.timeout).await;
                return Err(NetworkFailure::Timeout {
                    timeout_ms: request.timeout.as_millis() as u64,
                }
                .into());
            }
            tokio::time::sleep(delay).await;
        }

        match &stub.reply {
            StubReply::Respond(response) => Ok(response.clone()),
            StubReply::Fail(failure) => Err(failure.clone().into()),
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}
