use async_trait::async_trait;
use base64::Engine;

use vigil_types::{Result, VigilError};

use crate::SecretProvider;

const SECRET_MANAGER_URL: &str = "https://secretmanager.googleapis.com";

/// Google Secret Manager:
/// `{{ secret:gcp:projects/acme/secrets/db-password[/versions/3] }}`.
///
/// Without an explicit version the `latest` version is read.
#[derive(Debug, Clone)]
pub struct GcpSecretManagerProvider {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl GcpSecretManagerProvider {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.into(),
            base_url: SECRET_MANAGER_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
            .map_err(|_| VigilError::Other("GOOGLE_OAUTH_ACCESS_TOKEN is not set".into()))?;
        Ok(Self::new(token))
    }

    fn unavailable(&self, reference: &str, message: impl Into<String>) -> VigilError {
        VigilError::ProviderUnavailable {
            provider: "gcp".into(),
            reference: reference.into(),
            message: message.into(),
        }
    }
}

/// Normalise a reference to a full version resource name.
fn version_name(reference: &str) -> Option<String> {
    let parts: Vec<&str> = reference.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        ["projects", p, "secrets", s] if !p.is_empty() && !s.is_empty() => {
            Some(format!("projects/{p}/secrets/{s}/versions/latest"))
        }
        ["projects", p, "secrets", s, "versions", v]
            if !p.is_empty() && !s.is_empty() && !v.is_empty() =>
        {
            Some(format!("projects/{p}/secrets/{s}/versions/{v}"))
        }
        _ => None,
    }
}

#[async_trait]
impl SecretProvider for GcpSecretManagerProvider {
    async fn fetch(&self, reference: &str) -> Result<String> {
        let name = version_name(reference).ok_or_else(|| VigilError::SecretNotFound {
            reference: format!("gcp:{reference}"),
        })?;
        let url = format!("{}/v1/{name}:access", self.base_url);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| self.unavailable(reference, e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(VigilError::SecretNotFound {
                reference: format!("gcp:{reference}"),
            });
        }
        if !status.is_success() {
            return Err(self.unavailable(
                reference,
                format!("secret manager answered HTTP {}", status.as_u16()),
            ));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(reference, format!("invalid response body: {e}")))?;
        let encoded = body
            .pointer("/payload/data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| self.unavailable(reference, "response has no payload.data"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| self.unavailable(reference, format!("payload is not base64: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|_| self.unavailable(reference, "payload is not valid UTF-8"))
    }

    fn scheme(&self) -> &str {
        "gcp"
    }
}
