use std::time::Duration;

use async_trait::async_trait;

use vigil_types::{Result, VigilError};

use crate::SecretProvider;

const DEFAULT_MOUNT: &str = "secret";
const DEFAULT_FIELD: &str = "value";

/// HashiCorp Vault KV v2: `{{ secret:vault:apps/checkout#api_key }}`.
///
/// The reference is `<path>[#<field>]`; the field defaults to `value`.
#[derive(Debug, Clone)]
pub struct VaultProvider {
    client: reqwest::Client,
    address: String,
    token: String,
    mount: String,
}

impl VaultProvider {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            address: address.into().trim_end_matches('/').to_string(),
            token: token.into(),
            mount: DEFAULT_MOUNT.to_string(),
        }
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    /// Build from `VAULT_ADDR` and `VAULT_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let address = std::env::var("VAULT_ADDR")
            .map_err(|_| VigilError::Other("VAULT_ADDR is not set".into()))?;
        let token = std::env::var("VAULT_TOKEN")
            .map_err(|_| VigilError::Other("VAULT_TOKEN is not set".into()))?;
        Ok(Self::new(address, token))
    }

    fn unavailable(&self, reference: &str, message: impl Into<String>) -> VigilError {
        VigilError::ProviderUnavailable {
            provider: "vault".into(),
            reference: reference.into(),
            message: message.into(),
        }
    }
}

fn split_reference(reference: &str) -> (&str, &str) {
    match reference.split_once('#') {
        Some((path, field)) if !field.is_empty() => (path, field),
        Some((path, _)) => (path, DEFAULT_FIELD),
        None => (reference, DEFAULT_FIELD),
    }
}

#[async_trait]
impl SecretProvider for VaultProvider {
    async fn fetch(&self, reference: &str) -> Result<String> {
        let (path, field) = split_reference(reference);
        let url = format!(
            "{}/v1/{}/data/{}",
            self.address,
            self.mount,
            path.trim_start_matches('/')
        );

        let resp = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| self.unavailable(reference, e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(VigilError::SecretNotFound {
                reference: format!("vault:{reference}"),
            });
        }
        if !status.is_success() {
            return Err(self.unavailable(reference, format!("vault answered HTTP {}", status.as_u16())));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| self.unavailable(reference, format!("invalid response body: {e}")))?;

        match body.pointer("/data/data").and_then(|d| d.get(field)) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(VigilError::SecretNotFound {
                reference: format!("vault:{reference}"),
            }),
        }
    }

    fn scheme(&self) -> &str {
        "vault"
    }
}
