use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use vigil_plan::SecretRef;
use vigil_types::{Result, VigilError};

/// Default bound on a single provider fetch.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// SecretProvider
// ---------------------------------------------------------------------------

/// A backend that turns an opaque reference into a secret value.
///
/// Implementations fail with `SecretNotFound` when the backend answered but
/// has no such secret, and `ProviderUnavailable` when the backend could not be
/// asked.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<String>;
    /// Scheme that selects this provider in `{{ secret:<scheme>:<ref> }}`.
    fn scheme(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DynSecretProvider
// ---------------------------------------------------------------------------

pub struct DynSecretProvider(Box<dyn SecretProvider>);

impl DynSecretProvider {
    pub fn new(provider: impl SecretProvider + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn fetch(&self, reference: &str) -> Result<String> {
        self.0.fetch(reference).await
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }
}

// ---------------------------------------------------------------------------
// SecretRegistry
// ---------------------------------------------------------------------------

/// Providers keyed by scheme, with a per-fetch timeout.
pub struct SecretRegistry {
    providers: HashMap<String, DynSecretProvider>,
    timeout: Duration,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(&mut self, provider: impl SecretProvider + 'static) {
        let scheme = provider.scheme().to_string();
        self.providers.insert(scheme, DynSecretProvider::new(provider));
    }

    pub fn with_provider(mut self, provider: impl SecretProvider + 'static) -> Self {
        self.register(provider);
        self
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Fetch one secret, bounded by the registry timeout.
    pub async fn fetch(&self, secret: &SecretRef) -> Result<String> {
        let provider = self.providers.get(&secret.scheme).ok_or_else(|| {
            VigilError::ProviderUnavailable {
                provider: secret.scheme.clone(),
                reference: secret.reference.clone(),
                message: "no provider registered for scheme".into(),
            }
        })?;

        tracing::debug!(scheme = %secret.scheme, reference = %secret.reference, "fetching secret");
        match tokio::time::timeout(self.timeout, provider.fetch(&secret.reference)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    scheme = %secret.scheme,
                    reference = %secret.reference,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "secret fetch timed out"
                );
                Err(VigilError::ProviderUnavailable {
                    provider: secret.scheme.clone(),
                    reference: secret.reference.clone(),
                    message: format!("timed out after {}ms", self.timeout.as_millis()),
                })
            }
        }
    }
}

impl Default for SecretRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
