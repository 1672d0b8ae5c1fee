use async_trait::async_trait;

use vigil_types::{Result, VigilError};

use crate::SecretProvider;

/// Reads secrets from the process environment: `{{ secret:env:API_TOKEN }}`.
#[derive(Debug, Default, Clone)]
pub struct EnvProvider;

#[async_trait]
impl SecretProvider for EnvProvider {
    async fn fetch(&self, reference: &str) -> Result<String> {
        std::env::var(reference).map_err(|_| VigilError::SecretNotFound {
            reference: format!("env:{reference}"),
        })
    }

    fn scheme(&self) -> &str {
        "env"
    }
}
