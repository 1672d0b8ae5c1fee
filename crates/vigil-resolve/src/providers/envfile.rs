use std::path::{Path, PathBuf};

use async_trait::async_trait;

use vigil_types::{Result, VigilError};

use crate::SecretProvider;

/// Reads secrets from a dotenv-style file: `{{ secret:envfile:DB_PASSWORD }}`.
///
/// The file is re-read on every fetch so edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct EnvFileProvider {
    path: PathBuf,
}

impl EnvFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reference: &str, message: String) -> VigilError {
        VigilError::ProviderUnavailable {
            provider: "envfile".into(),
            reference: reference.into(),
            message,
        }
    }
}

#[async_trait]
impl SecretProvider for EnvFileProvider {
    async fn fetch(&self, reference: &str) -> Result<String> {
        let path = self.path.clone();
        let key = reference.to_string();
        let lookup = tokio::task::spawn_blocking(move || -> std::result::Result<Option<String>, String> {
            let iter = dotenvy::from_path_iter(&path).map_err(|e| e.to_string())?;
            for item in iter {
                let (k, v) = item.map_err(|e| e.to_string())?;
                if k == key {
                    return Ok(Some(v));
                }
            }
            Ok(None)
        })
        .await
        .map_err(|e| self.unavailable(reference, e.to_string()))?;

        match lookup {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(VigilError::SecretNotFound {
                reference: format!("envfile:{reference}"),
            }),
            Err(message) => Err(self.unavailable(
                reference,
                format!("{}: {message}", self.path.display()),
            )),
        }
    }

    fn scheme(&self) -> &str {
        "envfile"
    }
}
