//! Per-user hub credentials, stored outside any project.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use vigil_types::{Result, VigilError};

use crate::state::write_atomic;

pub const CREDENTIALS_VERSION: u32 = 1;
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubCredentials {
    pub url: String,
    pub token: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubCredentials>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            version: CREDENTIALS_VERSION,
            hub: None,
        }
    }
}

impl Credentials {
    /// Point at a hub, replacing any previous endpoint.
    pub fn connect(&mut self, url: impl Into<String>, token: impl Into<String>) {
        self.hub = Some(HubCredentials {
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            updated_at: Utc::now(),
        });
    }

    pub fn hub(&self) -> Result<&HubCredentials> {
        self.hub.as_ref().ok_or_else(|| {
            VigilError::Other("no hub configured; run `vigil connect <url> --token <token>`".into())
        })
    }
}

/// `<platform config dir>/vigil/credentials.json`.
pub fn default_credentials_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "vigil", "vigil").map(|dirs| dirs.config_dir().join(CREDENTIALS_FILE))
}

/// Read credentials; a missing file yields empty credentials.
pub async fn load_credentials(path: &Path) -> Result<Credentials> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Credentials::default());
    }
    let text = tokio::fs::read_to_string(path).await?;
    let creds: Credentials = serde_json::from_str(&text)
        .map_err(|e| VigilError::schema(path.display().to_string(), e.to_string()))?;
    if creds.version > CREDENTIALS_VERSION {
        return Err(VigilError::schema(
            path.display().to_string(),
            format!("unsupported credentials version {}", creds.version),
        ));
    }
    Ok(creds)
}

pub async fn save_credentials(path: &Path, creds: &Credentials) -> Result<()> {
    let json = serde_json::to_string_pretty(creds)?;
    write_atomic(path, json.as_bytes()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tracing::debug!(path = %path.display(), "Credentials saved");
    Ok(())
}
