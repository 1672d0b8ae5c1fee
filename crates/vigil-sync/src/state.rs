//! The per-project state file, `.vigil/state.json`.
//!
//! The state file is the idempotency record for sync: one
//! [`PlanStateEntry`] per `(environment, localPath, exportName)` holding the
//! hash of the last definition the hub confirmed. It is read and written
//! wholesale. Writes go through a temp file and a rename, and only while a
//! [`StateLock`] is held.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use vigil_types::{Result, VigilError};

pub const STATE_VERSION: u32 = 2;
pub const STATE_DIR: &str = ".vigil";
pub const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.json.lock";

// ---------------------------------------------------------------------------
// State model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentState {
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

/// The record of one successfully applied definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStateEntry {
    pub local_path: String,
    pub export_name: String,
    pub plan_name: String,
    pub plan_id: String,
    pub last_applied_hash: String,
    pub last_applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    pub state_version: u32,
    pub project_id: String,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    /// Entries grouped by environment name.
    #[serde(default)]
    pub plans: BTreeMap<String, Vec<PlanStateEntry>>,
}

impl StateFile {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            state_version: STATE_VERSION,
            project_id: project_id.into(),
            environments: BTreeMap::new(),
            default_environment: None,
            runner: None,
            plans: BTreeMap::new(),
        }
    }

    pub fn entry(
        &self,
        environment: &str,
        local_path: &str,
        export_name: &str,
    ) -> Option<&PlanStateEntry> {
        self.plans
            .get(environment)?
            .iter()
            .find(|e| e.local_path == local_path && e.export_name == export_name)
    }

    /// Insert or replace the entry for `(environment, localPath, exportName)`.
    pub fn record(&mut self, environment: &str, entry: PlanStateEntry) {
        let entries = self.plans.entry(environment.to_string()).or_default();
        match entries
            .iter_mut()
            .find(|e| e.local_path == entry.local_path && e.export_name == entry.export_name)
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }
}

// ---------------------------------------------------------------------------
// Version migration
// ---------------------------------------------------------------------------

/// Upgrade a raw state document to [`STATE_VERSION`].
///
/// Version 1 kept a flat `plans` list with an `environment` field on every
/// entry, and named the hash and timestamp `hash` and `appliedAt`.
pub fn migrate_state(mut doc: Value) -> Result<Value> {
    let version = match doc.get("stateVersion") {
        None => 1,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| VigilError::schema("state file", "stateVersion must be a number"))?,
    };
    if version == 0 || version > u64::from(STATE_VERSION) {
        return Err(VigilError::schema(
            "state file",
            format!("unsupported stateVersion {version} (current is {STATE_VERSION})"),
        ));
    }
    if version == 1 {
        doc = state_v1_to_v2(doc)?;
    }
    Ok(doc)
}

fn state_v1_to_v2(doc: Value) -> Result<Value> {
    let Value::Object(mut map) = doc else {
        return Err(VigilError::schema("state file v1", "expected an object"));
    };
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    if let Some(Value::Array(entries)) = map.remove("plans") {
        for entry in entries {
            let Value::Object(mut e) = entry else {
                return Err(VigilError::schema("state file v1", "plan entry must be an object"));
            };
            let env = match e.remove("environment") {
                Some(Value::String(s)) => s,
                _ => {
                    return Err(VigilError::schema(
                        "state file v1",
                        "plan entry is missing 'environment'",
                    ))
                }
            };
            if let Some(hash) = e.remove("hash") {
                e.insert("lastAppliedHash".into(), hash);
            }
            if let Some(at) = e.remove("appliedAt") {
                e.insert("lastAppliedAt".into(), at);
            }
            grouped.entry(env).or_default().push(Value::Object(e));
        }
    }
    map.insert(
        "plans".into(),
        serde_json::to_value(grouped).map_err(VigilError::Json)?,
    );
    map.insert("stateVersion".into(), Value::from(2));
    Ok(Value::Object(map))
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Advisory lock on a project's state file, released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove state lock");
        }
    }
}

/// Reads and writes the state file of the project rooted at `root`.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(STATE_DIR).join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(STATE_DIR).join(LOCK_FILE)
    }

    /// Take the lock, failing with `StateLocked` when another writer holds it.
    ///
    /// The lock file records the holder's pid and start time, so a lock left
    /// by a crashed process can be recognised and deleted by hand.
    pub async fn lock(&self) -> Result<StateLock> {
        let path = self.lock_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = tokio::fs::read_to_string(&path)
                    .await
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "an unknown process".to_string());
                return Err(VigilError::StateLocked {
                    path: path.display().to_string(),
                    holder,
                });
            }
            Err(e) => return Err(e.into()),
        };
        // From here on the lock exists; dropping it removes the file.
        let lock = StateLock { path };
        let owner = format!("pid {} since {}\n", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(owner.as_bytes()).await?;
        file.flush().await?;
        Ok(lock)
    }

    /// Load the state file; `None` when the project has none yet.
    pub async fn load(&self) -> Result<Option<StateFile>> {
        let path = self.path();
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let text = tokio::fs::read_to_string(&path).await?;
        let doc: Value = serde_json::from_str(&text)
            .map_err(|e| VigilError::schema(path.display().to_string(), e.to_string()))?;
        let state = serde_json::from_value(migrate_state(doc)?)
            .map_err(|e| VigilError::schema(path.display().to_string(), e.to_string()))?;
        Ok(Some(state))
    }

    /// Load the state file, or start a fresh one for `project_id`.
    pub async fn load_or_new(&self, project_id: &str) -> Result<StateFile> {
        Ok(self
            .load()
            .await?
            .unwrap_or_else(|| StateFile::new(project_id)))
    }

    /// Replace the state file. Requires the lock.
    pub async fn save(&self, state: &StateFile, _lock: &StateLock) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        write_atomic(&self.path(), json.as_bytes()).await?;
        tracing::debug!(path = %self.path().display(), "State saved");
        Ok(())
    }
}
