//! Loading plan files from disk.
//!
//! A plan file (`*.plan.json`) holds either a single plan, exported as
//! `default`, or an object mapping export names to plans. Every export is
//! migrated to the current version before it is deserialised.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;

use vigil_types::{Result, VigilError};

use crate::migrate::migrate_to_latest;
use crate::model::Plan;

pub const PLAN_FILE_GLOB: &str = "**/*.plan.json";
pub const DEFAULT_EXPORT: &str = "default";

/// Directories never searched for plan files.
const SKIP_DIRS: &[&str] = &["target", "node_modules"];

/// One exported plan from a plan file.
#[derive(Debug, Clone)]
pub struct PlanDefinition {
    /// Path of the file, relative to the project root when discovered.
    pub local_path: String,
    pub export_name: String,
    /// The migrated JSON document, used for content hashing.
    pub raw: Value,
    pub plan: Plan,
}

impl PlanDefinition {
    pub fn from_raw(local_path: impl Into<String>, export_name: impl Into<String>, raw: Value) -> Result<Self> {
        let local_path = local_path.into();
        let export_name = export_name.into();
        let raw = migrate_to_latest(raw)?;
        let plan: Plan = serde_json::from_value(raw.clone()).map_err(|e| {
            VigilError::schema(format!("{local_path}#{export_name}"), e.to_string())
        })?;
        Ok(Self {
            local_path,
            export_name,
            raw,
            plan,
        })
    }
}

/// Split a plan document into `(export name, raw plan)` pairs.
pub fn exports(doc: Value, context: &str) -> Result<Vec<(String, Value)>> {
    match doc {
        Value::Object(map) if map.contains_key("version") => {
            Ok(vec![(DEFAULT_EXPORT.to_string(), Value::Object(map))])
        }
        Value::Object(map) => {
            if map.is_empty() {
                return Err(VigilError::schema(context, "file exports no plans"));
            }
            map.into_iter()
                .map(|(name, plan)| match plan {
                    Value::Object(_) => Ok((name, plan)),
                    other => Err(VigilError::schema(
                        format!("{context}#{name}"),
                        format!("export must be a plan object, got {other}"),
                    )),
                })
                .collect()
        }
        other => Err(VigilError::schema(
            context,
            format!("expected a plan object, got {other}"),
        )),
    }
}

/// Load and migrate every export in one plan file.
pub async fn load_plan_file(path: &Path) -> Result<Vec<PlanDefinition>> {
    load_with_local_path(path, path.display().to_string()).await
}

async fn load_with_local_path(path: &Path, local_path: String) -> Result<Vec<PlanDefinition>> {
    let text = tokio::fs::read_to_string(path).await?;
    let doc: Value = serde_json::from_str(&text)
        .map_err(|e| VigilError::schema(local_path.clone(), format!("invalid JSON: {e}")))?;
    let defs = exports(doc, &local_path)?
        .into_iter()
        .map(|(export, raw)| PlanDefinition::from_raw(local_path.clone(), export, raw))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(file = %local_path, exports = defs.len(), "loaded plan file");
    Ok(defs)
}

/// Find every `*.plan.json` file under `root`, sorted.
pub async fn discover_plans(root: &Path) -> Result<Vec<PathBuf>> {
    let set = plan_glob_set()?;
    let mut matches = Vec::new();
    collect_plan_files(root, root, &set, &mut matches).await?;
    matches.sort();
    Ok(matches)
}

/// Discover and load every plan under `root`; `local_path` is relative to it.
pub async fn load_project(root: &Path) -> Result<Vec<PlanDefinition>> {
    let mut defs = Vec::new();
    for file in discover_plans(root).await? {
        let rel = file.strip_prefix(root).unwrap_or(&file);
        let local = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        defs.extend(load_with_local_path(&file, local).await?);
    }
    Ok(defs)
}

fn plan_glob_set() -> Result<GlobSet> {
    let glob = Glob::new(PLAN_FILE_GLOB).map_err(|e| VigilError::Other(e.to_string()))?;
    let mut builder = GlobSetBuilder::new();
    builder.add(glob);
    builder.build().map_err(|e| VigilError::Other(e.to_string()))
}

async fn collect_plan_files(
    base: &Path,
    current: &Path,
    set: &GlobSet,
    matches: &mut Vec<PathBuf>,
) -> Result<()> {
    let meta = tokio::fs::metadata(current).await?;
    if meta.is_file() {
        if let Ok(rel) = current.strip_prefix(base) {
            if set.is_match(rel) {
                matches.push(current.to_path_buf());
            }
        }
    } else if meta.is_dir() {
        if current != base {
            let name = current.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') || SKIP_DIRS.contains(&name) {
                return Ok(());
            }
        }
        let mut read_dir = tokio::fs::read_dir(current).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            Box::pin(collect_plan_files(base, &entry.path(), set, matches)).await?;
        }
    }
    Ok(())
}
