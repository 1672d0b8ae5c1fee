//! Idempotent push of local plan definitions.
//!
//! A definition is pushed only when its content hash differs from the
//! `lastAppliedHash` recorded for it. The record is updated only after the
//! store confirms the write, so a failed push leaves state as it was.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use vigil_plan::{load_project, validate_or_raise, PlanDefinition};
use vigil_types::{Result, VigilError};

use crate::hash::content_hash;
use crate::remote::PlanStore;
use crate::state::{PlanStateEntry, StateFile, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
}

/// Result of syncing one export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub local_path: String,
    pub export_name: String,
    pub plan_name: String,
    pub environment: String,
    pub plan_id: String,
    pub action: SyncAction,
    pub content_hash: String,
}

impl SyncOutcome {
    /// Whether a remote write happened.
    pub fn applied(&self) -> bool {
        self.action != SyncAction::Unchanged
    }
}

/// An export whose push failed; its state entry was left untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub local_path: String,
    pub export_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub outcomes: Vec<SyncOutcome>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.applied()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Push `definition` to `store` unless `state` already records `content_hash`
/// for it in `environment`. `state` changes only on a confirmed write.
pub async fn sync(
    definition: &PlanDefinition,
    content_hash: &str,
    environment: &str,
    state: &mut StateFile,
    store: &dyn PlanStore,
) -> Result<SyncOutcome> {
    let existing = state.entry(environment, &definition.local_path, &definition.export_name);

    let (action, remote) = match existing {
        Some(entry) if entry.last_applied_hash == content_hash => {
            tracing::debug!(
                plan = %definition.plan.name,
                env = environment,
                "Plan unchanged, skipping"
            );
            return Ok(SyncOutcome {
                local_path: definition.local_path.clone(),
                export_name: definition.export_name.clone(),
                plan_name: entry.plan_name.clone(),
                environment: environment.to_string(),
                plan_id: entry.plan_id.clone(),
                action: SyncAction::Unchanged,
                content_hash: content_hash.to_string(),
            });
        }
        Some(entry) => {
            let plan_id = entry.plan_id.clone();
            let remote = store
                .update_plan(&plan_id, environment, &definition.raw)
                .await?;
            (SyncAction::Updated, remote)
        }
        None => {
            let plan = &definition.plan;
            // A create whose answer was lost leaves the plan on the hub but not
            // in state; adopt it instead of creating it twice.
            match store.find_plan(&plan.project, environment, &plan.name).await? {
                Some(found) => {
                    tracing::info!(
                        plan = %plan.name,
                        env = environment,
                        plan_id = %found.id,
                        "Adopting plan already on the hub"
                    );
                    let remote = store
                        .update_plan(&found.id, environment, &definition.raw)
                        .await?;
                    (SyncAction::Updated, remote)
                }
                None => {
                    let remote = store.create_plan(environment, &definition.raw).await?;
                    (SyncAction::Created, remote)
                }
            }
        }
    };

    state.record(
        environment,
        PlanStateEntry {
            local_path: definition.local_path.clone(),
            export_name: definition.export_name.clone(),
            plan_name: definition.plan.name.clone(),
            plan_id: remote.id.clone(),
            last_applied_hash: content_hash.to_string(),
            last_applied_at: Utc::now(),
        },
    );
    tracing::info!(
        plan = %definition.plan.name,
        env = environment,
        plan_id = %remote.id,
        action = ?action,
        store = store.name(),
        "Plan synced"
    );

    Ok(SyncOutcome {
        local_path: definition.local_path.clone(),
        export_name: definition.export_name.clone(),
        plan_name: definition.plan.name.clone(),
        environment: environment.to_string(),
        plan_id: remote.id,
        action,
        content_hash: content_hash.to_string(),
    })
}

/// Syncs a whole project directory against one store.
pub struct SyncEngine {
    store: Arc<dyn PlanStore>,
    state: StateStore,
}

impl SyncEngine {
    pub fn new(root: impl AsRef<Path>, store: Arc<dyn PlanStore>) -> Self {
        Self {
            store,
            state: StateStore::new(root.as_ref()),
        }
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state
    }

    /// Discover, validate and push every export under the project root.
    ///
    /// The target environment is `environment`, else the state file's
    /// `defaultEnvironment`, else each plan's own `environment`. Every plan is
    /// validated before anything is pushed. State is saved after each
    /// confirmed write; a failed push is reported and the rest continue.
    pub async fn sync_all(&self, environment: Option<&str>) -> Result<SyncReport> {
        let root = self.state.root();
        let definitions = load_project(root).await?;
        for def in &definitions {
            validate_or_raise(&def.plan).map_err(|e| match e {
                VigilError::SchemaError { context, message } => VigilError::SchemaError {
                    context: format!("{}#{} {context}", def.local_path, def.export_name),
                    message,
                },
                other => other,
            })?;
        }

        let lock = self.state.lock().await?;
        let mut state = self.state.load_or_new(&project_id(root)).await?;
        let mut report = SyncReport::default();

        for def in &definitions {
            let env = environment
                .map(str::to_string)
                .or_else(|| state.default_environment.clone())
                .unwrap_or_else(|| def.plan.environment.clone());
            let hash = content_hash(&def.raw);

            match sync(def, &hash, &env, &mut state, self.store.as_ref()).await {
                Ok(outcome) => {
                    if outcome.applied() {
                        self.state.save(&state, &lock).await?;
                    }
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    tracing::warn!(
                        plan = %def.plan.name,
                        env = %env,
                        error = %e,
                        "Sync failed; state left untouched"
                    );
                    report.failures.push(SyncFailure {
                        local_path: def.local_path.clone(),
                        export_name: def.export_name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            plans = definitions.len(),
            applied = report.applied(),
            failed = report.failures.len(),
            "Sync finished"
        );
        Ok(report)
    }
}

/// The project id used for a fresh state file: the root directory's name.
fn project_id(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "default".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryPlanStore;
    use serde_json::json;

    fn definition(name: &str, path: &str) -> PlanDefinition {
        PlanDefinition::from_raw(
            "a.plan.json",
            "default",
            json!({
                "version": 3,
                "name": name,
                "project": "shop",
                "environment": "prod",
                "frequency": {"every": 5, "unit": "minute"},
                "nodes": [{"id": "a", "method": "GET", "targetRef": "api", "path": path}],
                "edges": [{"from": "START", "to": "a"}, {"from": "a", "to": "END"}]
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_then_unchanged_then_update() {
        let store = InMemoryPlanStore::new();
        let mut state = StateFile::new("shop");

        let def = definition("health", "/health");
        let hash = content_hash(&def.raw);
        let first = sync(&def, &hash, "prod", &mut state, &store).await.unwrap();
        assert_eq!(first.action, SyncAction::Created);

        let second = sync(&def, &hash, "prod", &mut state, &store).await.unwrap();
        assert_eq!(second.action, SyncAction::Unchanged);
        assert_eq!(second.plan_id, first.plan_id);
        assert_eq!(store.writes(), 1);

        let changed = definition("health", "/healthz");
        let new_hash = content_hash(&changed.raw);
        assert_ne!(new_hash, hash);
        let third = sync(&changed, &new_hash, "prod", &mut state, &store).await.unwrap();
        assert_eq!(third.action, SyncAction::Updated);
        assert_eq!(third.plan_id, first.plan_id);
        assert_eq!(
            state.entry("prod", "a.plan.json", "default").unwrap().last_applied_hash,
            new_hash
        );
    }

    #[tokio::test]
    async fn failed_write_leaves_state_untouched() {
        let store = InMemoryPlanStore::new();
        let mut state = StateFile::new("shop");
        let def = definition("health", "/health");
        let hash = content_hash(&def.raw);
        sync(&def, &hash, "prod", &mut state, &store).await.unwrap();
        let before = state.clone();

        store.set_failing(true);
        let changed = definition("health", "/healthz");
        let err = sync(&changed, &content_hash(&changed.raw), "prod", &mut state, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::SyncConflict { .. }));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn environments_are_tracked_separately() {
        let store = InMemoryPlanStore::new();
        let mut state = StateFile::new("shop");
        let def = definition("health", "/health");
        let hash = content_hash(&def.raw);
        let prod = sync(&def, &hash, "prod", &mut state, &store).await.unwrap();
        let dev = sync(&def, &hash, "dev", &mut state, &store).await.unwrap();
        assert_eq!(dev.action, SyncAction::Created);
        assert_ne!(dev.plan_id, prod.plan_id);
        assert_eq!(store.writes(), 2);
    }
}
