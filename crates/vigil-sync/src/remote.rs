//! The remote side of sync: where applied plan definitions are stored.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use vigil_types::{Result, VigilError};

use crate::credentials::Credentials;

/// What the hub returns for a stored plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlan {
    pub id: String,
    pub name: String,
}

/// Remote plan storage keyed by plan id.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// The stored plan for `(project, environment, name)`, if any.
    async fn find_plan(
        &self,
        project: &str,
        environment: &str,
        name: &str,
    ) -> Result<Option<RemotePlan>>;
    async fn create_plan(&self, environment: &str, definition: &Value) -> Result<RemotePlan>;
    async fn update_plan(
        &self,
        plan_id: &str,
        environment: &str,
        definition: &Value,
    ) -> Result<RemotePlan>;
    fn name(&self) -> &str;
}

fn plan_name(definition: &Value) -> String {
    definition["name"].as_str().unwrap_or_default().to_string()
}

// ---------------------------------------------------------------------------
// HubClient
// ---------------------------------------------------------------------------

/// Talks to the hub's plan API with a bearer token.
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self> {
        let hub = creds.hub()?;
        Ok(Self::new(&hub.url, &hub.token))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        // Building a client only fails when the TLS backend cannot initialise.
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
        }
        self
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        plan: &str,
    ) -> Result<T> {
        let conflict = |message: String| VigilError::SyncConflict {
            plan: plan.to_string(),
            message,
        };
        // Error text leaves the URL out.
        let resp = builder
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| conflict(e.without_url().to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| conflict(e.without_url().to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(String::from))
                .unwrap_or(body);
            return Err(conflict(format!("hub answered {}: {message}", status.as_u16())));
        }
        serde_json::from_str(&body).map_err(|e| conflict(format!("unreadable hub response: {e}")))
    }
}

#[async_trait]
impl PlanStore for HubClient {
    async fn find_plan(
        &self,
        project: &str,
        environment: &str,
        name: &str,
    ) -> Result<Option<RemotePlan>> {
        let builder = self
            .client
            .get(format!("{}/v1/plans", self.base_url))
            .query(&[("project", project), ("environment", environment), ("name", name)]);
        let found: Vec<RemotePlan> = self.send(builder, name).await?;
        Ok(found.into_iter().next())
    }

    async fn create_plan(&self, environment: &str, definition: &Value) -> Result<RemotePlan> {
        let builder = self
            .client
            .post(format!("{}/v1/plans", self.base_url))
            .json(&json!({"environment": environment, "definition": definition}));
        self.send(builder, &plan_name(definition)).await
    }

    async fn update_plan(
        &self,
        plan_id: &str,
        environment: &str,
        definition: &Value,
    ) -> Result<RemotePlan> {
        let builder = self
            .client
            .put(format!("{}/v1/plans/{plan_id}", self.base_url))
            .json(&json!({"environment": environment, "definition": definition}));
        self.send(builder, &plan_name(definition)).await
    }

    fn name(&self) -> &str {
        "hub"
    }
}

// ---------------------------------------------------------------------------
// InMemoryPlanStore
// ---------------------------------------------------------------------------

/// Keeps definitions in memory and counts writes.
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    plans: Mutex<BTreeMap<String, (String, Value)>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    lose_responses: AtomicBool,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/update calls applied to the store.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following write fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Apply every following write but report it as failed, as when the
    /// hub's answer never arrives.
    pub fn set_losing_responses(&self, losing: bool) {
        self.lose_responses.store(losing, Ordering::SeqCst);
    }

    pub fn get(&self, plan_id: &str) -> Option<Value> {
        self.lock().get(plan_id).map(|(_, def)| def.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, (String, Value)>> {
        self.plans.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self, definition: &Value) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VigilError::SyncConflict {
                plan: plan_name(definition),
                message: "store unavailable".into(),
            });
        }
        Ok(())
    }

    fn answer(&self, plan: RemotePlan) -> Result<RemotePlan> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.lose_responses.load(Ordering::SeqCst) {
            return Err(VigilError::SyncConflict {
                plan: plan.name,
                message: "response lost".into(),
            });
        }
        Ok(plan)
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn find_plan(
        &self,
        project: &str,
        environment: &str,
        name: &str,
    ) -> Result<Option<RemotePlan>> {
        Ok(self
            .lock()
            .iter()
            .find(|(_, (env, def))| {
                env == environment && def["project"] == project && def["name"] == name
            })
            .map(|(id, (_, def))| RemotePlan {
                id: id.clone(),
                name: plan_name(def),
            }))
    }

    async fn create_plan(&self, environment: &str, definition: &Value) -> Result<RemotePlan> {
        self.check_available(definition)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.lock()
            .insert(id.clone(), (environment.to_string(), definition.clone()));
        self.answer(RemotePlan {
            id,
            name: plan_name(definition),
        })
    }

    async fn update_plan(
        &self,
        plan_id: &str,
        environment: &str,
        definition: &Value,
    ) -> Result<RemotePlan> {
        self.check_available(definition)?;
        let mut plans = self.lock();
        let slot = plans.get_mut(plan_id).ok_or_else(|| VigilError::NotFound {
            kind: "plan".into(),
            id: plan_id.to_string(),
        })?;
        *slot = (environment.to_string(), definition.clone());
        drop(plans);
        self.answer(RemotePlan {
            id: plan_id.to_string(),
            name: plan_name(definition),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
