//! `vigil.toml` plus `VIGIL_*` environment overrides, read once at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_resolve::Environment;
use vigil_scheduler::{BackoffPolicy, SchedulerConfig};

pub const CONFIG_FILE: &str = "vigil.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub tick_secs: u64,
    pub workers: usize,
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_secs: 15,
            workers: 4,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Targets and variables for running plans locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSection {
    pub targets: BTreeMap<String, String>,
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Applied to plans without `timeoutMs`, and to hub requests.
    pub request_timeout_ms: u64,
    pub provider_timeout_ms: u64,
    /// Hand non-2xx/3xx responses to assertions instead of failing the node.
    pub accept_all_statuses: bool,
    /// Overrides the URL stored by `vigil connect`.
    pub hub_url: Option<String>,
    pub credentials_path: Option<PathBuf>,
    /// Registers the `envfile:` secret scheme.
    pub env_file: Option<PathBuf>,
    pub scheduler: SchedulerSection,
    pub environments: BTreeMap<String, EnvironmentSection>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: vigil_plan::DEFAULT_TIMEOUT_MS,
            provider_timeout_ms: vigil_resolve::DEFAULT_PROVIDER_TIMEOUT.as_millis() as u64,
            accept_all_statuses: false,
            hub_url: None,
            credentials_path: None,
            env_file: None,
            scheduler: SchedulerSection::default(),
            environments: BTreeMap::new(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {name}={raw:?}: {e}"))
}

impl VigilConfig {
    /// Read `path`, or `./vigil.toml` when it exists, else defaults; then
    /// apply `VIGIL_*` overrides from the process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `VIGIL_*` variables as returned by `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(v) = lookup("VIGIL_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_var("VIGIL_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("VIGIL_PROVIDER_TIMEOUT_MS") {
            self.provider_timeout_ms = parse_var("VIGIL_PROVIDER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("VIGIL_ACCEPT_ALL_STATUSES") {
            self.accept_all_statuses = parse_var("VIGIL_ACCEPT_ALL_STATUSES", &v)?;
        }
        if let Some(v) = lookup("VIGIL_HUB_URL") {
            self.hub_url = Some(v);
        }
        if let Some(v) = lookup("VIGIL_CREDENTIALS") {
            self.credentials_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VIGIL_ENV_FILE") {
            self.env_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VIGIL_TICK_SECS") {
            self.scheduler.tick_secs = parse_var("VIGIL_TICK_SECS", &v)?;
        }
        if let Some(v) = lookup("VIGIL_WORKERS") {
            self.scheduler.workers = parse_var("VIGIL_WORKERS", &v)?;
        }
        if let Some(v) = lookup("VIGIL_MAX_RETRIES") {
            self.scheduler.max_retries = parse_var("VIGIL_MAX_RETRIES", &v)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        let s = &self.scheduler;
        SchedulerConfig {
            tick: Duration::from_secs(s.tick_secs.max(1)),
            workers: s.workers.max(1),
            max_retries: s.max_retries,
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(s.backoff_base_ms),
                max: Duration::from_millis(s.backoff_max_ms),
            },
            ..SchedulerConfig::default()
        }
    }

    /// The local environment `name`: `base_targets` (typically from the
    /// project state file) overlaid with this config's targets and variables.
    pub fn environment(&self, name: &str, base_targets: &BTreeMap<String, String>) -> Environment {
        let mut env = Environment::new(name);
        env.targets = base_targets.clone();
        if let Some(section) = self.environments.get(name) {
            env.targets.extend(section.targets.clone());
            env.variables = Value::Object(section.variables.clone().into_iter().collect());
        }
        env
    }
}

impl fmt::Display for VigilConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "request timeout:  {}ms", self.request_timeout_ms)?;
        writeln!(f, "provider timeout: {}ms", self.provider_timeout_ms)?;
        writeln!(
            f,
            "scheduler:        tick {}s, {} workers, {} retries",
            self.scheduler.tick_secs, self.scheduler.workers, self.scheduler.max_retries
        )?;
        let envs: Vec<&str> = self.environments.keys().map(String::as_str).collect();
        write!(f, "environments:     {}", if envs.is_empty() { "-".to_string() } else { envs.join(", ") })
    }
}
