//! CLI binary for validating, syncing and running Vigil monitor plans.

mod config;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use vigil_engine::PlanExecutor;
use vigil_http::LiveAdapter;
use vigil_plan::{discover_plans, load_plan_file, load_project, validate, PlanDefinition, Severity};
use vigil_resolve::{default_registry, resolve};
use vigil_scheduler::{
    Coordinator, InMemoryJobQueue, InMemoryPlanRepository, InMemoryRunRepository, JobRunner,
    PlanRepository, SchedulerHandle, StoredPlan,
};
use vigil_sync::{
    default_credentials_path, load_credentials, save_credentials, HubClient, StateFile, StateStore,
    SyncAction, SyncEngine,
};
use vigil_types::{RunResult, RunStatus};

use crate::config::VigilConfig;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Synthetic HTTP monitors as versioned plans")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./vigil.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the hub endpoint and token for this user
    Connect {
        /// Hub base URL
        url: String,

        /// API token
        #[arg(long)]
        token: String,
    },

    /// Show the configured hub and this project's sync state
    Status {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Discover and validate every plan under a directory
    Validate {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Push changed plans to the hub
    #[command(alias = "deploy")]
    Sync {
        /// Target environment (default: the state file's, else each plan's own)
        #[arg(short, long)]
        env: Option<String>,

        /// Project directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Execute one plan once against live endpoints and print the verdict
    Run {
        /// Path to the plan file
        file: PathBuf,

        /// Export to run, for files exporting several plans
        #[arg(long)]
        export: Option<String>,

        /// Environment whose targets and variables to use (default: the plan's own)
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Run every plan in a directory on its own frequency until interrupted
    Schedule {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Environment to run in (default: each plan's own)
        #[arg(short, long)]
        env: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = VigilConfig::load(cli.config.as_deref())?;
    tracing::debug!(config = %config, "Configuration loaded");

    match cli.command {
        Commands::Connect { url, token } => cmd_connect(&config, &url, &token).await?,
        Commands::Status { dir } => cmd_status(&config, &dir).await?,
        Commands::Validate { dir } => cmd_validate(&dir).await?,
        Commands::Sync { env, dir } => cmd_sync(&config, &dir, env.as_deref()).await?,
        Commands::Run { file, export, env } => {
            cmd_run(&config, &file, export.as_deref(), env.as_deref()).await?
        }
        Commands::Schedule { dir, env } => cmd_schedule(&config, &dir, env.as_deref()).await?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// connect / status
// ---------------------------------------------------------------------------

fn credentials_path(config: &VigilConfig) -> anyhow::Result<PathBuf> {
    config
        .credentials_path
        .clone()
        .or_else(default_credentials_path)
        .ok_or_else(|| anyhow::anyhow!("no config directory available; set VIGIL_CREDENTIALS"))
}

/// `abcd…wxyz` for long tokens, `****` otherwise.
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

async fn cmd_connect(config: &VigilConfig, url: &str, token: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid hub URL {url:?}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("hub URL must be http or https, got {}", parsed.scheme());
    }
    if token.trim().is_empty() {
        anyhow::bail!("token must not be empty");
    }

    let path = credentials_path(config)?;
    let mut creds = load_credentials(&path).await?;
    creds.connect(url, token.trim());
    save_credentials(&path, &creds).await?;

    println!("Connected to {}", url.trim_end_matches('/'));
    println!("Credentials: {}", path.display());
    Ok(())
}

async fn cmd_status(config: &VigilConfig, dir: &Path) -> anyhow::Result<()> {
    let path = credentials_path(config)?;
    let creds = load_credentials(&path).await?;
    match (&creds.hub, &config.hub_url) {
        (Some(hub), override_url) => {
            let url = override_url.as_deref().unwrap_or(hub.url.as_str());
            println!("Hub: {url}");
            println!("Token: {}", mask_token(&hub.token));
            println!("Connected: {}", hub.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        (None, Some(url)) => println!("Hub: {url} (no token; run `vigil connect`)"),
        (None, None) => println!("Hub: not configured"),
    }

    let store = StateStore::new(dir);
    match store.load().await? {
        None => println!("\nProject: never synced ({})", store.path().display()),
        Some(state) => {
            println!("\nProject: {}", state.project_id);
            if let Some(env) = &state.default_environment {
                println!("Default environment: {env}");
            }
            for (env, entries) in &state.plans {
                println!("  {env}: {} plan(s)", entries.len());
                for e in entries {
                    println!(
                        "    {}#{} -> {} ({}, {})",
                        e.local_path,
                        e.export_name,
                        e.plan_id,
                        e.plan_name,
                        e.last_applied_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

async fn cmd_validate(dir: &Path) -> anyhow::Result<()> {
    let files = discover_plans(dir).await?;
    if files.is_empty() {
        println!("No plan files under {}", dir.display());
        return Ok(());
    }

    let mut has_error = false;
    let mut plans = 0usize;
    for file in &files {
        let shown = file.strip_prefix(dir).unwrap_or(file).display().to_string();
        let definitions = match load_plan_file(file).await {
            Ok(defs) => defs,
            Err(e) => {
                has_error = true;
                println!("[ERROR] {shown}: {e}");
                continue;
            }
        };
        for def in &definitions {
            plans += 1;
            for diag in validate(&def.plan) {
                has_error |= diag.severity == Severity::Error;
                println!(
                    "[{}] {shown}#{} {}: {}",
                    diag.severity, def.export_name, diag.rule, diag.message
                );
            }
        }
    }

    if has_error {
        std::process::exit(1);
    }
    println!("{plans} plan(s) in {} file(s) are valid", files.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

async fn cmd_sync(config: &VigilConfig, dir: &Path, env: Option<&str>) -> anyhow::Result<()> {
    let creds = load_credentials(&credentials_path(config)?).await?;
    let hub = creds.hub()?;
    let url = config.hub_url.as_deref().unwrap_or(hub.url.as_str());
    let client = HubClient::new(url, &hub.token).with_timeout(config.request_timeout());

    let engine = SyncEngine::new(dir, Arc::new(client));
    let report = engine.sync_all(env).await?;

    for o in &report.outcomes {
        let action = match o.action {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Unchanged => "unchanged",
        };
        println!(
            "  {action:<9} {}#{} ({}) -> {} [{}]",
            o.local_path, o.export_name, o.plan_name, o.plan_id, o.environment
        );
    }
    for f in &report.failures {
        println!("  FAILED    {}#{}: {}", f.local_path, f.export_name, f.message);
    }
    println!(
        "\n{} applied, {} unchanged, {} failed",
        report.applied(),
        report.outcomes.len() - report.applied(),
        report.failures.len()
    );

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Pick `export` from a file's definitions, or its only one.
fn select_export(definitions: Vec<PlanDefinition>, export: Option<&str>) -> anyhow::Result<PlanDefinition> {
    let names: Vec<String> = definitions.iter().map(|d| d.export_name.clone()).collect();
    match export {
        Some(name) => definitions
            .into_iter()
            .find(|d| d.export_name == name)
            .ok_or_else(|| anyhow::anyhow!("no export '{name}'; available: {}", names.join(", "))),
        None if definitions.len() == 1 => definitions
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("file exports no plans")),
        None => anyhow::bail!("file exports several plans; pick one with --export ({})", names.join(", ")),
    }
}

/// Targets recorded for `env` in the state file of the project around `dir`.
async fn state_targets(dir: &Path, env: &str) -> BTreeMap<String, String> {
    match StateStore::new(dir).load().await {
        Ok(Some(StateFile { environments, .. })) => environments
            .get(env)
            .map(|e| e.targets.clone())
            .unwrap_or_default(),
        Ok(None) => BTreeMap::new(),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable state file");
            BTreeMap::new()
        }
    }
}

fn print_run(result: &RunResult) {
    for node in &result.node_results {
        let status = match node.status {
            RunStatus::Passed => "PASS",
            RunStatus::Failed => "FAIL",
            RunStatus::Error => "ERROR",
        };
        let http = node.http_status.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        println!("  [{status}] {} {http} {}ms", node.node_id, node.duration_ms);
        for a in node.assertions.iter().filter(|a| !a.passed) {
            println!(
                "      {} {}: {}",
                a.path,
                a.predicate,
                a.message.as_deref().unwrap_or("did not hold")
            );
        }
        if let Some(err) = &node.error {
            println!("      {err}");
        }
    }
    if let Some(note) = &result.note {
        println!("  {note}");
    }
    let verdict = match result.status {
        RunStatus::Passed => "passed",
        RunStatus::Failed => "failed",
        RunStatus::Error => "error",
    };
    println!(
        "\nVerdict: {verdict} ({}ms)",
        (result.finished_at - result.started_at).num_milliseconds()
    );
}

fn live_executor(config: &VigilConfig) -> PlanExecutor {
    PlanExecutor::new(Arc::new(
        LiveAdapter::new().accept_all_statuses(config.accept_all_statuses),
    ))
}

async fn cmd_run(
    config: &VigilConfig,
    file: &Path,
    export: Option<&str>,
    env: Option<&str>,
) -> anyhow::Result<()> {
    let definitions = load_plan_file(file).await?;
    let mut def = select_export(definitions, export)?;
    vigil_plan::validate_or_raise(&def.plan)?;
    def.plan.timeout_ms.get_or_insert(config.request_timeout_ms);

    let env_name = env.unwrap_or(def.plan.environment.as_str()).to_string();
    let project_dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let environment = config.environment(&env_name, &state_targets(project_dir, &env_name).await);
    let registry = default_registry(config.provider_timeout(), config.env_file.clone());

    println!("Running {} [{}] from {}", def.plan.name, env_name, file.display());
    let resolved = resolve(&def.plan, &environment, &registry).await?;
    let plan_id = format!("{}#{}", def.local_path, def.export_name);
    let result = live_executor(config).run(&plan_id, &resolved).await?;
    print_run(&result);

    if result.status != RunStatus::Passed {
        std::process::exit(1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// schedule
// ---------------------------------------------------------------------------

async fn cmd_schedule(config: &VigilConfig, dir: &Path, env: Option<&str>) -> anyhow::Result<()> {
    let definitions = load_project(dir).await?;
    if definitions.is_empty() {
        anyhow::bail!("no plan files under {}", dir.display());
    }

    let plans = Arc::new(InMemoryPlanRepository::new());
    let mut environments: BTreeSet<(String, String)> = BTreeSet::new();
    for def in definitions {
        vigil_plan::validate_or_raise(&def.plan)
            .with_context(|| format!("{}#{}", def.local_path, def.export_name))?;
        let mut plan = def.plan;
        if let Some(env) = env {
            plan.environment = env.to_string();
        }
        plan.timeout_ms.get_or_insert(config.request_timeout_ms);
        environments.insert((plan.project.clone(), plan.environment.clone()));
        plans.insert_plan(StoredPlan::new(plan)).await?;
    }
    for (project, name) in &environments {
        let targets = state_targets(dir, name).await;
        plans.put_environment(project, config.environment(name, &targets)).await?;
    }

    let scheduler = config.scheduler();
    let runs = Arc::new(InMemoryRunRepository::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let registry = Arc::new(default_registry(config.provider_timeout(), config.env_file.clone()));
    let runner = Arc::new(
        JobRunner::new(plans.clone(), runs, queue.clone(), registry, live_executor(config))
            .with_retries(scheduler.max_retries, scheduler.backoff.clone()),
    );
    let coordinator = Arc::new(Coordinator::new(plans.clone(), queue.clone()).with_tick(scheduler.tick));

    let count = plans.list_plans().await?.len();
    println!(
        "Scheduling {count} plan(s), tick {}s, {} worker(s). Ctrl-C to stop.",
        scheduler.tick.as_secs(),
        scheduler.workers
    );
    let handle = SchedulerHandle::start(&scheduler, coordinator, runner, queue);

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    handle.shutdown().await;
    Ok(())
}
