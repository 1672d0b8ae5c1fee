//! Built-in secret providers.

use std::path::PathBuf;
use std::time::Duration;

use crate::SecretRegistry;

mod env;
mod envfile;
mod gcp;
mod vault;

pub use env::EnvProvider;
pub use envfile::EnvFileProvider;
pub use gcp::GcpSecretManagerProvider;
pub use vault::VaultProvider;

/// Registry with `env` always available, `envfile` when a file is given, and
/// `vault`/`gcp` when their credentials are present in the environment.
pub fn default_registry(timeout: Duration, env_file: Option<PathBuf>) -> SecretRegistry {
    let mut registry = SecretRegistry::new().with_timeout(timeout);
    registry.register(EnvProvider);
    if let Some(path) = env_file {
        registry.register(EnvFileProvider::new(path));
    }
    if let Ok(vault) = VaultProvider::from_env() {
        registry.register(vault.with_request_timeout(timeout));
    }
    if let Ok(gcp) = GcpSecretManagerProvider::from_env() {
        registry.register(gcp);
    }
    tracing::debug!(schemes = ?registry.schemes(), "secret providers registered");
    registry
}
