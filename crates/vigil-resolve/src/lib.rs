//! Secret and variable resolution.
//!
//! [`resolve`] binds a plan to an [`Environment`]: variables come from the
//! environment's variable map, base URLs from its targets, and secrets from
//! the [`SecretProvider`] registered for each reference's scheme.

pub mod provider;
pub mod providers;
pub mod resolver;

pub use provider::{DynSecretProvider, SecretProvider, SecretRegistry, DEFAULT_PROVIDER_TIMEOUT};
pub use providers::{
    default_registry, EnvFileProvider, EnvProvider, GcpSecretManagerProvider, VaultProvider,
};
pub use resolver::{
    resolve, Environment, ResolvedAssertion, ResolvedNode, ResolvedPlan, ResolvedPredicate,
};
