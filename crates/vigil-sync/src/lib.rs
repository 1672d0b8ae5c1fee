//! Client-side sync of local plan definitions to a hub.
//!
//! Each export is hashed over its canonical form ([`content_hash`]) and
//! pushed through a [`PlanStore`] only when the hash differs from the one the
//! project's [`StateFile`] recorded on the last confirmed write.

pub mod credentials;
pub mod engine;
pub mod hash;
pub mod remote;
pub mod state;

pub use credentials::{
    default_credentials_path, load_credentials, save_credentials, Credentials, HubCredentials,
    CREDENTIALS_VERSION,
};
pub use engine::{sync, SyncAction, SyncEngine, SyncFailure, SyncOutcome, SyncReport};
pub use hash::{canonical_json, content_hash, hash_export, HASH_PREFIX};
pub use remote::{HubClient, InMemoryPlanStore, PlanStore, RemotePlan};
pub use state::{
    migrate_state, EnvironmentState, PlanStateEntry, StateFile, StateLock, StateStore,
    STATE_DIR, STATE_FILE, STATE_VERSION,
};
