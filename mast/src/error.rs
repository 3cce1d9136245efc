use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::control::StoreError;
use crate::core::UnitMismatchError;
use crate::env::EnvError;
use crate::learner::ModelError;
use crate::run::RoleKind;

/// A condition that ends a role's loop and surfaces to the orchestrator.
#[derive(Error, Debug)]
pub enum RoleError {
    #[error(transparent)]
    UnitMismatch(#[from] UnitMismatchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("the {0} role needs an environment")]
    MissingEnvironment(RoleKind),

    #[error("gave up after {attempts} attempts to {operation}: {source}")]
    SetupExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}
