use thiserror::Error;

use crate::error::RoleError;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Role(#[from] RoleError),

    /// The role's task ended without reporting, which means it panicked or
    /// the runtime shut down under it.
    #[error("role task canceled")]
    Canceled,
}

impl From<tokio::sync::oneshot::error::RecvError> for ClusterError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ClusterError::Canceled
    }
}
