use super::types::PolicyId;
use crate::core::UnitMismatchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store artifact: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("policy {attempted} is not newer than published policy {latest}")]
    NonMonotonicPolicy { latest: PolicyId, attempted: PolicyId },

    /// Episodes are immutable once published, so an id can only be used once
    /// per actor.
    #[error("episode {episode_id} from task {task_id} was already published")]
    DuplicateEpisode { task_id: u32, episode_id: u64 },

    #[error(transparent)]
    UnitMismatch(#[from] UnitMismatchError),
}

impl StoreError {
    /// Whether the operation may succeed if retried on a later iteration.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}
