use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Environment error: {0}")]
    EnvError(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("episode {episode_id} from task {task_id} has no transitions")]
    EmptyEpisode { task_id: u32, episode_id: u64 },

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),
}
