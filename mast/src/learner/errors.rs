use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model error: {0}")]
    ModelError(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid weights: {0}")]
    InvalidWeights(String),
}
