mod errors;
mod traits;
mod types;

pub use errors::EnvError;
pub use traits::Environment;
pub use types::{Action, Episode, EpisodeBuffer, Observation, Transition};
