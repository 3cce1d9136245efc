mod errors;
mod memory;
mod traits;

pub use errors::ModelError;
pub use memory::EpisodicMemory;
pub use traits::{Model, TrainMetrics};
