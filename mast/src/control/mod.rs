mod errors;
mod file_store;
mod memory_store;
mod traits;
mod types;

pub use errors::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use traits::{EpisodeStream, SharedStore};
pub use types::{
    PolicyId, PolicyPublisher, PolicyVersion, PolicyView, RunTermination, StaleEpisode,
    TerminationReason,
};
