mod checkpointer;
mod errors;

pub use checkpointer::{Checkpoint, CheckpointConfig, CheckpointInfo, Checkpointer, FileCheckpointer};
pub use errors::CheckpointError;
