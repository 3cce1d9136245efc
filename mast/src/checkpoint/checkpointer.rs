//! Durable trainer snapshots for crash recovery.
//!
//! Checkpoints are never read by actors or evaluators; they only let a
//! restarted trainer resume from its last published policy.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use super::errors::CheckpointError;
use crate::control::PolicyVersion;
use crate::core::{StepCount, StepCounter, StepUnit};

/// Everything a trainer needs to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub policy: PolicyVersion,
    pub model_state: Vec<u8>,
    pub counter: StepCounter,
    /// Fetched experience at the last publish.
    pub last_publish: StepCount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory to store checkpoints.
    pub dir: PathBuf,
    /// Training steps that must pass between two checkpoints.
    pub save_every: u64,
    /// Number of recent checkpoints to keep (0 = keep all).
    pub keep_last_n: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./checkpoints"),
            save_every: 1,
            keep_last_n: 5,
        }
    }
}

impl CheckpointConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_save_every(mut self, training_steps: u64) -> Self {
        self.save_every = training_steps;
        self
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub policy_id: u64,
    pub training_steps: u64,
}

/// Sink for trainer checkpoints.
pub trait Checkpointer: Send {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<CheckpointInfo, CheckpointError>;
    fn load_latest(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Training steps that must pass between two checkpoints.
    fn save_every(&self) -> u64 {
        1
    }
}

/// Writes one JSON file per checkpoint and prunes old ones, including those
/// left behind by earlier instances on the same directory.
pub struct FileCheckpointer {
    config: CheckpointConfig,
}

impl FileCheckpointer {
    /// Creates the checkpoint directory if it doesn't exist.
    pub fn new(config: CheckpointConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self { config })
    }

    fn file_name(policy_id: u64, training_steps: u64) -> String {
        format!("checkpoint_{policy_id:012}_{training_steps:012}.json")
    }

    fn parse_file_name(name: &str) -> Option<(u64, u64)> {
        let stem = name.strip_prefix("checkpoint_")?.strip_suffix(".json")?;
        let (policy, steps) = stem.split_once('_')?;
        Some((policy.parse().ok()?, steps.parse().ok()?))
    }

    /// Checkpoints on disk, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut found: Vec<CheckpointInfo> = fs::read_dir(&self.config.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_name()?.to_str()?;
                let (policy_id, training_steps) = Self::parse_file_name(name)?;
                Some(CheckpointInfo {
                    path: path.clone(),
                    policy_id,
                    training_steps,
                })
            })
            .collect();
        found.sort_by_key(|info| (info.policy_id, info.training_steps));
        Ok(found)
    }

    /// Deletes all but the newest `keep_last_n` checkpoints. `just_saved` is
    /// never deleted.
    fn cleanup_old_checkpoints(&self, just_saved: &CheckpointInfo) -> Result<(), CheckpointError> {
        if self.config.keep_last_n == 0 {
            return Ok(());
        }
        let found = self.list()?;
        let excess = found.len().saturating_sub(self.config.keep_last_n);
        for oldest in found.into_iter().take(excess) {
            if oldest.path == just_saved.path {
                continue;
            }
            match fs::remove_file(&oldest.path) {
                Ok(()) => {}
                // Another trainer instance pruned it first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Checkpointer for FileCheckpointer {
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<CheckpointInfo, CheckpointError> {
        let training_steps = checkpoint.counter.get(StepUnit::TrainingSteps);
        let name = Self::file_name(checkpoint.policy.id, training_steps);
        let path = self.config.dir.join(&name);
        let tmp = self.config.dir.join(format!(".{name}.tmp"));

        fs::write(&tmp, serde_json::to_vec(checkpoint)?)?;
        fs::rename(&tmp, &path)?;

        let info = CheckpointInfo {
            path,
            policy_id: checkpoint.policy.id,
            training_steps,
        };
        self.cleanup_old_checkpoints(&info)?;
        Ok(info)
    }

    fn load_latest(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        match self.list()?.pop() {
            Some(latest) => {
                let bytes = fs::read(&latest.path)?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn save_every(&self) -> u64 {
        self.config.save_every.max(1)
    }
}
