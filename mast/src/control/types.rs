use crate::env::Episode;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use thiserror::Error;

pub type PolicyId = u64;

/// A published snapshot of policy weights. Higher ids are always newer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub id: PolicyId,
    pub weights: Vec<u8>,
    pub created_at: SystemTime,
}

impl PolicyVersion {
    pub fn new(id: PolicyId, weights: Vec<u8>) -> Self {
        Self {
            id,
            weights,
            created_at: SystemTime::now(),
        }
    }
}

/// Read-only view of the published policy held by actors and evaluators.
///
/// A view only ever moves forward: versions that are not strictly newer
/// than the one it holds are refused.
#[derive(Debug, Clone, Default)]
pub struct PolicyView {
    current: Option<PolicyVersion>,
    loads: u64,
}

impl PolicyView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<PolicyId> {
        self.current.as_ref().map(|p| p.id)
    }

    pub fn current(&self) -> Option<&PolicyVersion> {
        self.current.as_ref()
    }

    /// Number of versions adopted so far.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    pub fn is_behind(&self, latest: PolicyId) -> bool {
        self.id().is_none_or(|id| id < latest)
    }

    pub fn adopt(&mut self, version: PolicyVersion) -> bool {
        if !self.is_behind(version.id) {
            return false;
        }
        self.current = Some(version);
        self.loads += 1;
        true
    }
}

/// An episode produced by a policy other than the trainer's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "episode {episode_id} from actor {task_id} was produced by policy {episode_policy}, trainer is at policy {trainer_policy}"
)]
pub struct StaleEpisode {
    pub task_id: u32,
    pub episode_id: u64,
    pub episode_policy: PolicyId,
    pub trainer_policy: PolicyId,
}

/// The trainer's handle on the policy id sequence. Only the trainer holds
/// one, so it is the only place new ids are minted.
#[derive(Debug, Clone)]
pub struct PolicyPublisher {
    latest: PolicyVersion,
}

impl PolicyPublisher {
    pub(crate) fn new(baseline: PolicyVersion) -> Self {
        Self { latest: baseline }
    }

    pub fn latest_id(&self) -> PolicyId {
        self.latest.id
    }

    pub fn latest(&self) -> &PolicyVersion {
        &self.latest
    }

    pub fn check_fresh(&self, episode: &Episode) -> Result<(), StaleEpisode> {
        if episode.policy_id() == self.latest.id {
            Ok(())
        } else {
            Err(StaleEpisode {
                task_id: episode.task_id(),
                episode_id: episode.episode_id(),
                episode_policy: episode.policy_id(),
                trainer_policy: self.latest.id,
            })
        }
    }

    /// The version that would follow the latest one. Nothing changes until
    /// it is committed.
    pub(crate) fn next_version(&self, weights: Vec<u8>) -> PolicyVersion {
        PolicyVersion::new(self.latest.id + 1, weights)
    }

    pub(crate) fn commit(&mut self, version: PolicyVersion) {
        debug_assert!(version.id > self.latest.id);
        self.latest = version;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    SuccessRateReached {
        success_rate: f64,
        episodes: u64,
        policy_id: PolicyId,
    },
    TrainingBudgetExhausted {
        training_steps: u64,
        policy_id: PolicyId,
    },
}

/// The end-of-run signal and why it was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTermination {
    pub reason: TerminationReason,
    pub signalled_by: String,
    pub signalled_at: SystemTime,
}

impl RunTermination {
    pub fn new(reason: TerminationReason, signalled_by: impl Into<String>) -> Self {
        Self {
            reason,
            signalled_by: signalled_by.into(),
            signalled_at: SystemTime::now(),
        }
    }
}
