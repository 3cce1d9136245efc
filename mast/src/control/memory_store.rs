use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, Notify, RwLock};

use super::errors::StoreError;
use super::traits::SharedStore;
use super::types::{PolicyId, PolicyVersion, RunTermination};
use crate::env::Episode;

/// In-process store for roles running as tasks of one process, and for tests.
///
/// Episodes sit in a single FIFO queue, so each actor's episodes reach the
/// trainer in the order that actor published them.
#[derive(Default)]
pub struct MemoryStore {
    episodes: Mutex<VecDeque<Episode>>,
    episode_ready: Notify,
    /// Per actor, one past the highest episode id published.
    next_ids: Mutex<HashMap<u32, u64>>,
    policy: RwLock<Option<PolicyVersion>>,
    termination: RwLock<Option<RunTermination>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Episodes published but not yet consumed.
    pub async fn pending_episodes(&self) -> usize {
        self.episodes.lock().await.len()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn publish_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        let mut next_ids = self.next_ids.lock().await;
        let next = next_ids.entry(episode.task_id()).or_default();
        if episode.episode_id() < *next {
            return Err(StoreError::DuplicateEpisode {
                task_id: episode.task_id(),
                episode_id: episode.episode_id(),
            });
        }
        *next = episode.episode_id() + 1;
        self.episodes.lock().await.push_back(episode.clone());
        self.episode_ready.notify_one();
        Ok(())
    }

    async fn next_episode_id(&self, task_id: u32) -> Result<u64, StoreError> {
        Ok(self
            .next_ids
            .lock()
            .await
            .get(&task_id)
            .copied()
            .unwrap_or_default())
    }

    async fn next_episode(&self) -> Result<Episode, StoreError> {
        loop {
            if let Some(episode) = self.episodes.lock().await.pop_front() {
                return Ok(episode);
            }
            // notify_one leaves a permit behind when nobody is waiting, so a
            // publish between the pop above and this await is not missed.
            self.episode_ready.notified().await;
        }
    }

    async fn latest_policy_id(&self) -> Result<Option<PolicyId>, StoreError> {
        Ok(self.policy.read().await.as_ref().map(|p| p.id))
    }

    async fn load_latest_policy(&self) -> Result<Option<PolicyVersion>, StoreError> {
        Ok(self.policy.read().await.clone())
    }

    async fn save_policy(&self, policy: &PolicyVersion) -> Result<(), StoreError> {
        let mut slot = self.policy.write().await;
        if let Some(latest) = slot.as_ref() {
            if policy.id <= latest.id {
                return Err(StoreError::NonMonotonicPolicy {
                    latest: latest.id,
                    attempted: policy.id,
                });
            }
        }
        *slot = Some(policy.clone());
        Ok(())
    }

    async fn signal_end_of_run(&self, termination: &RunTermination) -> Result<(), StoreError> {
        let mut slot = self.termination.write().await;
        if slot.is_none() {
            *slot = Some(termination.clone());
        }
        Ok(())
    }

    async fn run_termination(&self) -> Result<Option<RunTermination>, StoreError> {
        Ok(self.termination.read().await.clone())
    }
}
