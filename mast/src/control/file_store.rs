use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use super::errors::StoreError;
use super::traits::SharedStore;
use super::types::{PolicyId, PolicyVersion, RunTermination};
use crate::env::Episode;

const EPISODES_DIR: &str = "episodes";
const POLICIES_DIR: &str = "policies";
const LATEST_FILE: &str = "LATEST";
const CLAIMED_FILE: &str = "CLAIMED";
const END_OF_RUN_FILE: &str = "END_OF_RUN.json";

type ClaimBuffer = Arc<Mutex<VecDeque<Episode>>>;

/// Store backed by a directory shared between processes.
///
/// ```text
/// <root>/episodes/task_<task>/<episode_id>.json
/// <root>/episodes/task_<task>/CLAIMED
/// <root>/policies/policy_<id>.json
/// <root>/policies/LATEST
/// <root>/END_OF_RUN.json
/// ```
///
/// Artifacts are written to a temporary name and moved into place, so a
/// reader never sees a partially written file. Episode files are linked
/// rather than renamed so an existing one is never replaced. `CLAIMED` holds
/// the highest episode id consumed from that actor.
pub struct FileStore {
    root: PathBuf,
    poll_interval: Duration,
    cursor: Arc<AtomicUsize>,
    /// Episodes taken off disk whose waiter was gone before receiving them.
    claimed: ClaimBuffer,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(EPISODES_DIR))?;
        std::fs::create_dir_all(root.join(POLICIES_DIR))?;
        Ok(Self {
            root,
            poll_interval: Duration::from_millis(50),
            cursor: Arc::new(AtomicUsize::new(0)),
            claimed: Arc::default(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: u32) -> PathBuf {
        self.root
            .join(EPISODES_DIR)
            .join(format!("task_{task_id:05}"))
    }

    fn policy_path(&self, id: PolicyId) -> PathBuf {
        self.root
            .join(POLICIES_DIR)
            .join(format!("policy_{id:020}.json"))
    }

    fn temp_path(dir: &Path) -> PathBuf {
        dir.join(format!(".{}.tmp", Uuid::new_v4()))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = path.parent().unwrap_or(Path::new("."));
        let tmp = Self::temp_path(dir);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Like [`Self::write_atomic`] but leaves an existing `path` alone.
    /// Returns whether this call created it.
    async fn write_exclusive(path: &Path, bytes: &[u8]) -> Result<bool, StoreError> {
        let dir = path.parent().unwrap_or(Path::new("."));
        let tmp = Self::temp_path(dir);
        tokio::fs::write(&tmp, bytes).await?;
        // A hard link fails if the target exists.
        let linked = tokio::fs::hard_link(&tmp, path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            warn!(path = %tmp.display(), error = %e, "could not remove temporary file");
        }
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn lock_claimed(
        claimed: &Mutex<VecDeque<Episode>>,
    ) -> Result<MutexGuard<'_, VecDeque<Episode>>, StoreError> {
        claimed
            .lock()
            .map_err(|_| StoreError::Unavailable("episode claim buffer poisoned".to_string()))
    }

    /// Claims one episode off disk on the blocking pool and parks it in the
    /// claim buffer. The claim finishes even if this future is dropped, and
    /// the episode then waits in the buffer for the next caller.
    async fn claim_into_buffer(&self) -> Result<bool, StoreError> {
        let root = self.root.clone();
        let cursor = Arc::clone(&self.cursor);
        let claimed = Arc::clone(&self.claimed);
        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            // Held for the whole claim so concurrent claims keep actor order.
            let mut buffer = Self::lock_claimed(&claimed)?;
            let episode = Self::claim_oldest(&root, &cursor)?;
            let found = episode.is_some();
            buffer.extend(episode);
            Ok(found)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("episode claim task failed: {e}")))?
    }

    /// Takes the oldest episode of the next actor that has one, rotating
    /// across actors between calls. Blocking.
    fn claim_oldest(root: &Path, cursor: &AtomicUsize) -> Result<Option<Episode>, StoreError> {
        let mut task_dirs: Vec<PathBuf> = std::fs::read_dir(root.join(EPISODES_DIR))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        if task_dirs.is_empty() {
            return Ok(None);
        }
        task_dirs.sort();

        let start = cursor.fetch_add(1, Ordering::Relaxed) % task_dirs.len();
        for offset in 0..task_dirs.len() {
            let dir = &task_dirs[(start + offset) % task_dirs.len()];
            let Some((id, path)) = Self::oldest_episode_file(dir)? else {
                continue;
            };
            Self::record_claimed(dir, id)?;
            // Another reader may have taken it; the rename decides who.
            let claim = dir.join(format!(".{}.claim", Uuid::new_v4()));
            match std::fs::rename(&path, &claim) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            let episode: Episode = serde_json::from_slice(&std::fs::read(&claim)?)?;
            std::fs::remove_file(&claim)?;
            return Ok(Some(episode));
        }
        Ok(None)
    }

    fn oldest_episode_file(dir: &Path) -> Result<Option<(u64, PathBuf)>, StoreError> {
        Ok(Self::episode_files(dir)?.min_by_key(|(id, _)| *id))
    }

    fn episode_files(dir: &Path) -> Result<impl Iterator<Item = (u64, PathBuf)>, StoreError> {
        Ok(std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                let id = path.file_stem()?.to_str()?.parse::<u64>().ok()?;
                Some((id, path))
            }))
    }

    fn read_claimed(dir: &Path) -> Result<Option<u64>, StoreError> {
        match std::fs::read(dir.join(CLAIMED_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn record_claimed(dir: &Path, id: u64) -> Result<(), StoreError> {
        if Self::read_claimed(dir)?.is_some_and(|claimed| claimed >= id) {
            return Ok(());
        }
        let tmp = Self::temp_path(dir);
        std::fs::write(&tmp, id.to_string())?;
        std::fs::rename(&tmp, dir.join(CLAIMED_FILE))?;
        Ok(())
    }
}

#[async_trait]
impl SharedStore for FileStore {
    async fn publish_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        let duplicate = StoreError::DuplicateEpisode {
            task_id: episode.task_id(),
            episode_id: episode.episode_id(),
        };
        let dir = self.task_dir(episode.task_id());
        tokio::fs::create_dir_all(&dir).await?;
        if let Some(claimed) = Self::read_json::<u64>(&dir.join(CLAIMED_FILE)).await? {
            if episode.episode_id() <= claimed {
                return Err(duplicate);
            }
        }
        let path = dir.join(format!("{:020}.json", episode.episode_id()));
        if Self::write_exclusive(&path, &Self::to_json(episode)?).await? {
            Ok(())
        } else {
            Err(duplicate)
        }
    }

    async fn next_episode_id(&self, task_id: u32) -> Result<u64, StoreError> {
        let dir = self.task_dir(task_id);
        tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            if !dir.is_dir() {
                return Ok(0);
            }
            let published = Self::episode_files(&dir)?.map(|(id, _)| id).max();
            let used = published.max(Self::read_claimed(&dir)?);
            Ok(used.map_or(0, |id| id + 1))
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("episode id scan failed: {e}")))?
    }

    async fn next_episode(&self) -> Result<Episode, StoreError> {
        loop {
            let parked = Self::lock_claimed(&self.claimed)?.pop_front();
            if let Some(episode) = parked {
                return Ok(episode);
            }
            if !self.claim_into_buffer().await? {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    async fn latest_policy_id(&self) -> Result<Option<PolicyId>, StoreError> {
        Self::read_json(&self.root.join(POLICIES_DIR).join(LATEST_FILE)).await
    }

    async fn load_latest_policy(&self) -> Result<Option<PolicyVersion>, StoreError> {
        match self.latest_policy_id().await? {
            Some(id) => Self::read_json(&self.policy_path(id)).await,
            None => Ok(None),
        }
    }

    async fn save_policy(&self, policy: &PolicyVersion) -> Result<(), StoreError> {
        if let Some(latest) = self.latest_policy_id().await? {
            if policy.id <= latest {
                return Err(StoreError::NonMonotonicPolicy {
                    latest,
                    attempted: policy.id,
                });
            }
        }
        Self::write_atomic(&self.policy_path(policy.id), &Self::to_json(policy)?).await?;
        let latest = self.root.join(POLICIES_DIR).join(LATEST_FILE);
        Self::write_atomic(&latest, &Self::to_json(&policy.id)?).await
    }

    async fn signal_end_of_run(&self, termination: &RunTermination) -> Result<(), StoreError> {
        // Only the first signal is kept.
        Self::write_exclusive(&self.root.join(END_OF_RUN_FILE), &Self::to_json(termination)?)
            .await?;
        Ok(())
    }

    async fn run_termination(&self) -> Result<Option<RunTermination>, StoreError> {
        Self::read_json(&self.root.join(END_OF_RUN_FILE)).await
    }
}
