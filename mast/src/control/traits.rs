use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use super::errors::StoreError;
use super::types::{PolicyId, PolicyVersion, PolicyView, RunTermination};
use crate::core::{StepCount, StepUnit, UnitMismatchError};
use crate::env::Episode;

pub type EpisodeStream<'a> = BoxStream<'a, Result<Episode, StoreError>>;

/// The out-of-process medium every role coordinates through.
///
/// Many actors and evaluators read policies and one trainer writes them;
/// actors write episodes and the trainer consumes them. Episodes from one
/// actor are delivered in the order that actor published them.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Rejects an episode id its actor already used with
    /// [`StoreError::DuplicateEpisode`].
    async fn publish_episode(&self, episode: &Episode) -> Result<(), StoreError>;

    /// First episode id that `task_id` can publish without colliding with
    /// anything it published before, consumed or not.
    async fn next_episode_id(&self, task_id: u32) -> Result<u64, StoreError>;

    /// Waits until an episode is available and takes it. Dropping the
    /// returned future before it completes never loses an episode.
    async fn next_episode(&self) -> Result<Episode, StoreError>;

    async fn latest_policy_id(&self) -> Result<Option<PolicyId>, StoreError>;

    async fn load_latest_policy(&self) -> Result<Option<PolicyVersion>, StoreError>;

    /// Publishes `policy`. Ids must be strictly increasing.
    async fn save_policy(&self, policy: &PolicyVersion) -> Result<(), StoreError>;

    /// Records the end of the run. Only the first signal is kept.
    async fn signal_end_of_run(&self, termination: &RunTermination) -> Result<(), StoreError>;

    async fn run_termination(&self) -> Result<Option<RunTermination>, StoreError>;

    async fn end_of_policies(&self) -> Result<bool, StoreError> {
        Ok(self.run_termination().await?.is_some())
    }

    /// Loads the latest policy into `target` if it is newer than what
    /// `target` holds. Returns whether anything was loaded.
    async fn attempt_load_policy(&self, target: &mut PolicyView) -> Result<bool, StoreError> {
        match self.latest_policy_id().await? {
            Some(latest) if target.is_behind(latest) => {}
            _ => return Ok(false),
        }
        Ok(match self.load_latest_policy().await? {
            Some(policy) => target.adopt(policy),
            None => false,
        })
    }

    /// Lazily yields episodes until `limit` environment steps or episodes
    /// have been delivered. Errors are yielded in place and the stream
    /// carries on with the next episode.
    fn fetch_subscribe(&self, limit: StepCount) -> Result<EpisodeStream<'_>, UnitMismatchError> {
        if limit.unit() == StepUnit::TrainingSteps {
            return Err(UnitMismatchError {
                expected: StepUnit::EnvironmentSteps,
                found: limit.unit(),
            });
        }
        let fetched = StepCount::zero(limit.unit());
        let stream = futures::stream::unfold(fetched, move |fetched| async move {
            if fetched.steps() >= limit.steps() {
                return None;
            }
            match self.next_episode().await {
                Ok(episode) => {
                    let grown = episode
                        .extent(fetched.unit())
                        .and_then(|extent| fetched.checked_add(extent));
                    match grown {
                        Ok(grown) => Some((Ok(episode), grown)),
                        Err(err) => Some((Err(err.into()), fetched)),
                    }
                }
                Err(err) => Some((Err(err), fetched)),
            }
        });
        Ok(stream.boxed())
    }
}
