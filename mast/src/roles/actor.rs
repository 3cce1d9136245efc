use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{end_of_run, refresh_policy, wait_for_policy, with_setup_retries};
use crate::config::ActorConfig;
use crate::control::{PolicyId, PolicyView, SharedStore};
use crate::core::{EpisodeSummary, StepCount, StepUnit, UnitMismatchError};
use crate::env::{Environment, Episode, EpisodeBuffer, Observation, Transition};
use crate::error::RoleError;
use crate::learner::Model;
use crate::run::RoleContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActStats {
    pub env_steps: u64,
    pub episodes_published: u64,
    /// Incomplete episodes dropped at the end of the loop, and complete ones
    /// the store never accepted.
    pub episodes_discarded: u64,
    pub policy_loads: u64,
    pub stopped_by_end_of_run: bool,
}

struct InFlight {
    buffer: EpisodeBuffer,
    obs: Observation,
}

/// Generates experience with the latest policy it has seen.
pub struct ActorRole {
    config: ActorConfig,
    task_id: u32,
    model: Box<dyn Model>,
    env: Box<dyn Environment>,
    policy: PolicyView,
    next_episode_id: u64,
    /// A finished episode the store has not accepted yet.
    pending: Option<Episode>,
}

impl ActorRole {
    pub fn new(
        config: ActorConfig,
        task_id: u32,
        model: Box<dyn Model>,
        env: Box<dyn Environment>,
    ) -> Self {
        Self {
            config,
            task_id,
            model,
            env,
            policy: PolicyView::new(),
            next_episode_id: 0,
            pending: None,
        }
    }

    pub fn policy(&self) -> &PolicyView {
        &self.policy
    }

    /// Releases the environment. The role cannot act afterwards.
    pub fn close(&mut self) -> Result<(), RoleError> {
        Ok(self.env.close()?)
    }

    pub async fn sync(&mut self, ctx: &RoleContext) -> Result<bool, RoleError> {
        Ok(refresh_policy(ctx, &mut self.policy, self.model.as_mut())
            .await?
            .is_some())
    }

    /// Steps the environment until `budget` more environment steps (or
    /// episodes) are done or the run ends. Incomplete episodes are never
    /// published.
    pub async fn act(
        &mut self,
        ctx: &mut RoleContext,
        budget: StepCount,
    ) -> Result<ActStats, RoleError> {
        if budget.unit() == StepUnit::TrainingSteps {
            return Err(UnitMismatchError {
                expected: StepUnit::EnvironmentSteps,
                found: budget.unit(),
            }
            .into());
        }
        let loads_before = self.policy.loads();
        let mut stats = ActStats::default();

        let Some(mut active_policy) =
            wait_for_policy(ctx, &mut self.policy, self.model.as_mut()).await?
        else {
            stats.stopped_by_end_of_run = true;
            return Ok(stats);
        };

        // A restarted actor continues after every id it used before.
        let store = Arc::clone(&ctx.store);
        let store: &dyn SharedStore = store.as_ref();
        let task_id = self.task_id;
        let first_free = with_setup_retries(ctx, "reserve episode ids", move || {
            store.next_episode_id(task_id)
        })
        .await?;
        self.next_episode_id = self.next_episode_id.max(first_free);

        let target = ctx.counter.target(budget);
        let interval = self.config.policy_check_interval;
        let mut last_check = ctx.counter.get(StepUnit::EnvironmentSteps);
        let mut in_flight: Option<InFlight> = None;

        loop {
            if ctx.counter.reached(target) {
                break;
            }
            if end_of_run(ctx).await? {
                stats.stopped_by_end_of_run = true;
                break;
            }
            if let Some(episode) = self.pending.take() {
                if !self.publish(ctx, episode, &mut stats).await? {
                    tokio::time::sleep(ctx.timing.retry_backoff()).await;
                    continue;
                }
            }

            let steps = ctx.counter.get(StepUnit::EnvironmentSteps);
            if steps - last_check >= interval {
                last_check = steps;
                if let Some(id) =
                    refresh_policy(ctx, &mut self.policy, self.model.as_mut()).await?
                {
                    active_policy = id;
                }
            }

            if in_flight.is_none() {
                in_flight = Some(InFlight {
                    buffer: EpisodeBuffer::start(active_policy),
                    obs: self.env.reset()?,
                });
            }
            let Some(flight) = in_flight.as_mut() else {
                continue;
            };

            let action = self.model.act(&flight.obs, ctx.phase)?;
            let (next_obs, reward, done) = self.env.step(&action)?;
            let frames = self.env.frames_per_step().max(1);
            let state = std::mem::replace(&mut flight.obs, next_obs.clone());
            flight.buffer.push(Transition {
                state,
                action,
                reward,
                next_state: next_obs,
                done,
            });
            ctx.counter.add(StepCount::env_steps(frames));
            stats.env_steps += frames;

            if done {
                if let Some(flight) = in_flight.take() {
                    let episode = self.finish(ctx, flight.buffer, frames)?;
                    if !self.publish(ctx, episode, &mut stats).await? {
                        tokio::time::sleep(ctx.timing.retry_backoff()).await;
                    }
                }
            }
        }

        if let Some(flight) = in_flight.take() {
            if !flight.buffer.is_empty() {
                stats.episodes_discarded += 1;
                debug!(
                    task = %ctx.task,
                    steps = flight.buffer.len(),
                    policy_id = flight.buffer.policy_id(),
                    "discarding incomplete episode"
                );
            }
        }
        if let Some(episode) = self.pending.take() {
            if stats.stopped_by_end_of_run || !self.publish(ctx, episode, &mut stats).await? {
                stats.episodes_discarded += 1;
            }
        }

        stats.policy_loads = self.policy.loads() - loads_before;
        info!(
            task = %ctx.task,
            env_steps = stats.env_steps,
            published = stats.episodes_published,
            discarded = stats.episodes_discarded,
            policy_loads = stats.policy_loads,
            "actor loop finished"
        );
        Ok(stats)
    }

    fn finish(
        &mut self,
        ctx: &mut RoleContext,
        buffer: EpisodeBuffer,
        frames: u64,
    ) -> Result<Episode, RoleError> {
        let episode = buffer.finish(self.task_id, self.next_episode_id)?;
        self.next_episode_id += 1;
        ctx.counter.add(StepCount::episodes(1));
        ctx.metrics.record(&EpisodeSummary {
            phase: ctx.phase,
            policy_id: episode.policy_id(),
            total_reward: episode.total_reward(),
            length: episode.length(),
            env_steps: episode.length() * frames,
        });
        Ok(episode)
    }

    /// Returns false when the store failed transiently; the episode is kept
    /// as pending and goes out before anything newer from this actor.
    async fn publish(
        &mut self,
        ctx: &RoleContext,
        episode: Episode,
        stats: &mut ActStats,
    ) -> Result<bool, RoleError> {
        match ctx.store.publish_episode(&episode).await {
            Ok(()) => {
                stats.episodes_published += 1;
                debug!(
                    task = %ctx.task,
                    episode_id = episode.episode_id(),
                    policy_id = episode.policy_id(),
                    length = episode.length(),
                    "published episode"
                );
                Ok(true)
            }
            Err(e) if e.is_transient() => {
                warn!(
                    task = %ctx.task,
                    episode_id = episode.episode_id(),
                    error = %e,
                    "episode publish failed, will retry"
                );
                self.pending = Some(episode);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn current_policy(&self) -> Option<PolicyId> {
        self.policy.id()
    }
}
