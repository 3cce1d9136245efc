use futures::StreamExt;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{end_of_run, with_setup_retries};
use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::config::TrainerConfig;
use crate::control::{
    PolicyId, PolicyPublisher, PolicyVersion, RunTermination, SharedStore, TerminationReason,
};
use crate::core::{StepCount, StepUnit};
use crate::error::RoleError;
use crate::learner::{EpisodicMemory, Model};
use crate::run::RoleContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainStats {
    pub training_steps: u64,
    pub accepted_episodes: u64,
    /// Environment steps in accepted episodes.
    pub accepted_steps: u64,
    pub stale_episodes: u64,
    pub policies_published: u64,
    pub checkpoints_written: u64,
    pub final_policy_id: PolicyId,
    pub budget_exhausted: bool,
}

enum Fetch {
    Filled,
    RunEnded,
}

/// Consumes on-policy experience and publishes the policies built from it.
/// The only role that writes policies.
pub struct TrainerRole {
    config: TrainerConfig,
    model: Box<dyn Model>,
    publisher: Option<PolicyPublisher>,
    memory: EpisodicMemory,
    checkpointer: Option<Box<dyn Checkpointer>>,
    /// Fetched experience at the last publish.
    last_publish: StepCount,
    /// Policy id and training steps of the last checkpoint.
    last_checkpoint: Option<(PolicyId, u64)>,
}

impl TrainerRole {
    pub fn new(
        config: TrainerConfig,
        model: Box<dyn Model>,
        checkpointer: Option<Box<dyn Checkpointer>>,
    ) -> Self {
        let memory = EpisodicMemory::new(config.memory_capacity);
        let last_publish = StepCount::zero(config.publish_policy_every_num_fetched_steps.unit());
        Self {
            config,
            model,
            publisher: None,
            memory,
            checkpointer,
            last_publish,
            last_checkpoint: None,
        }
    }

    /// `None` until the baseline is established.
    pub fn latest_policy_id(&self) -> Option<PolicyId> {
        self.publisher.as_ref().map(PolicyPublisher::latest_id)
    }

    pub fn memory(&self) -> &EpisodicMemory {
        &self.memory
    }

    /// Establishes the baseline policy once. Later calls are no-ops.
    pub async fn sync(&mut self, ctx: &mut RoleContext) -> Result<bool, RoleError> {
        if self.publisher.is_some() {
            return Ok(false);
        }
        let publisher = self.establish_baseline(ctx).await?;
        self.publisher = Some(publisher);
        Ok(true)
    }

    /// Runs fetch, train and publish iterations until `budget` is spent or
    /// the run ends.
    pub async fn train(
        &mut self,
        ctx: &mut RoleContext,
        budget: StepCount,
    ) -> Result<TrainStats, RoleError> {
        let mut publisher = match self.publisher.take() {
            Some(publisher) => publisher,
            None => self.establish_baseline(ctx).await?,
        };
        let result = self.train_loop(ctx, &mut publisher, budget).await;
        self.publisher = Some(publisher);
        result
    }

    async fn train_loop(
        &mut self,
        ctx: &mut RoleContext,
        publisher: &mut PolicyPublisher,
        budget: StepCount,
    ) -> Result<TrainStats, RoleError> {
        let target = ctx.counter.target(budget);
        let mut stats = TrainStats::default();

        loop {
            if ctx.counter.reached(target) {
                stats.budget_exhausted = true;
                break;
            }
            if end_of_run(ctx).await? {
                break;
            }
            if let Fetch::RunEnded = self.fetch(ctx, publisher, &mut stats).await? {
                break;
            }

            let metrics = self.model.train(self.memory.episodes())?;
            ctx.counter.add(StepCount::training_steps(1));
            stats.training_steps += 1;
            debug!(
                task = %ctx.task,
                training_steps = ctx.counter.get(StepUnit::TrainingSteps),
                episodes = self.memory.num_episodes(),
                loss = ?metrics.loss,
                "training step"
            );
            if self.config.on_policy {
                self.memory.clear();
            }

            self.maybe_publish(ctx, publisher, &mut stats).await?;
        }

        if self.write_checkpoint(ctx, publisher, true)? {
            stats.checkpoints_written += 1;
        }
        stats.final_policy_id = publisher.latest_id();

        if stats.budget_exhausted && self.config.signal_end_on_budget {
            let termination = RunTermination::new(
                TerminationReason::TrainingBudgetExhausted {
                    training_steps: ctx.counter.get(StepUnit::TrainingSteps),
                    policy_id: publisher.latest_id(),
                },
                ctx.task.to_string(),
            );
            let store = Arc::clone(&ctx.store);
            let store: &dyn SharedStore = store.as_ref();
            let termination = &termination;
            with_setup_retries(ctx, "signal the end of the run", move || {
                store.signal_end_of_run(termination)
            })
            .await?;
            info!(task = %ctx.task, policy_id = publisher.latest_id(), "training budget spent, run ended");
        }

        info!(
            task = %ctx.task,
            training_steps = stats.training_steps,
            accepted = stats.accepted_episodes,
            stale = stats.stale_episodes,
            published = stats.policies_published,
            "trainer loop finished"
        );
        Ok(stats)
    }

    /// Pulls whole episodes until the accepted ones cover
    /// `num_consecutive_playing_steps`. Stale episodes are dropped and do not
    /// count.
    async fn fetch(
        &mut self,
        ctx: &mut RoleContext,
        publisher: &PolicyPublisher,
        stats: &mut TrainStats,
    ) -> Result<Fetch, RoleError> {
        let target = self.config.num_consecutive_playing_steps;
        let idle_wait = ctx.timing.idle_wait();
        let store = Arc::clone(&ctx.store);
        let mut accepted = StepCount::zero(target.unit());

        while accepted.steps() < target.steps() {
            let mut episodes = store.fetch_subscribe(target.checked_sub(accepted)?)?;
            loop {
                let next = match tokio::time::timeout(idle_wait, episodes.next()).await {
                    Ok(Some(next)) => next,
                    Ok(None) => break,
                    Err(_) => {
                        if end_of_run(ctx).await? {
                            debug!(task = %ctx.task, "run ended while waiting for episodes");
                            return Ok(Fetch::RunEnded);
                        }
                        continue;
                    }
                };
                let episode = match next {
                    Ok(episode) => episode,
                    Err(e) if e.is_transient() => {
                        warn!(task = %ctx.task, error = %e, "episode fetch failed");
                        tokio::time::sleep(ctx.timing.retry_backoff()).await;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                if let Err(stale) = publisher.check_fresh(&episode) {
                    stats.stale_episodes += 1;
                    info!(
                        task = %ctx.task,
                        actor = stale.task_id,
                        episode_id = stale.episode_id,
                        episode_policy = stale.episode_policy,
                        trainer_policy = stale.trainer_policy,
                        "discarding stale episode"
                    );
                    continue;
                }

                accepted = accepted.checked_add(episode.extent(accepted.unit())?)?;
                ctx.counter.add(StepCount::env_steps(episode.length()));
                ctx.counter.add(StepCount::episodes(1));
                stats.accepted_episodes += 1;
                stats.accepted_steps += episode.length();
                self.memory.store_episode(episode);

                if accepted.steps() >= target.steps() {
                    break;
                }
            }
        }
        Ok(Fetch::Filled)
    }

    async fn maybe_publish(
        &mut self,
        ctx: &RoleContext,
        publisher: &mut PolicyPublisher,
        stats: &mut TrainStats,
    ) -> Result<(), RoleError> {
        let threshold = self.config.publish_policy_every_num_fetched_steps;
        let since = ctx
            .counter
            .count(threshold.unit())
            .checked_sub(self.last_publish)?;
        if since.try_cmp(&threshold)? == Ordering::Less {
            return Ok(());
        }

        let version = publisher.next_version(self.model.get_weights()?);
        match ctx.store.save_policy(&version).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!(
                    task = %ctx.task,
                    policy_id = version.id,
                    error = %e,
                    "policy publish failed, will retry next iteration"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        info!(task = %ctx.task, policy_id = version.id, since = %since, "published policy");
        publisher.commit(version);
        stats.policies_published += 1;
        self.last_publish = ctx.counter.count(threshold.unit());

        if self.write_checkpoint(ctx, publisher, false)? {
            stats.checkpoints_written += 1;
        }
        Ok(())
    }

    /// Writes a checkpoint if one is configured and due. `force` skips the
    /// `save_every` spacing but never repeats an identical checkpoint.
    fn write_checkpoint(
        &mut self,
        ctx: &RoleContext,
        publisher: &PolicyPublisher,
        force: bool,
    ) -> Result<bool, RoleError> {
        let Some(checkpointer) = self.checkpointer.as_mut() else {
            return Ok(false);
        };
        let policy_id = publisher.latest_id();
        let steps = ctx.counter.get(StepUnit::TrainingSteps);
        if let Some((last_policy, last_steps)) = self.last_checkpoint {
            if (last_policy, last_steps) == (policy_id, steps) {
                return Ok(false);
            }
            if !force && steps.saturating_sub(last_steps) < checkpointer.save_every() {
                return Ok(false);
            }
        }

        let checkpoint = Checkpoint {
            policy: publisher.latest().clone(),
            model_state: self.model.state()?,
            counter: ctx.counter.clone(),
            last_publish: self.last_publish,
        };
        let info = checkpointer.save(&checkpoint)?;
        self.last_checkpoint = Some((policy_id, steps));
        info!(
            task = %ctx.task,
            path = %info.path.display(),
            policy_id,
            training_steps = steps,
            "wrote checkpoint"
        );
        Ok(true)
    }

    /// Resumes from the latest checkpoint and the store's latest policy,
    /// whichever is newer. With neither, publishes the model's initial
    /// weights as policy 0 so actors can start.
    async fn establish_baseline(
        &mut self,
        ctx: &mut RoleContext,
    ) -> Result<PolicyPublisher, RoleError> {
        let restored = match &self.checkpointer {
            Some(checkpointer) => checkpointer.load_latest()?,
            None => None,
        };
        let threshold_unit = self.last_publish.unit();
        let mut from_checkpoint = None;
        match restored {
            Some(checkpoint) => {
                self.model.restore_state(&checkpoint.model_state)?;
                ctx.counter.catch_up(&checkpoint.counter);
                self.last_publish = if checkpoint.last_publish.unit() == threshold_unit {
                    checkpoint.last_publish
                } else {
                    ctx.counter.count(threshold_unit)
                };
                self.last_checkpoint = Some((
                    checkpoint.policy.id,
                    ctx.counter.get(StepUnit::TrainingSteps),
                ));
                info!(
                    task = %ctx.task,
                    policy_id = checkpoint.policy.id,
                    training_steps = ctx.counter.get(StepUnit::TrainingSteps),
                    "resuming from checkpoint"
                );
                from_checkpoint = Some(checkpoint.policy);
            }
            None => self.last_publish = ctx.counter.count(threshold_unit),
        }

        let store = Arc::clone(&ctx.store);
        let store: &dyn SharedStore = store.as_ref();
        let published = with_setup_retries(ctx, "load the latest policy", move || {
            store.load_latest_policy()
        })
        .await?;

        let baseline = match (from_checkpoint, published) {
            (Some(restored), Some(published)) if published.id > restored.id => {
                warn!(
                    task = %ctx.task,
                    restored = restored.id,
                    published = published.id,
                    "store is ahead of the checkpoint, adopting its policy"
                );
                self.model.set_weights(&published.weights)?;
                published
            }
            (Some(restored), Some(published)) if published.id == restored.id => restored,
            (Some(restored), _) => {
                publish_baseline(ctx, store, &restored).await?;
                restored
            }
            (None, Some(published)) => {
                self.model.set_weights(&published.weights)?;
                published
            }
            (None, None) => {
                let initial = PolicyVersion::new(0, self.model.get_weights()?);
                publish_baseline(ctx, store, &initial).await?;
                initial
            }
        };
        info!(task = %ctx.task, policy_id = baseline.id, "trainer baseline established");
        Ok(PolicyPublisher::new(baseline))
    }
}

async fn publish_baseline(
    ctx: &RoleContext,
    store: &dyn SharedStore,
    version: &PolicyVersion,
) -> Result<(), RoleError> {
    with_setup_retries(ctx, "publish the baseline policy", move || {
        store.save_policy(version)
    })
    .await
}
