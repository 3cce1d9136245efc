use std::sync::Arc;
use tracing::{debug, info};

use super::{end_of_run, refresh_policy, run_episode, wait_for_policy, with_setup_retries};
use crate::config::EvaluatorConfig;
use crate::control::{PolicyView, RunTermination, SharedStore, TerminationReason};
use crate::core::{EpisodeSummary, RunPhase, StepCount, StepUnit, UnitMismatchError};
use crate::env::Environment;
use crate::error::RoleError;
use crate::learner::Model;
use crate::run::RoleContext;

/// Successes over finished episodes for one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuccessTally {
    pub episodes: u64,
    pub successes: u64,
}

impl SuccessTally {
    pub fn record(&mut self, success: bool) {
        self.episodes += 1;
        if success {
            self.successes += 1;
        }
    }

    pub fn rate(&self) -> Option<f64> {
        (self.episodes > 0).then(|| self.successes as f64 / self.episodes as f64)
    }

    pub fn meets(&self, min_episodes: u64, target_rate: f64) -> bool {
        self.episodes >= min_episodes.max(1) && self.rate().is_some_and(|rate| rate >= target_rate)
    }
}

/// Measures the latest published policy and decides when the run is done.
/// Never writes episodes or policies.
pub struct EvaluatorRole {
    config: EvaluatorConfig,
    model: Box<dyn Model>,
    env: Box<dyn Environment>,
    policy: PolicyView,
    last_tally: SuccessTally,
}

impl EvaluatorRole {
    pub fn new(config: EvaluatorConfig, model: Box<dyn Model>, env: Box<dyn Environment>) -> Self {
        Self {
            config,
            model,
            env,
            policy: PolicyView::new(),
            last_tally: SuccessTally::default(),
        }
    }

    pub fn policy(&self) -> &PolicyView {
        &self.policy
    }

    /// Tally of the most recent `evaluate` call.
    pub fn last_tally(&self) -> SuccessTally {
        self.last_tally
    }

    pub fn close(&mut self) -> Result<(), RoleError> {
        Ok(self.env.close()?)
    }

    pub async fn sync(&mut self, ctx: &RoleContext) -> Result<bool, RoleError> {
        Ok(refresh_policy(ctx, &mut self.policy, self.model.as_mut())
            .await?
            .is_some())
    }

    /// Runs full episodes under the test phase until `budget` is spent or
    /// the run ends, then applies the success criterion. Returns whether the
    /// run should stop.
    pub async fn evaluate(
        &mut self,
        ctx: &mut RoleContext,
        budget: StepCount,
    ) -> Result<bool, RoleError> {
        if budget.unit() == StepUnit::TrainingSteps {
            return Err(UnitMismatchError {
                expected: StepUnit::EnvironmentSteps,
                found: budget.unit(),
            }
            .into());
        }
        let mut tally = SuccessTally::default();
        self.last_tally = tally;
        let Some(mut policy_id) =
            wait_for_policy(ctx, &mut self.policy, self.model.as_mut()).await?
        else {
            return Ok(false);
        };
        let target = ctx.counter.target(budget);

        loop {
            if ctx.counter.reached(target) || end_of_run(ctx).await? {
                break;
            }
            if let Some(id) = refresh_policy(ctx, &mut self.policy, self.model.as_mut()).await? {
                policy_id = id;
            }

            let outcome = {
                let guard = ctx.phase.enter(RunPhase::Test);
                run_episode(
                    self.env.as_mut(),
                    self.model.as_mut(),
                    guard.current(),
                    self.config.max_episode_steps,
                )?
            };
            ctx.counter.add(StepCount::env_steps(outcome.env_steps));
            ctx.counter.add(StepCount::episodes(1));
            ctx.metrics.record(&EpisodeSummary {
                phase: RunPhase::Test,
                policy_id,
                total_reward: outcome.total_reward,
                length: outcome.length,
                env_steps: outcome.env_steps,
            });
            let success = outcome.total_reward >= self.config.success_reward_threshold;
            tally.record(success);
            self.last_tally = tally;
            debug!(
                task = %ctx.task,
                policy_id,
                reward = outcome.total_reward,
                length = outcome.length,
                truncated = outcome.truncated,
                success,
                "evaluation episode"
            );
        }

        let met = tally.meets(self.config.min_episodes, self.config.target_success_rate);
        info!(
            task = %ctx.task,
            policy_id,
            episodes = tally.episodes,
            successes = tally.successes,
            success_rate = tally.rate(),
            target = self.config.target_success_rate,
            met,
            "evaluation finished"
        );
        if !(self.config.apply_stop_condition && met) {
            return Ok(false);
        }

        let termination = RunTermination::new(
            TerminationReason::SuccessRateReached {
                success_rate: tally.rate().unwrap_or_default(),
                episodes: tally.episodes,
                policy_id,
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
        let test = ctx.metrics.phase(RunPhase::Test);
        info!(
            task = %ctx.task,
            policy_id,
            test_episodes = test.episodes,
            test_env_steps = test.env_steps,
            mean_reward = test.mean_reward(),
            "success criterion reached, run ended"
        );
        Ok(true)
    }
}
