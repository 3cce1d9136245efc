use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::checkpoint::CheckpointConfig;
use crate::core::{StepCount, StepUnit};
use crate::run::TaskSpec;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a process needs to play its part in a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub task: TaskSpec,
    pub actor: ActorConfig,
    pub trainer: TrainerConfig,
    pub evaluator: EvaluatorConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    pub steps_to_act: StepCount,
    /// Environment steps between two policy refresh attempts.
    pub policy_check_interval: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            steps_to_act: StepCount::env_steps(100_000),
            policy_check_interval: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub training_steps: StepCount,
    /// Experience fetched per training iteration, in whole episodes.
    pub num_consecutive_playing_steps: StepCount,
    /// Fetched experience between two policy publications.
    pub publish_policy_every_num_fetched_steps: StepCount,
    /// Clear the experience memory after every training update.
    pub on_policy: bool,
    /// Episodes kept in memory when not on-policy.
    pub memory_capacity: usize,
    /// Raise end-of-run once the training budget is spent. Off by default,
    /// leaving the end of the run to the evaluator.
    pub signal_end_on_budget: bool,
    pub checkpoint: Option<CheckpointConfig>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            training_steps: StepCount::training_steps(1_000),
            num_consecutive_playing_steps: StepCount::env_steps(2_048),
            publish_policy_every_num_fetched_steps: StepCount::env_steps(2_048),
            on_policy: true,
            memory_capacity: 1_000,
            signal_end_on_budget: false,
            checkpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Budget of one `evaluate` call.
    pub evaluation_steps: StepCount,
    pub max_iterations: Option<u64>,
    pub target_success_rate: f64,
    /// An evaluation episode succeeds when its total reward reaches this.
    pub success_reward_threshold: f32,
    pub min_episodes: u64,
    pub apply_stop_condition: bool,
    pub max_episode_steps: Option<u64>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            evaluation_steps: StepCount::episodes(10),
            max_iterations: None,
            target_success_rate: 0.9,
            success_reward_threshold: 1.0,
            min_episodes: 1,
            apply_stop_condition: true,
            max_episode_steps: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Poll period while waiting for the first policy.
    pub sync_poll_ms: u64,
    /// Longest the trainer waits for one episode before re-checking end-of-run.
    pub idle_wait_ms: u64,
    /// Pause after a transient store failure.
    pub retry_backoff_ms: u64,
    /// Directory scan period of the file store.
    pub store_poll_ms: u64,
    /// Attempts at start-up store operations before giving up.
    pub setup_retries: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sync_poll_ms: 100,
            idle_wait_ms: 500,
            retry_backoff_ms: 250,
            store_poll_ms: 50,
            setup_retries: 40,
        }
    }
}

impl TimingConfig {
    pub fn sync_poll(&self) -> Duration {
        Duration::from_millis(self.sync_poll_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn store_poll(&self) -> Duration {
        Duration::from_millis(self.store_poll_ms)
    }
}

impl RunConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actor.policy_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "actor.policy_check_interval must be positive".to_string(),
            ));
        }
        let fetch = self.trainer.num_consecutive_playing_steps;
        if fetch.unit() == StepUnit::TrainingSteps || fetch.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "trainer.num_consecutive_playing_steps must be a positive number of environment steps or episodes, got {fetch}"
            )));
        }
        let rate = self.evaluator.target_success_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::Invalid(format!(
                "evaluator.target_success_rate must be within [0, 1], got {rate}"
            )));
        }
        if self.evaluator.evaluation_steps.unit() == StepUnit::TrainingSteps {
            return Err(ConfigError::Invalid(
                "evaluator.evaluation_steps cannot be counted in training steps".to_string(),
            ));
        }
        if self.actor.steps_to_act.unit() == StepUnit::TrainingSteps {
            return Err(ConfigError::Invalid(
                "actor.steps_to_act cannot be counted in training steps".to_string(),
            ));
        }
        if self.timing.idle_wait_ms == 0 || self.timing.sync_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "timing.idle_wait_ms and timing.sync_poll_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
