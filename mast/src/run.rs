//! Per-process dispatch: one process, one role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::checkpoint::{Checkpointer, FileCheckpointer};
use crate::config::{RunConfig, TimingConfig};
use crate::control::{RunTermination, SharedStore};
use crate::core::{RunMetrics, RunPhase, StepCounter};
use crate::env::Environment;
use crate::error::RoleError;
use crate::learner::Model;
use crate::roles::{self, ActStats, ActorRole, EvaluatorRole, TrainStats, TrainerRole};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    #[default]
    Actor,
    Trainer,
    Evaluator,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Actor => f.write_str("actor"),
            RoleKind::Trainer => f.write_str("trainer"),
            RoleKind::Evaluator => f.write_str("evaluator"),
        }
    }
}

impl FromStr for RoleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "actor" => Ok(RoleKind::Actor),
            "trainer" => Ok(RoleKind::Trainer),
            "evaluator" => Ok(RoleKind::Evaluator),
            other => Err(format!(
                "unknown role '{other}', expected actor, trainer or evaluator"
            )),
        }
    }
}

/// Which role this process plays, and its index among processes of that
/// role. An actor's index is the `task_id` on every episode it publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub role: RoleKind,
    pub index: u32,
}

impl TaskSpec {
    pub fn new(role: RoleKind, index: u32) -> Self {
        Self { role, index }
    }

    pub fn actor(index: u32) -> Self {
        Self::new(RoleKind::Actor, index)
    }

    pub fn trainer() -> Self {
        Self::new(RoleKind::Trainer, 0)
    }

    pub fn evaluator(index: u32) -> Self {
        Self::new(RoleKind::Evaluator, index)
    }
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role, self.index)
    }
}

/// State owned by the orchestrator and lent to the active role for each
/// loop. Nothing in here is ever shared with another role.
pub struct RoleContext {
    pub task: TaskSpec,
    pub store: Arc<dyn SharedStore>,
    pub counter: StepCounter,
    pub phase: RunPhase,
    pub metrics: RunMetrics,
    pub timing: TimingConfig,
}

impl RoleContext {
    pub fn new(task: TaskSpec, store: Arc<dyn SharedStore>, timing: TimingConfig) -> Self {
        Self {
            task,
            store,
            counter: StepCounter::new(),
            phase: RunPhase::Train,
            metrics: RunMetrics::default(),
            timing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleOutcome {
    Acted(ActStats),
    Trained(TrainStats),
    Evaluated { iterations: u64, should_stop: bool },
}

/// What a role did over its whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task: TaskSpec,
    pub outcome: RoleOutcome,
    pub counter: StepCounter,
    pub metrics: RunMetrics,
    pub termination: Option<RunTermination>,
}

enum Role {
    Actor(ActorRole),
    Trainer(TrainerRole),
    Evaluator(EvaluatorRole),
}

pub struct RunOrchestrator {
    config: RunConfig,
    ctx: RoleContext,
    role: Role,
    stop_requested: bool,
}

impl RunOrchestrator {
    /// Resolves the role named by `config.task`. Actors and evaluators need
    /// an environment; the trainer ignores it.
    pub fn new(
        config: RunConfig,
        store: Arc<dyn SharedStore>,
        model: Box<dyn Model>,
        env: Option<Box<dyn Environment>>,
    ) -> Result<Self, RoleError> {
        config.validate()?;
        let task = config.task;
        let role = match task.role {
            RoleKind::Actor => {
                let env = env.ok_or(RoleError::MissingEnvironment(task.role))?;
                Role::Actor(ActorRole::new(config.actor.clone(), task.index, model, env))
            }
            RoleKind::Trainer => {
                let checkpointer = match &config.trainer.checkpoint {
                    Some(checkpoint) => Some(
                        Box::new(FileCheckpointer::new(checkpoint.clone())?)
                            as Box<dyn Checkpointer>,
                    ),
                    None => None,
                };
                Role::Trainer(TrainerRole::new(config.trainer.clone(), model, checkpointer))
            }
            RoleKind::Evaluator => {
                let env = env.ok_or(RoleError::MissingEnvironment(task.role))?;
                Role::Evaluator(EvaluatorRole::new(config.evaluator.clone(), model, env))
            }
        };
        let ctx = RoleContext::new(task, store, config.timing.clone());
        Ok(Self {
            config,
            ctx,
            role,
            stop_requested: false,
        })
    }

    pub fn task(&self) -> TaskSpec {
        self.ctx.task
    }

    pub fn context(&self) -> &RoleContext {
        &self.ctx
    }

    /// Refreshes the role's local policy from the store. Returns whether
    /// anything changed. For the trainer this establishes its baseline.
    pub async fn sync(&mut self) -> Result<bool, RoleError> {
        match &mut self.role {
            Role::Actor(actor) => actor.sync(&self.ctx).await,
            Role::Trainer(trainer) => trainer.sync(&mut self.ctx).await,
            Role::Evaluator(evaluator) => evaluator.sync(&self.ctx).await,
        }
    }

    /// Whether an evaluation in this process decided to stop, or any role
    /// signalled the end of the run.
    pub async fn should_stop(&mut self) -> Result<bool, RoleError> {
        if self.stop_requested {
            return Ok(true);
        }
        roles::end_of_run(&self.ctx).await
    }

    pub async fn run(mut self) -> Result<RunReport, RoleError> {
        info!(task = %self.ctx.task, "starting role");
        let outcome = match &mut self.role {
            Role::Actor(actor) => {
                let budget = self.config.actor.steps_to_act;
                actor.act(&mut self.ctx, budget).await.map(RoleOutcome::Acted)
            }
            Role::Trainer(trainer) => {
                let budget = self.config.trainer.training_steps;
                trainer.train(&mut self.ctx, budget).await.map(RoleOutcome::Trained)
            }
            Role::Evaluator(_) => self.run_evaluations().await,
        };
        // The environment is released even when the loop failed.
        let closed = self.close_environment();
        let outcome = outcome?;
        closed?;

        let termination = match self.ctx.store.run_termination().await {
            Ok(termination) => termination,
            Err(e) => {
                warn!(task = %self.ctx.task, error = %e, "could not read run termination");
                None
            }
        };
        info!(task = %self.ctx.task, counter = ?self.ctx.counter, "role finished");
        Ok(RunReport {
            task: self.ctx.task,
            outcome,
            counter: self.ctx.counter,
            metrics: self.ctx.metrics,
            termination,
        })
    }

    fn close_environment(&mut self) -> Result<(), RoleError> {
        match &mut self.role {
            Role::Actor(actor) => actor.close(),
            Role::Trainer(_) => Ok(()),
            Role::Evaluator(evaluator) => evaluator.close(),
        }
    }

    async fn run_evaluations(&mut self) -> Result<RoleOutcome, RoleError> {
        let budget = self.config.evaluator.evaluation_steps;
        let max_iterations = self.config.evaluator.max_iterations;
        let mut iterations = 0;
        loop {
            if max_iterations.is_some_and(|max| iterations >= max) {
                break;
            }
            if self.should_stop().await? {
                break;
            }
            let Role::Evaluator(evaluator) = &mut self.role else {
                break;
            };
            let should_stop = evaluator.evaluate(&mut self.ctx, budget).await?;
            iterations += 1;
            if should_stop {
                self.stop_requested = true;
                break;
            }
        }
        Ok(RoleOutcome::Evaluated {
            iterations,
            should_stop: self.stop_requested,
        })
    }
}
