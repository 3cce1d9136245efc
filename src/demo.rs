//! Toy collaborators so the binary can run a whole cluster end to end.

use rand::Rng;
use serde::{Deserialize, Serialize};

use mast::RoleError;
use mast::core::RunPhase;
use mast::env::{Action, EnvError, Environment, Episode, Observation};
use mast::learner::{Model, ModelError, TrainMetrics};
use mast::runtime::ComponentFactory;
use mast::{RunConfig, TaskSpec};

const LEFT: u32 = 0;
const RIGHT: u32 = 1;

/// A row of `length` cells. The agent starts in cell 0 and the episode ends
/// when it reaches the last cell or after `max_steps`.
pub struct Corridor {
    length: usize,
    max_steps: u64,
    position: usize,
    steps: u64,
}

impl Corridor {
    pub const GOAL_REWARD: f32 = 1.0;
    pub const STEP_PENALTY: f32 = -0.01;

    pub fn new(length: usize, max_steps: u64) -> Self {
        Self {
            length: length.max(2),
            max_steps,
            position: 0,
            steps: 0,
        }
    }

    fn observe(&self) -> Observation {
        vec![self.position as f32]
    }
}

impl Environment for Corridor {
    fn reset(&mut self) -> Result<Observation, EnvError> {
        self.position = 0;
        self.steps = 0;
        Ok(self.observe())
    }

    fn step(&mut self, act: &Action) -> Result<(Observation, f32, bool), EnvError> {
        match act {
            Action::Discrete(LEFT) => self.position = self.position.saturating_sub(1),
            Action::Discrete(RIGHT) => self.position = (self.position + 1).min(self.length - 1),
            other => return Err(EnvError::UnsupportedAction(format!("{other:?}"))),
        }
        self.steps += 1;

        let at_goal = self.position == self.length - 1;
        let reward = if at_goal {
            Self::GOAL_REWARD
        } else {
            Self::STEP_PENALTY
        };
        Ok((self.observe(), reward, at_goal || self.steps >= self.max_steps))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Table {
    /// `[left, right]` preference per cell.
    preferences: Vec<[f32; 2]>,
}

/// Per-cell action preferences, nudged toward each visit's return.
pub struct TabularPolicy {
    table: Table,
    epsilon: f64,
    learning_rate: f32,
}

impl TabularPolicy {
    pub fn new(cells: usize, epsilon: f64, learning_rate: f32) -> Self {
        Self {
            table: Table {
                preferences: vec![[0.0; 2]; cells],
            },
            epsilon,
            learning_rate,
        }
    }

    fn cell(&self, obs: &Observation) -> Result<usize, ModelError> {
        let cell = obs.first().copied().unwrap_or_default().max(0.0) as usize;
        if cell >= self.table.preferences.len() {
            return Err(ModelError::InvalidWeights(format!(
                "cell {cell} outside a table of {}",
                self.table.preferences.len()
            )));
        }
        Ok(cell)
    }

    fn greedy(&self, cell: usize) -> u32 {
        let [left, right] = self.table.preferences[cell];
        if right >= left { RIGHT } else { LEFT }
    }
}

impl Model for TabularPolicy {
    fn act(&mut self, obs: &Observation, phase: RunPhase) -> Result<Action, ModelError> {
        let cell = self.cell(obs)?;
        let mut rng = rand::rng();
        let action = match phase {
            RunPhase::Train if rng.random_bool(self.epsilon.clamp(0.0, 1.0)) => {
                rng.random_range(LEFT..=RIGHT)
            }
            _ => self.greedy(cell),
        };
        Ok(Action::Discrete(action))
    }

    fn train(&mut self, batch: &[Episode]) -> Result<TrainMetrics, ModelError> {
        let mut error = 0.0;
        let mut updates = 0usize;
        for episode in batch {
            let mut ret = 0.0;
            for t in episode.transitions().iter().rev() {
                ret += t.reward;
                let Action::Discrete(action) = t.action else {
                    continue;
                };
                let cell = self.cell(&t.state)?;
                let slot = &mut self.table.preferences[cell][action.min(RIGHT) as usize];
                let delta = ret - *slot;
                *slot += self.learning_rate * delta;
                error += delta * delta;
                updates += 1;
            }
        }
        Ok(TrainMetrics::with_loss(error / updates.max(1) as f32))
    }

    fn get_weights(&self) -> Result<Vec<u8>, ModelError> {
        serde_json::to_vec(&self.table).map_err(|e| ModelError::ModelError(Box::new(e)))
    }

    fn set_weights(&mut self, weights: &[u8]) -> Result<(), ModelError> {
        // Policy 0 may be published before any table exists.
        if weights.is_empty() {
            return Ok(());
        }
        let table: Table =
            serde_json::from_slice(weights).map_err(|e| ModelError::InvalidWeights(e.to_string()))?;
        if table.preferences.len() != self.table.preferences.len() {
            return Err(ModelError::InvalidWeights(format!(
                "expected {} cells, got {}",
                self.table.preferences.len(),
                table.preferences.len()
            )));
        }
        self.table = table;
        Ok(())
    }
}

/// Builds a corridor and a fresh tabular policy for every role.
#[derive(Debug, Clone, Copy)]
pub struct DemoFactory {
    pub corridor_length: usize,
    pub max_steps: u64,
    pub epsilon: f64,
}

impl Default for DemoFactory {
    fn default() -> Self {
        Self {
            corridor_length: 8,
            max_steps: 50,
            epsilon: 0.2,
        }
    }
}

impl DemoFactory {
    /// Defaults for runs without a config file. Any evaluation episode that
    /// reaches the goal within `max_steps` counts as a success.
    pub fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::default();
        config.evaluator.success_reward_threshold =
            Corridor::GOAL_REWARD + Corridor::STEP_PENALTY * self.max_steps as f32;
        config
    }
}

impl ComponentFactory for DemoFactory {
    fn model(&self, _task: &TaskSpec) -> Result<Box<dyn Model>, RoleError> {
        Ok(Box::new(TabularPolicy::new(
            self.corridor_length,
            self.epsilon,
            0.1,
        )))
    }

    fn environment(&self, _task: &TaskSpec) -> Result<Box<dyn Environment>, RoleError> {
        Ok(Box::new(Corridor::new(self.corridor_length, self.max_steps)))
    }
}
