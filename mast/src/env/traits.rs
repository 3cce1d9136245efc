use crate::env::errors::EnvError;
use crate::env::types::{Action, Observation};

/// The simulation an actor or evaluator drives.
///
/// `step` returns the next observation, the reward and whether the episode
/// is over. Environments that repeat an action over several frames report
/// that through [`Environment::frames_per_step`]; each call to `step` then
/// consumes that many environment steps of a role's budget.
pub trait Environment: Send {
    fn reset(&mut self) -> Result<Observation, EnvError>;
    fn step(&mut self, act: &Action) -> Result<(Observation, f32, bool), EnvError>;

    fn frames_per_step(&self) -> u64 {
        1
    }

    fn close(&mut self) -> Result<(), EnvError> {
        Ok(())
    }
}
