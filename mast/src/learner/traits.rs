use super::errors::ModelError;
use crate::core::RunPhase;
use crate::env::{Action, Episode, Observation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The policy/value model and its optimizer.
///
/// All three roles hold one. Actors and evaluators only call `act` and
/// `set_weights`; the trainer additionally calls `train` and `get_weights`.
pub trait Model: Send {
    fn act(&mut self, obs: &Observation, phase: RunPhase) -> Result<Action, ModelError>;
    fn train(&mut self, batch: &[Episode]) -> Result<TrainMetrics, ModelError>;
    fn get_weights(&self) -> Result<Vec<u8>, ModelError>;
    fn set_weights(&mut self, weights: &[u8]) -> Result<(), ModelError>;

    /// Everything a checkpoint must hold to resume training, including any
    /// optimizer state. Defaults to the weights alone.
    fn state(&self) -> Result<Vec<u8>, ModelError> {
        self.get_weights()
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<(), ModelError> {
        self.set_weights(state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub loss: Option<f32>,
    pub values: BTreeMap<String, f32>,
}

impl TrainMetrics {
    pub fn with_loss(loss: f32) -> Self {
        Self {
            loss: Some(loss),
            values: BTreeMap::new(),
        }
    }
}
