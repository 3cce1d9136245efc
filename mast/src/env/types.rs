use crate::control::PolicyId;
use crate::core::{StepCount, StepUnit, UnitMismatchError};
use crate::env::errors::EnvError;
use serde::{Deserialize, Serialize};

pub type Observation = Vec<f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Discrete(u32),
    Continuous(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Observation,
    pub action: Action,
    pub reward: f32,
    pub next_state: Observation,
    pub done: bool,
}

/// One complete, immutable run of an environment, tagged with the policy
/// version that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    task_id: u32,
    episode_id: u64,
    policy_id: PolicyId,
    transitions: Vec<Transition>,
}

impl Episode {
    pub fn new(
        task_id: u32,
        episode_id: u64,
        policy_id: PolicyId,
        transitions: Vec<Transition>,
    ) -> Result<Self, EnvError> {
        if transitions.is_empty() {
            return Err(EnvError::EmptyEpisode {
                task_id,
                episode_id,
            });
        }
        Ok(Self {
            task_id,
            episode_id,
            policy_id,
            transitions,
        })
    }

    pub fn task_id(&self) -> u32 {
        self.task_id
    }

    pub fn episode_id(&self) -> u64 {
        self.episode_id
    }

    pub fn policy_id(&self) -> PolicyId {
        self.policy_id
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Number of transitions; always at least one.
    pub fn length(&self) -> u64 {
        self.transitions.len() as u64
    }

    pub fn total_reward(&self) -> f32 {
        self.transitions.iter().map(|t| t.reward).sum()
    }

    /// Size of this episode in `unit`: its length in environment steps, or
    /// one in environment episodes.
    pub fn extent(&self, unit: StepUnit) -> Result<StepCount, UnitMismatchError> {
        match unit {
            StepUnit::EnvironmentSteps => Ok(StepCount::env_steps(self.length())),
            StepUnit::EnvironmentEpisodes => Ok(StepCount::episodes(1)),
            StepUnit::TrainingSteps => Err(UnitMismatchError {
                expected: StepUnit::EnvironmentSteps,
                found: unit,
            }),
        }
    }
}

/// The episode an actor is currently building.
///
/// The policy id is fixed when the buffer is started and carried into the
/// finished [`Episode`] unchanged.
#[derive(Debug, Clone)]
pub struct EpisodeBuffer {
    policy_id: PolicyId,
    transitions: Vec<Transition>,
}

impl EpisodeBuffer {
    pub fn start(policy_id: PolicyId) -> Self {
        Self {
            policy_id,
            transitions: Vec::new(),
        }
    }

    pub fn policy_id(&self) -> PolicyId {
        self.policy_id
    }

    pub fn push(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn finish(self, task_id: u32, episode_id: u64) -> Result<Episode, EnvError> {
        Episode::new(task_id, episode_id, self.policy_id, self.transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(reward: f32, done: bool) -> Transition {
        Transition {
            state: vec![0.0],
            action: Action::Discrete(1),
            reward,
            next_state: vec![1.0],
            done,
        }
    }

    #[test]
    fn test_empty_episode_rejected() {
        let err = Episode::new(2, 7, 0, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            EnvError::EmptyEpisode {
                task_id: 2,
                episode_id: 7
            }
        ));
    }

    #[test]
    fn test_episode_length_and_reward() {
        let episode = Episode::new(
            0,
            0,
            3,
            vec![transition(0.5, false), transition(1.0, true)],
        )
        .unwrap();
        assert_eq!(episode.length(), 2);
        assert_eq!(episode.total_reward(), 1.5);
        assert_eq!(episode.policy_id(), 3);
    }

    #[test]
    fn test_extent_by_unit() {
        let episode = Episode::new(0, 0, 0, vec![transition(0.0, false); 5]).unwrap();
        assert_eq!(
            episode.extent(StepUnit::EnvironmentSteps),
            Ok(StepCount::env_steps(5))
        );
        assert_eq!(
            episode.extent(StepUnit::EnvironmentEpisodes),
            Ok(StepCount::episodes(1))
        );
        assert!(episode.extent(StepUnit::TrainingSteps).is_err());
    }

    #[test]
    fn test_buffer_keeps_start_policy() {
        let mut buffer = EpisodeBuffer::start(4);
        buffer.push(transition(1.0, true));
        let episode = buffer.finish(1, 9).unwrap();
        assert_eq!(episode.policy_id(), 4);
        assert_eq!(episode.task_id(), 1);
        assert_eq!(episode.episode_id(), 9);
    }
}
